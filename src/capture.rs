//! Outbound microphone capture
//!
//! A dedicated thread pulls fixed-size blocks from the microphone, encodes each
//! one as 16 kHz PCM and hands it to the session without waiting for delivery.

use crate::pcm::{encode_outbound, INPUT_SAMPLE_RATE};
use crate::transport::SharedHandle;
use crate::video::FrameSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Samples per capture block.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Custom error for capture devices
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("microphone unavailable: {0}")]
    Microphone(String),
    #[error("camera unavailable: {0}")]
    Camera(String),
    #[error("audio output unavailable: {0}")]
    Output(String),
    #[error("device read failed: {0}")]
    Read(String),
    #[error("failed to start capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// What the session asks of the microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrophoneConstraints {
    pub sample_rate: u32,
    pub channels: u8,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for MicrophoneConstraints {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl MicrophoneConstraints {
    pub fn wants_processing(&self) -> bool {
        self.echo_cancellation || self.noise_suppression || self.auto_gain_control
    }
}

/// An acquired microphone. Dropping it releases the device.
pub trait Microphone: Send {
    /// Block until `block` is filled with samples in [-1, 1].
    fn read_block(&mut self, block: &mut [f32]) -> Result<(), DeviceError>;
}

/// Acquires the capture devices for a session.
pub trait CaptureDevices {
    fn open_microphone(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> Result<Box<dyn Microphone>, DeviceError>;

    fn open_camera(&self) -> Result<Box<dyn FrameSource>, DeviceError>;
}

/// Enabled flag of the local microphone track. A disabled track keeps its
/// cadence but carries silence.
#[derive(Debug, Clone)]
pub struct MicTrack {
    enabled: Arc<AtomicBool>,
}

impl MicTrack {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

impl Default for MicTrack {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Running microphone-to-session pipeline.
pub struct AudioCapturer {
    running: Arc<AtomicBool>,
    blocks_sent: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl AudioCapturer {
    pub fn start(
        microphone: Box<dyn Microphone>,
        handle: SharedHandle,
        track: MicTrack,
        block_size: usize,
    ) -> Result<Self, DeviceError> {
        let running = Arc::new(AtomicBool::new(true));
        let blocks_sent = Arc::new(AtomicU64::new(0));

        let loop_running = running.clone();
        let loop_sent = blocks_sent.clone();
        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                capture_loop(microphone, handle, track, block_size, loop_running, loop_sent)
            })?;

        info!("Microphone capture started ({} samples per block)", block_size);
        Ok(Self {
            running,
            blocks_sent,
            thread: Some(thread),
        })
    }

    /// Stop capturing. The thread exits and releases the device at the next
    /// block boundary.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping microphone capture");
        }
        self.thread.take();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn blocks_sent(&self) -> u64 {
        self.blocks_sent.load(Ordering::Relaxed)
    }
}

impl Drop for AudioCapturer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    mut microphone: Box<dyn Microphone>,
    handle: SharedHandle,
    track: MicTrack,
    block_size: usize,
    running: Arc<AtomicBool>,
    blocks_sent: Arc<AtomicU64>,
) {
    let mut block = vec![0.0f32; block_size];

    while running.load(Ordering::SeqCst) {
        if let Err(e) = microphone.read_block(&mut block) {
            error!("Microphone read failed: {}", e);
            break;
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if !track.is_enabled() {
            block.fill(0.0);
        }

        let envelope = encode_outbound(&block, INPUT_SAMPLE_RATE);
        if let Err(e) = handle.send_realtime_input(envelope) {
            debug!("Audio block not delivered: {}", e);
        }
        blocks_sent.fetch_add(1, Ordering::Relaxed);
    }

    running.store(false, Ordering::SeqCst);
    drop(microphone);
    info!("Microphone released");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::decode_base64;
    use crate::testing::{wait_until, FakeHandle, FakeMicrophone};
    use std::time::Duration;

    #[test]
    fn test_blocks_are_sent_in_capture_order() {
        let handle = FakeHandle::new();
        let (mic, _released) = FakeMicrophone::counting();
        let mut capturer =
            AudioCapturer::start(Box::new(mic), handle.shared(), MicTrack::default(), 8).unwrap();

        assert!(wait_until(Duration::from_secs(2), || handle.sent().len() >= 5));
        capturer.stop();

        let sent = handle.sent();
        let mut last = -1.0f32;
        for envelope in sent.iter().take(5) {
            assert_eq!(envelope.mime_type(), "audio/pcm;rate=16000");
            let samples = decode_base64(envelope.payload_base64()).unwrap();
            assert_eq!(samples.len(), 8);
            assert!(samples[0] > last);
            last = samples[0];
        }
    }

    #[test]
    fn test_disabled_track_sends_silence() {
        let handle = FakeHandle::new();
        let (mic, _released) = FakeMicrophone::constant(0.5);
        let track = MicTrack::new(false);
        let mut capturer =
            AudioCapturer::start(Box::new(mic), handle.shared(), track.clone(), 16).unwrap();

        assert!(wait_until(Duration::from_secs(2), || !handle.sent().is_empty()));
        let first = decode_base64(handle.sent()[0].payload_base64()).unwrap();
        assert!(first.iter().all(|s| *s == 0.0));

        track.set_enabled(true);
        let before = handle.sent().len();
        assert!(wait_until(Duration::from_secs(2), || handle.sent().len() > before + 1));
        let last = decode_base64(handle.sent().last().unwrap().payload_base64()).unwrap();
        assert!(last.iter().all(|s| *s > 0.49));
        capturer.stop();
    }

    #[test]
    fn test_failed_submission_does_not_stall_capture() {
        let handle = FakeHandle::failing();
        let (mic, _released) = FakeMicrophone::constant(0.1);
        let mut capturer =
            AudioCapturer::start(Box::new(mic), handle.shared(), MicTrack::default(), 4).unwrap();

        assert!(wait_until(Duration::from_secs(2), || handle.attempts() >= 5));
        assert!(capturer.is_running());
        assert!(capturer.blocks_sent() >= 1);
        capturer.stop();
    }

    #[test]
    fn test_stop_releases_microphone() {
        let handle = FakeHandle::new();
        let (mic, released) = FakeMicrophone::constant(0.0);
        let mut capturer =
            AudioCapturer::start(Box::new(mic), handle.shared(), MicTrack::default(), 4).unwrap();

        capturer.stop();
        assert!(!capturer.is_running());
        assert!(wait_until(Duration::from_secs(2), || released.is_released()));
        // Stopping twice is harmless.
        capturer.stop();
    }

    #[test]
    fn test_read_error_ends_capture() {
        let handle = FakeHandle::new();
        let (mic, released) = FakeMicrophone::broken();
        let capturer =
            AudioCapturer::start(Box::new(mic), handle.shared(), MicTrack::default(), 4).unwrap();

        assert!(wait_until(Duration::from_secs(2), || released.is_released()));
        assert!(!capturer.is_running());
        assert!(handle.sent().is_empty());
    }
}
