//! PulseAudio backends
//!
//! Microphone capture and scheduled playback through PulseAudio's simple API.
//! Capture is 16-bit little-endian PCM at 16 kHz mono; playback renders the
//! mixer timeline at 24 kHz on its own thread.

use crate::capture::{CaptureDevices, DeviceError, Microphone, MicrophoneConstraints};
use crate::pcm::{decode_inbound, quantize, OUTPUT_SAMPLE_RATE};
use crate::playback::{AudioOutput, Mixer, PlaybackBuffer};
use crate::video::FrameSource;
use libpulse_binding::def::BufferAttr;
use libpulse_binding::error::PAErr;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Source name `module-echo-cancel` registers by default.
pub const ECHO_CANCEL_SOURCE: &str = "echo-cancel-source";

/// Frames written to the device per playback iteration (20 ms).
const PLAYBACK_BLOCK_FRAMES: usize = (OUTPUT_SAMPLE_RATE as usize) / 50;

/// Blocks the server may hold ahead of the speaker. The mixer clock counts
/// frames written, so this bounds how far it runs ahead of what is heard.
const PLAYBACK_QUEUED_BLOCKS: usize = 3;

// `PAErr::to_string` is an inherent method returning `Option<String>`.
fn pulse_message(e: PAErr) -> String {
    format!("{}", e)
}

/// Small target length for the playback stream instead of the server's
/// default of about two seconds.
fn playback_buffer_attr() -> BufferAttr {
    BufferAttr {
        maxlength: u32::MAX,
        tlength: (PLAYBACK_QUEUED_BLOCKS * PLAYBACK_BLOCK_FRAMES * 2) as u32,
        prebuf: u32::MAX,
        minreq: u32::MAX,
        fragsize: u32::MAX,
    }
}

fn open_record(
    app_name: &str,
    device: Option<&str>,
    constraints: &MicrophoneConstraints,
) -> Result<Simple, DeviceError> {
    let spec = Spec {
        format: Format::S16le,
        channels: constraints.channels,
        rate: constraints.sample_rate,
    };
    Simple::new(
        None,     // default server
        app_name, // application name
        Direction::Record,
        device,
        "record", // stream description
        &spec,
        None, // default channel map
        None, // default buffering
    )
    .map_err(|e| DeviceError::Microphone(pulse_message(e)))
}

/// Microphone read through a PulseAudio record stream.
pub struct PulseMicrophone {
    simple: Simple,
    bytes: Vec<u8>,
}

impl PulseMicrophone {
    pub fn open(
        app_name: &str,
        device: Option<&str>,
        constraints: &MicrophoneConstraints,
    ) -> Result<Self, DeviceError> {
        if constraints.channels != 1 {
            return Err(DeviceError::Microphone(format!(
                "{} channel capture is not supported",
                constraints.channels
            )));
        }
        let simple = open_record(app_name, device, constraints)?;
        info!(
            "Microphone opened: {} at {} Hz",
            device.unwrap_or("default source"),
            constraints.sample_rate
        );
        Ok(Self {
            simple,
            bytes: Vec::new(),
        })
    }
}

impl Microphone for PulseMicrophone {
    fn read_block(&mut self, block: &mut [f32]) -> Result<(), DeviceError> {
        self.bytes.resize(block.len() * 2, 0);
        self.simple
            .read(&mut self.bytes)
            .map_err(|e| DeviceError::Read(pulse_message(e)))?;
        for (dst, src) in block.iter_mut().zip(decode_inbound(&self.bytes)) {
            *dst = src;
        }
        Ok(())
    }
}

/// Speaker output. A playback thread renders the shared mixer into a
/// PulseAudio stream; the mixer's clock is the output device clock.
pub struct PulseOutput {
    mixer: Arc<Mutex<Mixer>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PulseOutput {
    pub fn open(app_name: &str) -> Result<Self, DeviceError> {
        let spec = Spec {
            format: Format::S16le,
            channels: 1,
            rate: OUTPUT_SAMPLE_RATE,
        };
        let buffer_attr = playback_buffer_attr();
        let simple = Simple::new(
            None,
            app_name,
            Direction::Playback,
            None,
            "playback",
            &spec,
            None,
            Some(&buffer_attr),
        )
        .map_err(|e| DeviceError::Output(pulse_message(e)))?;

        let mixer = Arc::new(Mutex::new(Mixer::new(OUTPUT_SAMPLE_RATE)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_mixer = mixer.clone();
        let thread_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_loop(simple, thread_mixer, thread_shutdown))?;

        info!("Audio output opened at {} Hz", OUTPUT_SAMPLE_RATE);
        Ok(Self {
            mixer,
            shutdown,
            thread: Some(thread),
        })
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioOutput for PulseOutput {
    fn current_time(&self) -> f64 {
        self.mixer().current_time()
    }

    // Clamp and placement happen under one lock so the playback thread
    // cannot render between them.
    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> f64 {
        self.mixer().schedule(buffer, start_at)
    }

    fn ramp_gain(&mut self, target: f32, duration: f64) {
        self.mixer().ramp_gain(target, duration);
    }
}

impl Drop for PulseOutput {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Playback thread panicked");
            }
        }
    }
}

fn playback_loop(simple: Simple, mixer: Arc<Mutex<Mixer>>, shutdown: Arc<AtomicBool>) {
    let mut block = vec![0.0f32; PLAYBACK_BLOCK_FRAMES];
    let mut bytes = Vec::with_capacity(PLAYBACK_BLOCK_FRAMES * 2);

    while !shutdown.load(Ordering::SeqCst) {
        mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .render(&mut block);

        bytes.clear();
        for sample in &block {
            bytes.extend_from_slice(&quantize(*sample).to_le_bytes());
        }

        // Blocks until the device has room, which paces the loop.
        if let Err(e) = simple.write(&bytes) {
            error!("Audio playback failed: {}", e);
            break;
        }
    }

    if let Err(e) = simple.drain() {
        debug!("Playback drain failed: {}", e);
    }
    info!("Audio output closed");
}

/// Capture devices backed by PulseAudio and the screen grabber.
#[derive(Debug, Clone)]
pub struct PulseDevices {
    app_name: String,
    source: Option<String>,
}

impl PulseDevices {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            source: None,
        }
    }

    /// Record from a named PulseAudio source instead of the default one.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl CaptureDevices for PulseDevices {
    fn open_microphone(
        &self,
        constraints: &MicrophoneConstraints,
    ) -> Result<Box<dyn Microphone>, DeviceError> {
        if let Some(source) = &self.source {
            return Ok(Box::new(PulseMicrophone::open(
                &self.app_name,
                Some(source.as_str()),
                constraints,
            )?));
        }

        // Echo cancellation, noise suppression and gain control come from the
        // echo-cancel module's source when it is loaded.
        if constraints.wants_processing() {
            match PulseMicrophone::open(&self.app_name, Some(ECHO_CANCEL_SOURCE), constraints) {
                Ok(mic) => return Ok(Box::new(mic)),
                Err(e) => warn!(
                    "Processed source {} unavailable ({}), using default source without processing",
                    ECHO_CANCEL_SOURCE, e
                ),
            }
        }

        Ok(Box::new(PulseMicrophone::open(
            &self.app_name,
            None,
            constraints,
        )?))
    }

    fn open_camera(&self) -> Result<Box<dyn FrameSource>, DeviceError> {
        Ok(Box::new(crate::screen::ScreenFrameSource::open()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libpulse_binding::error::Code;

    #[test]
    fn test_playback_block_is_twenty_milliseconds() {
        assert_eq!(PLAYBACK_BLOCK_FRAMES, 480);
    }

    #[test]
    fn test_playback_target_length_is_a_few_blocks() {
        let attr = playback_buffer_attr();
        // 60 ms of S16LE mono at 24 kHz.
        assert_eq!(attr.tlength, 2880);
        assert_eq!(attr.maxlength, u32::MAX);
        assert_eq!(attr.prebuf, u32::MAX);
    }

    #[test]
    fn test_pulse_errors_become_messages() {
        let message = pulse_message(PAErr::from(Code::Timeout));
        assert!(!message.is_empty());
        assert_eq!(
            DeviceError::Output(message.clone()).to_string(),
            format!("audio output unavailable: {}", message)
        );
    }

    #[test]
    fn test_devices_source_override() {
        let devices = PulseDevices::new("neonlive").with_source("alsa_input.usb");
        assert_eq!(devices.source.as_deref(), Some("alsa_input.usb"));
        assert_eq!(devices.app_name, "neonlive");
    }
}
