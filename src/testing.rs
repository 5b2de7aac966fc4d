//! Deterministic fakes for the transport, capture devices and session handle

use crate::capture::{CaptureDevices, DeviceError, Microphone, MicrophoneConstraints};
use crate::events::{EventSink, MediaEnvelope};
use crate::gemini::{GeminiError, LiveConfig, Result};
use crate::transport::{SessionHandle, SessionTransport, SharedHandle};
use crate::video::FrameSource;
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Default)]
pub struct FakeHandleInner {
    sent: Mutex<Vec<MediaEnvelope>>,
    attempts: AtomicUsize,
    failing: bool,
}

impl SessionHandle for FakeHandleInner {
    fn send_realtime_input(&self, envelope: MediaEnvelope) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(GeminiError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// Session handle that records what it was asked to send.
#[derive(Clone, Default)]
pub struct FakeHandle(Arc<FakeHandleInner>);

impl FakeHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self(Arc::new(FakeHandleInner {
            failing: true,
            ..Default::default()
        }))
    }

    pub fn shared(&self) -> SharedHandle {
        self.0.clone()
    }

    pub fn sent(&self) -> Vec<MediaEnvelope> {
        self.0.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.0.attempts.load(Ordering::SeqCst)
    }
}

/// Set when a fake device is dropped.
#[derive(Clone, Default)]
pub struct ReleaseFlag(Arc<AtomicBool>);

impl ReleaseFlag {
    pub fn is_released(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum MicBehavior {
    Constant(f32),
    Counting(u32),
    Broken,
}

pub struct FakeMicrophone {
    behavior: MicBehavior,
    released: ReleaseFlag,
}

impl FakeMicrophone {
    fn with(behavior: MicBehavior) -> (Self, ReleaseFlag) {
        let released = ReleaseFlag::default();
        (
            Self {
                behavior,
                released: released.clone(),
            },
            released,
        )
    }

    pub fn constant(value: f32) -> (Self, ReleaseFlag) {
        Self::with(MicBehavior::Constant(value))
    }

    /// Every block is filled with a value slightly above the previous one.
    pub fn counting() -> (Self, ReleaseFlag) {
        Self::with(MicBehavior::Counting(0))
    }

    pub fn broken() -> (Self, ReleaseFlag) {
        Self::with(MicBehavior::Broken)
    }
}

impl Microphone for FakeMicrophone {
    fn read_block(&mut self, block: &mut [f32]) -> std::result::Result<(), DeviceError> {
        std::thread::sleep(Duration::from_millis(1));
        match &mut self.behavior {
            MicBehavior::Constant(value) => block.fill(*value),
            MicBehavior::Counting(n) => {
                block.fill((*n as f32 * 0.01).min(1.0));
                *n += 1;
            }
            MicBehavior::Broken => return Err(DeviceError::Read("unplugged".to_string())),
        }
        Ok(())
    }
}

impl Drop for FakeMicrophone {
    fn drop(&mut self) {
        self.released.0.store(true, Ordering::SeqCst);
    }
}

pub struct FakeFrames {
    size: Option<(u32, u32)>,
}

impl FakeFrames {
    pub fn ready(width: u32, height: u32) -> Self {
        Self {
            size: Some((width, height)),
        }
    }

    pub fn not_ready() -> Self {
        Self { size: None }
    }
}

impl FrameSource for FakeFrames {
    fn grab(&mut self) -> Option<RgbaImage> {
        self.size
            .map(|(w, h)| RgbaImage::from_pixel(w, h, Rgba([10, 120, 240, 255])))
    }
}

#[derive(Default)]
struct DevicesInner {
    mic_opens: AtomicUsize,
    camera_opens: AtomicUsize,
    fail_mic: AtomicBool,
    fail_camera: AtomicBool,
    mic_value: Mutex<f32>,
    released: Mutex<Vec<ReleaseFlag>>,
}

/// Capture devices that count acquisitions and can be told to fail.
#[derive(Clone, Default)]
pub struct FakeDevices(Arc<DevicesInner>);

impl FakeDevices {
    pub fn new(mic_value: f32) -> Self {
        let devices = Self::default();
        *devices.0.mic_value.lock().unwrap() = mic_value;
        devices
    }

    pub fn fail_microphone(&self) {
        self.0.fail_mic.store(true, Ordering::SeqCst);
    }

    pub fn fail_camera(&self) {
        self.0.fail_camera.store(true, Ordering::SeqCst);
    }

    pub fn mic_opens(&self) -> usize {
        self.0.mic_opens.load(Ordering::SeqCst)
    }

    pub fn camera_opens(&self) -> usize {
        self.0.camera_opens.load(Ordering::SeqCst)
    }

    /// True once every microphone handed out has been dropped.
    pub fn all_released(&self) -> bool {
        self.0
            .released
            .lock()
            .unwrap()
            .iter()
            .all(ReleaseFlag::is_released)
    }
}

impl CaptureDevices for FakeDevices {
    fn open_microphone(
        &self,
        _constraints: &MicrophoneConstraints,
    ) -> std::result::Result<Box<dyn Microphone>, DeviceError> {
        self.0.mic_opens.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_mic.load(Ordering::SeqCst) {
            return Err(DeviceError::Microphone("permission denied".to_string()));
        }
        let (mic, released) = FakeMicrophone::constant(*self.0.mic_value.lock().unwrap());
        self.0.released.lock().unwrap().push(released);
        Ok(Box::new(mic))
    }

    fn open_camera(&self) -> std::result::Result<Box<dyn FrameSource>, DeviceError> {
        self.0.camera_opens.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_camera.load(Ordering::SeqCst) {
            return Err(DeviceError::Camera("no camera".to_string()));
        }
        Ok(Box::new(FakeFrames::ready(8, 8)))
    }
}

struct OpenedSession {
    config: LiveConfig,
    events: EventSink,
    handle: FakeHandle,
}

#[derive(Default)]
struct TransportInner {
    opened: Mutex<Vec<OpenedSession>>,
    fail_open: AtomicBool,
}

/// Transport whose sessions are driven by the test through their event sinks.
#[derive(Clone, Default)]
pub struct FakeTransport(Arc<TransportInner>);

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self) {
        self.0.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.0.opened.lock().unwrap().len()
    }

    pub fn config(&self, index: usize) -> LiveConfig {
        self.0.opened.lock().unwrap()[index].config.clone()
    }

    pub fn events(&self, index: usize) -> EventSink {
        self.0.opened.lock().unwrap()[index].events.clone()
    }

    pub fn handle(&self, index: usize) -> FakeHandle {
        self.0.opened.lock().unwrap()[index].handle.clone()
    }

    /// Whether anything besides the transport still holds session `index`'s handle.
    pub fn handle_held(&self, index: usize) -> bool {
        Arc::strong_count(&self.0.opened.lock().unwrap()[index].handle.0) > 1
    }
}

impl SessionTransport for FakeTransport {
    fn open(&self, config: LiveConfig, events: EventSink) -> Result<SharedHandle> {
        if self.0.fail_open.load(Ordering::SeqCst) {
            return Err(GeminiError::Other("refused".to_string()));
        }
        let handle = FakeHandle::new();
        let shared = handle.shared();
        self.0.opened.lock().unwrap().push(OpenedSession {
            config,
            events,
            handle,
        });
        Ok(shared)
    }
}
