//! Outbound video sampling
//!
//! Grabs the latest camera frame ten times a second, scales it to half size,
//! compresses it to JPEG and submits it to the session. A frame source that
//! has nothing ready yet just skips the tick.

use crate::events::MediaEnvelope;
use crate::transport::SharedHandle;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

pub const FRAMES_PER_SECOND: u64 = 10;
/// JPEG quality on the encoder's 1-100 scale.
pub const JPEG_QUALITY: u8 = 50;
pub const FRAME_SCALE: f32 = 0.5;

/// Live camera (or screen) feed.
pub trait FrameSource: Send {
    /// Latest frame, or `None` while the source isn't producing yet.
    fn grab(&mut self) -> Option<RgbaImage>;
}

/// Scale and compress one frame into an `image/jpeg` envelope.
///
/// Returns `None` for empty frames or if the encoder fails.
pub fn encode_frame(frame: &RgbaImage) -> Option<MediaEnvelope> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let scaled_w = ((width as f32 * FRAME_SCALE) as u32).max(1);
    let scaled_h = ((height as f32 * FRAME_SCALE) as u32).max(1);
    let scaled = image::imageops::resize(frame, scaled_w, scaled_h, FilterType::Triangle);
    let rgb = DynamicImage::ImageRgba8(scaled).to_rgb8();

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    if let Err(e) = encoder.encode_image(&rgb) {
        debug!("JPEG conversion error: {}", e);
        return None;
    }

    let data = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    Some(MediaEnvelope::new(data, "image/jpeg"))
}

/// Periodic frame sampler bound to one session.
pub struct VideoSampler {
    task: JoinHandle<()>,
    frames_sent: Arc<AtomicU64>,
}

impl VideoSampler {
    pub fn start(source: Box<dyn FrameSource>, handle: SharedHandle) -> Self {
        let frames_sent = Arc::new(AtomicU64::new(0));
        info!("Starting video sampling at {} fps", FRAMES_PER_SECOND);
        let task = tokio::spawn(sample_loop(source, handle, frames_sent.clone()));
        Self { task, frames_sent }
    }

    /// Stop sampling. The source is dropped with the task.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

impl Drop for VideoSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sample_loop(
    mut source: Box<dyn FrameSource>,
    handle: SharedHandle,
    frames_sent: Arc<AtomicU64>,
) {
    let mut ticker = interval(Duration::from_millis(1000 / FRAMES_PER_SECOND));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(frame) = source.grab() else {
            continue;
        };
        let Some(envelope) = encode_frame(&frame) else {
            continue;
        };
        if let Err(e) = handle.send_realtime_input(envelope) {
            debug!("Video frame not delivered: {}", e);
        }
        frames_sent.fetch_add(1, Ordering::Relaxed);
    }
}
