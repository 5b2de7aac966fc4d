//! Screen-grab frame source
//!
//! Stands in for the camera on desktop hosts. Frames come from the primary
//! monitor through `xcap` when the `capture` feature is enabled.

use crate::capture::DeviceError;
use crate::video::FrameSource;
use image::RgbaImage;
#[cfg(feature = "capture")]
use tracing::{debug, info};

#[cfg(feature = "capture")]
use xcap::Monitor;

/// Grabs the primary monitor on every call.
pub struct ScreenFrameSource {
    #[cfg(feature = "capture")]
    monitor_name: String,
}

#[cfg(feature = "capture")]
fn primary_monitor() -> Result<Monitor, DeviceError> {
    let monitors = Monitor::all().map_err(|e| DeviceError::Camera(e.to_string()))?;
    let primary = monitors
        .iter()
        .position(|m| m.is_primary().unwrap_or(false))
        .unwrap_or(0);
    monitors
        .into_iter()
        .nth(primary)
        .ok_or_else(|| DeviceError::Camera("No monitors found".to_string()))
}

#[cfg(feature = "capture")]
impl ScreenFrameSource {
    pub fn open() -> Result<Self, DeviceError> {
        let monitor = primary_monitor()?;
        let monitor_name = monitor.name().unwrap_or_else(|_| "Unknown".to_string());
        info!(
            "Using monitor: {} ({}x{})",
            monitor_name,
            monitor.width().unwrap_or(0),
            monitor.height().unwrap_or(0)
        );
        Ok(Self { monitor_name })
    }
}

#[cfg(feature = "capture")]
impl FrameSource for ScreenFrameSource {
    fn grab(&mut self) -> Option<RgbaImage> {
        // Monitors are looked up per grab so the source stays Send.
        let monitor = match primary_monitor() {
            Ok(monitor) => monitor,
            Err(e) => {
                debug!("Monitor lookup failed: {}", e);
                return None;
            }
        };
        match monitor.capture_image() {
            Ok(image) => Some(image),
            Err(e) => {
                debug!("Frame capture error on {}: {}", self.monitor_name, e);
                None
            }
        }
    }
}

#[cfg(not(feature = "capture"))]
impl ScreenFrameSource {
    pub fn open() -> Result<Self, DeviceError> {
        Err(DeviceError::Camera(
            "screen capture feature not enabled".to_string(),
        ))
    }
}

#[cfg(not(feature = "capture"))]
impl FrameSource for ScreenFrameSource {
    fn grab(&mut self) -> Option<RgbaImage> {
        None
    }
}
