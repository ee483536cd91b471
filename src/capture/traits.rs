//! Capture trait definitions
//!
//! Device-agnostic seam for camera acquisition.

use crate::frame::CapturedFrame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device not available: {0}")]
    DeviceUnavailable(String),

    #[error("Capture failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Information about a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Capture resolution
    pub resolution: Resolution,

    /// Native frame rate
    pub fps: u32,

    /// ffmpeg name of the pixel format of captured frames
    pub pixel_format: String,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A camera producing frames at its native rate.
///
/// `next_frame` blocks until the next frame is available and is only ever
/// called from a dedicated capture thread.
pub trait FrameSource: Send {
    fn info(&self) -> &CameraInfo;

    /// The next frame, or `None` once the device has no more frames
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, CaptureError>;
}
