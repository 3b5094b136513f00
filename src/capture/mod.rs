mod webcam;

pub use webcam::WebcamCapture;

use crate::buffer::PixelBuffer;
use anyhow::Result;

/// Trait for camera capture sources. Frames come back as packed Bgra32
/// buffers at the camera's native resolution.
pub trait CaptureSource {
    /// Capture a single frame.
    fn capture_frame(&mut self) -> Result<PixelBuffer>;

    /// Get the resolution of captured frames.
    fn resolution(&self) -> (u32, u32);
}
