use super::CaptureSource;
use crate::buffer::{PixelBuffer, PixelFormat};
use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        tracing::info!("Webcam initialized");

        Ok(Self {
            camera,
            width,
            height,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<PixelBuffer> {
        let frame = self.camera.frame().context("Failed to capture frame")?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        // Normalize to the packed BGRA layout the pipeline expects.
        let (width, height) = decoded.dimensions();
        let mut buf = PixelBuffer::new(width, height, PixelFormat::Bgra32)
            .context("Failed to allocate frame buffer")?;
        let stride = buf.plane(0).stride;
        let plane = buf.plane_mut(0);
        for (y, row) in decoded.rows().enumerate() {
            let base = y * stride;
            for (x, pixel) in row.enumerate() {
                let px = base + x * 4;
                plane.data[px] = pixel[2];
                plane.data[px + 1] = pixel[1];
                plane.data[px + 2] = pixel[0];
                plane.data[px + 3] = 255;
            }
        }

        Ok(buf)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
