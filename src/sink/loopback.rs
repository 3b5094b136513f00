use crate::buffer::{resize_crop_to_fill, BufferError, PixelBuffer};
use crate::pipeline::ResultSink;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Writes composited frames to a v4l2loopback device as YUYV422. The
/// status line rides along on the log; the loopback consumer only sees
/// pixels.
pub struct LoopbackSink {
    file: File,
    width: u32,
    height: u32,
}

impl LoopbackSink {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open loopback device at {}", path.display()))?;
        let format = Format::new(width, height, FourCC::new(b"YUYV"));
        Output::set_format(&device, &format)
            .context("Failed to set loopback output format")?;

        // v4l2loopback accepts raw frames written straight to the device
        // file once the format is configured.
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;

        tracing::info!("Loopback device ready");

        Ok(Self {
            file,
            width,
            height,
        })
    }

    /// Pack a BGRA-family buffer into YUYV422, two pixels per macropixel.
    fn to_yuyv(frame: &PixelBuffer) -> Result<Vec<u8>, BufferError> {
        let offsets = frame.format().channel_offsets().ok_or_else(|| {
            BufferError::FormatMismatch(format!(
                "loopback sink needs a packed color frame, got {:?}",
                frame.format()
            ))
        })?;

        let (width, height) = frame.dimensions();
        let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

        for y in 0..height {
            for x in (0..width).step_by(2) {
                let first = frame.packed_pixel(x, y);
                let second = if x + 1 < width {
                    frame.packed_pixel(x + 1, y)
                } else {
                    first
                };

                let (y1, u1, v1) = rgb_to_yuv(first[offsets.r], first[offsets.g], first[offsets.b]);
                let (y2, u2, v2) =
                    rgb_to_yuv(second[offsets.r], second[offsets.g], second[offsets.b]);

                // Average U and V across the pair.
                let u = ((u1 as u16 + u2 as u16) / 2) as u8;
                let v = ((v1 as u16 + v2 as u16) / 2) as u8;

                yuyv.push(y1);
                yuyv.push(u);
                yuyv.push(y2);
                yuyv.push(v);
            }
        }

        Ok(yuyv)
    }
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl ResultSink for LoopbackSink {
    fn deliver(&mut self, image: PixelBuffer, status: &str) -> Result<()> {
        tracing::debug!("deliver: {status}");

        let frame = resize_crop_to_fill(image, self.width, self.height)?;
        let yuyv = Self::to_yuyv(&frame)?;

        self.file
            .write_all(&yuyv)
            .context("Failed to write frame to loopback device")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;

    #[test]
    fn yuyv_packing_is_two_bytes_per_pixel() {
        let frame = PixelBuffer::filled(4, 2, PixelFormat::Bgra32, [0, 0, 0, 255]).unwrap();
        let yuyv = LoopbackSink::to_yuyv(&frame).unwrap();
        assert_eq!(yuyv.len(), 4 * 2 * 2);
    }

    #[test]
    fn grayscale_pixels_carry_neutral_chroma() {
        let frame = PixelBuffer::filled(2, 1, PixelFormat::Bgra32, [200, 200, 200, 255]).unwrap();
        let yuyv = LoopbackSink::to_yuyv(&frame).unwrap();
        // Y0 U Y1 V, with U/V at the 128 midpoint for gray.
        assert_eq!(yuyv[0], yuyv[2]);
        assert!((yuyv[1] as i16 - 128).abs() <= 1);
        assert!((yuyv[3] as i16 - 128).abs() <= 1);
    }

    #[test]
    fn matte_frames_are_rejected() {
        let matte = PixelBuffer::new(4, 4, PixelFormat::OneComponent8).unwrap();
        assert!(LoopbackSink::to_yuyv(&matte).is_err());
    }
}
