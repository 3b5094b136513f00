mod transform;

pub use transform::{copy, merge_alpha, resize_crop_to_fill};

use std::collections::BTreeMap;
use thiserror::Error;

/// Upper bound on a single plane allocation (bytes). A request past this is
/// treated the same as an out-of-memory condition.
const MAX_PLANE_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer allocation failed: {width}x{height} {format:?}")]
    Allocation {
        width: u32,
        height: u32,
        format: PixelFormat,
    },

    #[error("pixel format mismatch: {0}")]
    FormatMismatch(String),
}

/// Pixel formats the pipeline understands: four packed 32-bit layouts plus
/// the single-channel 8-bit format used for alpha mattes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra32,
    Rgba32,
    Abgr32,
    Argb32,
    OneComponent8,
}

/// Byte offsets of each channel within a packed 32-bit pixel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelOffsets {
    pub r: usize,
    pub g: usize,
    pub b: usize,
    pub a: usize,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::OneComponent8 => 1,
            _ => 4,
        }
    }

    /// Byte offset of the alpha sample within a packed pixel, None for
    /// formats without an alpha channel.
    pub fn alpha_offset(self) -> Option<usize> {
        match self {
            PixelFormat::Bgra32 | PixelFormat::Rgba32 => Some(3),
            PixelFormat::Abgr32 | PixelFormat::Argb32 => Some(0),
            PixelFormat::OneComponent8 => None,
        }
    }

    pub fn channel_offsets(self) -> Option<ChannelOffsets> {
        match self {
            PixelFormat::Bgra32 => Some(ChannelOffsets { b: 0, g: 1, r: 2, a: 3 }),
            PixelFormat::Rgba32 => Some(ChannelOffsets { r: 0, g: 1, b: 2, a: 3 }),
            PixelFormat::Abgr32 => Some(ChannelOffsets { a: 0, b: 1, g: 2, r: 3 }),
            PixelFormat::Argb32 => Some(ChannelOffsets { a: 0, r: 1, g: 2, b: 3 }),
            PixelFormat::OneComponent8 => None,
        }
    }
}

/// One plane of raw pixel data with its own row stride. Packed formats and
/// OneComponent8 use exactly one plane; the copy path still iterates planes
/// so planar layouts stay cheap to add.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
    pub height: u32,
}

/// Owned raw image buffer. Never mutated once handed downstream; every
/// transform allocates a fresh buffer and copies into it.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
    attributes: BTreeMap<String, String>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer with the tight stride for its format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, BufferError> {
        let stride = width as usize * format.bytes_per_pixel();
        Self::with_stride(width, height, format, stride)
    }

    /// Allocate a zeroed buffer with an explicit row stride, which must be
    /// at least `width * bytes_per_pixel`.
    pub fn with_stride(
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: usize,
    ) -> Result<Self, BufferError> {
        let alloc_err = || BufferError::Allocation { width, height, format };
        if width == 0 || height == 0 {
            return Err(alloc_err());
        }
        if stride < width as usize * format.bytes_per_pixel() {
            return Err(BufferError::FormatMismatch(format!(
                "stride {} below row size for {}x{} {:?}",
                stride, width, height, format
            )));
        }
        let bytes = stride.checked_mul(height as usize).ok_or_else(alloc_err)?;
        if bytes > MAX_PLANE_BYTES {
            return Err(alloc_err());
        }
        Ok(Self {
            width,
            height,
            format,
            planes: vec![Plane {
                data: vec![0u8; bytes],
                stride,
                height,
            }],
            attributes: BTreeMap::new(),
        })
    }

    /// Allocate a packed buffer filled with one pixel value, given in the
    /// buffer's own channel order.
    pub fn filled(width: u32, height: u32, format: PixelFormat, pixel: [u8; 4]) -> Result<Self, BufferError> {
        let mut buf = Self::new(width, height, format)?;
        if format == PixelFormat::OneComponent8 {
            buf.planes[0].data.fill(pixel[0]);
            return Ok(buf);
        }
        let plane = &mut buf.planes[0];
        for row in 0..height as usize {
            let base = row * plane.stride;
            for col in 0..width as usize {
                plane.data[base + col * 4..base + col * 4 + 4].copy_from_slice(&pixel);
            }
        }
        Ok(buf)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut Plane {
        &mut self.planes[index]
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    /// Copy the attribute bag from a provenance buffer, the way derived
    /// buffers inherit attachments from the buffer they came from.
    pub fn propagate_attributes(&mut self, from: &PixelBuffer) {
        self.attributes = from.attributes.clone();
    }

    /// Read one packed pixel. Callers must have checked the format is packed.
    pub(crate) fn packed_pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let plane = &self.planes[0];
        let base = y as usize * plane.stride + x as usize * bpp;
        &plane.data[base..base + bpp]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_stride_allocation() {
        let buf = PixelBuffer::new(64, 32, PixelFormat::Bgra32).unwrap();
        assert_eq!(buf.dimensions(), (64, 32));
        assert_eq!(buf.plane_count(), 1);
        assert_eq!(buf.plane(0).stride, 64 * 4);
        assert_eq!(buf.plane(0).data.len(), 64 * 4 * 32);
    }

    #[test]
    fn one_component_is_single_plane() {
        let buf = PixelBuffer::new(16, 16, PixelFormat::OneComponent8).unwrap();
        assert_eq!(buf.plane_count(), 1);
        assert_eq!(buf.plane(0).stride, 16);
    }

    #[test]
    fn stride_below_row_size_rejected() {
        let err = PixelBuffer::with_stride(64, 32, PixelFormat::Rgba32, 64).unwrap_err();
        assert!(matches!(err, BufferError::FormatMismatch(_)));
    }

    #[test]
    fn oversized_allocation_is_allocation_error() {
        let err = PixelBuffer::new(100_000, 100_000, PixelFormat::Bgra32).unwrap_err();
        assert!(matches!(err, BufferError::Allocation { .. }));
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(PixelBuffer::new(0, 720, PixelFormat::Bgra32).is_err());
    }

    #[test]
    fn alpha_offsets_follow_packing_order() {
        assert_eq!(PixelFormat::Bgra32.alpha_offset(), Some(3));
        assert_eq!(PixelFormat::Rgba32.alpha_offset(), Some(3));
        assert_eq!(PixelFormat::Abgr32.alpha_offset(), Some(0));
        assert_eq!(PixelFormat::Argb32.alpha_offset(), Some(0));
        assert_eq!(PixelFormat::OneComponent8.alpha_offset(), None);
    }

    #[test]
    fn attribute_bag_propagates() {
        let mut src = PixelBuffer::new(8, 8, PixelFormat::Bgra32).unwrap();
        src.set_attribute("color_space", "sRGB");
        let mut derived = PixelBuffer::new(8, 8, PixelFormat::Bgra32).unwrap();
        derived.propagate_attributes(&src);
        assert_eq!(derived.attributes().get("color_space").map(String::as_str), Some("sRGB"));
    }
}
