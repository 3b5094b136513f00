use crate::buffer::{resize_crop_to_fill, PixelBuffer, PixelFormat};
use crate::pipeline::{INFERENCE_HEIGHT, INFERENCE_WIDTH};
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::Path;
use std::sync::Arc;

/// The recognized background choices, matching the selector entries of the
/// desktop app this replaces. `Origin` bypasses matting entirely;
/// `Transparent` uses a live screen region from a `ScreenCapture` provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackgroundKind {
    Transparent,
    LakeView,
    DimBar,
    Origin,
    Green,
    Black,
    File,
    White,
}

/// Capability to grab the current on-screen region as a background buffer.
/// The pipeline only consumes the resulting buffer; how the pixels are
/// obtained is platform-specific and lives outside this crate.
pub trait ScreenCapture {
    fn capture_region(&mut self, width: u32, height: u32) -> Result<PixelBuffer>;
}

/// An immutable background at the inference resolution, plus the solid
/// color the alpha merge composites against.
#[derive(Clone)]
pub struct BackgroundSelection {
    label: String,
    buffer: Arc<PixelBuffer>,
    composite_rgb: [u8; 3],
}

impl BackgroundSelection {
    pub fn solid(label: &str, rgb: [u8; 3]) -> Result<Self> {
        let [r, g, b] = rgb;
        let buffer = PixelBuffer::filled(
            INFERENCE_WIDTH,
            INFERENCE_HEIGHT,
            PixelFormat::Bgra32,
            [b, g, r, 255],
        )?;
        Ok(Self {
            label: label.to_string(),
            buffer: Arc::new(buffer),
            composite_rgb: rgb,
        })
    }

    /// Stand-in for the original's bundled LakeView artwork: a vertical
    /// sky-to-water gradient.
    pub fn lake_view() -> Result<Self> {
        Self::vertical_gradient("LakeView", [120, 170, 230], [40, 90, 110])
    }

    /// Stand-in for the original's DimBar artwork: dark fill with a darker
    /// band along the bottom.
    pub fn dim_bar() -> Result<Self> {
        let mut selection = Self::solid("DimBar", [44, 44, 48])?;
        let buffer = Arc::get_mut(&mut selection.buffer)
            .context("freshly built background is uniquely owned")?;
        let bar_top = (INFERENCE_HEIGHT - INFERENCE_HEIGHT / 6) as usize;
        for y in bar_top..INFERENCE_HEIGHT as usize {
            let stride = buffer.plane(0).stride;
            let row = &mut buffer.plane_mut(0).data[y * stride..y * stride + stride];
            for px in row.chunks_exact_mut(4) {
                px[..3].fill(16);
            }
        }
        Ok(selection)
    }

    /// Decode a user-chosen image file and normalize it to the inference
    /// resolution with a crop-to-fill resize.
    pub fn from_file(path: &Path) -> Result<Self> {
        let decoded = image::open(path)
            .with_context(|| format!("Failed to open background image {}", path.display()))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();

        let mut raw = PixelBuffer::new(width, height, PixelFormat::Rgba32)?;
        let stride = raw.plane(0).stride;
        let plane = raw.plane_mut(0);
        for (y, row) in decoded.rows().enumerate() {
            let base = y * stride;
            for (x, pixel) in row.enumerate() {
                plane.data[base + x * 4..base + x * 4 + 4].copy_from_slice(&pixel.0);
            }
        }

        let buffer = resize_crop_to_fill(raw, INFERENCE_WIDTH, INFERENCE_HEIGHT)?;
        Ok(Self {
            label: path.display().to_string(),
            buffer: Arc::new(buffer),
            composite_rgb: [0, 0, 0],
        })
    }

    /// Build a selection from the current screen region.
    pub fn from_screen(provider: &mut dyn ScreenCapture) -> Result<Self> {
        let grabbed = provider.capture_region(INFERENCE_WIDTH, INFERENCE_HEIGHT)?;
        let buffer = resize_crop_to_fill(grabbed, INFERENCE_WIDTH, INFERENCE_HEIGHT)?;
        Ok(Self {
            label: "Transparent".to_string(),
            buffer: Arc::new(buffer),
            composite_rgb: [0, 0, 0],
        })
    }

    fn vertical_gradient(label: &str, top: [u8; 3], bottom: [u8; 3]) -> Result<Self> {
        let mut buffer = PixelBuffer::new(INFERENCE_WIDTH, INFERENCE_HEIGHT, PixelFormat::Bgra32)?;
        let stride = buffer.plane(0).stride;
        let plane = buffer.plane_mut(0);
        for y in 0..INFERENCE_HEIGHT as usize {
            let t = y as f32 / (INFERENCE_HEIGHT - 1) as f32;
            let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
            let bgra = [mix(top[2], bottom[2]), mix(top[1], bottom[1]), mix(top[0], bottom[0]), 255];
            let row = &mut plane.data[y * stride..y * stride + stride];
            for px in row.chunks_exact_mut(4) {
                px.copy_from_slice(&bgra);
            }
        }
        Ok(Self {
            label: label.to_string(),
            buffer: Arc::new(buffer),
            composite_rgb: top,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn buffer(&self) -> &Arc<PixelBuffer> {
        &self.buffer
    }

    pub fn composite_rgb(&self) -> [u8; 3] {
        self.composite_rgb
    }
}
