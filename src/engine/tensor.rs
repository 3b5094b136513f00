use super::InferenceFailure;
use crate::buffer::{BufferError, PixelBuffer, PixelFormat};
use ndarray::{Array4, ArrayViewD};

/// Convert a packed color buffer into a normalized [1, 3, H, W] RGB tensor.
pub fn to_nchw(buf: &PixelBuffer) -> Result<Array4<f32>, InferenceFailure> {
    let offsets = buf.format().channel_offsets().ok_or_else(|| {
        InferenceFailure::Input(format!(
            "model input must be a packed color format, got {:?}",
            buf.format()
        ))
    })?;

    let (width, height) = buf.dimensions();
    let plane = buf.plane(0);
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for y in 0..height as usize {
        let base = y * plane.stride;
        for x in 0..width as usize {
            let px = base + x * 4;
            tensor[[0, 0, y, x]] = plane.data[px + offsets.r] as f32 / 255.0;
            tensor[[0, 1, y, x]] = plane.data[px + offsets.g] as f32 / 255.0;
            tensor[[0, 2, y, x]] = plane.data[px + offsets.b] as f32 / 255.0;
        }
    }

    Ok(tensor)
}

/// Convert a [1, 3, H, W] foreground prediction into a packed Bgra32 buffer
/// with an opaque alpha byte (the matte is merged downstream).
pub fn foreground_from_nchw(
    tensor: &ArrayViewD<'_, f32>,
    width: u32,
    height: u32,
) -> Result<PixelBuffer, BufferError> {
    let mut out = PixelBuffer::new(width, height, PixelFormat::Bgra32)?;
    let stride = out.plane(0).stride;
    let plane = out.plane_mut(0);

    for y in 0..height as usize {
        let base = y * stride;
        for x in 0..width as usize {
            let px = base + x * 4;
            plane.data[px] = quantize(tensor[[0, 2, y, x]]);
            plane.data[px + 1] = quantize(tensor[[0, 1, y, x]]);
            plane.data[px + 2] = quantize(tensor[[0, 0, y, x]]);
            plane.data[px + 3] = 255;
        }
    }

    Ok(out)
}

/// Convert a [1, 1, H, W] alpha prediction into a OneComponent8 matte.
pub fn matte_from_nchw(
    tensor: &ArrayViewD<'_, f32>,
    width: u32,
    height: u32,
) -> Result<PixelBuffer, BufferError> {
    let mut out = PixelBuffer::new(width, height, PixelFormat::OneComponent8)?;
    let stride = out.plane(0).stride;
    let plane = out.plane_mut(0);

    for y in 0..height as usize {
        for x in 0..width as usize {
            plane.data[y * stride + x] = quantize(tensor[[0, 0, y, x]]);
        }
    }

    Ok(out)
}

fn quantize(value: f32) -> u8 {
    (value * 255.0).clamp(0.0, 255.0) as u8
}
