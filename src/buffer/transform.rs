use super::{BufferError, PixelBuffer, PixelFormat};

/// Scale `buf` uniformly until it covers `target_w x target_h`, then crop to
/// the top-left target region (crop-to-fill, never letterbox).
///
/// Takes the buffer by value: when the source already matches the target
/// dimensions it is returned untouched, with no allocation.
pub fn resize_crop_to_fill(
    buf: PixelBuffer,
    target_w: u32,
    target_h: u32,
) -> Result<PixelBuffer, BufferError> {
    let (src_w, src_h) = buf.dimensions();
    if (src_w, src_h) == (target_w, target_h) {
        return Ok(buf);
    }

    let scale = f64::max(
        target_w as f64 / src_w as f64,
        target_h as f64 / src_h as f64,
    );

    let mut out = PixelBuffer::new(target_w, target_h, buf.format())?;
    out.propagate_attributes(&buf);

    let bpp = buf.format().bytes_per_pixel();
    let src_plane = buf.plane(0);
    let src_stride = src_plane.stride;
    let dst_stride = out.plane(0).stride;

    for y in 0..target_h {
        // Map the destination pixel center back into source space.
        let sy = (y as f64 + 0.5) / scale - 0.5;
        let y0 = sy.floor().clamp(0.0, (src_h - 1) as f64) as usize;
        let y1 = (y0 + 1).min(src_h as usize - 1);
        let fy = (sy - y0 as f64).clamp(0.0, 1.0);

        for x in 0..target_w {
            let sx = (x as f64 + 0.5) / scale - 0.5;
            let x0 = sx.floor().clamp(0.0, (src_w - 1) as f64) as usize;
            let x1 = (x0 + 1).min(src_w as usize - 1);
            let fx = (sx - x0 as f64).clamp(0.0, 1.0);

            let dst_base = y as usize * dst_stride + x as usize * bpp;
            for c in 0..bpp {
                let p00 = src_plane.data[y0 * src_stride + x0 * bpp + c] as f64;
                let p01 = src_plane.data[y0 * src_stride + x1 * bpp + c] as f64;
                let p10 = src_plane.data[y1 * src_stride + x0 * bpp + c] as f64;
                let p11 = src_plane.data[y1 * src_stride + x1 * bpp + c] as f64;
                let top = p00 + (p01 - p00) * fx;
                let bottom = p10 + (p11 - p10) * fx;
                let sample = top + (bottom - top) * fy;
                out.plane_mut(0).data[dst_base + c] = sample.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Ok(out)
}

/// Full independent duplicate, row by row per plane. Row length is
/// `min(src_stride, dst_stride)` so mismatched strides never over-read.
pub fn copy(buf: &PixelBuffer) -> Result<PixelBuffer, BufferError> {
    let mut out = PixelBuffer::new(buf.width(), buf.height(), buf.format())?;
    out.propagate_attributes(buf);

    for plane_idx in 0..buf.plane_count() {
        let src = buf.plane(plane_idx);
        let dst_stride = out.plane(plane_idx).stride;
        let len = src.stride.min(dst_stride);
        for row in 0..src.height as usize {
            let src_base = row * src.stride;
            let dst_base = row * dst_stride;
            let dst = out.plane_mut(plane_idx);
            dst.data[dst_base..dst_base + len]
                .copy_from_slice(&src.data[src_base..src_base + len]);
        }
    }

    Ok(out)
}

/// Composite `color` against a solid `background_rgb` using the per-pixel
/// matte in `alpha`, writing the matte sample into the alpha byte.
///
/// Each color channel of the output is `(a * fg + (255 - a) * bg) / 255`.
/// `alpha` must be OneComponent8 with the same dimensions as `color`, and
/// `color` must be a single-plane packed format with an alpha channel.
pub fn merge_alpha(
    color: &PixelBuffer,
    alpha: &PixelBuffer,
    background_rgb: [u8; 3],
) -> Result<PixelBuffer, BufferError> {
    if alpha.format() != PixelFormat::OneComponent8 {
        return Err(BufferError::FormatMismatch(format!(
            "alpha buffer is {:?}, expected OneComponent8",
            alpha.format()
        )));
    }
    if alpha.dimensions() != color.dimensions() {
        return Err(BufferError::FormatMismatch(format!(
            "alpha {}x{} does not match color {}x{}",
            alpha.width(),
            alpha.height(),
            color.width(),
            color.height()
        )));
    }
    let offsets = color.format().channel_offsets().ok_or_else(|| {
        BufferError::FormatMismatch(format!(
            "color buffer format {:?} has no alpha channel",
            color.format()
        ))
    })?;
    if color.plane_count() != 1 {
        return Err(BufferError::FormatMismatch(
            "color buffer must be a single packed plane".to_string(),
        ));
    }

    let mut out = PixelBuffer::new(color.width(), color.height(), color.format())?;
    out.propagate_attributes(color);

    let [bg_r, bg_g, bg_b] = background_rgb;
    let src_plane = color.plane(0);
    let alpha_plane = alpha.plane(0);
    let dst_stride = out.plane(0).stride;
    let row_len = src_plane.stride.min(dst_stride);

    for y in 0..color.height() as usize {
        let src_base = y * src_plane.stride;
        let dst_base = y * dst_stride;
        let dst = out.plane_mut(0);
        dst.data[dst_base..dst_base + row_len]
            .copy_from_slice(&src_plane.data[src_base..src_base + row_len]);

        for x in 0..color.width() as usize {
            let a = alpha_plane.data[y * alpha_plane.stride + x] as u32;
            let px = dst_base + x * 4;
            let pixel = &mut dst.data[px..px + 4];
            pixel[offsets.r] = blend(a, pixel[offsets.r], bg_r);
            pixel[offsets.g] = blend(a, pixel[offsets.g], bg_g);
            pixel[offsets.b] = blend(a, pixel[offsets.b], bg_b);
            pixel[offsets.a] = a as u8;
        }
    }

    Ok(out)
}

fn blend(a: u32, fg: u8, bg: u8) -> u8 {
    ((a * fg as u32 + (255 - a) * bg as u32 + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned(width: u32, height: u32, format: PixelFormat) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height, format).unwrap();
        let plane = buf.plane_mut(0);
        for i in 0..plane.data.len() {
            plane.data[i] = (i % 251) as u8;
        }
        buf
    }

    #[test]
    fn resize_is_identity_on_matching_dimensions() {
        let buf = patterned(1280, 720, PixelFormat::Bgra32);
        let before = buf.plane(0).data.as_ptr();
        let out = resize_crop_to_fill(buf, 1280, 720).unwrap();
        // Same backing storage, so no allocation happened.
        assert_eq!(out.plane(0).data.as_ptr(), before);
    }

    #[test]
    fn resize_crops_to_fill_not_letterbox() {
        // A 640x480 source scales by max(2.0, 1.5) = 2.0 to 1280x960, then
        // crops to 1280x720. Letterboxing would leave untouched zero rows.
        let buf = PixelBuffer::filled(640, 480, PixelFormat::Bgra32, [10, 20, 30, 255]).unwrap();
        let out = resize_crop_to_fill(buf, 1280, 720).unwrap();
        assert_eq!(out.dimensions(), (1280, 720));
        assert_eq!(out.packed_pixel(0, 0), &[10, 20, 30, 255]);
        assert_eq!(out.packed_pixel(1279, 719), &[10, 20, 30, 255]);
    }

    #[test]
    fn resize_crops_top_left_region() {
        // Left half black, right half white, 100x100 -> 100x50 target.
        // Scale is max(1.0, 0.5) = 1.0, so the output is the top-left
        // 100x50 crop and keeps both halves.
        let mut buf = PixelBuffer::new(100, 100, PixelFormat::OneComponent8).unwrap();
        {
            let plane = buf.plane_mut(0);
            for y in 0..100 {
                for x in 50..100 {
                    plane.data[y * plane.stride + x] = 255;
                }
            }
        }
        let out = resize_crop_to_fill(buf, 100, 50).unwrap();
        assert_eq!(out.dimensions(), (100, 50));
        assert_eq!(out.plane(0).data[10], 0);
        assert_eq!(out.plane(0).data[90], 255);
    }

    #[test]
    fn copy_is_bit_identical_for_all_formats() {
        for format in [
            PixelFormat::Bgra32,
            PixelFormat::Rgba32,
            PixelFormat::Abgr32,
            PixelFormat::Argb32,
            PixelFormat::OneComponent8,
        ] {
            let src = patterned(33, 17, format);
            let dup = copy(&src).unwrap();
            assert_eq!(dup.dimensions(), src.dimensions());
            assert_eq!(dup.format(), src.format());
            assert_eq!(dup.plane(0).data, src.plane(0).data);
        }
    }

    #[test]
    fn copy_handles_padded_source_stride() {
        // 16 extra bytes of row padding in the source; the duplicate is
        // tightly packed and every visible pixel survives.
        let mut src = PixelBuffer::with_stride(8, 4, PixelFormat::Rgba32, 8 * 4 + 16).unwrap();
        {
            let plane = src.plane_mut(0);
            for y in 0..4usize {
                for x in 0..(8 * 4) {
                    plane.data[y * plane.stride + x] = (y * 31 + x) as u8;
                }
            }
        }
        let dup = copy(&src).unwrap();
        assert_eq!(dup.plane(0).stride, 8 * 4);
        for y in 0..4usize {
            for x in 0..(8 * 4) {
                assert_eq!(
                    dup.plane(0).data[y * dup.plane(0).stride + x],
                    src.plane(0).data[y * src.plane(0).stride + x]
                );
            }
        }
    }

    #[test]
    fn copy_preserves_attributes() {
        let mut src = patterned(8, 8, PixelFormat::Bgra32);
        src.set_attribute("origin", "camera");
        let dup = copy(&src).unwrap();
        assert_eq!(dup.attributes().get("origin").map(String::as_str), Some("camera"));
    }

    #[test]
    fn merge_alpha_rejects_non_one_component_alpha() {
        let color = patterned(8, 8, PixelFormat::Bgra32);
        let bad_alpha = patterned(8, 8, PixelFormat::Rgba32);
        let err = merge_alpha(&color, &bad_alpha, [0, 0, 0]).unwrap_err();
        assert!(matches!(err, BufferError::FormatMismatch(_)));
    }

    #[test]
    fn merge_alpha_rejects_dimension_mismatch() {
        let color = patterned(8, 8, PixelFormat::Bgra32);
        let alpha = patterned(8, 4, PixelFormat::OneComponent8);
        let err = merge_alpha(&color, &alpha, [0, 0, 0]).unwrap_err();
        assert!(matches!(err, BufferError::FormatMismatch(_)));
    }

    #[test]
    fn merge_alpha_rejects_alphaless_color_format() {
        let color = patterned(8, 8, PixelFormat::OneComponent8);
        let alpha = patterned(8, 8, PixelFormat::OneComponent8);
        assert!(merge_alpha(&color, &alpha, [0, 0, 0]).is_err());
    }

    #[test]
    fn merge_alpha_blends_against_background_color() {
        // Foreground solid red in BGRA; matte fully opaque on the left
        // pixel, fully transparent on the right.
        let color = PixelBuffer::filled(2, 1, PixelFormat::Bgra32, [0, 0, 255, 255]).unwrap();
        let mut alpha = PixelBuffer::new(2, 1, PixelFormat::OneComponent8).unwrap();
        alpha.plane_mut(0).data[0] = 255;
        alpha.plane_mut(0).data[1] = 0;

        let out = merge_alpha(&color, &alpha, [0, 255, 0]).unwrap();
        // Opaque pixel keeps the foreground red.
        assert_eq!(out.packed_pixel(0, 0), &[0, 0, 255, 255]);
        // Transparent pixel becomes the green background, alpha byte 0.
        assert_eq!(out.packed_pixel(1, 0), &[0, 255, 0, 0]);
    }

    #[test]
    fn merge_alpha_midpoint_blend() {
        let color = PixelBuffer::filled(1, 1, PixelFormat::Rgba32, [200, 100, 0, 255]).unwrap();
        let mut alpha = PixelBuffer::new(1, 1, PixelFormat::OneComponent8).unwrap();
        alpha.plane_mut(0).data[0] = 128;

        let out = merge_alpha(&color, &alpha, [0, 0, 100]).unwrap();
        let px = out.packed_pixel(0, 0);
        // r = (128*200 + 127*0 + 127)/255, g likewise, b mixes in the
        // background's 100.
        assert_eq!(px[0], 100);
        assert_eq!(px[1], 50);
        assert_eq!(px[2], 50);
        assert_eq!(px[3], 128);
    }
}
