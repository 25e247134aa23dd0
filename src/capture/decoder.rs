use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

use super::frame::PixelFormat;
use crate::error::CaptureError;

/// Convert a raw device buffer to packed RGBA.
pub fn to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, CaptureError> {
    let pixel_count = width as usize * height as usize;
    match format {
        PixelFormat::Rgba => {
            check_len(data, pixel_count * 4)?;
            Ok(data.to_vec())
        }
        PixelFormat::Rgb24 => {
            check_len(data, pixel_count * 3)?;
            Ok(expand_rgb(data, [0, 1, 2]))
        }
        PixelFormat::Bgr24 => {
            check_len(data, pixel_count * 3)?;
            Ok(expand_rgb(data, [2, 1, 0]))
        }
        PixelFormat::Yuyv4 => {
            check_len(data, pixel_count * 2)?;
            Ok(yuyv_to_rgba(data))
        }
        PixelFormat::Mjpeg => {
            let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
            let mut decoder = JpegDecoder::new_with_options(data, options);
            let pixels = decoder
                .decode()
                .map_err(|e| CaptureError::decode(format!("{e:?}")))?;
            check_len(&pixels, pixel_count * 4)?;
            Ok(pixels)
        }
    }
}

fn check_len(data: &[u8], expected: usize) -> Result<(), CaptureError> {
    if data.len() != expected {
        return Err(CaptureError::decode(format!(
            "frame buffer should be {expected} bytes but is {}",
            data.len()
        )));
    }
    Ok(())
}

fn expand_rgb(data: &[u8], order: [usize; 3]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(data.len() / 3 * 4);
    for chunk in data.chunks_exact(3) {
        rgba.extend_from_slice(&[chunk[order[0]], chunk[order[1]], chunk[order[2]], 255]);
    }
    rgba
}

// BT.601 limited range, integer approximation
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    [r.clamp(0, 255) as u8, g.clamp(0, 255) as u8, b.clamp(0, 255) as u8]
}

fn yuyv_to_rgba(data: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(data.len() * 2);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            let [r, g, b] = yuv_to_rgb(y, u, v);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }
    rgba
}
