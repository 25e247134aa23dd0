//! Capture-time marker burned into the top-left corner of each frame.
//!
//! Red digits on a white box, so end-to-end latency can be read off a
//! receiving client's screen by comparing against its own clock.

use image::{ImageBuffer, Rgba};

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;
const MARGIN: u32 = 10;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([255, 0, 0, 255]);

// 3x5 bitmaps, one row per entry, MSB is the leftmost column
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

/// Glyph scale for a frame height: 10 at 1080p, never below 1.
pub fn scale_for_height(height: u32) -> u32 {
    (height / 108).max(1)
}

/// Draw `timestamp_ms` onto a packed RGBA buffer in place.
///
/// Returns `false` without touching the buffer if it does not hold
/// `width * height` RGBA pixels.
pub fn stamp_timestamp(pixels: &mut [u8], width: u32, height: u32, timestamp_ms: u64) -> bool {
    let Some(mut img) = ImageBuffer::<Rgba<u8>, &mut [u8]>::from_raw(width, height, pixels) else {
        return false;
    };

    let text = timestamp_ms.to_string();
    let scale = scale_for_height(height);
    let advance = (GLYPH_W + 1) * scale;
    let text_w = advance * text.len() as u32 - scale;
    let text_h = GLYPH_H * scale;
    let pad = scale;

    let box_origin = MARGIN - pad.min(MARGIN);
    fill_rect(
        &mut img,
        box_origin,
        box_origin,
        text_w + 2 * pad,
        text_h + 2 * pad,
        BACKGROUND,
    );

    for (i, ch) in text.bytes().enumerate() {
        let glyph = &DIGITS[(ch - b'0') as usize];
        let origin_x = MARGIN + i as u32 * advance;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                    let (x, y) = (origin_x + col * scale, MARGIN + row as u32 * scale);
                    fill_rect(&mut img, x, y, scale, scale, INK);
                }
            }
        }
    }
    true
}

fn fill_rect(
    img: &mut ImageBuffer<Rgba<u8>, &mut [u8]>,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    color: Rgba<u8>,
) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(buf: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    #[test]
    fn test_stamp_draws_box_and_digits() {
        let (w, h) = (64, 32);
        let mut buf = vec![0u8; (w * h * 4) as usize];
        assert!(stamp_timestamp(&mut buf, w, h, 8));

        // "8" at scale 1: top row is fully inked, the middle of row 1 is background
        assert_eq!(pixel(&buf, w, MARGIN, MARGIN), [255, 0, 0, 255]);
        assert_eq!(pixel(&buf, w, MARGIN + 1, MARGIN + 1), [255, 255, 255, 255]);
        // untouched far corner
        assert_eq!(pixel(&buf, w, w - 1, h - 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_stamp_clips_at_frame_edge() {
        let (w, h) = (12, 12);
        let mut buf = vec![0u8; (w * h * 4) as usize];
        assert!(stamp_timestamp(&mut buf, w, h, 1_234_567_890_123));
        assert_eq!(buf.len(), (w * h * 4) as usize);
    }

    #[test]
    fn test_stamp_rejects_short_buffer() {
        let mut buf = vec![0u8; 10];
        assert!(!stamp_timestamp(&mut buf, 64, 32, 1));
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_scale_for_height() {
        assert_eq!(scale_for_height(1080), 10);
        assert_eq!(scale_for_height(2160), 20);
        assert_eq!(scale_for_height(50), 1);
    }
}
