use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::models::FaceBox;

pub const MATCH_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const CENTER_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const UNKNOWN_COLOR: Rgba<u8> = Rgba([255, 165, 0, 255]);
pub const FACE_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const LABEL_SCALE: i32 = 2;

/// Circle outline `thickness` pixels wide, centred on `radius`.
pub fn draw_ring(canvas: &mut RgbaImage, center: (i32, i32), radius: i32, thickness: i32, color: Rgba<u8>) {
    let inner = radius - thickness / 2;
    for r in inner..inner + thickness {
        if r > 0 {
            draw_hollow_circle_mut(canvas, center, r, color);
        }
    }
}

pub fn draw_dot(canvas: &mut RgbaImage, center: (i32, i32), radius: i32, color: Rgba<u8>) {
    draw_filled_circle_mut(canvas, center, radius, color);
}

/// Rectangle outline growing outwards from `face` by `thickness` pixels.
pub fn draw_box(canvas: &mut RgbaImage, face: &FaceBox, thickness: u32, color: Rgba<u8>) {
    if face.width == 0 || face.height == 0 {
        return;
    }
    for t in 0..thickness {
        let rect = Rect::at(face.x as i32 - t as i32, face.y as i32 - t as i32)
            .of_size(face.width + 2 * t, face.height + 2 * t);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Draw `text` with the built-in 5x7 font, top-left corner at `origin`.
/// Lowercase is drawn as uppercase; unsupported characters draw as a box.
pub fn draw_label(canvas: &mut RgbaImage, text: &str, origin: (i32, i32), color: Rgba<u8>) {
    let advance = (GLYPH_WIDTH + 1) * LABEL_SCALE;

    for (i, ch) in text.chars().enumerate() {
        let glyph = glyph(ch.to_ascii_uppercase());
        let gx = origin.0 + i as i32 * advance;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                let px = gx + col * LABEL_SCALE;
                let py = origin.1 + row as i32 * LABEL_SCALE;
                fill_block(canvas, px, py, LABEL_SCALE, color);
            }
        }
    }
}

/// Width in pixels of `text` as drawn by [`draw_label`].
pub fn label_width(text: &str) -> i32 {
    text.chars().count() as i32 * (GLYPH_WIDTH + 1) * LABEL_SCALE
}

pub fn label_height() -> i32 {
    GLYPH_HEIGHT * LABEL_SCALE
}

fn fill_block(canvas: &mut RgbaImage, x: i32, y: i32, size: i32, color: Rgba<u8>) {
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    for py in y..y + size {
        for px in x..x + size {
            if px >= 0 && py >= 0 && px < w && py < h {
                canvas.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
        '$' => [0x04, 0x0F, 0x14, 0x0E, 0x05, 0x1E, 0x04],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ' ' => [0x00; 7],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}
