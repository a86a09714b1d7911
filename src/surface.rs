//! CPU surfaces.
//!
//! A surface is an `image::RgbaImage`. Before a pass can sample it, it is
//! composited onto a transparent canvas the size of the pass's screen.

use glam::{IVec2, UVec2};
use image::{imageops, Rgba, RgbaImage};

/// Blit `surface` with its top-left corner at `top_left` onto a transparent
/// canvas of `canvas_size`. Parts outside the canvas are clipped.
pub fn compose(surface: &RgbaImage, top_left: IVec2, canvas_size: UVec2) -> RgbaImage {
    let size = canvas_size.max(UVec2::ONE);
    let mut canvas = RgbaImage::from_pixel(size.x, size.y, Rgba([0, 0, 0, 0]));
    imageops::overlay(&mut canvas, surface, top_left.x as i64, top_left.y as i64);
    canvas
}

/// Raw RGBA bytes with the last row first.
pub fn bottom_up_bytes(image: &RgbaImage) -> Vec<u8> {
    imageops::flip_vertical(image).into_raw()
}
