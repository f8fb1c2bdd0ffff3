// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conversion between the 8-bit pixel layouts.
//!
//! Every conversion goes through unpremultiplied RGBA: decode the source
//! pixel, unpremultiply if needed, then encode into the destination layout.

use loom_common::{AlphaType, Color, ColorInfo, ColorType};

/// Whether data in `src` must be converted to be read as `dst`.
pub fn needs_conversion(src: ColorInfo, dst: ColorInfo) -> bool {
    src.color_type != dst.color_type || src.effective_alpha_type() != dst.effective_alpha_type()
}

/// Encode one color into a single pixel of `info`.
pub fn encode_color(color: Color, info: ColorInfo) -> Vec<u8> {
    let mut pixel = vec![0u8; info.bytes_per_pixel()];
    store(&mut pixel, info, [color.r, color.g, color.b, color.a]);
    pixel
}

/// Convert a `width` x `height` block of pixels.
#[allow(clippy::too_many_arguments)]
pub fn convert_pixels(
    dst_info: ColorInfo,
    dst: &mut [u8],
    dst_row_bytes: usize,
    src_info: ColorInfo,
    src: &[u8],
    src_row_bytes: usize,
    width: usize,
    height: usize,
) {
    let src_bpp = src_info.bytes_per_pixel();
    let dst_bpp = dst_info.bytes_per_pixel();
    for y in 0..height {
        let src_row = &src[y * src_row_bytes..y * src_row_bytes + width * src_bpp];
        let dst_row = &mut dst[y * dst_row_bytes..y * dst_row_bytes + width * dst_bpp];
        for (s, d) in src_row
            .chunks_exact(src_bpp)
            .zip(dst_row.chunks_exact_mut(dst_bpp))
        {
            store(d, dst_info, load(s, src_info));
        }
    }
}

/// Decode one pixel into unpremultiplied RGBA.
fn load(pixel: &[u8], info: ColorInfo) -> [u8; 4] {
    let rgba = match info.color_type {
        ColorType::Alpha8 => [0, 0, 0, pixel[0]],
        ColorType::Gray8 => [pixel[0], pixel[0], pixel[0], 0xFF],
        ColorType::Rgba8888 => [pixel[0], pixel[1], pixel[2], pixel[3]],
        ColorType::Rgb888x => [pixel[0], pixel[1], pixel[2], 0xFF],
        ColorType::Bgra8888 => [pixel[2], pixel[1], pixel[0], pixel[3]],
    };
    match info.effective_alpha_type() {
        AlphaType::Premul => unpremultiply(rgba),
        AlphaType::Opaque => [rgba[0], rgba[1], rgba[2], 0xFF],
        AlphaType::Unpremul => rgba,
    }
}

/// Encode unpremultiplied RGBA into one pixel.
fn store(pixel: &mut [u8], info: ColorInfo, rgba: [u8; 4]) {
    let [r, g, b, a] = match info.effective_alpha_type() {
        AlphaType::Premul => premultiply(rgba),
        AlphaType::Opaque => [rgba[0], rgba[1], rgba[2], 0xFF],
        AlphaType::Unpremul => rgba,
    };
    match info.color_type {
        ColorType::Alpha8 => pixel[0] = a,
        ColorType::Gray8 => pixel[0] = luminance(r, g, b),
        ColorType::Rgba8888 => pixel.copy_from_slice(&[r, g, b, a]),
        ColorType::Rgb888x => pixel.copy_from_slice(&[r, g, b, 0xFF]),
        ColorType::Bgra8888 => pixel.copy_from_slice(&[b, g, r, a]),
    }
}

/// Rec. 709 luma in 8.8 fixed point; weights sum to 256.
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 54 + g as u32 * 183 + b as u32 * 19 + 128) >> 8) as u8
}

fn premultiply([r, g, b, a]: [u8; 4]) -> [u8; 4] {
    let mul = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
    [mul(r), mul(g), mul(b), a]
}

fn unpremultiply([r, g, b, a]: [u8; 4]) -> [u8; 4] {
    if a == 0 {
        return [0, 0, 0, 0];
    }
    let div = |c: u8| ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
    [div(r), div(g), div(b), a]
}
