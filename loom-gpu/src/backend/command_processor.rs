// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Software command processor.
//!
//! Executes recorded commands against the CPU-visible memory of textures and
//! transfer buffers. Every texture a command references must already be
//! instantiated; commands touching an unbound proxy are skipped with a
//! warning.
//!
//! ## Memory layout
//!
//! | Resource | Layout                                              |
//! |----------|-----------------------------------------------------|
//! | Texture  | tightly packed rows, `width * bpp` bytes per row    |
//! | Buffer   | rows of `row_bytes` pitch, transfer layout per copy |

use loom_common::{IPoint, IRect};

use crate::command::Command;
use crate::pixel_conversion;
use crate::queue_manager::WorkUnit;
use crate::resources::{Buffer, Texture, TextureProxy};

/// Executes work units in order and counts what it ran.
#[derive(Debug, Default)]
pub struct CommandProcessor {
    executed: u64,
    skipped: u64,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn process_unit(&mut self, unit: &WorkUnit) {
        log::trace!(
            "CommandProcessor: {:?} ({} commands)",
            unit.label,
            unit.commands.len()
        );
        for command in unit.commands.iter() {
            self.process_command(command);
        }
    }

    pub fn process_command(&mut self, command: &Command) {
        let ok = match command {
            Command::Clear { target, color } => bound(target).map(|texture| {
                let pixel = pixel_conversion::encode_color(*color, texture.info().color_info);
                for dst in texture.write().chunks_exact_mut(pixel.len()) {
                    dst.copy_from_slice(&pixel);
                }
            }),
            Command::WritePixels {
                target,
                rect,
                pixels,
                row_bytes,
            } => bound(target).map(|texture| write_rect(texture, *rect, pixels, *row_bytes)),
            Command::CopyTexture {
                src,
                src_rect,
                dst,
                dst_point,
            } => bound(src)
                .zip(bound(dst))
                .map(|(src, dst)| copy_texture(src, *src_rect, dst, *dst_point)),
            Command::CopyTextureToBuffer {
                src,
                src_rect,
                buffer,
                row_bytes,
            } => bound(src).map(|texture| copy_to_buffer(texture, *src_rect, buffer, *row_bytes)),
        };

        if ok.is_some() {
            self.executed += 1;
        } else {
            log::warn!("CommandProcessor: skipping {} on unbound texture", command.name());
            self.skipped += 1;
        }
    }
}

fn bound(proxy: &TextureProxy) -> Option<&Texture> {
    proxy.texture()
}

/// Copy `rect` out of `texture` as rows of `width * bpp` bytes.
fn read_rect(texture: &Texture, rect: IRect) -> Vec<u8> {
    let bpp = texture.info().color_info.bytes_per_pixel();
    let pitch = texture.row_bytes();
    let tight = rect.width() as usize * bpp;
    let memory = texture.read();
    let mut out = Vec::with_capacity(tight * rect.height() as usize);
    for y in rect.top..rect.bottom {
        let start = y as usize * pitch + rect.left as usize * bpp;
        out.extend_from_slice(&memory[start..start + tight]);
    }
    out
}

fn write_rect(texture: &Texture, rect: IRect, pixels: &[u8], row_bytes: usize) {
    let bpp = texture.info().color_info.bytes_per_pixel();
    let pitch = texture.row_bytes();
    let tight = rect.width() as usize * bpp;
    let mut memory = texture.write();
    for (row, y) in (rect.top..rect.bottom).enumerate() {
        let dst = y as usize * pitch + rect.left as usize * bpp;
        let src = row * row_bytes;
        memory[dst..dst + tight].copy_from_slice(&pixels[src..src + tight]);
    }
}

fn copy_texture(src: &Texture, src_rect: IRect, dst: &Texture, dst_point: IPoint) {
    // Staged through a temporary so src and dst may be the same texture.
    let pixels = read_rect(src, src_rect);
    let dst_rect = IRect::from_xywh(dst_point.x, dst_point.y, src_rect.width(), src_rect.height());
    let tight = src_rect.width() as usize * src.info().color_info.bytes_per_pixel();
    write_rect(dst, dst_rect, &pixels, tight);
}

fn copy_to_buffer(src: &Texture, src_rect: IRect, buffer: &Buffer, row_bytes: usize) {
    let pixels = read_rect(src, src_rect);
    let tight = src_rect.width() as usize * src.info().color_info.bytes_per_pixel();
    let mut memory = buffer.device_memory();
    let needed = row_bytes * src_rect.height() as usize;
    if memory.len() < needed {
        log::warn!(
            "CommandProcessor: buffer {} too small ({} < {})",
            buffer.id(),
            memory.len(),
            needed
        );
        return;
    }
    for (row, chunk) in pixels.chunks_exact(tight).enumerate() {
        let dst = row * row_bytes;
        memory[dst..dst + tight].copy_from_slice(chunk);
    }
}
