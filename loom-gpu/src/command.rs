// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Recorded GPU commands.

use std::sync::Arc;

use loom_common::{Color, IPoint, IRect};

use crate::resources::{Buffer, TextureProxy};

/// One unit of recorded GPU work.
#[derive(Debug, Clone)]
pub enum Command {
    /// Fill the whole target with a color.
    Clear { target: TextureProxy, color: Color },
    /// Upload tightly described CPU pixels (in the target's layout) into `rect`.
    WritePixels {
        target: TextureProxy,
        rect: IRect,
        pixels: Arc<[u8]>,
        row_bytes: usize,
    },
    /// Texture→texture copy between identical color types.
    CopyTexture {
        src: TextureProxy,
        src_rect: IRect,
        dst: TextureProxy,
        dst_point: IPoint,
    },
    /// Texture→buffer copy backing an async readback.
    CopyTextureToBuffer {
        src: TextureProxy,
        src_rect: IRect,
        buffer: Buffer,
        row_bytes: usize,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clear { .. } => "clear",
            Self::WritePixels { .. } => "write_pixels",
            Self::CopyTexture { .. } => "copy_texture",
            Self::CopyTextureToBuffer { .. } => "copy_texture_to_buffer",
        }
    }

    /// Every texture proxy the command touches.
    pub fn proxies(&self) -> Vec<&TextureProxy> {
        match self {
            Self::Clear { target, .. } | Self::WritePixels { target, .. } => vec![target],
            Self::CopyTexture { src, dst, .. } => vec![src, dst],
            Self::CopyTextureToBuffer { src, .. } => vec![src],
        }
    }
}
