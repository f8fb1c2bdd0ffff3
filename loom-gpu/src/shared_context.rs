// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! State shared between a `Context` and every `Recorder` made from it.

use std::sync::Arc;

use loom_common::{BackendApi, ColorType, ImageInfo};

use crate::backend::GpuBackend;

/// Backend capabilities queried while recording and reading back.
#[derive(Debug, Clone)]
pub struct Caps {
    pub max_texture_size: i32,
    /// Color types that can be used as render targets.
    pub renderable: Vec<ColorType>,
    /// Color types a texture→buffer transfer can read from.
    pub readable: Vec<ColorType>,
    /// Row pitch alignment of texture→buffer transfers, in bytes.
    pub transfer_row_alignment: usize,
}

impl Caps {
    pub fn is_renderable(&self, color_type: ColorType) -> bool {
        self.renderable.contains(&color_type)
    }

    /// Whether a texture with `info` can be created at all.
    pub fn is_valid_texture_info(&self, info: &ImageInfo) -> bool {
        !info.dimensions.is_empty()
            && info.width() <= self.max_texture_size
            && info.height() <= self.max_texture_size
    }

    /// Layout the GPU writes when reading back a `src` texture, or `None` if
    /// the texture cannot be read back.
    pub fn supported_read_pixels_color_type(&self, src: ColorType) -> Option<ColorType> {
        if self.readable.contains(&src) {
            Some(src)
        } else {
            None
        }
    }
}

/// Immutable state owned jointly by a context and its recorders.
pub struct SharedContext {
    backend: Arc<dyn GpuBackend>,
    caps: Caps,
}

impl SharedContext {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        let caps = backend.caps();
        Arc::new(Self { backend, caps })
    }

    pub fn backend_api(&self) -> BackendApi {
        self.backend.api()
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }
}
