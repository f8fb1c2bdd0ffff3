// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Creation and reclamation of backend resources.

use std::collections::HashMap;

use loom_common::{ColorType, ImageInfo};

use crate::resources::{BackendTexture, Buffer, Texture};

/// Allocates backend resources on behalf of the owning context.
///
/// Failures are reported as `None` / `false`; nothing here panics on
/// exhaustion.
pub trait ResourceProvider: Send {
    fn create_texture(&mut self, info: &ImageInfo) -> Option<Texture>;

    /// Bind a client-created backend texture. `None` if the handle is unknown.
    fn wrap_backend_texture(&mut self, texture: &BackendTexture) -> Option<Texture>;

    /// A CPU-mappable buffer of exactly `size` bytes holding `format` pixels,
    /// reused from the cache when possible.
    fn find_or_create_transfer_buffer(&mut self, size: usize, format: ColorType) -> Option<Buffer>;

    /// Hand a transfer buffer back for reuse.
    fn return_buffer(&mut self, buffer: Buffer);

    /// Release a client-created backend texture. Returns `false` if the
    /// handle was unknown.
    fn delete_backend_texture(&mut self, texture: &BackendTexture) -> bool;
}

/// Cache of idle transfer buffers keyed by size and format.
pub struct BufferPool {
    limit: usize,
    cached: usize,
    free: HashMap<(usize, ColorType), Vec<Buffer>>,
}

impl BufferPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            cached: 0,
            free: HashMap::new(),
        }
    }

    pub fn take(&mut self, size: usize, format: ColorType) -> Option<Buffer> {
        let buffer = self.free.get_mut(&(size, format))?.pop()?;
        self.cached -= 1;
        log::trace!("buffer_pool: reuse buffer {} ({} bytes)", buffer.id(), size);
        Some(buffer)
    }

    /// Cache `buffer` for reuse. Returns `false` (dropping it) when full.
    pub fn give(&mut self, buffer: Buffer) -> bool {
        buffer.unmap();
        if self.cached >= self.limit {
            log::trace!("buffer_pool: full, releasing buffer {}", buffer.id());
            return false;
        }
        let key = (buffer.size(), buffer.native_format());
        self.free.entry(key).or_default().push(buffer);
        self.cached += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.cached
    }

    pub fn is_empty(&self) -> bool {
        self.cached == 0
    }
}
