// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-thread command recording.
//!
//! A `Recorder` accumulates commands against surfaces it created and snaps
//! them into immutable `Recording`s. It never touches the queue or any other
//! context-owned state, so recorders can live on worker threads while the
//! context stays on its own.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use loom_common::{Color, IPoint, IRect, ImageInfo};

use crate::command::Command;
use crate::recording::Recording;
use crate::resources::{BackendTexture, Image, Surface, TextureProxy};
use crate::shared_context::SharedContext;
use crate::single_owner::SingleOwner;

static NEXT_RECORDER_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecorderId(u32);

impl RecorderId {
    fn next() -> Self {
        Self(NEXT_RECORDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RecorderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recorder#{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecorderOptions {
    /// Shown in log output.
    pub label: Option<String>,
}

pub struct Recorder {
    id: RecorderId,
    label: Option<String>,
    shared: Arc<SharedContext>,
    single_owner: SingleOwner,
    commands: Vec<Command>,
}

impl Recorder {
    pub(crate) fn new(shared: Arc<SharedContext>, options: RecorderOptions) -> Self {
        let id = RecorderId::next();
        log::debug!(
            "{}: created ({})",
            id,
            options.label.as_deref().unwrap_or("unlabelled")
        );
        Self {
            id,
            label: options.label,
            shared,
            single_owner: SingleOwner::new(),
            commands: Vec::new(),
        }
    }

    pub fn id(&self) -> RecorderId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn pending_command_count(&self) -> usize {
        self.commands.len()
    }

    /// Create a render target. `None` if the size or color type is not
    /// supported by the backend.
    pub fn make_surface(&mut self, info: ImageInfo) -> Option<Surface> {
        let _guard = self.single_owner.enter("Recorder::make_surface");
        let caps = self.shared.caps();
        if !caps.is_valid_texture_info(&info) || !caps.is_renderable(info.color_type()) {
            log::warn!(
                "{}: cannot make {}x{} {:?} surface",
                self.id,
                info.width(),
                info.height(),
                info.color_type()
            );
            return None;
        }
        Some(Surface::new(TextureProxy::new(info), self.shared.clone()))
    }

    pub fn clear(&mut self, surface: &Surface, color: Color) -> bool {
        let _guard = self.single_owner.enter("Recorder::clear");
        if !self.owns(surface.shared_context(), "clear") {
            return false;
        }
        self.commands.push(Command::Clear {
            target: surface.proxy().clone(),
            color,
        });
        true
    }

    /// Upload `pixels`, laid out in the surface's color type with `row_bytes`
    /// pitch, into `rect`.
    pub fn write_pixels(
        &mut self,
        surface: &Surface,
        rect: IRect,
        pixels: &[u8],
        row_bytes: usize,
    ) -> bool {
        let _guard = self.single_owner.enter("Recorder::write_pixels");
        if !self.owns(surface.shared_context(), "write_pixels") {
            return false;
        }
        if rect.is_empty() || !surface.info().bounds().contains(&rect) {
            log::warn!("{}: write_pixels rect {} outside surface", self.id, rect);
            return false;
        }
        let tight = rect.width() as usize * surface.info().color_info.bytes_per_pixel();
        let needed = row_bytes * (rect.height() as usize - 1) + tight;
        if row_bytes < tight || pixels.len() < needed {
            log::warn!(
                "{}: write_pixels got {} bytes with pitch {}, need {}",
                self.id,
                pixels.len(),
                row_bytes,
                needed
            );
            return false;
        }
        self.commands.push(Command::WritePixels {
            target: surface.proxy().clone(),
            rect,
            pixels: pixels[..needed].into(),
            row_bytes,
        });
        true
    }

    /// Copy `src_rect` of `src` into `dst` at `dst_point`. Both must share a
    /// color type.
    pub fn copy(&mut self, src: &Image, src_rect: IRect, dst: &Surface, dst_point: IPoint) -> bool {
        let _guard = self.single_owner.enter("Recorder::copy");
        if !self.owns(src.shared_context(), "copy") || !self.owns(dst.shared_context(), "copy") {
            return false;
        }
        if src.info().color_type() != dst.info().color_type() {
            log::warn!(
                "{}: copy between {:?} and {:?}",
                self.id,
                src.info().color_type(),
                dst.info().color_type()
            );
            return false;
        }
        if !src.info().bounds().contains(&src_rect) {
            log::warn!("{}: copy source {} out of bounds", self.id, src_rect);
            return false;
        }
        let dst_rect = IRect::from_xywh(
            dst_point.x,
            dst_point.y,
            src_rect.width(),
            src_rect.height(),
        );
        if !dst.info().bounds().contains(&dst_rect) {
            log::warn!("{}: copy destination {} out of bounds", self.id, dst_rect);
            return false;
        }
        self.commands.push(Command::CopyTexture {
            src: src.proxy().clone(),
            src_rect,
            dst: dst.proxy().clone(),
            dst_point,
        });
        true
    }

    /// Create a client-owned texture. Release it with
    /// `Context::delete_backend_texture`.
    pub fn create_backend_texture(&mut self, info: ImageInfo) -> Option<BackendTexture> {
        let _guard = self.single_owner.enter("Recorder::create_backend_texture");
        if !self.shared.caps().is_valid_texture_info(&info) {
            log::warn!("{}: invalid backend texture size", self.id);
            return None;
        }
        self.shared.backend().create_backend_texture(&info)
    }

    /// Render into a client-owned texture.
    pub fn wrap_backend_texture(&mut self, texture: &BackendTexture) -> Option<Surface> {
        let _guard = self.single_owner.enter("Recorder::wrap_backend_texture");
        if texture.backend() != Some(self.shared.backend_api()) {
            log::warn!(
                "{}: cannot wrap {:?} texture on {:?} backend",
                self.id,
                texture.backend(),
                self.shared.backend_api()
            );
            return None;
        }
        if !self.shared.caps().is_renderable(texture.info().color_type()) {
            return None;
        }
        Some(Surface::new(
            TextureProxy::wrapping(texture.clone()),
            self.shared.clone(),
        ))
    }

    /// Move everything recorded so far into a new `Recording`.
    pub fn snap(&mut self) -> Recording {
        let _guard = self.single_owner.enter("Recorder::snap");
        let commands = std::mem::take(&mut self.commands);
        let recording = Recording::new(self.id, self.shared.clone(), commands);
        log::debug!(
            "{}: snapped {} ({} commands)",
            self.id,
            recording.id(),
            recording.command_count()
        );
        recording
    }

    fn owns(&self, shared: &Arc<SharedContext>, op: &str) -> bool {
        if Arc::ptr_eq(shared, &self.shared) {
            return true;
        }
        log::warn!("{}: {} on a resource from another context", self.id, op);
        false
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("pending", &self.commands.len())
            .finish()
    }
}
