// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Async pixel readback results.
//!
//! A readback request turns into a texture→buffer copy on the queue plus a
//! pending callback entry. Once the copy is known to be complete the buffer is
//! mapped and either handed to the client as-is, or converted into the
//! requested layout first.

use std::ops::Deref;

use loom_common::{ColorInfo, ReadPixelsError};
use parking_lot::MappedRwLockReadGuard;

use crate::context_id::ContextId;
use crate::message_bus::{self, BufferFinishedMessage};
use crate::pixel_conversion;
use crate::resources::Buffer;

/// Converts mapped transfer memory (`src`) into the client layout (`dst`).
pub type PixelConverter = Box<dyn Fn(&mut [u8], &[u8]) + Send>;

/// Client callback; invoked exactly once per accepted request.
pub type ReadPixelsCallback = Box<dyn FnOnce(Result<AsyncReadResult, ReadPixelsError>) + Send>;

/// Outcome of scheduling a texture→buffer transfer.
pub struct PixelTransferResult {
    /// `None` if the transfer could not be scheduled.
    pub transfer_buffer: Option<Buffer>,
    /// Present only when the buffer's layout differs from the requested one.
    pub pixel_converter: Option<PixelConverter>,
}

impl PixelTransferResult {
    pub fn failed() -> Self {
        Self {
            transfer_buffer: None,
            pixel_converter: None,
        }
    }
}

/// Geometry and layouts of one readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackLayout {
    pub width: usize,
    pub height: usize,
    /// Layout the GPU writes into the transfer buffer.
    pub transfer_color_info: ColorInfo,
    /// Row pitch of the transfer buffer.
    pub transfer_row_bytes: usize,
    /// Layout the client asked for.
    pub dst_color_info: ColorInfo,
}

impl ReadbackLayout {
    pub fn transfer_size(&self) -> usize {
        self.transfer_row_bytes * self.height
    }

    /// Row pitch of converted (tightly packed) output.
    pub fn dst_row_bytes(&self) -> usize {
        self.width * self.dst_color_info.bytes_per_pixel()
    }
}

/// Build the converter for `layout`, or `None` if the transfer layout already
/// matches the requested one.
pub fn make_pixel_converter(layout: &ReadbackLayout) -> Option<PixelConverter> {
    if !pixel_conversion::needs_conversion(layout.transfer_color_info, layout.dst_color_info) {
        return None;
    }
    let layout = *layout;
    Some(Box::new(move |dst: &mut [u8], src: &[u8]| {
        pixel_conversion::convert_pixels(
            layout.dst_color_info,
            dst,
            layout.dst_row_bytes(),
            layout.transfer_color_info,
            src,
            layout.transfer_row_bytes,
            layout.width,
            layout.height,
        );
    }))
}

enum Storage {
    /// Zero-copy view of the mapped transfer buffer, returned to the owning
    /// context when the result is dropped.
    Mapped { buffer: Buffer, owner: ContextId },
    Owned(Vec<u8>),
}

/// Pixels delivered to a readback callback.
pub struct AsyncReadResult {
    width: usize,
    height: usize,
    color_info: ColorInfo,
    row_bytes: usize,
    storage: Storage,
}

impl AsyncReadResult {
    pub(crate) fn mapped(layout: &ReadbackLayout, buffer: Buffer, owner: ContextId) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            color_info: layout.dst_color_info,
            row_bytes: layout.transfer_row_bytes,
            storage: Storage::Mapped { buffer, owner },
        }
    }

    pub(crate) fn owned(layout: &ReadbackLayout, pixels: Vec<u8>) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            color_info: layout.dst_color_info,
            row_bytes: layout.dst_row_bytes(),
            storage: Storage::Owned(pixels),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn color_info(&self) -> ColorInfo {
        self.color_info
    }

    /// Row pitch of `data()`; may exceed `width * bytes_per_pixel`.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn data(&self) -> ReadBytes<'_> {
        match &self.storage {
            Storage::Mapped { buffer, .. } => match buffer.mapped_bytes(self.row_bytes * self.height) {
                Some(bytes) => ReadBytes::Mapped(bytes),
                None => ReadBytes::Owned(&[]),
            },
            Storage::Owned(pixels) => ReadBytes::Owned(pixels),
        }
    }

    /// Copy the pixels out with row padding removed.
    pub fn to_packed_vec(&self) -> Vec<u8> {
        let tight = self.width * self.color_info.bytes_per_pixel();
        let data = self.data();
        let mut out = Vec::with_capacity(tight * self.height);
        for row in data.chunks(self.row_bytes).take(self.height) {
            out.extend_from_slice(&row[..tight.min(row.len())]);
        }
        out
    }

    /// Id of the borrowed transfer buffer, for zero-copy results.
    pub fn buffer_id(&self) -> Option<u64> {
        match &self.storage {
            Storage::Mapped { buffer, .. } => Some(buffer.id()),
            Storage::Owned(_) => None,
        }
    }

    pub fn is_zero_copy(&self) -> bool {
        matches!(self.storage, Storage::Mapped { .. })
    }
}

impl Drop for AsyncReadResult {
    fn drop(&mut self) {
        if let Storage::Mapped { buffer, owner } =
            std::mem::replace(&mut self.storage, Storage::Owned(Vec::new()))
        {
            let message = BufferFinishedMessage {
                buffer: buffer.clone(),
            };
            if !message_bus::post(owner, message) {
                buffer.unmap();
            }
        }
    }
}

/// Borrowed view of readback pixels.
pub enum ReadBytes<'a> {
    Mapped(MappedRwLockReadGuard<'a, [u8]>),
    Owned(&'a [u8]),
}

impl Deref for ReadBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(bytes) => &**bytes,
            Self::Owned(bytes) => *bytes,
        }
    }
}
