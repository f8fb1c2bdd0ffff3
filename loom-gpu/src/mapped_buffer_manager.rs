// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pending readback entries and the mapped buffers lent to clients.
//!
//! Entries are bound to the queue submission carrying their texture→buffer
//! copy. They are only finished once that submission polls as complete; the
//! manager never waits.

use std::collections::HashMap;

use loom_common::ReadPixelsError;

use crate::context_id::ContextId;
use crate::message_bus::Inbox;
use crate::queue_manager::{QueueManager, SubmissionId, WorkStatus};
use crate::readback::{AsyncReadResult, PixelConverter, ReadPixelsCallback, ReadbackLayout};
use crate::resources::Buffer;

/// A readback that has a transfer buffer but has not been submitted yet.
pub struct ReadbackRequest {
    pub buffer: Buffer,
    pub converter: Option<PixelConverter>,
    pub layout: ReadbackLayout,
    pub callback: ReadPixelsCallback,
}

/// A readback whose copy is on the queue.
pub struct PendingReadback {
    pub submission: SubmissionId,
    pub request: ReadbackRequest,
}

/// A finished entry, ready for its callback to run outside any lock.
pub struct ReadbackDelivery {
    pub callback: ReadPixelsCallback,
    pub result: Result<AsyncReadResult, ReadPixelsError>,
    /// Transfer buffer that can go back to the resource provider.
    pub recycle: Option<Buffer>,
}

impl ReadbackRequest {
    /// Map the buffer and produce the client result. Only valid once the
    /// copy has completed.
    pub fn complete(self, owner: ContextId) -> ReadbackDelivery {
        let ReadbackRequest {
            buffer,
            converter,
            layout,
            callback,
        } = self;

        if !buffer.map() {
            log::warn!("readback: buffer {} already mapped", buffer.id());
            return ReadbackDelivery {
                callback,
                result: Err(ReadPixelsError::MapFailed),
                recycle: None,
            };
        }

        match converter {
            None => ReadbackDelivery {
                callback,
                result: Ok(AsyncReadResult::mapped(&layout, buffer, owner)),
                recycle: None,
            },
            Some(convert) => {
                let converted = buffer.mapped_bytes(layout.transfer_size()).map(|src| {
                    let mut pixels = vec![0u8; layout.dst_row_bytes() * layout.height];
                    convert(&mut pixels, &src);
                    pixels
                });
                let result = match converted {
                    Some(pixels) => Ok(AsyncReadResult::owned(&layout, pixels)),
                    None => Err(ReadPixelsError::MapFailed),
                };
                ReadbackDelivery {
                    callback,
                    result,
                    recycle: Some(buffer),
                }
            }
        }
    }

    pub fn fail(self, error: ReadPixelsError) -> ReadbackDelivery {
        ReadbackDelivery {
            callback: self.callback,
            result: Err(error),
            recycle: Some(self.buffer),
        }
    }
}

/// Tracks pending readbacks for one context.
pub struct ClientMappedBufferManager {
    inbox: Inbox,
    pending: Vec<PendingReadback>,
}

impl ClientMappedBufferManager {
    pub fn new(owner: ContextId) -> Self {
        Self {
            inbox: Inbox::register(owner),
            pending: Vec::new(),
        }
    }

    pub fn owner(&self) -> ContextId {
        self.inbox.id()
    }

    pub fn insert(&mut self, entry: PendingReadback) {
        log::trace!(
            "mapped_buffers: buffer {} pending on {}",
            entry.request.buffer.id(),
            entry.submission
        );
        self.pending.push(entry);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffers whose `AsyncReadResult` was dropped since the last call.
    pub fn take_returned_buffers(&mut self) -> Vec<Buffer> {
        self.inbox
            .poll()
            .into_iter()
            .map(|message| message.buffer)
            .collect()
    }

    /// Finish every entry whose submission has completed or failed.
    pub fn take_completed(&mut self, queue: &mut dyn QueueManager) -> Vec<ReadbackDelivery> {
        let owner = self.owner();
        let mut statuses: HashMap<SubmissionId, WorkStatus> = HashMap::new();
        let mut still_pending = Vec::with_capacity(self.pending.len());
        let mut finished = Vec::new();

        for entry in self.pending.drain(..) {
            let status = *statuses
                .entry(entry.submission)
                .or_insert_with(|| queue.poll(entry.submission));
            match status {
                WorkStatus::Pending => still_pending.push(entry),
                WorkStatus::Complete => {
                    log::trace!("mapped_buffers: {} complete", entry.submission);
                    finished.push(entry.request.complete(owner));
                }
                WorkStatus::Failed => {
                    log::warn!("mapped_buffers: {} failed", entry.submission);
                    finished.push(entry.request.fail(ReadPixelsError::DeviceLost));
                }
            }
        }

        self.pending = still_pending;
        finished
    }

    /// Fail every pending entry with `Cancelled`.
    pub fn drain_all(&mut self) -> Vec<ReadbackDelivery> {
        self.pending
            .drain(..)
            .map(|entry| entry.request.fail(ReadPixelsError::Cancelled))
            .collect()
    }
}
