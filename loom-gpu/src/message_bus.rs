// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cross-thread message routing keyed by `ContextId`.
//!
//! Readback results may be dropped on any thread, but the transfer buffers
//! they borrow belong to the context that produced them. Dropping a result
//! posts a `BufferFinishedMessage` to the owning context's inbox, which the
//! context drains on its own thread. Messages for a context that no longer
//! exists are dropped on the spot.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::context_id::ContextId;
use crate::resources::Buffer;

/// A client finished with a mapped transfer buffer.
pub struct BufferFinishedMessage {
    pub buffer: Buffer,
}

type Queue = Arc<Mutex<Vec<BufferFinishedMessage>>>;

fn registry() -> &'static Mutex<HashMap<ContextId, Queue>> {
    static REGISTRY: OnceLock<Mutex<HashMap<ContextId, Queue>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Receiving end registered for one context. Unregisters on drop.
pub struct Inbox {
    id: ContextId,
    queue: Queue,
}

impl Inbox {
    pub fn register(id: ContextId) -> Self {
        let queue: Queue = Arc::new(Mutex::new(Vec::new()));
        let previous = registry().lock().insert(id, queue.clone());
        debug_assert!(previous.is_none(), "inbox for {} registered twice", id);
        Self { id, queue }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Take every message delivered since the last poll.
    pub fn poll(&self) -> Vec<BufferFinishedMessage> {
        std::mem::take(&mut *self.queue.lock())
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        registry().lock().remove(&self.id);
    }
}

/// Deliver `message` to the inbox of `id`.
/// Returns `false` (and drops the message) if no such context is alive.
pub fn post(id: ContextId, message: BufferFinishedMessage) -> bool {
    let queue = registry().lock().get(&id).cloned();
    match queue {
        Some(queue) => {
            queue.lock().push(message);
            true
        }
        None => {
            log::trace!("message_bus: dropping message for dead {}", id);
            false
        }
    }
}

/// Whether a context with this id currently has a registered inbox.
pub fn is_live(id: ContextId) -> bool {
    id.is_valid() && registry().lock().contains_key(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_common::ColorType;

    #[test]
    fn test_post_to_live_inbox() {
        let id = ContextId::next();
        let inbox = Inbox::register(id);
        assert!(is_live(id));

        let buffer = Buffer::new(16, ColorType::Rgba8888);
        assert!(post(id, BufferFinishedMessage { buffer: buffer.clone() }));

        let messages = inbox.poll();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].buffer.ptr_eq(&buffer));
        assert!(inbox.poll().is_empty());
    }

    #[test]
    fn test_post_to_dead_inbox_is_dropped() {
        let id = ContextId::next();
        let inbox = Inbox::register(id);
        drop(inbox);

        assert!(!is_live(id));
        let buffer = Buffer::new(16, ColorType::Rgba8888);
        assert!(!post(id, BufferFinishedMessage { buffer }));
    }

    #[test]
    fn test_invalid_id_never_live() {
        assert!(!is_live(ContextId::invalid()));
    }
}
