// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Immutable command lists snapped from a `Recorder`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::command::Command;
use crate::recorder::RecorderId;
use crate::resource_provider::ResourceProvider;
use crate::shared_context::SharedContext;

static NEXT_RECORDING_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordingId(u32);

impl RecordingId {
    fn next() -> Self {
        Self(NEXT_RECORDING_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recording#{}", self.0)
    }
}

struct RecordingInner {
    id: RecordingId,
    recorder: RecorderId,
    shared: Arc<SharedContext>,
    commands: Arc<[Command]>,
    inserted: AtomicBool,
}

/// A finished command list. Cheap to clone; clones share the "inserted" flag,
/// so a recording can be inserted into a context at most once.
#[derive(Clone)]
pub struct Recording(Arc<RecordingInner>);

impl Recording {
    pub(crate) fn new(
        recorder: RecorderId,
        shared: Arc<SharedContext>,
        commands: Vec<Command>,
    ) -> Self {
        Self(Arc::new(RecordingInner {
            id: RecordingId::next(),
            recorder,
            shared,
            commands: commands.into(),
            inserted: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> RecordingId {
        self.0.id
    }

    pub fn recorder_id(&self) -> RecorderId {
        self.0.recorder
    }

    pub fn command_count(&self) -> usize {
        self.0.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.commands.is_empty()
    }

    pub(crate) fn commands(&self) -> &Arc<[Command]> {
        &self.0.commands
    }

    pub(crate) fn shared_context(&self) -> &Arc<SharedContext> {
        &self.0.shared
    }

    /// Claim the recording for insertion. Returns `false` if it was already
    /// claimed.
    pub(crate) fn mark_inserted(&self) -> bool {
        !self.0.inserted.swap(true, Ordering::AcqRel)
    }

    pub fn was_inserted(&self) -> bool {
        self.0.inserted.load(Ordering::Acquire)
    }

    /// Bind every texture proxy the commands reference.
    pub(crate) fn instantiate(&self, provider: &mut dyn ResourceProvider) -> bool {
        self.0
            .commands
            .iter()
            .flat_map(Command::proxies)
            .all(|proxy| proxy.instantiate(provider))
    }
}

impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recording")
            .field("id", &self.0.id)
            .field("recorder", &self.0.recorder)
            .field("commands", &self.0.commands.len())
            .field("inserted", &self.was_inserted())
            .finish()
    }
}
