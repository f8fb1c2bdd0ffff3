// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contract of the single hardware queue a context submits to.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::command::Command;
use crate::recording::RecordingId;

/// Handle to one queue submission, ordered by submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionId(pub u64);

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "submission#{}", self.0)
    }
}

/// Completion state of a submission as observed by polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Pending,
    Complete,
    /// The submission will never complete (device lost).
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("device lost")]
    DeviceLost,
    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// What a work unit was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkLabel {
    Recording(RecordingId),
    /// Internal texture→buffer transfer for a readback request.
    Transfer(u64),
}

/// An ordered command list executed as one piece.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub label: WorkLabel,
    pub commands: Arc<[Command]>,
}

/// The hardware execution queue.
///
/// Units passed to one `submit` call execute in order, and submissions
/// execute in the order they were made.
pub trait QueueManager: Send {
    fn submit(&mut self, units: Vec<WorkUnit>) -> Result<SubmissionId, QueueError>;

    /// Non-blocking completion check.
    fn poll(&mut self, submission: SubmissionId) -> WorkStatus;

    /// Block until everything submitted so far has executed.
    fn wait_idle(&mut self) -> Result<(), QueueError>;
}
