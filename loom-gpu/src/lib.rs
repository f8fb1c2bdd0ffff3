// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Recording and submission control plane for a GPU backend.
//!
//! Work is recorded into immutable `Recording`s by any number of
//! `Recorder`s, inserted into a `Context` in the order it must execute, and
//! submitted to the context's single hardware queue. Pixel readback is
//! asynchronous: results are delivered to callbacks from completion passes
//! driven by the context's owner.

pub mod backend;
pub mod command;
pub mod context;
pub mod context_id;
pub mod mapped_buffer_manager;
pub mod message_bus;
pub mod pixel_conversion;
pub mod queue_manager;
pub mod readback;
pub mod recorder;
pub mod recording;
pub mod resource_provider;
pub mod resources;
pub mod shared_context;
pub mod single_owner;

pub use backend::null_backend::{NullBackend, NullBackendOptions};
pub use backend::{BackendError, GpuBackend};
pub use context::{
    Context, ContextError, ContextOptions, FinishedProc, InsertRecordingInfo, SyncToCpu,
};
pub use context_id::ContextId;
pub use queue_manager::{QueueError, SubmissionId, WorkLabel, WorkStatus};
pub use readback::{AsyncReadResult, ReadPixelsCallback};
pub use recorder::{Recorder, RecorderId, RecorderOptions};
pub use recording::{Recording, RecordingId};
pub use resources::{BackendTexture, BackendTextureHandle, Image, Surface};
