// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU backend abstraction.
//!
//! A backend is selected once, when the context is created, and provides the
//! capability table plus the queue manager and resource provider the context
//! owns. This build ships the null backend, which executes commands in
//! software against CPU-visible memory.

pub mod command_processor;
pub mod null_backend;

use loom_common::{BackendApi, ImageInfo};
use thiserror::Error;

use crate::context::ContextOptions;
use crate::queue_manager::QueueManager;
use crate::resource_provider::ResourceProvider;
use crate::resources::BackendTexture;
use crate::shared_context::Caps;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    InitFailed(String),
}

/// Trait for GPU backends.
pub trait GpuBackend: Send + Sync {
    fn name(&self) -> &str;

    fn api(&self) -> BackendApi;

    fn caps(&self) -> Caps;

    /// One-time device setup that may fail. A context is only handed out if
    /// this succeeds.
    fn finish_initialization(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn make_queue_manager(&self) -> Box<dyn QueueManager>;

    fn make_resource_provider(&self, options: &ContextOptions) -> Box<dyn ResourceProvider>;

    /// Create a texture owned by the client rather than by a recording.
    fn create_backend_texture(&self, info: &ImageInfo) -> Option<BackendTexture>;
}
