// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Null backend: a software device with a simulated timeline.
//!
//! Submissions are queued in flight and executed on the CPU when they retire.
//! By default a submission retires the first time it is polled or waited on;
//! with `retire_on_poll` off it stays in flight until `retire_all()`, which
//! lets tests observe work that is genuinely pending.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use loom_common::{BackendApi, ColorType, ImageInfo};
use parking_lot::Mutex;

use super::command_processor::CommandProcessor;
use super::{BackendError, GpuBackend};
use crate::context::ContextOptions;
use crate::queue_manager::{QueueError, QueueManager, SubmissionId, WorkLabel, WorkStatus, WorkUnit};
use crate::resource_provider::{BufferPool, ResourceProvider};
use crate::resources::{BackendTexture, BackendTextureHandle, Buffer, Texture};
use crate::shared_context::Caps;

#[derive(Debug, Clone)]
pub struct NullBackendOptions {
    pub max_texture_size: i32,
    /// In-flight submissions execute the first time they are polled.
    pub retire_on_poll: bool,
    /// Make `finish_initialization` fail.
    pub fail_initialization: bool,
    /// Largest transfer buffer the device will allocate.
    pub max_buffer_bytes: usize,
}

impl Default for NullBackendOptions {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            retire_on_poll: true,
            fail_initialization: false,
            max_buffer_bytes: 64 << 20,
        }
    }
}

struct InFlight {
    id: SubmissionId,
    units: Vec<WorkUnit>,
}

struct DeviceState {
    next_submission: u64,
    /// Raw id of the newest retired submission; 0 before the first.
    completed_through: u64,
    in_flight: VecDeque<InFlight>,
    lost: bool,
    processor: CommandProcessor,
    log: Vec<WorkLabel>,
    next_texture_id: u64,
    backend_textures: HashMap<u64, Texture>,
}

impl DeviceState {
    fn retire_through(&mut self, id: SubmissionId) {
        while let Some(front) = self.in_flight.front() {
            if front.id > id {
                break;
            }
            let Some(submission) = self.in_flight.pop_front() else {
                break;
            };
            for unit in &submission.units {
                self.processor.process_unit(unit);
                self.log.push(unit.label);
            }
            self.completed_through = submission.id.0;
            log::trace!("NullDevice: retired {}", submission.id);
        }
    }

    fn retire_all(&mut self) {
        if let Some(last) = self.in_flight.back().map(|s| s.id) {
            self.retire_through(last);
        }
    }

    fn allocate_texture(&mut self, info: &ImageInfo) -> Texture {
        self.next_texture_id += 1;
        Texture::new(
            *info,
            BackendTextureHandle::Null {
                id: self.next_texture_id,
            },
        )
    }
}

struct NullDevice {
    options: NullBackendOptions,
    state: Mutex<DeviceState>,
}

/// Software backend executing commands against CPU memory.
pub struct NullBackend {
    device: Arc<NullDevice>,
}

impl NullBackend {
    pub fn new(options: NullBackendOptions) -> Self {
        Self {
            device: Arc::new(NullDevice {
                options,
                state: Mutex::new(DeviceState {
                    next_submission: 1,
                    completed_through: 0,
                    in_flight: VecDeque::new(),
                    lost: false,
                    processor: CommandProcessor::new(),
                    log: Vec::new(),
                    next_texture_id: 0,
                    backend_textures: HashMap::new(),
                }),
            }),
        }
    }

    /// Execute everything in flight.
    pub fn retire_all(&self) {
        let mut state = self.device.state.lock();
        if !state.lost {
            state.retire_all();
        }
    }

    /// Simulate a device loss. In-flight work never completes and further
    /// submissions are rejected.
    pub fn lose_device(&self) {
        let mut state = self.device.state.lock();
        log::error!(
            "NullDevice: device lost with {} submissions in flight",
            state.in_flight.len()
        );
        state.lost = true;
        state.in_flight.clear();
    }

    /// Labels of every executed work unit, in execution order.
    pub fn execution_log(&self) -> Vec<WorkLabel> {
        self.device.state.lock().log.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.device.state.lock().in_flight.len()
    }

    /// Client-created backend textures not yet deleted.
    pub fn live_backend_textures(&self) -> usize {
        self.device.state.lock().backend_textures.len()
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new(NullBackendOptions::default())
    }
}

impl GpuBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn api(&self) -> BackendApi {
        BackendApi::Null
    }

    fn caps(&self) -> Caps {
        Caps {
            max_texture_size: self.device.options.max_texture_size,
            renderable: vec![
                ColorType::Alpha8,
                ColorType::Rgba8888,
                ColorType::Rgb888x,
                ColorType::Bgra8888,
            ],
            readable: vec![
                ColorType::Alpha8,
                ColorType::Gray8,
                ColorType::Rgba8888,
                ColorType::Rgb888x,
                ColorType::Bgra8888,
            ],
            transfer_row_alignment: 4,
        }
    }

    fn finish_initialization(&self) -> Result<(), BackendError> {
        if self.device.options.fail_initialization {
            return Err(BackendError::InitFailed(
                "null device configured to fail".into(),
            ));
        }
        Ok(())
    }

    fn make_queue_manager(&self) -> Box<dyn QueueManager> {
        Box::new(NullQueueManager {
            device: self.device.clone(),
        })
    }

    fn make_resource_provider(&self, options: &ContextOptions) -> Box<dyn ResourceProvider> {
        Box::new(NullResourceProvider {
            device: self.device.clone(),
            pool: BufferPool::new(options.transfer_buffer_cache_limit),
        })
    }

    fn create_backend_texture(&self, info: &ImageInfo) -> Option<BackendTexture> {
        let mut state = self.device.state.lock();
        if state.lost {
            return None;
        }
        let texture = state.allocate_texture(info);
        let handle = texture.handle();
        if let BackendTextureHandle::Null { id } = handle {
            state.backend_textures.insert(id, texture);
        }
        log::debug!("NullDevice: created backend texture {:?}", handle);
        Some(BackendTexture::new(*info, handle))
    }
}

/// Queue of the null device.
pub struct NullQueueManager {
    device: Arc<NullDevice>,
}

impl QueueManager for NullQueueManager {
    fn submit(&mut self, units: Vec<WorkUnit>) -> Result<SubmissionId, QueueError> {
        let mut state = self.device.state.lock();
        if state.lost {
            return Err(QueueError::DeviceLost);
        }
        let id = SubmissionId(state.next_submission);
        state.next_submission += 1;
        log::debug!("NullQueue: {} with {} units", id, units.len());
        state.in_flight.push_back(InFlight { id, units });
        Ok(id)
    }

    fn poll(&mut self, submission: SubmissionId) -> WorkStatus {
        let mut state = self.device.state.lock();
        if submission.0 <= state.completed_through {
            return WorkStatus::Complete;
        }
        if state.lost || submission.0 >= state.next_submission {
            return WorkStatus::Failed;
        }
        if self.device.options.retire_on_poll {
            state.retire_through(submission);
            return WorkStatus::Complete;
        }
        WorkStatus::Pending
    }

    fn wait_idle(&mut self) -> Result<(), QueueError> {
        let mut state = self.device.state.lock();
        if state.lost {
            return Err(QueueError::DeviceLost);
        }
        state.retire_all();
        Ok(())
    }
}

/// Resource provider of the null device.
pub struct NullResourceProvider {
    device: Arc<NullDevice>,
    pool: BufferPool,
}

impl ResourceProvider for NullResourceProvider {
    fn create_texture(&mut self, info: &ImageInfo) -> Option<Texture> {
        let mut state = self.device.state.lock();
        if state.lost {
            return None;
        }
        Some(state.allocate_texture(info))
    }

    fn wrap_backend_texture(&mut self, texture: &BackendTexture) -> Option<Texture> {
        match texture.handle() {
            BackendTextureHandle::Null { id } => {
                self.device.state.lock().backend_textures.get(&id).cloned()
            }
            _ => None,
        }
    }

    fn find_or_create_transfer_buffer(&mut self, size: usize, format: ColorType) -> Option<Buffer> {
        if size > self.device.options.max_buffer_bytes {
            log::warn!(
                "NullResourceProvider: transfer buffer of {} bytes exceeds limit {}",
                size,
                self.device.options.max_buffer_bytes
            );
            return None;
        }
        self.pool
            .take(size, format)
            .or_else(|| Some(Buffer::new(size, format)))
    }

    fn return_buffer(&mut self, buffer: Buffer) {
        self.pool.give(buffer);
    }

    fn delete_backend_texture(&mut self, texture: &BackendTexture) -> bool {
        match texture.handle() {
            BackendTextureHandle::Null { id } => self
                .device
                .state
                .lock()
                .backend_textures
                .remove(&id)
                .is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::resources::TextureProxy;
    use loom_common::{AlphaType, Color};

    fn rgba(w: i32, h: i32) -> ImageInfo {
        ImageInfo::new(w, h, ColorType::Rgba8888, AlphaType::Premul)
    }

    fn clear_unit(label: u64, proxy: &TextureProxy) -> WorkUnit {
        WorkUnit {
            label: WorkLabel::Transfer(label),
            commands: vec![Command::Clear {
                target: proxy.clone(),
                color: Color::WHITE,
            }]
            .into(),
        }
    }

    #[test]
    fn test_retire_on_poll() {
        let backend = NullBackend::default();
        let mut queue = backend.make_queue_manager();
        let mut provider = backend.make_resource_provider(&ContextOptions::default());
        let proxy = TextureProxy::new(rgba(1, 1));
        assert!(proxy.instantiate(provider.as_mut()));

        let first = queue.submit(vec![clear_unit(1, &proxy)]).unwrap();
        let second = queue.submit(vec![clear_unit(2, &proxy)]).unwrap();
        assert!(first < second);
        assert_eq!(backend.in_flight(), 2);

        // Polling the second retires the first as well.
        assert_eq!(queue.poll(second), WorkStatus::Complete);
        assert_eq!(queue.poll(first), WorkStatus::Complete);
        assert_eq!(
            backend.execution_log(),
            vec![WorkLabel::Transfer(1), WorkLabel::Transfer(2)]
        );
        assert_eq!(&*proxy.texture().unwrap().read(), &[255u8; 4]);
    }

    #[test]
    fn test_pending_until_retired() {
        let backend = NullBackend::new(NullBackendOptions {
            retire_on_poll: false,
            ..Default::default()
        });
        let mut queue = backend.make_queue_manager();
        let id = queue
            .submit(vec![WorkUnit {
                label: WorkLabel::Transfer(5),
                commands: Vec::new().into(),
            }])
            .unwrap();
        assert_eq!(queue.poll(id), WorkStatus::Pending);
        assert!(backend.execution_log().is_empty());

        backend.retire_all();
        assert_eq!(queue.poll(id), WorkStatus::Complete);
        assert_eq!(backend.execution_log().len(), 1);
    }

    #[test]
    fn test_device_loss() {
        let backend = NullBackend::new(NullBackendOptions {
            retire_on_poll: false,
            ..Default::default()
        });
        let mut queue = backend.make_queue_manager();
        let id = queue.submit(Vec::new()).unwrap();
        backend.lose_device();

        assert_eq!(queue.poll(id), WorkStatus::Failed);
        assert_eq!(queue.submit(Vec::new()), Err(QueueError::DeviceLost));
        assert_eq!(queue.wait_idle(), Err(QueueError::DeviceLost));
    }

    #[test]
    fn test_unknown_submission_fails() {
        let backend = NullBackend::default();
        let mut queue = backend.make_queue_manager();
        assert_eq!(queue.poll(SubmissionId(99)), WorkStatus::Failed);
    }

    #[test]
    fn test_fail_initialization() {
        let backend = NullBackend::new(NullBackendOptions {
            fail_initialization: true,
            ..Default::default()
        });
        assert!(backend.finish_initialization().is_err());
        assert!(NullBackend::default().finish_initialization().is_ok());
    }

    #[test]
    fn test_backend_texture_lifecycle() {
        let backend = NullBackend::default();
        let mut provider = backend.make_resource_provider(&ContextOptions::default());
        let texture = backend.create_backend_texture(&rgba(2, 2)).unwrap();
        assert_eq!(backend.live_backend_textures(), 1);

        let wrapped = provider.wrap_backend_texture(&texture).unwrap();
        assert_eq!(wrapped.handle(), texture.handle());

        assert!(provider.delete_backend_texture(&texture));
        assert!(!provider.delete_backend_texture(&texture));
        assert_eq!(backend.live_backend_textures(), 0);
        assert!(provider.wrap_backend_texture(&texture).is_none());
    }

    #[test]
    fn test_transfer_buffer_limit_and_reuse() {
        let backend = NullBackend::new(NullBackendOptions {
            max_buffer_bytes: 64,
            ..Default::default()
        });
        let mut provider = backend.make_resource_provider(&ContextOptions::default());
        assert!(provider
            .find_or_create_transfer_buffer(65, ColorType::Rgba8888)
            .is_none());

        let buffer = provider
            .find_or_create_transfer_buffer(64, ColorType::Rgba8888)
            .unwrap();
        provider.return_buffer(buffer.clone());
        let again = provider
            .find_or_create_transfer_buffer(64, ColorType::Rgba8888)
            .unwrap();
        assert!(again.ptr_eq(&buffer));
    }
}
