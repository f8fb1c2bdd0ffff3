// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Central GPU context.
//!
//! Owns the queue manager, resource provider and mapped-buffer manager.
//! Recorders produce `Recording`s on any thread; the owning thread inserts
//! them with `insert_recording()`, hands everything queued to the hardware
//! queue with `submit()`, and observes completion with
//! `check_async_work_completion()`.
//!
//! Lock order: `submission` → `resource_provider` → `mapped_buffers`. Client
//! callbacks are collected while locks are held and invoked after all of
//! them are released, so a callback may call back into the context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_common::{
    align_up, BackendApi, CallbackResult, ColorInfo, IRect, ImageInfo, ReadPixelsError,
};
use parking_lot::Mutex;
use thiserror::Error;

use crate::backend::GpuBackend;
use crate::command::Command;
use crate::context_id::ContextId;
use crate::mapped_buffer_manager::{
    ClientMappedBufferManager, PendingReadback, ReadbackDelivery, ReadbackRequest,
};
use crate::queue_manager::{QueueError, QueueManager, SubmissionId, WorkLabel, WorkStatus, WorkUnit};
use crate::readback::{
    make_pixel_converter, AsyncReadResult, PixelTransferResult, ReadPixelsCallback,
    ReadbackLayout,
};
use crate::recorder::{Recorder, RecorderOptions};
use crate::recording::Recording;
use crate::resource_provider::ResourceProvider;
use crate::resources::{BackendTexture, Image, Surface, TextureProxy};
use crate::shared_context::SharedContext;
use crate::single_owner::SingleOwner;

/// Whether `submit` waits for the GPU before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncToCpu {
    Yes,
    No,
}

#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Idle transfer buffers kept for reuse.
    pub transfer_buffer_cache_limit: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            transfer_buffer_cache_limit: 16,
        }
    }
}

/// Invoked once when an inserted recording has finished executing, or has
/// failed to.
pub type FinishedProc = Box<dyn FnOnce(CallbackResult) + Send>;

pub struct InsertRecordingInfo<'a> {
    pub recording: &'a Recording,
    pub finished_proc: Option<FinishedProc>,
}

impl<'a> InsertRecordingInfo<'a> {
    pub fn new(recording: &'a Recording) -> Self {
        Self {
            recording,
            finished_proc: None,
        }
    }

    pub fn with_finished_proc(
        mut self,
        finished_proc: impl FnOnce(CallbackResult) + Send + 'static,
    ) -> Self {
        self.finished_proc = Some(Box::new(finished_proc));
        self
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("device lost")]
    DeviceLost,
    #[error("recording was already inserted")]
    AlreadyInserted,
    #[error("recording was made for another context")]
    IncompatibleRecording,
    #[error("resource belongs to another context")]
    IncompatibleResource,
    #[error("failed to instantiate recording resources")]
    InstantiationFailed,
    #[error("read rect {rect} is empty or outside {width}x{height} image")]
    InvalidReadRect { rect: IRect, width: i32, height: i32 },
    #[error("queue rejected submission: {0}")]
    QueueRejected(QueueError),
}

impl From<QueueError> for ContextError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::DeviceLost => Self::DeviceLost,
            other => Self::QueueRejected(other),
        }
    }
}

/// Work inserted but not yet submitted.
enum QueuedWork {
    Recording {
        recording: Recording,
        finished_proc: Option<FinishedProc>,
    },
    Transfer {
        id: u64,
        commands: Arc<[Command]>,
        request: ReadbackRequest,
    },
}

impl QueuedWork {
    fn to_work_unit(&self) -> WorkUnit {
        match self {
            Self::Recording { recording, .. } => WorkUnit {
                label: WorkLabel::Recording(recording.id()),
                commands: recording.commands().clone(),
            },
            Self::Transfer { id, commands, .. } => WorkUnit {
                label: WorkLabel::Transfer(*id),
                commands: commands.clone(),
            },
        }
    }
}

struct SubmissionState {
    queue_manager: Box<dyn QueueManager>,
    queued: Vec<QueuedWork>,
    /// Finished procs of submitted recordings, oldest first.
    finished_procs: Vec<(SubmissionId, FinishedProc)>,
    next_transfer: u64,
}

/// A callback ready to run once every lock is released.
enum Deferred {
    Finished(FinishedProc, CallbackResult),
    Readback(ReadPixelsCallback, Result<AsyncReadResult, ReadPixelsError>),
}

fn run_deferred(deferred: Vec<Deferred>) {
    for callback in deferred {
        match callback {
            Deferred::Finished(finished_proc, result) => finished_proc(result),
            Deferred::Readback(callback, result) => callback(result),
        }
    }
}

/// Return the delivery's buffer to the provider and keep its callback.
fn settle(delivery: ReadbackDelivery, provider: &mut dyn ResourceProvider) -> Deferred {
    if let Some(buffer) = delivery.recycle {
        provider.return_buffer(buffer);
    }
    Deferred::Readback(delivery.callback, delivery.result)
}

/// Fail work that was inserted but never reached the queue.
fn fail_queued(
    queued: Vec<QueuedWork>,
    error: ReadPixelsError,
    provider: &mut dyn ResourceProvider,
    deferred: &mut Vec<Deferred>,
) {
    for work in queued {
        match work {
            QueuedWork::Recording { finished_proc, .. } => {
                if let Some(finished_proc) = finished_proc {
                    deferred.push(Deferred::Finished(finished_proc, CallbackResult::Failed));
                }
            }
            QueuedWork::Transfer { request, .. } => {
                deferred.push(settle(request.fail(error), provider));
            }
        }
    }
}

/// Central GPU context. See the module docs.
pub struct Context {
    id: ContextId,
    shared: Arc<SharedContext>,
    submission: Mutex<SubmissionState>,
    resource_provider: Mutex<Box<dyn ResourceProvider>>,
    mapped_buffers: Mutex<ClientMappedBufferManager>,
    lost: AtomicBool,
    single_owner: SingleOwner,
}

impl Context {
    /// Create a context on `backend`. `None` if device setup fails.
    pub fn make(backend: Arc<dyn GpuBackend>, options: &ContextOptions) -> Option<Self> {
        if let Err(e) = backend.finish_initialization() {
            log::error!("Context: {} backend unavailable: {}", backend.name(), e);
            return None;
        }

        let id = ContextId::next();
        let queue_manager = backend.make_queue_manager();
        let resource_provider = backend.make_resource_provider(options);
        log::info!("Context {}: created on {} backend", id, backend.name());

        Some(Self {
            id,
            shared: SharedContext::new(backend),
            submission: Mutex::new(SubmissionState {
                queue_manager,
                queued: Vec::new(),
                finished_procs: Vec::new(),
                next_transfer: 0,
            }),
            resource_provider: Mutex::new(resource_provider),
            mapped_buffers: Mutex::new(ClientMappedBufferManager::new(id)),
            lost: AtomicBool::new(false),
            single_owner: SingleOwner::new(),
        })
    }

    pub fn backend(&self) -> BackendApi {
        self.shared.backend_api()
    }

    pub fn context_id(&self) -> ContextId {
        self.id
    }

    /// Whether the device has been lost. Loss is noticed by `submit`, or by a
    /// completion pass polling a submission that still has a callback
    /// attached; work submitted without callbacks surfaces it only at the
    /// next `submit`.
    pub fn is_device_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn make_recorder(&self, options: RecorderOptions) -> Recorder {
        let _guard = self.single_owner.enter("Context::make_recorder");
        Recorder::new(self.shared.clone(), options)
    }

    /// Queue a recording behind everything inserted before it. Nothing is
    /// sent to the GPU until `submit`.
    ///
    /// On failure the finished proc, if any, is invoked with
    /// `CallbackResult::Failed` before returning.
    pub fn insert_recording(&self, info: InsertRecordingInfo<'_>) -> Result<(), ContextError> {
        let _guard = self.single_owner.enter("Context::insert_recording");
        let InsertRecordingInfo {
            recording,
            finished_proc,
        } = info;

        if let Err(e) = self.prepare_recording(recording) {
            if let Some(finished_proc) = finished_proc {
                finished_proc(CallbackResult::Failed);
            }
            return Err(e);
        }

        log::debug!(
            "Context {}: inserted {} ({} commands)",
            self.id,
            recording.id(),
            recording.command_count()
        );
        self.submission.lock().queued.push(QueuedWork::Recording {
            recording: recording.clone(),
            finished_proc,
        });
        Ok(())
    }

    fn prepare_recording(&self, recording: &Recording) -> Result<(), ContextError> {
        if self.is_device_lost() {
            return Err(ContextError::DeviceLost);
        }
        if !Arc::ptr_eq(recording.shared_context(), &self.shared) {
            log::error!(
                "Context {}: {} was recorded for another context",
                self.id,
                recording.id()
            );
            return Err(ContextError::IncompatibleRecording);
        }
        if recording.was_inserted() {
            log::error!("Context {}: {} inserted twice", self.id, recording.id());
            return Err(ContextError::AlreadyInserted);
        }
        // A recording that cannot be instantiated stays insertable.
        if !recording.instantiate(&mut **self.resource_provider.lock()) {
            log::warn!(
                "Context {}: could not instantiate resources of {}",
                self.id,
                recording.id()
            );
            return Err(ContextError::InstantiationFailed);
        }
        if !recording.mark_inserted() {
            log::error!("Context {}: {} inserted twice", self.id, recording.id());
            return Err(ContextError::AlreadyInserted);
        }
        Ok(())
    }

    /// Hand everything queued to the hardware queue as one submission.
    ///
    /// With `SyncToCpu::Yes` this also waits for the queue to go idle and
    /// runs a completion pass, so callbacks of finished work fire before it
    /// returns.
    pub fn submit(&self, sync: SyncToCpu) -> Result<(), ContextError> {
        let _guard = self.single_owner.enter("Context::submit");
        if self.is_device_lost() {
            return Err(ContextError::DeviceLost);
        }

        let mut deferred = Vec::new();
        let submitted = self.submit_queued(&mut deferred);
        run_deferred(deferred);
        submitted?;

        if sync == SyncToCpu::Yes {
            let waited = self.submission.lock().queue_manager.wait_idle();
            if let Err(e) = &waited {
                self.mark_lost(e);
            }
            run_deferred(self.collect_completed());
            waited?;
        }
        Ok(())
    }

    fn submit_queued(&self, deferred: &mut Vec<Deferred>) -> Result<(), ContextError> {
        let mut submission = self.submission.lock();
        let queued = std::mem::take(&mut submission.queued);
        if queued.is_empty() {
            return Ok(());
        }

        let units: Vec<WorkUnit> = queued.iter().map(QueuedWork::to_work_unit).collect();
        match submission.queue_manager.submit(units) {
            Ok(id) => {
                log::debug!("Context {}: {} with {} units", self.id, id, queued.len());
                let mut readbacks = Vec::new();
                for work in queued {
                    match work {
                        QueuedWork::Recording {
                            finished_proc: Some(finished_proc),
                            ..
                        } => submission.finished_procs.push((id, finished_proc)),
                        QueuedWork::Recording { .. } => {}
                        QueuedWork::Transfer { request, .. } => readbacks.push(PendingReadback {
                            submission: id,
                            request,
                        }),
                    }
                }
                let mut mapped = self.mapped_buffers.lock();
                for readback in readbacks {
                    mapped.insert(readback);
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Context {}: submission of {} units failed: {}", self.id, queued.len(), e);
                let mut provider = self.resource_provider.lock();
                fail_queued(queued, ReadPixelsError::DeviceLost, &mut **provider, deferred);
                self.mark_lost(&e);
                Err(e.into())
            }
        }
    }

    fn mark_lost(&self, error: &QueueError) {
        if *error == QueueError::DeviceLost && !self.lost.swap(true, Ordering::AcqRel) {
            log::error!("Context {}: device lost", self.id);
        }
    }

    /// Non-blocking. Recycles transfer buffers released by clients and
    /// fires the callbacks of every finished submission.
    pub fn check_async_work_completion(&self) {
        let _guard = self.single_owner.enter("Context::check_async_work_completion");
        run_deferred(self.collect_completed());
    }

    fn collect_completed(&self) -> Vec<Deferred> {
        let mut submission = self.submission.lock();
        let mut provider = self.resource_provider.lock();
        let mut mapped = self.mapped_buffers.lock();

        for buffer in mapped.take_returned_buffers() {
            provider.return_buffer(buffer);
        }

        let SubmissionState {
            queue_manager,
            finished_procs,
            ..
        } = &mut *submission;

        let mut deferred = Vec::new();
        let mut failed = false;
        let mut still_pending = Vec::with_capacity(finished_procs.len());
        for (id, finished_proc) in finished_procs.drain(..) {
            match queue_manager.poll(id) {
                WorkStatus::Pending => still_pending.push((id, finished_proc)),
                WorkStatus::Complete => {
                    log::trace!("Context {}: {} finished", self.id, id);
                    deferred.push(Deferred::Finished(finished_proc, CallbackResult::Success));
                }
                WorkStatus::Failed => {
                    failed = true;
                    deferred.push(Deferred::Finished(finished_proc, CallbackResult::Failed));
                }
            }
        }
        *finished_procs = still_pending;

        for delivery in mapped.take_completed(&mut **queue_manager) {
            failed |= matches!(delivery.result, Err(ReadPixelsError::DeviceLost));
            deferred.push(settle(delivery, &mut **provider));
        }

        if failed {
            self.mark_lost(&QueueError::DeviceLost);
        }
        if self.is_device_lost() {
            let queued = std::mem::take(&mut submission.queued);
            fail_queued(queued, ReadPixelsError::DeviceLost, &mut **provider, &mut deferred);
        }
        deferred
    }

    /// Read `src_rect` of `image` back to the CPU as `dst_color_info`.
    ///
    /// Rejected requests return an error and never invoke `callback`. An
    /// accepted request invokes it exactly once: immediately if the transfer
    /// cannot be set up, otherwise from the completion pass that observes its
    /// submission finishing.
    pub fn async_read_pixels(
        &self,
        image: &Image,
        dst_color_info: ColorInfo,
        src_rect: IRect,
        callback: impl FnOnce(Result<AsyncReadResult, ReadPixelsError>) + Send + 'static,
    ) -> Result<(), ContextError> {
        let _guard = self.single_owner.enter("Context::async_read_pixels");
        self.read_pixels(
            image.proxy(),
            image.shared_context(),
            image.info(),
            dst_color_info,
            src_rect,
            Box::new(callback),
        )
    }

    pub fn async_read_pixels_from_surface(
        &self,
        surface: &Surface,
        dst_color_info: ColorInfo,
        src_rect: IRect,
        callback: impl FnOnce(Result<AsyncReadResult, ReadPixelsError>) + Send + 'static,
    ) -> Result<(), ContextError> {
        let _guard = self.single_owner.enter("Context::async_read_pixels_from_surface");
        self.read_pixels(
            surface.proxy(),
            surface.shared_context(),
            surface.info(),
            dst_color_info,
            src_rect,
            Box::new(callback),
        )
    }

    fn read_pixels(
        &self,
        proxy: &TextureProxy,
        shared: &Arc<SharedContext>,
        info: &ImageInfo,
        dst_color_info: ColorInfo,
        src_rect: IRect,
        callback: ReadPixelsCallback,
    ) -> Result<(), ContextError> {
        if self.is_device_lost() {
            return Err(ContextError::DeviceLost);
        }
        if !Arc::ptr_eq(shared, &self.shared) {
            log::error!("Context {}: readback of a foreign texture", self.id);
            return Err(ContextError::IncompatibleResource);
        }
        if src_rect.is_empty() || !info.bounds().contains(&src_rect) {
            log::warn!(
                "Context {}: readback rect {} outside {}x{}",
                self.id,
                src_rect,
                info.width(),
                info.height()
            );
            return Err(ContextError::InvalidReadRect {
                rect: src_rect,
                width: info.width(),
                height: info.height(),
            });
        }

        let Some(layout) = self.readback_layout(info, src_rect, dst_color_info) else {
            log::warn!(
                "Context {}: {:?} textures cannot be read back",
                self.id,
                info.color_type()
            );
            callback(Err(ReadPixelsError::TransferFailed));
            return Ok(());
        };

        let transfer = {
            let mut provider = self.resource_provider.lock();
            self.transfer_pixels(&mut **provider, proxy, &layout)
        };
        let Some(buffer) = transfer.transfer_buffer else {
            log::warn!("Context {}: readback transfer could not be scheduled", self.id);
            callback(Err(ReadPixelsError::TransferFailed));
            return Ok(());
        };

        let mut submission = self.submission.lock();
        submission.next_transfer += 1;
        let id = submission.next_transfer;
        log::debug!(
            "Context {}: readback {} of {} into buffer {}{}",
            self.id,
            id,
            src_rect,
            buffer.id(),
            if transfer.pixel_converter.is_some() { " (converted)" } else { "" }
        );
        let commands: Arc<[Command]> = vec![Command::CopyTextureToBuffer {
            src: proxy.clone(),
            src_rect,
            buffer: buffer.clone(),
            row_bytes: layout.transfer_row_bytes,
        }]
        .into();
        submission.queued.push(QueuedWork::Transfer {
            id,
            commands,
            request: ReadbackRequest {
                buffer,
                converter: transfer.pixel_converter,
                layout,
                callback,
            },
        });
        Ok(())
    }

    fn readback_layout(
        &self,
        info: &ImageInfo,
        src_rect: IRect,
        dst_color_info: ColorInfo,
    ) -> Option<ReadbackLayout> {
        let caps = self.shared.caps();
        let color_type = caps.supported_read_pixels_color_type(info.color_type())?;
        let transfer_color_info = ColorInfo::new(color_type, info.color_info.alpha_type);
        let width = src_rect.width() as usize;
        Some(ReadbackLayout {
            width,
            height: src_rect.height() as usize,
            transfer_color_info,
            transfer_row_bytes: align_up(
                width * transfer_color_info.bytes_per_pixel(),
                caps.transfer_row_alignment,
            ),
            dst_color_info,
        })
    }

    /// Acquire the transfer buffer and converter for one readback.
    fn transfer_pixels(
        &self,
        provider: &mut dyn ResourceProvider,
        proxy: &TextureProxy,
        layout: &ReadbackLayout,
    ) -> PixelTransferResult {
        if !proxy.instantiate(provider) {
            return PixelTransferResult::failed();
        }
        match provider.find_or_create_transfer_buffer(
            layout.transfer_size(),
            layout.transfer_color_info.color_type,
        ) {
            Some(buffer) => PixelTransferResult {
                transfer_buffer: Some(buffer),
                pixel_converter: make_pixel_converter(layout),
            },
            None => PixelTransferResult::failed(),
        }
    }

    /// Release a texture made by `Recorder::create_backend_texture` and reset
    /// the handle. Invalid handles and handles of another backend API are
    /// left alone.
    pub fn delete_backend_texture(&self, texture: &mut BackendTexture) {
        let _guard = self.single_owner.enter("Context::delete_backend_texture");
        match texture.backend() {
            None => return,
            Some(api) if api != self.backend() => {
                log::warn!(
                    "Context {}: not deleting {:?} texture on {:?} backend",
                    self.id,
                    api,
                    self.backend()
                );
                return;
            }
            Some(_) => {}
        }
        if !self.resource_provider.lock().delete_backend_texture(texture) {
            log::warn!("Context {}: unknown backend texture {:?}", self.id, texture.handle());
        }
        texture.reset();
    }

    /// Readbacks whose callback has not run yet.
    pub fn num_pending_readbacks(&self) -> usize {
        let submission = self.submission.lock();
        let queued = submission
            .queued
            .iter()
            .filter(|work| matches!(work, QueuedWork::Transfer { .. }))
            .count();
        queued + self.mapped_buffers.lock().len()
    }

    /// Whether any inserted work or callback is still outstanding.
    pub fn has_pending_work(&self) -> bool {
        let submission = self.submission.lock();
        !submission.queued.is_empty()
            || !submission.finished_procs.is_empty()
            || !self.mapped_buffers.lock().is_empty()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        {
            let _guard = self.single_owner.enter("Context::drop");
            let mut deferred = self.collect_completed();
            {
                let mut submission = self.submission.lock();
                let mut provider = self.resource_provider.lock();
                let mut mapped = self.mapped_buffers.lock();

                let queued = std::mem::take(&mut submission.queued);
                fail_queued(queued, ReadPixelsError::Cancelled, &mut **provider, &mut deferred);
                for (_, finished_proc) in submission.finished_procs.drain(..) {
                    deferred.push(Deferred::Finished(finished_proc, CallbackResult::Failed));
                }
                for delivery in mapped.drain_all() {
                    deferred.push(settle(delivery, &mut **provider));
                }
            }
            log::info!(
                "Context {}: destroyed, {} callbacks delivered",
                self.id,
                deferred.len()
            );
            run_deferred(deferred);
        }
        self.id.make_invalid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null_backend::{NullBackend, NullBackendOptions};
    use crate::message_bus;
    use crate::resources::BackendTextureHandle;
    use loom_common::{AlphaType, Color, ColorType};

    const RGBA: ColorInfo = ColorInfo::new(ColorType::Rgba8888, AlphaType::Premul);
    const BGRA: ColorInfo = ColorInfo::new(ColorType::Bgra8888, AlphaType::Premul);

    type Results = Arc<Mutex<Vec<Result<Vec<u8>, ReadPixelsError>>>>;

    fn null_context(options: NullBackendOptions) -> (Arc<NullBackend>, Context) {
        let backend = Arc::new(NullBackend::new(options));
        let context = Context::make(backend.clone(), &ContextOptions::default()).unwrap();
        (backend, context)
    }

    fn held_context() -> (Arc<NullBackend>, Context) {
        null_context(NullBackendOptions {
            retire_on_poll: false,
            ..Default::default()
        })
    }

    fn rgba(w: i32, h: i32) -> ImageInfo {
        ImageInfo::new(w, h, ColorType::Rgba8888, AlphaType::Premul)
    }

    fn capture(results: &Results) -> impl FnOnce(Result<AsyncReadResult, ReadPixelsError>) + Send + 'static {
        let results = results.clone();
        move |result| results.lock().push(result.map(|r| r.to_packed_vec()))
    }

    /// 4x4 RGBA surface filled with a per-pixel pattern, submitted.
    fn patterned_surface(context: &Context) -> (Surface, Vec<u8>) {
        let mut recorder = context.make_recorder(RecorderOptions::default());
        let surface = recorder.make_surface(rgba(4, 4)).unwrap();
        let pixels: Vec<u8> = (0..16u8).flat_map(|i| [i, i * 2, i * 3, 255]).collect();
        assert!(recorder.write_pixels(&surface, IRect::from_xywh(0, 0, 4, 4), &pixels, 16));
        let recording = recorder.snap();
        context.insert_recording(InsertRecordingInfo::new(&recording)).unwrap();
        (surface, pixels)
    }

    #[test]
    fn test_make_and_identity() {
        let (_backend, a) = null_context(NullBackendOptions::default());
        let (_backend, b) = null_context(NullBackendOptions::default());
        assert_eq!(a.backend(), BackendApi::Null);
        assert!(a.context_id().is_valid());
        assert_ne!(a.context_id(), b.context_id());

        let id = a.context_id();
        assert!(message_bus::is_live(id));
        drop(a);
        assert!(!message_bus::is_live(id));
        assert!(message_bus::is_live(b.context_id()));
    }

    #[test]
    fn test_construction_failure() {
        let backend = Arc::new(NullBackend::new(NullBackendOptions {
            fail_initialization: true,
            ..Default::default()
        }));
        assert!(Context::make(backend, &ContextOptions::default()).is_none());
    }

    #[test]
    fn test_empty_submit_is_noop() {
        let (backend, context) = null_context(NullBackendOptions::default());
        context.submit(SyncToCpu::No).unwrap();
        context.submit(SyncToCpu::Yes).unwrap();
        context.check_async_work_completion();
        assert!(backend.execution_log().is_empty());
        assert!(!context.has_pending_work());
    }

    #[test]
    fn test_insertion_order_defines_execution_order() {
        let (backend, context) = null_context(NullBackendOptions::default());
        let mut recorder_a = context.make_recorder(RecorderOptions::default());
        let mut recorder_b = context.make_recorder(RecorderOptions::default());
        let surface = recorder_a.make_surface(rgba(1, 1)).unwrap();

        // A is recorded first but inserted second, so it runs last.
        recorder_a.clear(&surface, Color::from_rgba(255, 0, 0, 255));
        let a = recorder_a.snap();
        recorder_b.clear(&surface, Color::from_rgba(0, 0, 255, 255));
        let b = recorder_b.snap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for (recording, name) in [(&b, "b"), (&a, "a")] {
            let order = order.clone();
            let info = InsertRecordingInfo::new(recording)
                .with_finished_proc(move |result| order.lock().push((name, result)));
            context.insert_recording(info).unwrap();
        }
        context.submit(SyncToCpu::No).unwrap();
        assert!(order.lock().is_empty());

        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 1, 1), capture(&results))
            .unwrap();
        context.submit(SyncToCpu::No).unwrap();
        context.check_async_work_completion();

        assert_eq!(
            *order.lock(),
            vec![("b", CallbackResult::Success), ("a", CallbackResult::Success)]
        );
        assert_eq!(&backend.execution_log()[..2], &[WorkLabel::Recording(b.id()), WorkLabel::Recording(a.id())]);
        assert_eq!(*results.lock(), vec![Ok(vec![255, 0, 0, 255])]);
    }

    #[test]
    fn test_double_insert_rejected() {
        let (backend, context) = null_context(NullBackendOptions::default());
        let mut recorder = context.make_recorder(RecorderOptions::default());
        let surface = recorder.make_surface(rgba(2, 2)).unwrap();
        recorder.clear(&surface, Color::WHITE);
        let recording = recorder.snap();

        context.insert_recording(InsertRecordingInfo::new(&recording)).unwrap();
        assert!(recording.was_inserted());

        let failed = Arc::new(Mutex::new(Vec::new()));
        let sink = failed.clone();
        let copy = recording.clone();
        let err = context
            .insert_recording(InsertRecordingInfo::new(&copy).with_finished_proc(move |r| sink.lock().push(r)))
            .unwrap_err();
        assert!(matches!(err, ContextError::AlreadyInserted));
        assert_eq!(*failed.lock(), vec![CallbackResult::Failed]);

        context.submit(SyncToCpu::Yes).unwrap();
        assert_eq!(backend.execution_log(), vec![WorkLabel::Recording(recording.id())]);
    }

    #[test]
    fn test_recording_from_other_context_rejected() {
        let (_a_backend, a) = null_context(NullBackendOptions::default());
        let (_b_backend, b) = null_context(NullBackendOptions::default());
        let recording = a.make_recorder(RecorderOptions::default()).snap();

        let err = b.insert_recording(InsertRecordingInfo::new(&recording)).unwrap_err();
        assert!(matches!(err, ContextError::IncompatibleRecording));
        // Still insertable where it belongs.
        a.insert_recording(InsertRecordingInfo::new(&recording)).unwrap();
    }

    #[test]
    fn test_unconverted_readback() {
        let (backend, context) = held_context();
        let (surface, pixels) = patterned_surface(&context);

        let results = Results::default();
        let zero_copy = Arc::new(AtomicBool::new(false));
        let flag = zero_copy.clone();
        let sink = results.clone();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 4, 4), move |result| {
                if let Ok(r) = &result {
                    flag.store(r.is_zero_copy(), Ordering::Relaxed);
                    assert_eq!(r.row_bytes(), 16);
                    assert_eq!(r.color_info(), RGBA);
                }
                sink.lock().push(result.map(|r| r.to_packed_vec()));
            })
            .unwrap();
        assert_eq!(context.num_pending_readbacks(), 1);

        context.submit(SyncToCpu::No).unwrap();
        context.check_async_work_completion();
        assert!(results.lock().is_empty(), "fired before completion");
        assert_eq!(context.num_pending_readbacks(), 1);

        backend.retire_all();
        context.check_async_work_completion();
        context.check_async_work_completion();
        assert_eq!(*results.lock(), vec![Ok(pixels)]);
        assert!(zero_copy.load(Ordering::Relaxed));
        assert_eq!(context.num_pending_readbacks(), 0);
    }

    #[test]
    fn test_converted_readback() {
        let (_backend, context) = null_context(NullBackendOptions::default());
        let (surface, pixels) = patterned_surface(&context);

        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, BGRA, IRect::from_xywh(1, 1, 2, 2), capture(&results))
            .unwrap();
        context.submit(SyncToCpu::No).unwrap();
        context.check_async_work_completion();

        let expected: Vec<u8> = [5usize, 6, 9, 10]
            .iter()
            .flat_map(|&i| {
                let p = &pixels[i * 4..i * 4 + 4];
                [p[2], p[1], p[0], p[3]]
            })
            .collect();
        assert_eq!(*results.lock(), vec![Ok(expected)]);
    }

    #[test]
    fn test_invalid_readbacks_rejected() {
        let (_backend, context) = null_context(NullBackendOptions::default());
        let (surface, _) = patterned_surface(&context);
        let results = Results::default();

        for rect in [
            IRect::from_xywh(2, 2, 4, 4),
            IRect::from_xywh(-1, 0, 2, 2),
            IRect::from_xywh(0, 0, 0, 2),
        ] {
            let err = context
                .async_read_pixels_from_surface(&surface, RGBA, rect, capture(&results))
                .unwrap_err();
            assert!(matches!(err, ContextError::InvalidReadRect { width: 4, height: 4, .. }));
        }

        let (_other_backend, other) = null_context(NullBackendOptions::default());
        let image = surface.make_image_snapshot();
        let err = other
            .async_read_pixels(&image, RGBA, IRect::from_xywh(0, 0, 1, 1), capture(&results))
            .unwrap_err();
        assert!(matches!(err, ContextError::IncompatibleResource));

        context.submit(SyncToCpu::Yes).unwrap();
        other.submit(SyncToCpu::Yes).unwrap();
        assert!(results.lock().is_empty());
    }

    #[test]
    fn test_transfer_failure_fires_immediately() {
        let (_backend, context) = null_context(NullBackendOptions {
            max_buffer_bytes: 16,
            ..Default::default()
        });
        let (surface, _) = patterned_surface(&context);
        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 4, 4), capture(&results))
            .unwrap();
        assert_eq!(*results.lock(), vec![Err(ReadPixelsError::TransferFailed)]);
        assert_eq!(context.num_pending_readbacks(), 0);
    }

    #[test]
    fn test_sync_submit_fires_callbacks() {
        let (_backend, context) = held_context();
        let (surface, pixels) = patterned_surface(&context);
        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 4, 4), capture(&results))
            .unwrap();
        context.submit(SyncToCpu::Yes).unwrap();
        assert_eq!(*results.lock(), vec![Ok(pixels)]);
    }

    #[test]
    fn test_device_loss_fails_fast() {
        let (backend, context) = held_context();
        let (surface, _) = patterned_surface(&context);
        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 4, 4), capture(&results))
            .unwrap();

        backend.lose_device();
        let err = context.submit(SyncToCpu::No).unwrap_err();
        assert!(matches!(err, ContextError::DeviceLost));
        assert!(context.is_device_lost());
        assert_eq!(*results.lock(), vec![Err(ReadPixelsError::DeviceLost)]);

        let recording = context.make_recorder(RecorderOptions::default()).snap();
        assert!(matches!(
            context.insert_recording(InsertRecordingInfo::new(&recording)),
            Err(ContextError::DeviceLost)
        ));
        assert!(matches!(
            context.async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 1, 1), capture(&results)),
            Err(ContextError::DeviceLost)
        ));
        assert!(matches!(context.submit(SyncToCpu::Yes), Err(ContextError::DeviceLost)));
        assert_eq!(results.lock().len(), 1);
    }

    #[test]
    fn test_loss_while_in_flight() {
        let (backend, context) = held_context();
        let (surface, _) = patterned_surface(&context);
        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 4, 4), capture(&results))
            .unwrap();
        context.submit(SyncToCpu::No).unwrap();

        backend.lose_device();
        context.check_async_work_completion();
        assert_eq!(*results.lock(), vec![Err(ReadPixelsError::DeviceLost)]);
        assert!(context.is_device_lost());
    }

    #[test]
    fn test_loss_observed_by_poll_fails_queued_work() {
        let (backend, context) = held_context();
        let (surface, _) = patterned_surface(&context);
        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 1, 1), capture(&results))
            .unwrap();
        context.submit(SyncToCpu::No).unwrap();

        // Queued behind the in-flight submission, never submitted.
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = finished.clone();
        let mut recorder = context.make_recorder(RecorderOptions::default());
        recorder.clear(&surface, Color::BLACK);
        let recording = recorder.snap();
        context
            .insert_recording(
                InsertRecordingInfo::new(&recording).with_finished_proc(move |r| sink.lock().push(r)),
            )
            .unwrap();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 1, 1), capture(&results))
            .unwrap();

        backend.lose_device();
        context.check_async_work_completion();
        assert!(context.is_device_lost());
        assert_eq!(
            *results.lock(),
            vec![Err(ReadPixelsError::DeviceLost), Err(ReadPixelsError::DeviceLost)]
        );
        assert_eq!(*finished.lock(), vec![CallbackResult::Failed]);
        assert!(!context.has_pending_work());
        assert_eq!(context.num_pending_readbacks(), 0);

        assert!(matches!(context.submit(SyncToCpu::No), Err(ContextError::DeviceLost)));
        drop(context);
        assert_eq!(results.lock().len(), 2);
        assert_eq!(finished.lock().len(), 1);
    }

    #[test]
    fn test_failed_instantiation_leaves_recording_insertable() {
        let (_backend, context) = null_context(NullBackendOptions::default());
        let mut recorder = context.make_recorder(RecorderOptions::default());
        let mut texture = recorder.create_backend_texture(rgba(2, 2)).unwrap();
        let surface = recorder.wrap_backend_texture(&texture).unwrap();
        recorder.clear(&surface, Color::WHITE);
        let recording = recorder.snap();
        context.delete_backend_texture(&mut texture);

        for _ in 0..2 {
            assert!(matches!(
                context.insert_recording(InsertRecordingInfo::new(&recording)),
                Err(ContextError::InstantiationFailed)
            ));
        }
        assert!(!recording.was_inserted());
        assert!(!context.has_pending_work());
    }

    #[test]
    fn test_extreme_read_rect_rejected_and_printable() {
        let (_backend, context) = null_context(NullBackendOptions::default());
        let (surface, _) = patterned_surface(&context);
        let results = Results::default();
        let rect = IRect::from_ltrb(i32::MIN, 0, i32::MAX, 1);
        let err = context
            .async_read_pixels_from_surface(&surface, RGBA, rect, capture(&results))
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidReadRect { .. }));
        let message = err.to_string();
        assert!(message.contains(&i32::MIN.to_string()));
        assert!(message.contains("4x4"));
        assert!(results.lock().is_empty());
    }

    #[test]
    fn test_teardown_cancels_outstanding_work() {
        let (_backend, context) = held_context();
        let (surface, _) = patterned_surface(&context);
        let results = Results::default();
        let rect = IRect::from_xywh(0, 0, 4, 4);

        // One readback in flight, one still queued.
        context
            .async_read_pixels_from_surface(&surface, RGBA, rect, capture(&results))
            .unwrap();
        context.submit(SyncToCpu::No).unwrap();
        context
            .async_read_pixels_from_surface(&surface, RGBA, rect, capture(&results))
            .unwrap();

        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = finished.clone();
        let recording = context.make_recorder(RecorderOptions::default()).snap();
        context
            .insert_recording(InsertRecordingInfo::new(&recording).with_finished_proc(move |r| sink.lock().push(r)))
            .unwrap();

        drop(context);
        assert_eq!(
            *results.lock(),
            vec![Err(ReadPixelsError::Cancelled), Err(ReadPixelsError::Cancelled)]
        );
        assert_eq!(*finished.lock(), vec![CallbackResult::Failed]);
    }

    #[test]
    fn test_released_buffer_is_recycled() {
        let (_backend, context) = null_context(NullBackendOptions::default());
        let (surface, _) = patterned_surface(&context);
        let rect = IRect::from_xywh(0, 0, 4, 4);
        let held: Arc<Mutex<Vec<AsyncReadResult>>> = Arc::default();

        let read = |context: &Context| {
            let sink = held.clone();
            context
                .async_read_pixels_from_surface(&surface, RGBA, rect, move |result| {
                    sink.lock().push(result.unwrap());
                })
                .unwrap();
            context.submit(SyncToCpu::No).unwrap();
            context.check_async_work_completion();
            held.lock().last().and_then(AsyncReadResult::buffer_id)
        };

        // While the first result is held its buffer is not reused.
        let first = read(&context);
        let second = read(&context);
        assert!(first.is_some());
        assert_ne!(first, second);

        // Releasing both hands the buffers back on the next poll.
        held.lock().clear();
        context.check_async_work_completion();
        let third = read(&context);
        assert!(third == first || third == second);
    }

    #[test]
    fn test_result_outlives_context() {
        let (_backend, context) = null_context(NullBackendOptions::default());
        let (surface, pixels) = patterned_surface(&context);
        let held: Arc<Mutex<Option<AsyncReadResult>>> = Arc::default();
        let sink = held.clone();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 4, 4), move |result| {
                *sink.lock() = result.ok();
            })
            .unwrap();
        context.submit(SyncToCpu::Yes).unwrap();
        drop(context);

        let result = held.lock().take().unwrap();
        assert_eq!(result.to_packed_vec(), pixels);
        drop(result);
    }

    #[test]
    fn test_callback_may_reenter_context() {
        let (_backend, context) = null_context(NullBackendOptions::default());
        let context = Arc::new(context);
        let (surface, pixels) = patterned_surface(&context);
        let results = Results::default();

        let inner_results = results.clone();
        let inner_context = context.clone();
        let inner_surface = surface.clone();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 1, 1), move |_| {
                inner_context
                    .async_read_pixels_from_surface(
                        &inner_surface,
                        RGBA,
                        IRect::from_xywh(0, 0, 4, 4),
                        capture(&inner_results),
                    )
                    .unwrap();
            })
            .unwrap();
        context.submit(SyncToCpu::Yes).unwrap();
        assert!(results.lock().is_empty());
        context.submit(SyncToCpu::Yes).unwrap();
        assert_eq!(*results.lock(), vec![Ok(pixels)]);
    }

    #[test]
    fn test_recordings_from_worker_threads() {
        let (backend, context) = null_context(NullBackendOptions::default());
        let recorders: Vec<Recorder> = (0..4)
            .map(|_| context.make_recorder(RecorderOptions::default()))
            .collect();

        let recordings: Vec<Recording> = std::thread::scope(|scope| {
            let handles: Vec<_> = recorders
                .into_iter()
                .map(|mut recorder| {
                    scope.spawn(move || {
                        let surface = recorder.make_surface(rgba(8, 8)).unwrap();
                        recorder.clear(&surface, Color::BLACK);
                        recorder.snap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for recording in recordings.iter().rev() {
            context.insert_recording(InsertRecordingInfo::new(recording)).unwrap();
        }
        context.submit(SyncToCpu::Yes).unwrap();
        let expected: Vec<WorkLabel> = recordings
            .iter()
            .rev()
            .map(|r| WorkLabel::Recording(r.id()))
            .collect();
        assert_eq!(backend.execution_log(), expected);
    }

    #[test]
    fn test_delete_backend_texture() {
        let (backend, context) = null_context(NullBackendOptions::default());
        let mut recorder = context.make_recorder(RecorderOptions::default());
        let mut texture = recorder.create_backend_texture(rgba(2, 2)).unwrap();

        // Render into it and read it back before deleting.
        let surface = recorder.wrap_backend_texture(&texture).unwrap();
        recorder.clear(&surface, Color::WHITE);
        let recording = recorder.snap();
        context.insert_recording(InsertRecordingInfo::new(&recording)).unwrap();
        let results = Results::default();
        context
            .async_read_pixels_from_surface(&surface, RGBA, IRect::from_xywh(0, 0, 1, 1), capture(&results))
            .unwrap();
        context.submit(SyncToCpu::Yes).unwrap();
        assert_eq!(*results.lock(), vec![Ok(vec![255, 255, 255, 255])]);

        assert_eq!(backend.live_backend_textures(), 1);
        context.delete_backend_texture(&mut texture);
        assert!(!texture.is_valid());
        assert_eq!(backend.live_backend_textures(), 0);

        // Invalid and foreign handles are ignored.
        context.delete_backend_texture(&mut texture);
        let mut foreign = BackendTexture::new(rgba(2, 2), BackendTextureHandle::Vulkan { image: 7 });
        context.delete_backend_texture(&mut foreign);
        assert!(foreign.is_valid());
    }
}
