// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Handles to backend-resident memory.
//!
//! `Texture` and `Buffer` carry a CPU-visible shadow of their backend memory,
//! which is what the null backend executes against. `TextureProxy` is the
//! recording-side handle: it is created by a `Recorder` and only bound to a
//! real `Texture` when the owning context instantiates it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use loom_common::{BackendApi, ColorType, ISize, ImageInfo};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::resource_provider::ResourceProvider;
use crate::shared_context::SharedContext;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

// ── Backend textures ────────────────────────────────────────────────────

/// Backend object wrapped by a `BackendTexture`, tagged by API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendTextureHandle {
    Invalid,
    Null { id: u64 },
    Vulkan { image: u64 },
    Metal { texture: u64 },
}

impl BackendTextureHandle {
    pub fn api(&self) -> Option<BackendApi> {
        match self {
            Self::Invalid => None,
            Self::Null { .. } => Some(BackendApi::Null),
            Self::Vulkan { .. } => Some(BackendApi::Vulkan),
            Self::Metal { .. } => Some(BackendApi::Metal),
        }
    }
}

/// Client-held texture created outside of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTexture {
    info: ImageInfo,
    handle: BackendTextureHandle,
}

impl BackendTexture {
    pub fn new(info: ImageInfo, handle: BackendTextureHandle) -> Self {
        Self { info, handle }
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn handle(&self) -> BackendTextureHandle {
        self.handle
    }

    pub fn backend(&self) -> Option<BackendApi> {
        self.handle.api()
    }

    pub fn is_valid(&self) -> bool {
        self.handle != BackendTextureHandle::Invalid
    }

    pub(crate) fn reset(&mut self) {
        self.handle = BackendTextureHandle::Invalid;
    }
}

// ── Textures ────────────────────────────────────────────────────────────

/// An instantiated backend texture.
#[derive(Clone)]
pub struct Texture(Arc<TextureInner>);

struct TextureInner {
    info: ImageInfo,
    handle: BackendTextureHandle,
    memory: RwLock<Vec<u8>>,
}

impl Texture {
    /// Allocate zero-filled texture memory.
    pub fn new(info: ImageInfo, handle: BackendTextureHandle) -> Self {
        Self(Arc::new(TextureInner {
            info,
            handle,
            memory: RwLock::new(vec![0u8; info.compute_min_byte_size()]),
        }))
    }

    pub fn info(&self) -> &ImageInfo {
        &self.0.info
    }

    pub fn handle(&self) -> BackendTextureHandle {
        self.0.handle
    }

    pub fn row_bytes(&self) -> usize {
        self.0.info.min_row_bytes()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.0.memory.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.0.memory.write()
    }

    pub fn ptr_eq(&self, other: &Texture) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("info", &self.0.info)
            .field("handle", &self.0.handle)
            .finish()
    }
}

// ── Texture proxies ─────────────────────────────────────────────────────

enum ProxySource {
    /// A fresh texture allocated by the resource provider.
    Fresh,
    /// A client-created backend texture.
    Wrapped(BackendTexture),
}

/// Lazily-instantiated texture referenced by recorded commands.
#[derive(Clone)]
pub struct TextureProxy(Arc<ProxyInner>);

struct ProxyInner {
    id: u64,
    info: ImageInfo,
    source: ProxySource,
    texture: OnceLock<Texture>,
}

impl TextureProxy {
    pub(crate) fn new(info: ImageInfo) -> Self {
        Self::with_source(info, ProxySource::Fresh)
    }

    pub(crate) fn wrapping(texture: BackendTexture) -> Self {
        Self::with_source(*texture.info(), ProxySource::Wrapped(texture))
    }

    fn with_source(info: ImageInfo, source: ProxySource) -> Self {
        Self(Arc::new(ProxyInner {
            id: next_resource_id(),
            info,
            source,
            texture: OnceLock::new(),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn info(&self) -> &ImageInfo {
        &self.0.info
    }

    pub fn dimensions(&self) -> ISize {
        self.0.info.dimensions
    }

    pub fn is_instantiated(&self) -> bool {
        self.0.texture.get().is_some()
    }

    pub fn texture(&self) -> Option<&Texture> {
        self.0.texture.get()
    }

    /// Bind a backend texture if not already bound. Returns `false` if the
    /// provider could not supply one.
    pub fn instantiate(&self, provider: &mut dyn ResourceProvider) -> bool {
        if self.is_instantiated() {
            return true;
        }
        let texture = match &self.0.source {
            ProxySource::Fresh => provider.create_texture(&self.0.info),
            ProxySource::Wrapped(backend_texture) => provider.wrap_backend_texture(backend_texture),
        };
        match texture {
            Some(texture) => {
                // A concurrent instantiation may have won; either texture is fine.
                let _ = self.0.texture.set(texture);
                true
            }
            None => {
                log::warn!(
                    "proxy {}: instantiation failed ({}x{} {:?})",
                    self.0.id,
                    self.0.info.width(),
                    self.0.info.height(),
                    self.0.info.color_type()
                );
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn bind_for_test(&self, texture: Texture) {
        let _ = self.0.texture.set(texture);
    }

    pub fn ptr_eq(&self, other: &TextureProxy) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TextureProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureProxy")
            .field("id", &self.0.id)
            .field("info", &self.0.info)
            .field("instantiated", &self.is_instantiated())
            .finish()
    }
}

// ── Buffers ─────────────────────────────────────────────────────────────

/// CPU-mappable transfer buffer.
#[derive(Clone)]
pub struct Buffer(Arc<BufferInner>);

struct BufferInner {
    id: u64,
    native_format: ColorType,
    memory: RwLock<Vec<u8>>,
    mapped: AtomicBool,
}

impl Buffer {
    pub fn new(size: usize, native_format: ColorType) -> Self {
        Self(Arc::new(BufferInner {
            id: next_resource_id(),
            native_format,
            memory: RwLock::new(vec![0u8; size]),
            mapped: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn size(&self) -> usize {
        self.0.memory.read().len()
    }

    /// Pixel layout the GPU writes into this buffer.
    pub fn native_format(&self) -> ColorType {
        self.0.native_format
    }

    pub fn is_mapped(&self) -> bool {
        self.0.mapped.load(Ordering::Acquire)
    }

    /// Map for CPU reads. Mapping is exclusive: returns `false` if the buffer
    /// is already mapped.
    pub fn map(&self) -> bool {
        !self.0.mapped.swap(true, Ordering::AcqRel)
    }

    pub fn unmap(&self) {
        self.0.mapped.store(false, Ordering::Release);
    }

    /// The first `len` bytes of the mapping, or `None` if not mapped.
    pub fn mapped_bytes(&self, len: usize) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        if !self.is_mapped() {
            return None;
        }
        let guard = self.0.memory.read();
        let len = len.min(guard.len());
        Some(RwLockReadGuard::map(guard, |memory| &memory[..len]))
    }

    /// Device-side write access (used while executing transfers).
    pub(crate) fn device_memory(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.0.memory.write()
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.0.id)
            .field("format", &self.0.native_format)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

// ── Surfaces and images ─────────────────────────────────────────────────

/// Render target created by a `Recorder`.
#[derive(Clone)]
pub struct Surface {
    proxy: TextureProxy,
    shared: Arc<SharedContext>,
}

impl Surface {
    pub(crate) fn new(proxy: TextureProxy, shared: Arc<SharedContext>) -> Self {
        Self { proxy, shared }
    }

    pub fn info(&self) -> &ImageInfo {
        self.proxy.info()
    }

    pub fn width(&self) -> i32 {
        self.info().width()
    }

    pub fn height(&self) -> i32 {
        self.info().height()
    }

    pub fn proxy(&self) -> &TextureProxy {
        &self.proxy
    }

    pub(crate) fn shared_context(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    /// An image sharing this surface's texture.
    pub fn make_image_snapshot(&self) -> Image {
        Image {
            proxy: self.proxy.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Texture-backed image.
#[derive(Clone)]
pub struct Image {
    proxy: TextureProxy,
    shared: Arc<SharedContext>,
}

impl Image {
    pub fn info(&self) -> &ImageInfo {
        self.proxy.info()
    }

    pub fn width(&self) -> i32 {
        self.info().width()
    }

    pub fn height(&self) -> i32 {
        self.info().height()
    }

    pub fn proxy(&self) -> &TextureProxy {
        &self.proxy
    }

    pub(crate) fn shared_context(&self) -> &Arc<SharedContext> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_common::AlphaType;

    #[test]
    fn test_backend_texture_handle_api() {
        assert_eq!(BackendTextureHandle::Invalid.api(), None);
        assert_eq!(
            BackendTextureHandle::Null { id: 3 }.api(),
            Some(BackendApi::Null)
        );
        assert_eq!(
            BackendTextureHandle::Vulkan { image: 3 }.api(),
            Some(BackendApi::Vulkan)
        );
    }

    #[test]
    fn test_backend_texture_reset() {
        let info = ImageInfo::new(2, 2, ColorType::Rgba8888, AlphaType::Premul);
        let mut texture = BackendTexture::new(info, BackendTextureHandle::Null { id: 9 });
        assert!(texture.is_valid());
        texture.reset();
        assert!(!texture.is_valid());
        assert_eq!(texture.backend(), None);
    }

    #[test]
    fn test_texture_memory_sized_from_info() {
        let info = ImageInfo::new(3, 2, ColorType::Rgba8888, AlphaType::Premul);
        let texture = Texture::new(info, BackendTextureHandle::Null { id: 1 });
        assert_eq!(texture.read().len(), 24);
        assert_eq!(texture.row_bytes(), 12);
    }

    #[test]
    fn test_buffer_map_is_exclusive() {
        let buffer = Buffer::new(8, ColorType::Gray8);
        assert!(!buffer.is_mapped());
        assert!(buffer.mapped_bytes(8).is_none());

        assert!(buffer.map());
        assert!(!buffer.map());
        assert_eq!(buffer.mapped_bytes(4).map(|b| b.len()), Some(4));

        buffer.unmap();
        assert!(!buffer.is_mapped());
        assert!(buffer.map());
    }

    #[test]
    fn test_mapped_bytes_clamped_to_size() {
        let buffer = Buffer::new(4, ColorType::Alpha8);
        assert!(buffer.map());
        buffer.device_memory().copy_from_slice(&[1, 2, 3, 4]);
        let bytes = buffer.mapped_bytes(100).unwrap();
        assert_eq!(&*bytes, &[1, 2, 3, 4]);
    }
}
