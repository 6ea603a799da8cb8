//! Device-context platform API.
//!
//! The windowing system is reached only through the [`DevicePlatform`] trait: buffer
//! allocation, capability queries, pixel locking and block copies. Surfaces never
//! touch device memory any other way.
//!
//! [`memory::MemoryPlatform`] is a complete in-process implementation, used headless and
//! as the test double for the real windowing system.

use crate::geometry::RectInt;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod memory;

/// Opaque handle to a device context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);

impl DeviceHandle {
    /// Returned by the platform when no context could be produced.
    pub const INVALID: DeviceHandle = DeviceHandle(0);
    /// The screen context.
    pub const SCREEN: DeviceHandle = DeviceHandle(1);

    pub fn is_valid(&self) -> bool {
        *self != DeviceHandle::INVALID
    }
}

/// Capability fields that can be queried from a device context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Color depth in bits
    Depth,
    BitsPerPixel,
    BytesPerPixel,
    /// Width in pixels
    HPixel,
    /// Height in pixels
    VPixel,
    RMask,
    GMask,
    BMask,
    AMask,
}

/// What sort of drawable a device context refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DcKind {
    /// Off-screen memory buffer
    Memory,
    /// The whole screen
    Screen,
    /// A live drawable (window client area, hardware surface)
    Window,
}

/// Red, green, blue and alpha channel masks of a packed pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ChannelMasks {
    pub r: u32,
    pub g: u32,
    pub b: u32,
    pub a: u32,
}

impl ChannelMasks {
    pub const fn new(r: u32, g: u32, b: u32, a: u32) -> Self {
        Self { r, g, b, a }
    }
}

/// Parameters for [`DevicePlatform::create_offscreen_buffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRequest {
    pub width: i32,
    pub height: i32,
    /// Bits per pixel
    pub depth: u32,
    pub masks: ChannelMasks,
    /// Ask for video memory when the platform has it
    pub hardware: bool,
}

/// One palette entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PaletteColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Pixel memory shared between a device buffer and the image adapters wrapping it.
///
/// Cloning the storage clones the handle, not the pixels.
#[derive(Clone, Debug, Default)]
pub struct PixelStorage(Arc<Mutex<Vec<u8>>>);

impl PixelStorage {
    /// Zero-filled storage of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![0u8; len])))
    }

    fn guard(&self) -> MutexGuard<'_, Vec<u8>> {
        // Pixels stay usable even if a writer panicked mid-way.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` with read access to the bytes.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.guard())
    }

    /// Runs `f` with write access to the bytes.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.guard())
    }

    /// True when both handles refer to the same pixel memory.
    pub fn ptr_eq(&self, other: &PixelStorage) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Result of a successful [`DevicePlatform::lock_pixels`].
#[derive(Clone, Debug)]
pub struct LockedPixels {
    pub storage: PixelStorage,
    /// Bytes per row
    pub stride: usize,
}

/// Buffer description handed to a direct-rendering backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectSurfaceInfo {
    /// Driver specific buffer name
    pub handle: u32,
    /// Size of the buffer in bytes
    pub size: usize,
    pub width: i32,
    pub height: i32,
    pub pitch: usize,
}

/// The windowing system's device-context API.
///
/// Calls occur on the thread owning the surfaces. Implementations report failure through
/// [`DeviceHandle::INVALID`], `None` or `false` rather than panicking.
pub trait DevicePlatform: Send + Sync {
    /// Allocates an off-screen memory buffer. Returns [`DeviceHandle::INVALID`] on failure.
    fn create_offscreen_buffer(&self, request: &BufferRequest) -> DeviceHandle;

    /// Queries a capability field of a context. Unknown handles report 0.
    fn query_capability(&self, dc: DeviceHandle, capability: Capability) -> u32;

    /// Locks the pixels of a context. Returns `None` when the context has no addressable memory.
    fn lock_pixels(&self, dc: DeviceHandle, rect: &RectInt) -> Option<LockedPixels>;

    fn unlock_pixels(&self, dc: DeviceHandle);

    /// Copies `dst_rect.width` x `dst_rect.height` pixels from `src` at `(src_x, src_y)` into `dst`.
    fn block_copy(&self, dst: DeviceHandle, dst_rect: &RectInt, src: DeviceHandle, src_x: i32, src_y: i32) -> bool;

    /// Releases a buffer created by [`DevicePlatform::create_offscreen_buffer`].
    fn release_buffer(&self, dc: DeviceHandle);

    fn set_palette(&self, dc: DeviceHandle, start: usize, colors: &[PaletteColor]) -> bool;

    /// Kind of drawable, or `None` for unknown handles.
    fn kind(&self, dc: DeviceHandle) -> Option<DcKind>;

    /// Buffer description for direct rendering, when the context lives in GPU memory.
    fn direct_surface_info(&self, _dc: DeviceHandle) -> Option<DirectSurfaceInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_clones_share_pixels() {
        let a = PixelStorage::zeroed(4);
        let b = a.clone();
        b.with_mut(|px| px[2] = 7);
        assert_eq!(a.with(|px| px[2]), 7);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&PixelStorage::zeroed(4)));
    }

    #[test]
    fn invalid_handle_is_not_valid() {
        assert!(!DeviceHandle::INVALID.is_valid());
        assert!(DeviceHandle::SCREEN.is_valid());
    }
}
