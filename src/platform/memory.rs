use crate::geometry::RectInt;
use crate::platform::{
    BufferRequest, Capability, ChannelMasks, DcKind, DeviceHandle, DevicePlatform, DirectSurfaceInfo,
    LockedPixels, PaletteColor, PixelStorage,
};
use hashbrown::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Decides whether an allocation request may succeed. Used to inject failures.
pub type AllocationPolicy = Box<dyn Fn(&BufferRequest) -> bool + Send + Sync>;

/// A block copy as requested by a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockCopy {
    pub dst: DeviceHandle,
    pub dst_rect: RectInt,
    pub src: DeviceHandle,
    pub src_x: i32,
    pub src_y: i32,
}

/// Counters kept by the [`MemoryPlatform`].
#[derive(Clone, Debug, Default)]
pub struct PlatformStats {
    /// Successful off-screen buffer allocations
    pub allocations: usize,
    /// Allocation requests that were refused
    pub failed_allocations: usize,
    /// Buffers released through `release_buffer`
    pub releases: usize,
    /// Every block copy, in call order
    pub block_copies: Vec<BlockCopy>,
}

struct Context {
    kind: DcKind,
    width: i32,
    height: i32,
    depth: u32,
    masks: ChannelMasks,
    stride: usize,
    storage: PixelStorage,
    palette: Vec<PaletteColor>,
    locks: u32,
    direct: Option<DirectSurfaceInfo>,
}

impl Context {
    fn new(kind: DcKind, width: i32, height: i32, depth: u32, masks: ChannelMasks) -> Self {
        let bpp = bytes_per_pixel(depth);
        let stride = (width.max(0) as usize * bpp).div_ceil(4) * 4;
        Self {
            kind,
            width,
            height,
            depth,
            masks,
            stride,
            storage: PixelStorage::zeroed(stride * height.max(0) as usize),
            palette: Vec::new(),
            locks: 0,
            direct: None,
        }
    }

    fn bounds(&self) -> RectInt {
        RectInt::from_size(self.width, self.height)
    }

    fn addressable(&self) -> bool {
        self.kind != DcKind::Window
    }

    fn offset(&self, x: i32, y: i32) -> usize {
        y as usize * self.stride + x as usize * bytes_per_pixel(self.depth)
    }

    /// Converts a stored pixel to 8-bit ARGB.
    fn decode(&self, raw: u32) -> [u8; 4] {
        if self.depth == 8 {
            let v = raw as u8;
            let gray = self.palette.get(v as usize).map(|c| c.r).unwrap_or(v);
            return [v, gray, gray, gray];
        }

        let a = if self.masks.a == 0 { 0xff } else { extract(raw, self.masks.a) };
        [a, extract(raw, self.masks.r), extract(raw, self.masks.g), extract(raw, self.masks.b)]
    }

    /// Converts 8-bit ARGB to the stored representation.
    fn encode(&self, argb: [u8; 4]) -> u32 {
        if self.depth == 8 {
            return argb[0] as u32;
        }

        insert(argb[0], self.masks.a) | insert(argb[1], self.masks.r) | insert(argb[2], self.masks.g) | insert(argb[3], self.masks.b)
    }
}

fn bytes_per_pixel(depth: u32) -> usize {
    depth.div_ceil(8) as usize
}

fn extract(raw: u32, mask: u32) -> u8 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let max = mask >> shift;
    let v = (raw & mask) >> shift;
    ((v * 255 + max / 2) / max) as u8
}

fn insert(value: u8, mask: u32) -> u32 {
    if mask == 0 {
        return 0;
    }
    let shift = mask.trailing_zeros();
    let max = mask >> shift;
    (((value as u32 * max + 127) / 255) << shift) & mask
}

fn read_raw(bytes: &[u8], offset: usize, bpp: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf[..bpp].copy_from_slice(&bytes[offset..offset + bpp]);
    u32::from_le_bytes(buf)
}

fn write_raw(bytes: &mut [u8], offset: usize, bpp: usize, value: u32) {
    bytes[offset..offset + bpp].copy_from_slice(&value.to_le_bytes()[..bpp]);
}

struct Inner {
    next_handle: u64,
    contexts: HashMap<DeviceHandle, Context>,
    stats: PlatformStats,
    /// Upcoming block copies that fail
    failing_copies: usize,
}

/// In-process device-context platform.
///
/// Memory and screen contexts expose their pixels through `lock_pixels`; window contexts
/// behave like live hardware surfaces and can only be reached through block copies.
pub struct MemoryPlatform {
    inner: Mutex<Inner>,
    policy: Mutex<Option<AllocationPolicy>>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// Creates a platform without a screen.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_handle: DeviceHandle::SCREEN.0 + 1,
                contexts: HashMap::new(),
                stats: PlatformStats::default(),
                failing_copies: 0,
            }),
            policy: Mutex::new(None),
        }
    }

    /// Creates a platform with a 32-bit screen of the given size behind [`DeviceHandle::SCREEN`].
    pub fn with_screen(width: i32, height: i32) -> Self {
        let platform = Self::new();
        let masks = ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0);
        platform
            .lock()
            .contexts
            .insert(DeviceHandle::SCREEN, Context::new(DcKind::Screen, width, height, 32, masks));
        platform
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, context: Context) -> DeviceHandle {
        let mut inner = self.lock();
        let handle = DeviceHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.contexts.insert(handle, context);
        handle
    }

    /// Creates a live window context. It has no addressable pixels and is never released by surfaces.
    pub fn create_window_dc(&self, width: i32, height: i32, depth: u32, masks: ChannelMasks) -> DeviceHandle {
        self.insert(Context::new(DcKind::Window, width, height, depth, masks))
    }

    /// Destroys a window context created by [`MemoryPlatform::create_window_dc`].
    pub fn destroy_window_dc(&self, dc: DeviceHandle) {
        let mut inner = self.lock();
        if matches!(inner.contexts.get(&dc), Some(ctx) if ctx.kind == DcKind::Window) {
            inner.contexts.remove(&dc);
        }
    }

    /// Installs a policy consulted before every allocation.
    pub fn set_allocation_policy(&self, policy: impl Fn(&BufferRequest) -> bool + Send + Sync + 'static) {
        *self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(policy));
    }

    pub fn clear_allocation_policy(&self) {
        *self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Makes the next `count` block copies fail.
    pub fn fail_next_block_copies(&self, count: usize) {
        self.lock().failing_copies = count;
    }

    /// Marks a context as living in GPU memory, making it eligible for direct rendering.
    pub fn set_direct_info(&self, dc: DeviceHandle, info: DirectSurfaceInfo) {
        if let Some(ctx) = self.lock().contexts.get_mut(&dc) {
            ctx.direct = Some(info);
        }
    }

    pub fn stats(&self) -> PlatformStats {
        self.lock().stats.clone()
    }

    /// Forgets the recorded block copies.
    pub fn reset_block_copies(&self) {
        self.lock().stats.block_copies.clear();
    }

    /// Number of memory buffers allocated and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.lock().contexts.values().filter(|ctx| ctx.kind == DcKind::Memory).count()
    }

    /// True while the handle refers to an existing context.
    pub fn contains(&self, dc: DeviceHandle) -> bool {
        self.lock().contexts.contains_key(&dc)
    }

    /// Number of outstanding `lock_pixels` calls on a context.
    pub fn lock_count(&self, dc: DeviceHandle) -> u32 {
        self.lock().contexts.get(&dc).map(|ctx| ctx.locks).unwrap_or(0)
    }

    /// Reads a pixel as 8-bit ARGB packed into a `u32`.
    pub fn pixel(&self, dc: DeviceHandle, x: i32, y: i32) -> Option<u32> {
        let inner = self.lock();
        let ctx = inner.contexts.get(&dc)?;
        if !ctx.bounds().contains_point(x, y) {
            return None;
        }
        let raw = ctx.storage.with(|px| read_raw(px, ctx.offset(x, y), bytes_per_pixel(ctx.depth)));
        Some(u32::from_be_bytes(ctx.decode(raw)))
    }

    /// Fills a rectangle with an 8-bit ARGB color, like a drawing call issued by another client.
    pub fn fill(&self, dc: DeviceHandle, rect: &RectInt, argb: u32) -> bool {
        let inner = self.lock();
        let Some(ctx) = inner.contexts.get(&dc) else {
            return false;
        };
        let Some(rect) = rect.intersect(&ctx.bounds()) else {
            return true;
        };

        let raw = ctx.encode(argb.to_be_bytes());
        let bpp = bytes_per_pixel(ctx.depth);
        ctx.storage.with_mut(|px| {
            for y in rect.y..rect.bottom() {
                for x in rect.x..rect.right() {
                    write_raw(px, ctx.offset(x, y), bpp, raw);
                }
            }
        });
        true
    }
}

impl DevicePlatform for MemoryPlatform {
    fn create_offscreen_buffer(&self, request: &BufferRequest) -> DeviceHandle {
        let allowed = self
            .policy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|policy| policy(request))
            .unwrap_or(true);

        if !allowed || request.width <= 0 || request.height <= 0 || !matches!(request.depth, 8 | 16 | 24 | 32) {
            self.lock().stats.failed_allocations += 1;
            return DeviceHandle::INVALID;
        }

        let ctx = Context::new(DcKind::Memory, request.width, request.height, request.depth, request.masks);
        let handle = self.insert(ctx);
        self.lock().stats.allocations += 1;
        handle
    }

    fn query_capability(&self, dc: DeviceHandle, capability: Capability) -> u32 {
        let inner = self.lock();
        let Some(ctx) = inner.contexts.get(&dc) else {
            return 0;
        };

        match capability {
            Capability::Depth | Capability::BitsPerPixel => ctx.depth,
            Capability::BytesPerPixel => bytes_per_pixel(ctx.depth) as u32,
            Capability::HPixel => ctx.width as u32,
            Capability::VPixel => ctx.height as u32,
            Capability::RMask => ctx.masks.r,
            Capability::GMask => ctx.masks.g,
            Capability::BMask => ctx.masks.b,
            Capability::AMask => ctx.masks.a,
        }
    }

    fn lock_pixels(&self, dc: DeviceHandle, _rect: &RectInt) -> Option<LockedPixels> {
        let mut inner = self.lock();
        let ctx = inner.contexts.get_mut(&dc)?;
        if !ctx.addressable() {
            return None;
        }

        ctx.locks += 1;
        Some(LockedPixels {
            storage: ctx.storage.clone(),
            stride: ctx.stride,
        })
    }

    fn unlock_pixels(&self, dc: DeviceHandle) {
        if let Some(ctx) = self.lock().contexts.get_mut(&dc) {
            ctx.locks = ctx.locks.saturating_sub(1);
        }
    }

    fn block_copy(&self, dst: DeviceHandle, dst_rect: &RectInt, src: DeviceHandle, src_x: i32, src_y: i32) -> bool {
        let mut inner = self.lock();
        inner.stats.block_copies.push(BlockCopy {
            dst,
            dst_rect: *dst_rect,
            src,
            src_x,
            src_y,
        });

        if inner.failing_copies > 0 {
            inner.failing_copies -= 1;
            return false;
        }

        let (Some(s), Some(d)) = (inner.contexts.get(&src), inner.contexts.get(&dst)) else {
            return false;
        };

        // Clip against the destination, then map back to source space and clip again.
        let Some(clipped) = dst_rect.intersect(&d.bounds()) else {
            return true;
        };
        let dx = src_x - dst_rect.x;
        let dy = src_y - dst_rect.y;
        let src_area = RectInt::new(clipped.x + dx, clipped.y + dy, clipped.width, clipped.height);
        let Some(src_area) = src_area.intersect(&s.bounds()) else {
            return true;
        };

        let src_bpp = bytes_per_pixel(s.depth);
        let same_layout = s.depth == d.depth && s.masks == d.masks;

        let mut pixels = Vec::with_capacity(src_area.area() as usize);
        s.storage.with(|px| {
            for y in src_area.y..src_area.bottom() {
                for x in src_area.x..src_area.right() {
                    pixels.push(read_raw(px, s.offset(x, y), src_bpp));
                }
            }
        });

        if !same_layout {
            for raw in pixels.iter_mut() {
                *raw = d.encode(s.decode(*raw));
            }
        }

        let dst_bpp = bytes_per_pixel(d.depth);
        d.storage.with_mut(|px| {
            let mut it = pixels.iter();
            for y in src_area.y..src_area.bottom() {
                for x in src_area.x..src_area.right() {
                    if let Some(raw) = it.next() {
                        write_raw(px, d.offset(x - dx, y - dy), dst_bpp, *raw);
                    }
                }
            }
        });

        true
    }

    fn release_buffer(&self, dc: DeviceHandle) {
        let mut inner = self.lock();
        if matches!(inner.contexts.get(&dc), Some(ctx) if ctx.kind == DcKind::Memory) {
            inner.contexts.remove(&dc);
            inner.stats.releases += 1;
        } else {
            log::warn!("release_buffer: {:?} is not a memory buffer", dc);
        }
    }

    fn set_palette(&self, dc: DeviceHandle, start: usize, colors: &[PaletteColor]) -> bool {
        let mut inner = self.lock();
        let Some(ctx) = inner.contexts.get_mut(&dc) else {
            return false;
        };

        if ctx.palette.len() < start + colors.len() {
            ctx.palette.resize(start + colors.len(), PaletteColor::default());
        }
        ctx.palette[start..start + colors.len()].copy_from_slice(colors);
        true
    }

    fn kind(&self, dc: DeviceHandle) -> Option<DcKind> {
        self.lock().contexts.get(&dc).map(|ctx| ctx.kind)
    }

    fn direct_surface_info(&self, dc: DeviceHandle) -> Option<DirectSurfaceInfo> {
        self.lock().contexts.get(&dc).and_then(|ctx| ctx.direct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XRGB: ChannelMasks = ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0);
    const RGB565: ChannelMasks = ChannelMasks::new(0xF800, 0x07E0, 0x001F, 0);

    fn request(width: i32, height: i32, depth: u32, masks: ChannelMasks) -> BufferRequest {
        BufferRequest {
            width,
            height,
            depth,
            masks,
            hardware: false,
        }
    }

    #[test]
    fn allocate_and_release_balance() {
        let platform = MemoryPlatform::new();
        let dc = platform.create_offscreen_buffer(&request(4, 4, 32, XRGB));
        assert!(dc.is_valid());
        assert_eq!(platform.live_buffers(), 1);

        platform.release_buffer(dc);
        assert_eq!(platform.live_buffers(), 0);
        let stats = platform.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn policy_refuses_allocation() {
        let platform = MemoryPlatform::new();
        platform.set_allocation_policy(|req| req.depth != 16);
        assert!(!platform.create_offscreen_buffer(&request(4, 4, 16, RGB565)).is_valid());
        assert!(platform.create_offscreen_buffer(&request(4, 4, 32, XRGB)).is_valid());
        assert_eq!(platform.stats().failed_allocations, 1);

        platform.clear_allocation_policy();
        assert!(platform.create_offscreen_buffer(&request(4, 4, 16, RGB565)).is_valid());
    }

    #[test]
    fn window_is_not_addressable() {
        let platform = MemoryPlatform::new();
        let win = platform.create_window_dc(10, 10, 32, XRGB);
        assert!(platform.lock_pixels(win, &RectInt::new(0, 0, 1, 1)).is_none());
        assert_eq!(platform.query_capability(win, Capability::HPixel), 10);
        assert_eq!(platform.kind(win), Some(DcKind::Window));
    }

    #[test]
    fn block_copy_converts_between_layouts() {
        let platform = MemoryPlatform::new();
        let src = platform.create_window_dc(4, 4, 24, XRGB);
        let dst = platform.create_offscreen_buffer(&request(4, 4, 16, RGB565));

        platform.fill(src, &RectInt::new(1, 1, 2, 2), 0xffff_0000);
        assert!(platform.block_copy(dst, &RectInt::new(0, 0, 4, 4), src, 0, 0));

        assert_eq!(platform.pixel(dst, 1, 1), Some(0xffff_0000));
        assert_eq!(platform.pixel(dst, 0, 0), Some(0xff00_0000));
    }

    #[test]
    fn block_copy_is_clipped() {
        let platform = MemoryPlatform::new();
        let src = platform.create_window_dc(4, 4, 32, XRGB);
        let dst = platform.create_offscreen_buffer(&request(2, 2, 32, XRGB));
        platform.fill(src, &RectInt::from_size(4, 4), 0xff12_3456);

        assert!(platform.block_copy(dst, &RectInt::new(-1, -1, 8, 8), src, 0, 0));
        assert_eq!(platform.pixel(dst, 0, 0), Some(0xff12_3456));
        assert_eq!(platform.pixel(dst, 1, 1), Some(0xff12_3456));
        assert_eq!(platform.stats().block_copies.len(), 1);
    }

    #[test]
    fn block_copy_failures_are_injected() {
        let platform = MemoryPlatform::new();
        let src = platform.create_window_dc(2, 2, 32, XRGB);
        let dst = platform.create_offscreen_buffer(&request(2, 2, 32, XRGB));
        platform.fill(src, &RectInt::from_size(2, 2), 0xff00_ff00);

        platform.fail_next_block_copies(1);
        assert!(!platform.block_copy(dst, &RectInt::from_size(2, 2), src, 0, 0));
        assert_eq!(platform.pixel(dst, 0, 0), Some(0xff00_0000));
        assert!(platform.block_copy(dst, &RectInt::from_size(2, 2), src, 0, 0));
        assert_eq!(platform.pixel(dst, 0, 0), Some(0xff00_ff00));
        assert_eq!(platform.stats().block_copies.len(), 2);
    }

    #[test]
    fn lock_counts_are_tracked() {
        let platform = MemoryPlatform::with_screen(8, 8);
        let locked = platform.lock_pixels(DeviceHandle::SCREEN, &RectInt::new(0, 0, 1, 1)).unwrap();
        assert_eq!(locked.stride, 32);
        assert_eq!(platform.lock_count(DeviceHandle::SCREEN), 1);
        platform.unlock_pixels(DeviceHandle::SCREEN);
        assert_eq!(platform.lock_count(DeviceHandle::SCREEN), 0);
    }
}
