//! Device-context surface.
//!
//! A [`DcSurface`] renders into a device context of the windowing system. When the context
//! exposes addressable pixels the rasterizer writes into them directly. Live contexts without
//! addressable memory get a fallback: a private off-screen [`DcSurface`] of the same format,
//! seeded from the context on first map, that collects writes and their damage until the next
//! flush copies them back.
//!
//! ```text
//!            map (not addressable)          unmap(rect)
//!   None  ------------------------>  Active  ----------->  Dirty
//!     ^                               |  ^                  |
//!     |   flush (no damage)           |  |  flush (partial) |
//!     +-------------------------------+  +------------------+
//!     |   flush (full damage), mark_dirty, finish           |
//!     +-----------------------------------------------------+
//! ```

use crate::config::SurfaceConfig;
use crate::device::Device;
use crate::errors::SurfaceError;
use crate::format::{Content, Format};
use crate::geometry::RectInt;
use crate::platform::{DeviceHandle, DevicePlatform};
use crate::render::pipeline::{
    Antialias, Clip, FillRule, Glyph, Matrix, Operator, Path, Pattern, RenderPipeline, ScaledFont, StrokeStyle,
};
use crate::surface::backend::{FlushFlags, SimilarImage, SurfaceBackend, SurfaceId, SurfaceKind};
use crate::surface::damage::{Damage, DamageTracker};
use crate::surface::image::ImageSurface;
use crate::surface::provision::{self, PixelDescriptor};
use std::any::Any;
use std::sync::Arc;

/// Everything a surface needs from its environment. Shared by a surface and every fallback or
/// similar surface derived from it.
#[derive(Clone)]
pub struct SurfaceContext {
    pub platform: Arc<dyn DevicePlatform>,
    pub config: Arc<SurfaceConfig>,
    /// Device the surfaces render on, if direct rendering is available
    pub device: Option<Arc<Device>>,
}

impl SurfaceContext {
    pub fn new(platform: Arc<dyn DevicePlatform>) -> Self {
        Self {
            platform,
            config: Arc::new(SurfaceConfig::default()),
            device: None,
        }
    }

    pub fn with_config(mut self, config: SurfaceConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_device(mut self, device: Arc<Device>) -> Self {
        self.device = Some(device);
        self
    }
}

impl std::fmt::Debug for SurfaceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceContext")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish()
    }
}

/// The device context behind a surface, and whether the surface must release it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceBuffer {
    /// Supplied by the caller, never released by the surface
    Borrowed(DeviceHandle),
    /// Allocated for the surface, released when it finishes
    Owned(DeviceHandle),
}

impl DeviceBuffer {
    pub fn handle(&self) -> DeviceHandle {
        match self {
            DeviceBuffer::Borrowed(dc) | DeviceBuffer::Owned(dc) => *dc,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, DeviceBuffer::Owned(_))
    }
}

/// Fallback state of a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackState {
    /// No fallback exists
    None,
    /// A fallback exists and holds no undelivered writes
    Active,
    /// A fallback exists and has damage waiting for a flush
    Dirty,
}

pub struct DcSurface {
    id: SurfaceId,
    ctx: SurfaceContext,
    format: Format,
    buffer: DeviceBuffer,
    descriptor: PixelDescriptor,
    image: Option<ImageSurface>,
    fallback: Option<Box<DcSurface>>,
    /// Writes reported through unmap. Only used while this surface is a fallback.
    damage: DamageTracker,
    extents: RectInt,
    finished: bool,
}

impl DcSurface {
    /// Wraps a caller-supplied device context. The context is never released by the surface.
    pub fn create(ctx: SurfaceContext, dc: DeviceHandle) -> Result<Self, SurfaceError> {
        if !dc.is_valid() {
            return Err(SurfaceError::InvalidArgument("invalid device handle"));
        }
        Self::from_buffer(ctx, DeviceBuffer::Borrowed(dc))
    }

    /// Allocates a new off-screen buffer of `format` and wraps it.
    pub fn create_buffer(ctx: SurfaceContext, format: Format, width: i32, height: i32) -> Result<Self, SurfaceError> {
        let (dc, _, _) = provision::create_buffer(ctx.platform.as_ref(), &ctx.config, format, width, height)?;
        Self::from_buffer(ctx, DeviceBuffer::Owned(dc))
    }

    /// Allocates a new off-screen buffer with the pixel format of `reference`.
    pub fn create_similar_buffer(
        ctx: SurfaceContext,
        reference: DeviceHandle,
        width: i32,
        height: i32,
    ) -> Result<Self, SurfaceError> {
        if !reference.is_valid() {
            return Err(SurfaceError::InvalidArgument("invalid device handle"));
        }
        let format = provision::format_from_dc(ctx.platform.as_ref(), reference);
        Self::create_buffer(ctx, format, width, height)
    }

    /// Builds the surface for a device context. An owned buffer is released when this fails.
    pub(crate) fn from_buffer(ctx: SurfaceContext, buffer: DeviceBuffer) -> Result<Self, SurfaceError> {
        let dc = buffer.handle();
        let format = provision::format_from_dc(ctx.platform.as_ref(), dc);
        let descriptor = provision::describe(ctx.platform.as_ref(), dc);
        let max_rects = ctx.config.max_damage_rects;

        // From here on, dropping `surface` releases an owned buffer.
        let mut surface = DcSurface {
            id: SurfaceId::new(),
            ctx,
            format,
            buffer,
            extents: descriptor.extents(),
            descriptor,
            image: None,
            fallback: None,
            damage: DamageTracker::new(max_rects),
            finished: false,
        };

        if !format.is_supported() {
            log::error!("DcSurface: {:?} has unsupported format {:?}", dc, format);
            return Err(SurfaceError::UnsupportedFormat(format));
        }

        let addressable = surface.descriptor.bytes_per_pixel as usize == format.bytes_per_pixel();
        if let (Some(pixels), true) = (surface.descriptor.pixels.clone(), addressable) {
            let mut image = ImageSurface::for_data(
                pixels,
                format,
                surface.descriptor.width,
                surface.descriptor.height,
                surface.descriptor.stride,
            )?;
            image.set_parent(surface.id);
            surface.image = Some(image);
        }

        log::debug!(
            "DcSurface[{}]: {:?} {:?} {:?} addressable={}",
            surface.id,
            buffer,
            format,
            surface.extents,
            surface.image.is_some()
        );
        Ok(surface)
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn device_handle(&self) -> DeviceHandle {
        self.buffer.handle()
    }

    /// True when the surface allocated its device buffer and will release it.
    pub fn owns_storage(&self) -> bool {
        self.buffer.is_owned()
    }

    pub fn descriptor(&self) -> &PixelDescriptor {
        &self.descriptor
    }

    pub fn context(&self) -> &SurfaceContext {
        &self.ctx
    }

    /// The adapter wrapping this surface's own pixels, `None` when they are not addressable.
    pub fn image(&self) -> Option<&ImageSurface> {
        self.image.as_ref()
    }

    pub fn fallback(&self) -> Option<&DcSurface> {
        self.fallback.as_deref()
    }

    pub fn fallback_state(&self) -> FallbackState {
        match &self.fallback {
            None => FallbackState::None,
            Some(fb) if fb.damage.is_empty() => FallbackState::Active,
            Some(_) => FallbackState::Dirty,
        }
    }

    fn check_finished(&self) -> Result<(), SurfaceError> {
        if self.finished {
            return Err(SurfaceError::Finished);
        }
        Ok(())
    }

    /// A view of this surface's own pixels.
    fn map_own(&self, extents: Option<&RectInt>) -> Result<ImageSurface, SurfaceError> {
        let image = self.image.as_ref().ok_or_else(|| SurfaceError::device("map_to_image"))?;
        let mut view = image.map(extents)?;
        view.set_parent(self.id);
        Ok(view)
    }

    /// Returns the fallback, creating and seeding it from the device context if needed.
    fn ensure_fallback(&mut self) -> Result<&mut DcSurface, SurfaceError> {
        if self.fallback.is_none() {
            let ext = self.extents;
            let fallback = DcSurface::create_buffer(self.ctx.clone(), self.format, ext.right(), ext.bottom())
                .map_err(|e| {
                    log::warn!("DcSurface[{}]: no fallback buffer: {}", self.id, e);
                    SurfaceError::device("map_to_image")
                })?;

            if fallback.image.is_none() {
                return Err(SurfaceError::device("map_to_image"));
            }
            if !self
                .ctx
                .platform
                .block_copy(fallback.device_handle(), &ext, self.device_handle(), ext.x, ext.y)
            {
                return Err(SurfaceError::device("map_to_image"));
            }

            log::debug!("DcSurface[{}]: fallback {} created for {:?}", self.id, fallback.id, ext);
            self.fallback = Some(Box::new(fallback));
        }

        self.fallback.as_deref_mut().ok_or_else(|| SurfaceError::device("map_to_image"))
    }

    /// Drops the fallback together with any writes it still holds.
    fn discard_fallback(&mut self) {
        if let Some(fallback) = self.fallback.take() {
            log::debug!("DcSurface[{}]: fallback {} discarded", self.id, fallback.id);
        }
    }

    fn copy_back(&self, fallback: DeviceHandle, rect: &RectInt) -> Result<(), SurfaceError> {
        let Some(rect) = rect.intersect(&self.extents) else {
            return Ok(());
        };
        if !self
            .ctx
            .platform
            .block_copy(self.device_handle(), &rect, fallback, rect.x, rect.y)
        {
            return Err(SurfaceError::device("flush"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DcSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcSurface")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("buffer", &self.buffer)
            .field("extents", &self.extents)
            .field("fallback", &self.fallback_state())
            .field("finished", &self.finished)
            .finish()
    }
}

impl SurfaceBackend for DcSurface {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn id(&self) -> SurfaceId {
        self.id
    }

    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Dc
    }

    fn content(&self) -> Content {
        self.format.content()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) -> Result<(), SurfaceError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Some(mut image) = self.image.take() {
            image.detach();
        }
        self.discard_fallback();

        if let DeviceBuffer::Owned(dc) = self.buffer {
            self.ctx.platform.release_buffer(dc);
        }
        log::debug!("DcSurface[{}]: finished", self.id);
        Ok(())
    }

    fn create_similar(&self, content: Content, width: i32, height: i32) -> Result<Box<dyn SurfaceBackend>, SurfaceError> {
        self.check_finished()?;

        if !content.contains(Content::ALPHA) {
            match DcSurface::create_buffer(self.ctx.clone(), Format::Rgb24, width, height) {
                Ok(surface) => return Ok(Box::new(surface)),
                Err(e) => log::warn!("DcSurface[{}]: no RGB24 similar surface ({}), mirroring source", self.id, e),
            }
        }

        let surface = DcSurface::create_similar_buffer(self.ctx.clone(), self.device_handle(), width, height)?;
        Ok(Box::new(surface))
    }

    fn create_similar_image(&self, format: Format, width: i32, height: i32) -> Result<SimilarImage, SurfaceError> {
        self.check_finished()?;

        let owner = DcSurface::create_buffer(self.ctx.clone(), format, width, height)?;
        let image = owner.map_own(None)?;
        if !image.is_clear() {
            image.clear();
        }
        Ok(SimilarImage::new(image, Box::new(owner)))
    }

    fn map_to_image(&mut self, extents: Option<&RectInt>) -> Result<ImageSurface, SurfaceError> {
        self.check_finished()?;
        log::trace!("DcSurface[{}]: map {:?}", self.id, extents);

        if self.image.is_some() {
            return self.map_own(extents);
        }
        self.ensure_fallback()?.map_own(extents)
    }

    fn unmap_image(&mut self, image: ImageSurface) -> Result<(), SurfaceError> {
        self.check_finished()?;
        log::trace!("DcSurface[{}]: unmap {:?}", self.id, image.device_extents());

        match self.fallback.as_deref_mut() {
            Some(fallback) if image.parent() == Some(fallback.id) => {
                fallback.damage.add_rectangle(image.device_extents());
            }
            _ if image.parent() == Some(self.id) => {}
            _ => log::debug!("DcSurface[{}]: unmapped image is stale", self.id),
        }
        Ok(())
    }

    fn extents(&self) -> Option<RectInt> {
        Some(self.extents)
    }

    fn flush(&mut self, flags: FlushFlags) -> Result<(), SurfaceError> {
        self.check_finished()?;
        if !flags.is_empty() {
            return Ok(());
        }

        let Some(fallback) = self.fallback.as_deref_mut() else {
            return Ok(());
        };
        let damage = fallback.damage.reduce();
        let src = fallback.device_handle();

        let copied = match &damage {
            Damage::Empty => {
                self.discard_fallback();
                return Ok(());
            }
            Damage::Full => self.copy_back(src, &self.extents),
            Damage::Rectangles(rects) => {
                log::debug!("DcSurface[{}]: flushing {} rectangle(s)", self.id, rects.len());
                rects.iter().try_for_each(|rect| self.copy_back(src, rect))
            }
        };

        // Pending writes stay damaged until a flush gets them out.
        if let Err(e) = copied {
            if let Some(fallback) = self.fallback.as_deref_mut() {
                fallback.damage.mark_full();
            }
            return Err(e);
        }

        if self.ctx.config.discard_on_full_damage && damage.covers(&self.extents) {
            self.discard_fallback();
        }
        Ok(())
    }

    fn mark_dirty(&mut self, rect: &RectInt) -> Result<(), SurfaceError> {
        self.check_finished()?;
        log::trace!("DcSurface[{}]: mark dirty {:?}", self.id, rect);
        self.discard_fallback();
        Ok(())
    }

    fn paint(&mut self, pipeline: &dyn RenderPipeline, op: Operator, source: &Pattern, clip: Option<&Clip>) -> Result<(), SurfaceError> {
        self.check_finished()?;
        pipeline.paint(self, op, source, clip)
    }

    fn mask(
        &mut self,
        pipeline: &dyn RenderPipeline,
        op: Operator,
        source: &Pattern,
        mask: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        self.check_finished()?;
        pipeline.mask(self, op, source, mask, clip)
    }

    fn stroke(
        &mut self,
        pipeline: &dyn RenderPipeline,
        op: Operator,
        source: &Pattern,
        path: &Path,
        style: &StrokeStyle,
        ctm: &Matrix,
        ctm_inverse: &Matrix,
        tolerance: f64,
        antialias: Antialias,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        self.check_finished()?;
        pipeline.stroke(self, op, source, path, style, ctm, ctm_inverse, tolerance, antialias, clip)
    }

    fn fill(
        &mut self,
        pipeline: &dyn RenderPipeline,
        op: Operator,
        source: &Pattern,
        path: &Path,
        fill_rule: FillRule,
        tolerance: f64,
        antialias: Antialias,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        self.check_finished()?;
        pipeline.fill(self, op, source, path, fill_rule, tolerance, antialias, clip)
    }

    fn show_glyphs(
        &mut self,
        pipeline: &dyn RenderPipeline,
        op: Operator,
        source: &Pattern,
        glyphs: &[Glyph],
        font: &ScaledFont,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        self.check_finished()?;
        pipeline.show_glyphs(self, op, source, glyphs, font, clip)
    }
}

impl Drop for DcSurface {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Device context of a device-context surface.
pub fn get_device_handle(surface: &dyn SurfaceBackend) -> Result<DeviceHandle, SurfaceError> {
    match surface.as_any().downcast_ref::<DcSurface>() {
        Some(s) => Ok(s.device_handle()),
        None => {
            log::error!("get_device_handle: surface {} is not a device-context surface", surface.id());
            Err(SurfaceError::SurfaceTypeMismatch)
        }
    }
}

/// Image adapter of a device-context surface, `None` when its pixels are not addressable.
pub fn get_image_adapter(surface: &dyn SurfaceBackend) -> Result<Option<&ImageSurface>, SurfaceError> {
    match surface.as_any().downcast_ref::<DcSurface>() {
        Some(s) => Ok(s.image()),
        None => {
            log::error!("get_image_adapter: surface {} is not a device-context surface", surface.id());
            Err(SurfaceError::SurfaceTypeMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DimensionPolicy;
    use crate::platform::memory::MemoryPlatform;
    use crate::platform::ChannelMasks;
    use crate::surface::image::pack;

    const XRGB: ChannelMasks = ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0);
    const RGB565: ChannelMasks = ChannelMasks::new(0xF800, 0x07E0, 0x001F, 0);

    fn setup() -> (Arc<MemoryPlatform>, SurfaceContext) {
        let _ = env_logger::builder().is_test(true).try_init();
        let platform = Arc::new(MemoryPlatform::new());
        let ctx = SurfaceContext::new(platform.clone());
        (platform, ctx)
    }

    #[test]
    fn buffer_extents_for_every_supported_format() {
        let (platform, ctx) = setup();
        for format in [Format::A8, Format::Rgb16_565, Format::Rgb24, Format::Argb32] {
            let surface = DcSurface::create_buffer(ctx.clone(), format, 7, 3).unwrap();
            assert_eq!(surface.extents(), Some(RectInt::new(0, 0, 7, 3)));
            assert_eq!(surface.format(), format);
            assert!(surface.image().is_some());
        }
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn unsupported_formats_leak_nothing() {
        let (platform, ctx) = setup();
        for format in [Format::A1, Format::Rgb30, Format::Rgb96F, Format::Rgba128F, Format::Invalid] {
            let err = DcSurface::create_buffer(ctx.clone(), format, 4, 4).unwrap_err();
            assert!(matches!(err, SurfaceError::UnsupportedFormat(_)));
        }
        let stats = platform.stats();
        assert_eq!(stats.allocations, stats.releases);
        assert_eq!(platform.live_buffers(), 0);
    }

    #[test]
    fn invalid_handle_is_rejected() {
        let (_, ctx) = setup();
        let err = DcSurface::create(ctx, DeviceHandle::INVALID).unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidArgument(_)));
    }

    #[test]
    fn wrapping_unsupported_context_fails() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(4, 4, 15, XRGB);
        let err = DcSurface::create(ctx, win).unwrap_err();
        assert!(matches!(err, SurfaceError::UnsupportedFormat(Format::Invalid)));
        assert!(platform.contains(win));
    }

    #[test]
    fn addressable_buffer_maps_directly() {
        let (platform, ctx) = setup();
        let mut surface = DcSurface::create_buffer(ctx, Format::Argb32, 4, 4).unwrap();

        let image = surface.map_to_image(None).unwrap();
        assert_eq!(surface.fallback_state(), FallbackState::None);
        assert!(image.shares_storage_with(surface.image().unwrap()));

        image.set_pixel(2, 1, 0xff11_2233);
        surface.unmap_image(image).unwrap();
        surface.flush(FlushFlags::empty()).unwrap();

        assert_eq!(platform.pixel(surface.device_handle(), 2, 1), Some(0xff11_2233));
        assert!(platform.stats().block_copies.is_empty());
    }

    #[test]
    fn window_round_trip_through_fallback() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(10, 10, 32, XRGB);
        platform.fill(win, &RectInt::from_size(10, 10), 0xff00_00ff);
        let mut surface = DcSurface::create(ctx, win).unwrap();
        assert_eq!(surface.format(), Format::Rgb24);
        assert!(surface.image().is_none());

        let image = surface.map_to_image(None).unwrap();
        assert_eq!(surface.fallback_state(), FallbackState::Active);
        let copies = platform.stats().block_copies;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].dst_rect, RectInt::from_size(10, 10));
        assert_eq!(copies[0].src, win);
        // seeded with the window contents
        assert_eq!(image.pixel(5, 5), Some(pack(Format::Rgb24, [0xff, 0, 0, 0xff])));
        drop(image);

        let written = RectInt::new(1, 1, 2, 2);
        let image = surface.map_to_image(Some(&written)).unwrap();
        image.fill_rect(&written, pack(Format::Rgb24, [0xff, 0xff, 0, 0]));
        surface.unmap_image(image).unwrap();
        assert_eq!(surface.fallback_state(), FallbackState::Dirty);

        platform.reset_block_copies();
        surface.flush(FlushFlags::empty()).unwrap();
        let copies = platform.stats().block_copies;
        assert_eq!(copies.len(), 1);
        assert!(copies[0].dst_rect.contains_rect(&written));
        assert_eq!(copies[0].dst, win);

        let fallback_dc = surface.fallback().unwrap().device_handle();
        for y in written.y..written.bottom() {
            for x in written.x..written.right() {
                assert_eq!(platform.pixel(win, x, y), platform.pixel(fallback_dc, x, y));
                assert_eq!(platform.pixel(win, x, y), Some(0xffff_0000));
            }
        }
        assert_eq!(platform.pixel(win, 0, 0), Some(0xff00_00ff));

        // partial damage keeps the fallback around for the next map
        assert_eq!(surface.fallback_state(), FallbackState::Active);
        platform.reset_block_copies();
        let image = surface.map_to_image(None).unwrap();
        assert!(platform.stats().block_copies.is_empty());
        assert_eq!(surface.fallback().unwrap().device_handle(), fallback_dc);
        surface.unmap_image(image).unwrap();
    }

    #[test]
    fn failed_flush_keeps_pending_writes() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(8, 8, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        let written = RectInt::new(1, 1, 2, 2);
        let image = surface.map_to_image(Some(&written)).unwrap();
        image.fill_rect(&written, pack(Format::Rgb24, [0xff, 0xff, 0, 0]));
        surface.unmap_image(image).unwrap();

        platform.fail_next_block_copies(1);
        let err = surface.flush(FlushFlags::empty()).unwrap_err();
        assert!(matches!(err, SurfaceError::DeviceError { .. }));
        assert_eq!(surface.fallback_state(), FallbackState::Dirty);
        assert_eq!(platform.pixel(win, 1, 1), Some(0xff00_0000));

        surface.flush(FlushFlags::empty()).unwrap();
        assert_eq!(platform.pixel(win, 1, 1), Some(0xffff_0000));
        assert_eq!(platform.pixel(win, 2, 2), Some(0xffff_0000));
        assert_eq!(platform.pixel(win, 0, 0), Some(0xff00_0000));
    }

    #[test]
    fn full_overwrite_discards_fallback() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(6, 4, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        let image = surface.map_to_image(None).unwrap();
        image.fill_rect(&RectInt::from_size(6, 4), pack(Format::Rgb24, [0xff, 0, 0xff, 0]));
        surface.unmap_image(image).unwrap();

        platform.reset_block_copies();
        surface.flush(FlushFlags::empty()).unwrap();
        assert_eq!(platform.stats().block_copies.len(), 1);
        assert_eq!(surface.fallback_state(), FallbackState::None);
        assert_eq!(platform.pixel(win, 5, 3), Some(0xff00_ff00));
        assert_eq!(platform.live_buffers(), 0);

        // the next map seeds a new fallback
        platform.reset_block_copies();
        let image = surface.map_to_image(None).unwrap();
        let copies = platform.stats().block_copies;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].src, win);
        surface.unmap_image(image).unwrap();
    }

    #[test]
    fn full_overwrite_keeps_fallback_when_configured() {
        let (platform, ctx) = setup();
        let ctx = ctx.with_config(SurfaceConfig {
            discard_on_full_damage: false,
            ..SurfaceConfig::default()
        });
        let win = platform.create_window_dc(2, 2, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        let image = surface.map_to_image(None).unwrap();
        surface.unmap_image(image).unwrap();
        surface.flush(FlushFlags::empty()).unwrap();
        assert_eq!(surface.fallback_state(), FallbackState::Active);
    }

    #[test]
    fn mark_dirty_discards_stale_fallback() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(8, 8, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        let image = surface.map_to_image(None).unwrap();
        image.fill_rect(&RectInt::new(0, 0, 2, 2), pack(Format::Rgb24, [0xff, 0xff, 0xff, 0xff]));
        surface.unmap_image(image).unwrap();
        assert_eq!(surface.fallback_state(), FallbackState::Dirty);

        // someone else draws on the window
        platform.fill(win, &RectInt::new(4, 4, 1, 1), 0xff12_3456);
        surface.mark_dirty(&RectInt::new(4, 4, 1, 1)).unwrap();
        assert_eq!(surface.fallback_state(), FallbackState::None);

        platform.reset_block_copies();
        let image = surface.map_to_image(None).unwrap();
        assert_eq!(platform.stats().block_copies.len(), 1);
        assert_eq!(image.pixel(4, 4), Some(pack(Format::Rgb24, [0xff, 0x12, 0x34, 0x56])));
        // buffered writes were dropped
        assert_eq!(image.pixel(0, 0), Some(0));
        surface.unmap_image(image).unwrap();
    }

    #[test]
    fn flush_is_idempotent() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(8, 8, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        let written = RectInt::new(2, 2, 1, 1);
        let image = surface.map_to_image(Some(&written)).unwrap();
        image.fill_rect(&written, 0x00ff_ffff);
        surface.unmap_image(image).unwrap();

        surface.flush(FlushFlags::empty()).unwrap();
        platform.reset_block_copies();
        surface.flush(FlushFlags::empty()).unwrap();
        assert!(platform.stats().block_copies.is_empty());
        assert_eq!(surface.fallback_state(), FallbackState::None);

        surface.flush(FlushFlags::empty()).unwrap();
        assert!(platform.stats().block_copies.is_empty());
    }

    #[test]
    fn deferred_flush_does_nothing() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(4, 4, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        let image = surface.map_to_image(None).unwrap();
        surface.unmap_image(image).unwrap();
        platform.reset_block_copies();

        surface.flush(FlushFlags::DEFERRED).unwrap();
        assert!(platform.stats().block_copies.is_empty());
        assert_eq!(surface.fallback_state(), FallbackState::Dirty);
    }

    #[test]
    fn repeated_map_before_unmap_shares_pixels() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(4, 4, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        let first = surface.map_to_image(None).unwrap();
        let second = surface.map_to_image(None).unwrap();
        assert!(first.shares_storage_with(&second));
        assert_eq!(platform.live_buffers(), 1);
    }

    #[test]
    fn fallback_failure_is_a_device_error() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(4, 4, 32, XRGB);
        let mut surface = DcSurface::create(ctx, win).unwrap();

        platform.set_allocation_policy(|_| false);
        let err = surface.map_to_image(None).unwrap_err();
        assert!(matches!(err, SurfaceError::DeviceError { ref context } if context == "map_to_image"));
        assert_eq!(surface.fallback_state(), FallbackState::None);

        platform.clear_allocation_policy();
        assert!(surface.map_to_image(None).is_ok());
    }

    #[test]
    fn similar_prefers_rgb24() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(5, 5, 16, RGB565);
        let surface = DcSurface::create(ctx, win).unwrap();

        let similar = surface.create_similar(Content::COLOR, 5, 5).unwrap();
        let similar = similar.as_any().downcast_ref::<DcSurface>().unwrap();
        assert_eq!(similar.format(), Format::Rgb24);
        assert_eq!(similar.extents(), Some(RectInt::from_size(5, 5)));
    }

    #[test]
    fn similar_falls_back_to_source_format() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(5, 5, 16, RGB565);
        let surface = DcSurface::create(ctx, win).unwrap();

        platform.set_allocation_policy(|req| !(req.depth == 32 && req.masks.a == 0));
        let similar = surface.create_similar(Content::COLOR, 5, 5).unwrap();
        let similar = similar.as_any().downcast_ref::<DcSurface>().unwrap();
        assert_eq!(similar.format(), Format::Rgb16_565);
        assert!(similar.owns_storage());

        // alpha content mirrors the source right away
        let before = platform.stats().failed_allocations;
        let similar = surface.create_similar(Content::COLOR_ALPHA, 2, 2).unwrap();
        assert_eq!(similar.content(), Content::COLOR);
        assert_eq!(platform.stats().failed_allocations, before);
    }

    #[test]
    fn similar_fails_when_both_paths_fail() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(5, 5, 16, RGB565);
        let surface = DcSurface::create(ctx, win).unwrap();

        platform.set_allocation_policy(|_| false);
        let Err(err) = surface.create_similar(Content::COLOR, 5, 5) else {
            panic!("similar surface without any buffer");
        };
        assert!(matches!(err, SurfaceError::AllocationFailed));
    }

    #[test]
    fn similar_image_is_zeroed() {
        let (platform, ctx) = setup();
        let surface = DcSurface::create_buffer(ctx, Format::Argb32, 4, 4).unwrap();

        let image = surface.create_similar_image(Format::A8, 3, 3).unwrap();
        assert!(image.is_clear());
        assert_eq!(image.format(), Format::A8);
        for y in 0..3 {
            for x in 0..3 {
                assert_eq!(image.pixel(x, y), Some(0));
            }
        }
        assert_eq!(platform.live_buffers(), 2);
        drop(image);
        assert_eq!(platform.live_buffers(), 1);
    }

    #[test]
    fn finish_releases_only_owned_buffers() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(4, 4, 32, XRGB);
        let mut borrowed = DcSurface::create(ctx.clone(), win).unwrap();
        let image = borrowed.map_to_image(None).unwrap();
        borrowed.unmap_image(image).unwrap();
        assert_eq!(platform.live_buffers(), 1);

        borrowed.finish().unwrap();
        assert!(platform.contains(win));
        assert_eq!(platform.live_buffers(), 0);
        assert!(matches!(borrowed.map_to_image(None), Err(SurfaceError::Finished)));

        let mut owned = DcSurface::create_buffer(ctx, Format::Rgb24, 4, 4).unwrap();
        let dc = owned.device_handle();
        owned.finish().unwrap();
        owned.finish().unwrap();
        assert!(!platform.contains(dc));
        assert_eq!(platform.stats().releases, 2);
    }

    #[test]
    fn create_similar_buffer_mirrors_reference() {
        let (platform, ctx) = setup();
        let win = platform.create_window_dc(4, 4, 16, RGB565);
        let surface = DcSurface::create_similar_buffer(ctx.clone(), win, 3, 3).unwrap();
        assert_eq!(surface.format(), Format::Rgb16_565);
        assert!(surface.image().is_some());

        let err = DcSurface::create_similar_buffer(ctx, DeviceHandle::INVALID, 3, 3).unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidArgument(_)));
    }

    #[test]
    fn reject_policy_refuses_empty_buffers() {
        let (platform, ctx) = setup();
        let ctx = ctx.with_config(SurfaceConfig {
            dimension_policy: DimensionPolicy::Reject,
            ..SurfaceConfig::default()
        });
        let err = DcSurface::create_buffer(ctx, Format::Argb32, 0, 4).unwrap_err();
        assert!(matches!(err, SurfaceError::InvalidArgument(_)));
        assert_eq!(platform.stats().allocations, 0);
    }

    #[test]
    fn accessors_reach_device_and_adapter() {
        let (platform, ctx) = setup();
        let surface = DcSurface::create_buffer(ctx.clone(), Format::Argb32, 2, 2).unwrap();
        assert_eq!(get_device_handle(&surface).unwrap(), surface.device_handle());
        assert_eq!(get_image_adapter(&surface).unwrap().unwrap().parent(), Some(surface.id()));

        let win = platform.create_window_dc(2, 2, 32, XRGB);
        let surface = DcSurface::create(ctx, win).unwrap();
        assert_eq!(get_device_handle(&surface).unwrap(), win);
        assert!(get_image_adapter(&surface).unwrap().is_none());
    }
}
