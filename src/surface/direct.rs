//! Direct-rendering handoff.
//!
//! A device context living in GPU memory can be rendered by a direct-rendering backend
//! instead of going through the device-context API. [`DcBackend`] is the entry point deciding
//! which surface a context gets: it asks the platform for the buffer behind the context and
//! hands it to a [`DirectSurfaceFactory`]. Whenever that is not possible the context is wrapped
//! as a plain [`DcSurface`].

use crate::device::Device;
use crate::errors::SurfaceError;
use crate::format::{Content, Format};
use crate::geometry::RectInt;
use crate::platform::{DeviceHandle, DirectSurfaceInfo};
use crate::render::pipeline::{
    Antialias, Clip, FillRule, Glyph, Matrix, Operator, Path, Pattern, RenderPipeline, ScaledFont, StrokeStyle,
};
use crate::surface::backend::{FlushFlags, SimilarImage, SurfaceBackend, SurfaceId, SurfaceKind};
use crate::surface::dc::{DcSurface, DeviceBuffer, SurfaceContext};
use crate::surface::image::ImageSurface;
use crate::surface::provision;
use std::any::Any;
use std::sync::Arc;

/// Builds direct-rendering surfaces on top of GPU buffers.
pub trait DirectSurfaceFactory: Send + Sync {
    fn create_surface(
        &self,
        device: &Device,
        info: &DirectSurfaceInfo,
        format: Format,
    ) -> anyhow::Result<Box<dyn SurfaceBackend>>;
}

/// Direct-rendering surface created for a device context. Remembers the context and releases
/// it on finish when it was allocated for the surface.
pub struct DirectSurface {
    inner: Box<dyn SurfaceBackend>,
    buffer: DeviceBuffer,
    ctx: SurfaceContext,
    finished: bool,
}

impl DirectSurface {
    pub fn device_handle(&self) -> DeviceHandle {
        self.buffer.handle()
    }

    pub fn owns_storage(&self) -> bool {
        self.buffer.is_owned()
    }

    /// The surface built by the factory.
    pub fn inner(&self) -> &dyn SurfaceBackend {
        self.inner.as_ref()
    }
}

impl SurfaceBackend for DirectSurface {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn id(&self) -> SurfaceId {
        self.inner.id()
    }

    fn kind(&self) -> SurfaceKind {
        SurfaceKind::Direct
    }

    fn content(&self) -> Content {
        self.inner.content()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) -> Result<(), SurfaceError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        if let Err(e) = self.inner.finish() {
            log::warn!("DirectSurface[{}]: finish failed: {}", self.inner.id(), e);
        }
        if let DeviceBuffer::Owned(dc) = self.buffer {
            self.ctx.platform.release_buffer(dc);
        }
        Ok(())
    }

    fn create_similar(&self, content: Content, width: i32, height: i32) -> Result<Box<dyn SurfaceBackend>, SurfaceError> {
        self.inner.create_similar(content, width, height)
    }

    fn create_similar_image(&self, format: Format, width: i32, height: i32) -> Result<SimilarImage, SurfaceError> {
        self.inner.create_similar_image(format, width, height)
    }

    fn map_to_image(&mut self, extents: Option<&RectInt>) -> Result<ImageSurface, SurfaceError> {
        self.inner.map_to_image(extents)
    }

    fn unmap_image(&mut self, image: ImageSurface) -> Result<(), SurfaceError> {
        self.inner.unmap_image(image)
    }

    fn extents(&self) -> Option<RectInt> {
        self.inner.extents()
    }

    fn flush(&mut self, flags: FlushFlags) -> Result<(), SurfaceError> {
        self.inner.flush(flags)
    }

    fn mark_dirty(&mut self, rect: &RectInt) -> Result<(), SurfaceError> {
        self.inner.mark_dirty(rect)
    }

    fn paint(&mut self, pipeline: &dyn RenderPipeline, op: Operator, source: &Pattern, clip: Option<&Clip>) -> Result<(), SurfaceError> {
        self.inner.paint(pipeline, op, source, clip)
    }

    fn mask(
        &mut self,
        pipeline: &dyn RenderPipeline,
        op: Operator,
        source: &Pattern,
        mask: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        self.inner.mask(pipeline, op, source, mask, clip)
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
        self.inner
            .stroke(pipeline, op, source, path, style, ctm, ctm_inverse, tolerance, antialias, clip)
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
        self.inner
            .fill(pipeline, op, source, path, fill_rule, tolerance, antialias, clip)
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
        self.inner.show_glyphs(pipeline, op, source, glyphs, font, clip)
    }
}

impl Drop for DirectSurface {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Device context remembered by a direct-rendering surface.
pub fn direct_dc(surface: &dyn SurfaceBackend) -> Result<DeviceHandle, SurfaceError> {
    surface
        .as_any()
        .downcast_ref::<DirectSurface>()
        .map(|s| s.device_handle())
        .ok_or(SurfaceError::SurfaceTypeMismatch)
}

/// Creates surfaces for device contexts, preferring direct rendering when it is available.
pub struct DcBackend {
    ctx: SurfaceContext,
    factory: Option<Arc<dyn DirectSurfaceFactory>>,
}

impl DcBackend {
    pub fn new(ctx: SurfaceContext) -> Self {
        Self { ctx, factory: None }
    }

    pub fn with_direct_factory(mut self, factory: Arc<dyn DirectSurfaceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn context(&self) -> &SurfaceContext {
        &self.ctx
    }

    /// Surface for a caller-supplied context. The context is never released.
    pub fn create_surface(&self, dc: DeviceHandle) -> Result<Box<dyn SurfaceBackend>, SurfaceError> {
        if !dc.is_valid() {
            return Err(SurfaceError::InvalidArgument("invalid device handle"));
        }
        if let Some(surface) = self.try_direct(DeviceBuffer::Borrowed(dc)) {
            return Ok(surface);
        }
        Ok(Box::new(DcSurface::create(self.ctx.clone(), dc)?))
    }

    /// Surface for a new off-screen buffer. The buffer belongs to whichever surface is returned.
    pub fn create_surface_with_buffer(
        &self,
        format: Format,
        width: i32,
        height: i32,
    ) -> Result<Box<dyn SurfaceBackend>, SurfaceError> {
        let (dc, _, _) = provision::create_buffer(self.ctx.platform.as_ref(), &self.ctx.config, format, width, height)?;
        let buffer = DeviceBuffer::Owned(dc);
        if let Some(surface) = self.try_direct(buffer) {
            return Ok(surface);
        }
        Ok(Box::new(DcSurface::from_buffer(self.ctx.clone(), buffer)?))
    }

    /// Direct-rendering surface for a context, failing when direct rendering is unavailable.
    ///
    /// On failure the buffer is left to the caller.
    pub fn create_direct(&self, buffer: DeviceBuffer) -> Result<Box<dyn SurfaceBackend>, SurfaceError> {
        let dc = buffer.handle();
        let (Some(device), Some(factory)) = (self.ctx.device.as_ref(), self.factory.as_ref()) else {
            return Err(SurfaceError::Unsupported);
        };
        let info = self.ctx.platform.direct_surface_info(dc).ok_or(SurfaceError::Unsupported)?;
        let format = provision::format_from_dc(self.ctx.platform.as_ref(), dc);

        let inner = factory
            .create_surface(device, &info, format)
            .map_err(|e| SurfaceError::device(&format!("create_direct({:#})", e)))?;

        log::debug!("DcBackend: {:?} handed to device {} as direct surface {}", dc, device.id, inner.id());
        Ok(Box::new(DirectSurface {
            inner,
            buffer,
            ctx: self.ctx.clone(),
            finished: false,
        }))
    }

    fn try_direct(&self, buffer: DeviceBuffer) -> Option<Box<dyn SurfaceBackend>> {
        match self.create_direct(buffer) {
            Ok(surface) => Some(surface),
            Err(SurfaceError::Unsupported) => None,
            Err(e) => {
                log::warn!("DcBackend: falling back to a device-context surface: {}", e);
                None
            }
        }
    }
}
