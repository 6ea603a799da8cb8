use crate::errors::SurfaceError;
use crate::format::{Content, Format};
use crate::geometry::RectInt;
use crate::render::pipeline::{Antialias, Clip, FillRule, Glyph, Matrix, Operator, Path, Pattern, RenderPipeline, ScaledFont, StrokeStyle};
use crate::surface::image::ImageSurface;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Display;
use std::ops::Deref;
use uuid::Uuid;

/// A unique identifier for a surface, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(Uuid);

impl SurfaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SurfaceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend a surface belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Device-context surface
    Dc,
    /// Direct-rendering (GPU buffer) surface
    Direct,
}

bitflags! {
    pub struct FlushFlags: u32 {
        /// Only flush what the backend can flush without blocking; the write-back is deferred
        const DEFERRED = 0x1;
    }
}

/// Operation table every surface backend implements. The rendering pipeline only ever sees this trait.
///
/// Calls occur on the thread owning the surface.
pub trait SurfaceBackend: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn id(&self) -> SurfaceId;
    fn kind(&self) -> SurfaceKind;
    fn content(&self) -> Content;
    fn is_finished(&self) -> bool;

    /// Releases every resource owned by the surface. Further drawing fails with `SurfaceError::Finished`.
    fn finish(&mut self) -> Result<(), SurfaceError>;

    /// Creates a surface suited for use as a source or intermediate with this one.
    fn create_similar(&self, content: Content, width: i32, height: i32) -> Result<Box<dyn SurfaceBackend>, SurfaceError>;

    /// Creates a zero-filled image compatible with this surface.
    fn create_similar_image(&self, format: Format, width: i32, height: i32) -> Result<SimilarImage, SurfaceError>;

    /// Gives the rasterizer direct pixel access to `extents` (everything when `None`).
    fn map_to_image(&mut self, extents: Option<&RectInt>) -> Result<ImageSurface, SurfaceError>;

    /// Ends pixel access started by [`SurfaceBackend::map_to_image`].
    fn unmap_image(&mut self, image: ImageSurface) -> Result<(), SurfaceError>;

    /// Addressable area, `None` for unbounded surfaces.
    fn extents(&self) -> Option<RectInt>;

    fn flush(&mut self, flags: FlushFlags) -> Result<(), SurfaceError>;

    /// Tells the surface that `rect` was modified behind its back.
    fn mark_dirty(&mut self, rect: &RectInt) -> Result<(), SurfaceError>;

    fn paint(&mut self, pipeline: &dyn RenderPipeline, op: Operator, source: &Pattern, clip: Option<&Clip>) -> Result<(), SurfaceError>;

    fn mask(
        &mut self,
        pipeline: &dyn RenderPipeline,
        op: Operator,
        source: &Pattern,
        mask: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), SurfaceError>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), SurfaceError>;

    fn show_glyphs(
        &mut self,
        pipeline: &dyn RenderPipeline,
        op: Operator,
        source: &Pattern,
        glyphs: &[Glyph],
        font: &ScaledFont,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError>;
}

/// Image returned by [`SurfaceBackend::create_similar_image`].
///
/// The pixels belong to a hidden surface kept alive alongside the image, so dropping the image
/// tears the whole thing down the same way as any other surface.
pub struct SimilarImage {
    image: ImageSurface,
    owner: Box<dyn SurfaceBackend>,
}

impl SimilarImage {
    pub fn new(image: ImageSurface, owner: Box<dyn SurfaceBackend>) -> Self {
        Self { image, owner }
    }

    pub fn image(&self) -> &ImageSurface {
        &self.image
    }

    /// The surface owning the pixels.
    pub fn owner(&self) -> &dyn SurfaceBackend {
        self.owner.as_ref()
    }
}

impl Deref for SimilarImage {
    type Target = ImageSurface;

    fn deref(&self) -> &ImageSurface {
        &self.image
    }
}

impl std::fmt::Debug for SimilarImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarImage")
            .field("owner", &self.owner.id())
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}
