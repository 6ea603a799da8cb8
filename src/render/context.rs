//! Default drawing context.
//!
//! A [`Context`] binds a target surface to a rendering pipeline and keeps the drawing state
//! (operator, source, current path, clip, stroke and font settings) between calls.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use gosub_surface::format::Format;
//! use gosub_surface::platform::memory::MemoryPlatform;
//! use gosub_surface::render::{Color, Context, SoftwarePipeline};
//! use gosub_surface::surface::{DcSurface, SurfaceContext};
//!
//! let platform = Arc::new(MemoryPlatform::new());
//! let mut surface = DcSurface::create_buffer(SurfaceContext::new(platform.clone()), Format::Argb32, 8, 8).unwrap();
//!
//! let mut cr = Context::new(&mut surface, &SoftwarePipeline);
//! cr.set_source_color(Color::from_u8(0, 0, 255, 255));
//! cr.rectangle(2.0, 2.0, 4.0, 4.0);
//! cr.fill().unwrap();
//! cr.flush().unwrap();
//! ```

use crate::errors::SurfaceError;
use crate::geometry::RectInt;
use crate::render::pipeline::{
    Antialias, Clip, Color, FillRule, Glyph, Matrix, Operator, Path, Pattern, RenderPipeline, ScaledFont, StrokeStyle,
};
use crate::surface::{FlushFlags, SurfaceBackend};

const DEFAULT_TOLERANCE: f64 = 0.1;

pub struct Context<'a> {
    target: &'a mut dyn SurfaceBackend,
    pipeline: &'a dyn RenderPipeline,
    operator: Operator,
    source: Pattern,
    path: Path,
    clip: Option<Clip>,
    fill_rule: FillRule,
    antialias: Antialias,
    tolerance: f64,
    stroke_style: StrokeStyle,
    matrix: Matrix,
    font: ScaledFont,
}

impl<'a> Context<'a> {
    /// Creates a drawing context for `target` with opaque black as source and `Over` as operator.
    pub fn new(target: &'a mut dyn SurfaceBackend, pipeline: &'a dyn RenderPipeline) -> Self {
        Self {
            target,
            pipeline,
            operator: Operator::Over,
            source: Pattern::Solid(Color::BLACK),
            path: Path::new(),
            clip: None,
            fill_rule: FillRule::Winding,
            antialias: Antialias::Default,
            tolerance: DEFAULT_TOLERANCE,
            stroke_style: StrokeStyle::default(),
            matrix: Matrix::identity(),
            font: ScaledFont::new("Sans", 10.0),
        }
    }

    pub fn set_operator(&mut self, op: Operator) {
        self.operator = op;
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn set_source(&mut self, source: Pattern) {
        self.source = source;
    }

    pub fn set_source_color(&mut self, color: Color) {
        self.source = Pattern::Solid(color);
    }

    pub fn source(&self) -> &Pattern {
        &self.source
    }

    pub fn set_fill_rule(&mut self, rule: FillRule) {
        self.fill_rule = rule;
    }

    pub fn set_antialias(&mut self, antialias: Antialias) {
        self.antialias = antialias;
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance;
    }

    pub fn set_line_width(&mut self, width: f64) {
        self.stroke_style.line_width = width;
    }

    pub fn set_stroke_style(&mut self, style: StrokeStyle) {
        self.stroke_style = style;
    }

    pub fn set_matrix(&mut self, matrix: Matrix) {
        self.matrix = matrix;
    }

    pub fn set_font(&mut self, font: ScaledFont) {
        self.font = font;
    }

    pub fn new_path(&mut self) {
        self.path.clear();
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        let (x, y) = self.matrix.transform_point(x, y);
        self.path.move_to(x, y);
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        let (x, y) = self.matrix.transform_point(x, y);
        self.path.line_to(x, y);
    }

    pub fn curve_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) {
        let (x1, y1) = self.matrix.transform_point(x1, y1);
        let (x2, y2) = self.matrix.transform_point(x2, y2);
        let (x3, y3) = self.matrix.transform_point(x3, y3);
        self.path.curve_to(x1, y1, x2, y2, x3, y3);
    }

    pub fn close_path(&mut self) {
        self.path.close();
    }

    pub fn rectangle(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.move_to(x, y);
        self.line_to(x + width, y);
        self.line_to(x + width, y + height);
        self.line_to(x, y + height);
        self.close_path();
    }

    /// Restricts drawing to `rect` (device space), intersected with the current clip.
    pub fn clip_rect(&mut self, rect: RectInt) {
        self.clip = Some(match self.clip.take() {
            Some(clip) => Clip::from_rects(clip.clip_rect(&rect)),
            None => Clip::rect(rect),
        });
    }

    pub fn reset_clip(&mut self) {
        self.clip = None;
    }

    pub fn paint(&mut self) -> Result<(), SurfaceError> {
        self.target
            .paint(self.pipeline, self.operator, &self.source, self.clip.as_ref())
    }

    pub fn mask(&mut self, mask: &Pattern) -> Result<(), SurfaceError> {
        self.target
            .mask(self.pipeline, self.operator, &self.source, mask, self.clip.as_ref())
    }

    /// Fills the current path and clears it.
    pub fn fill(&mut self) -> Result<(), SurfaceError> {
        let result = self.fill_preserve();
        self.path.clear();
        result
    }

    pub fn fill_preserve(&mut self) -> Result<(), SurfaceError> {
        self.target.fill(
            self.pipeline,
            self.operator,
            &self.source,
            &self.path,
            self.fill_rule,
            self.tolerance,
            self.antialias,
            self.clip.as_ref(),
        )
    }

    /// Strokes the current path and clears it.
    pub fn stroke(&mut self) -> Result<(), SurfaceError> {
        let inverse = self.matrix.invert().ok_or(SurfaceError::InvalidArgument("matrix is not invertible"))?;
        let result = self.target.stroke(
            self.pipeline,
            self.operator,
            &self.source,
            &self.path,
            &self.stroke_style,
            &self.matrix,
            &inverse,
            self.tolerance,
            self.antialias,
            self.clip.as_ref(),
        );
        self.path.clear();
        result
    }

    pub fn show_glyphs(&mut self, glyphs: &[Glyph]) -> Result<(), SurfaceError> {
        self.target
            .show_glyphs(self.pipeline, self.operator, &self.source, glyphs, &self.font, self.clip.as_ref())
    }

    /// Writes pending drawing back to the target's device.
    pub fn flush(&mut self) -> Result<(), SurfaceError> {
        self.target.flush(FlushFlags::empty())
    }
}
