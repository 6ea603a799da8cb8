//! Rendering pipeline collaborator.
//!
//! Surfaces do not rasterize anything themselves: their drawing operations hand the call,
//! together with the surface as render target, to a [`RenderPipeline`]. The pipeline reaches
//! the target's pixels through the map/unmap protocol of
//! [`SurfaceBackend`](crate::surface::SurfaceBackend).

use crate::errors::SurfaceError;
use crate::geometry::RectInt;
use crate::surface::SurfaceBackend;

pub use crate::render::color::Color;

/// Compositing operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    /// Clears the destination
    Clear,
    /// Replaces the destination
    Source,
    /// Source over destination
    #[default]
    Over,
}

/// Source of color for a drawing operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Solid(Color),
}

impl Pattern {
    pub fn solid(color: Color) -> Self {
        Pattern::Solid(color)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSegment {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Close,
}

/// A path in user space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    segments: Vec<PathSegment>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    /// A closed axis-aligned rectangle.
    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        let mut path = Self::new();
        path.move_to(x, y);
        path.line_to(x + width, y);
        path.line_to(x + width, y + height);
        path.line_to(x, y + height);
        path.close();
        path
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.segments.push(PathSegment::MoveTo(x, y));
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        self.segments.push(PathSegment::LineTo(x, y));
    }

    pub fn curve_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) {
        self.segments.push(PathSegment::CurveTo(x1, y1, x2, y2, x3, y3));
    }

    pub fn close(&mut self) {
        self.segments.push(PathSegment::Close);
    }

    /// Appends the segments of `other`.
    pub fn append(&mut self, other: &Path) {
        self.segments.extend_from_slice(&other.segments);
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Pixel-aligned box around every point of the path, control points included.
    pub fn bounds(&self) -> Option<RectInt> {
        let mut points = self.segments.iter().flat_map(|seg| match *seg {
            PathSegment::MoveTo(x, y) | PathSegment::LineTo(x, y) => vec![(x, y)],
            PathSegment::CurveTo(x1, y1, x2, y2, x3, y3) => vec![(x1, y1), (x2, y2), (x3, y3)],
            PathSegment::Close => vec![],
        });

        let (x, y) = points.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
        for (x, y) in points {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let (x0, y0) = (min_x.floor() as i32, min_y.floor() as i32);
        let (x1, y1) = (max_x.ceil() as i32, max_y.ceil() as i32);
        Some(RectInt::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Returns the rectangle this path describes when it is a single axis-aligned rectangle
    /// with integer corners.
    pub fn as_rect(&self) -> Option<RectInt> {
        let mut points = Vec::with_capacity(4);
        for (i, seg) in self.segments.iter().enumerate() {
            match (i, seg) {
                (0, PathSegment::MoveTo(x, y)) => points.push((*x, *y)),
                (1..=3, PathSegment::LineTo(x, y)) => points.push((*x, *y)),
                (4, PathSegment::LineTo(x, y)) if (*x, *y) == points[0] => {}
                (4 | 5, PathSegment::Close) => {}
                _ => return None,
            }
        }
        if points.len() != 4 {
            return None;
        }

        let xs = [points[0].0, points[1].0, points[2].0, points[3].0];
        let ys = [points[0].1, points[1].1, points[2].1, points[3].1];
        if xs.iter().chain(ys.iter()).any(|v| v.fract() != 0.0) {
            return None;
        }

        // Every edge must be horizontal or vertical.
        for i in 0..4 {
            let (a, b) = (points[i], points[(i + 1) % 4]);
            if a.0 != b.0 && a.1 != b.1 {
                return None;
            }
        }

        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some(RectInt::new(
            min_x as i32,
            min_y as i32,
            (max_x - min_x) as i32,
            (max_y - min_y) as i32,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    Winding,
    EvenOdd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Antialias {
    #[default]
    Default,
    None,
    Gray,
    Subpixel,
}

/// Affine transformation matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub xx: f64,
    pub yx: f64,
    pub xy: f64,
    pub yy: f64,
    pub x0: f64,
    pub y0: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const fn identity() -> Self {
        Self {
            xx: 1.0,
            yx: 0.0,
            xy: 0.0,
            yy: 1.0,
            x0: 0.0,
            y0: 0.0,
        }
    }

    pub const fn translate(tx: f64, ty: f64) -> Self {
        Self {
            x0: tx,
            y0: ty,
            ..Self::identity()
        }
    }

    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        (self.xx * x + self.xy * y + self.x0, self.yx * x + self.yy * y + self.y0)
    }

    /// Inverse matrix, `None` when the matrix is singular.
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.xx * self.yy - self.xy * self.yx;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let xx = self.yy / det;
        let xy = -self.xy / det;
        let yx = -self.yx / det;
        let yy = self.xx / det;
        Some(Matrix {
            xx,
            yx,
            xy,
            yy,
            x0: -(xx * self.x0 + xy * self.y0),
            y0: -(yx * self.x0 + yy * self.y0),
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrokeStyle {
    pub line_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    pub dash: Vec<f64>,
    pub dash_offset: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            line_width: 2.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            dash: Vec::new(),
            dash_offset: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub index: u64,
    pub x: f64,
    pub y: f64,
}

/// Font selected at a given size.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledFont {
    pub family: String,
    pub size: f64,
}

impl ScaledFont {
    pub fn new(family: &str, size: f64) -> Self {
        Self {
            family: family.to_string(),
            size,
        }
    }
}

/// Clip region as a union of device-space rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clip {
    rects: Vec<RectInt>,
}

impl Clip {
    pub fn from_rects(rects: impl IntoIterator<Item = RectInt>) -> Self {
        Self {
            rects: rects.into_iter().filter(|r| !r.is_empty()).collect(),
        }
    }

    pub fn rect(rect: RectInt) -> Self {
        Self::from_rects([rect])
    }

    pub fn rects(&self) -> &[RectInt] {
        &self.rects
    }

    /// Smallest rectangle containing the clip, `None` when everything is clipped.
    pub fn bounds(&self) -> Option<RectInt> {
        self.rects.iter().copied().reduce(|a, b| a.union(&b))
    }

    /// True when nothing can be drawn through this clip.
    pub fn is_all_clipped(&self) -> bool {
        self.rects.is_empty()
    }

    /// Parts of `area` visible through the clip.
    pub fn clip_rect(&self, area: &RectInt) -> Vec<RectInt> {
        self.rects.iter().filter_map(|r| r.intersect(area)).collect()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }
}

/// The generic rendering pipeline. Calls occur on the thread owning the target surface.
pub trait RenderPipeline {
    fn paint(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError>;

    fn mask(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        mask: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError>;

    #[allow(clippy::too_many_arguments)]
    fn stroke(
        &self,
        target: &mut dyn SurfaceBackend,
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
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        path: &Path,
        fill_rule: FillRule,
        tolerance: f64,
        antialias: Antialias,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError>;

    fn show_glyphs(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        glyphs: &[Glyph],
        font: &ScaledFont,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_curves_and_clip_rects() {
        let mut path = Path::new();
        path.move_to(1.5, 2.0);
        path.curve_to(0.2, 6.0, 4.0, 7.4, 3.0, 3.0);
        path.close();
        assert_eq!(path.bounds(), Some(RectInt::new(0, 2, 4, 6)));
        assert_eq!(Path::new().bounds(), None);

        let clip = Clip::from_rects([RectInt::new(0, 0, 2, 2), RectInt::new(5, 1, 1, 4)]);
        assert_eq!(clip.bounds(), Some(RectInt::new(0, 0, 6, 5)));
        assert_eq!(Clip::default().bounds(), None);
    }

    #[test]
    fn rectangle_path_is_recognized() {
        assert_eq!(Path::rectangle(1.0, 2.0, 3.0, 4.0).as_rect(), Some(RectInt::new(1, 2, 3, 4)));

        let mut open = Path::new();
        open.move_to(0.0, 0.0);
        open.line_to(4.0, 0.0);
        open.line_to(4.0, 4.0);
        open.line_to(0.0, 4.0);
        assert_eq!(open.as_rect(), Some(RectInt::new(0, 0, 4, 4)));
    }

    #[test]
    fn other_paths_are_not_rects() {
        assert_eq!(Path::rectangle(0.5, 0.0, 2.0, 2.0).as_rect(), None);

        let mut tri = Path::new();
        tri.move_to(0.0, 0.0);
        tri.line_to(4.0, 0.0);
        tri.line_to(0.0, 4.0);
        tri.close();
        assert_eq!(tri.as_rect(), None);

        let mut diamond = Path::new();
        diamond.move_to(2.0, 0.0);
        diamond.line_to(4.0, 2.0);
        diamond.line_to(2.0, 4.0);
        diamond.line_to(0.0, 2.0);
        diamond.close();
        assert_eq!(diamond.as_rect(), None);
        assert_eq!(Path::new().as_rect(), None);
    }

    #[test]
    fn matrix_inverse() {
        let m = Matrix::translate(3.0, -2.0);
        let inv = m.invert().unwrap();
        assert_eq!(inv.transform_point(3.0, -2.0), (0.0, 0.0));

        let singular = Matrix {
            xx: 0.0,
            yy: 0.0,
            ..Matrix::identity()
        };
        assert!(singular.invert().is_none());
    }

    #[test]
    fn clip_intersection() {
        let clip = Clip::from_rects([RectInt::new(0, 0, 2, 2), RectInt::new(0, 0, 0, 5)]);
        assert_eq!(clip.rects().len(), 1);
        assert_eq!(clip.clip_rect(&RectInt::new(1, 1, 5, 5)), vec![RectInt::new(1, 1, 1, 1)]);
        assert!(Clip::default().is_all_clipped());
    }
}
