use crate::errors::SurfaceError;
use crate::geometry::RectInt;
use crate::render::pipeline::{
    Antialias, Clip, Color, FillRule, Glyph, Matrix, Operator, Path, Pattern, RenderPipeline, ScaledFont, StrokeStyle,
};
use crate::surface::image::{pack, unpack, ImageSurface};
use crate::surface::SurfaceBackend;

/// CPU pipeline compositing solid colors into the mapped pixels of a surface.
///
/// It handles `paint`, `mask` with a solid mask, and `fill` of axis-aligned integer
/// rectangles. Everything else reports [`SurfaceError::Unsupported`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwarePipeline;

impl SoftwarePipeline {
    pub fn new() -> Self {
        Self
    }

    fn solid(source: &Pattern) -> Color {
        match source {
            Pattern::Solid(color) => *color,
        }
    }

    /// Composites `color` into `area` of the target, restricted to the clip.
    fn composite_area(
        target: &mut dyn SurfaceBackend,
        area: RectInt,
        op: Operator,
        color: Color,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let area = match target.extents() {
            Some(extents) => match area.intersect(&extents) {
                Some(area) => area,
                None => return Ok(()),
            },
            None => area,
        };

        let parts = match clip {
            Some(clip) => clip.clip_rect(&area),
            None => vec![area],
        };

        for part in parts.into_iter().filter(|r| !r.is_empty()) {
            let image = target.map_to_image(Some(&part))?;
            composite(&image, &part, op, color);
            target.unmap_image(image)?;
        }
        Ok(())
    }
}

fn composite(image: &ImageSurface, area: &RectInt, op: Operator, color: Color) {
    let format = image.format();
    match op {
        Operator::Clear => image.fill_rect(area, 0),
        Operator::Source => image.fill_rect(area, pack(format, color.to_premultiplied_argb())),
        Operator::Over if color.is_opaque() => image.fill_rect(area, pack(format, color.to_premultiplied_argb())),
        Operator::Over => {
            let src = color.to_premultiplied_argb();
            let inv = 255 - src[0] as u32;
            for y in area.y..area.bottom() {
                for x in area.x..area.right() {
                    let Some(raw) = image.pixel(x, y) else {
                        continue;
                    };
                    let dst = unpack(format, raw);
                    let mut out = [0u8; 4];
                    for c in 0..4 {
                        out[c] = (src[c] as u32 + (dst[c] as u32 * inv + 127) / 255).min(255) as u8;
                    }
                    image.set_pixel(x, y, pack(format, out));
                }
            }
        }
    }
}

impl RenderPipeline for SoftwarePipeline {
    fn paint(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let area = target.extents().ok_or(SurfaceError::Unsupported)?;
        Self::composite_area(target, area, op, Self::solid(source), clip)
    }

    fn mask(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        mask: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let mut color = Self::solid(source);
        color.a *= Self::solid(mask).a;
        self.paint(target, op, &Pattern::Solid(color), clip)
    }

    fn stroke(
        &self,
        _target: &mut dyn SurfaceBackend,
        _op: Operator,
        _source: &Pattern,
        _path: &Path,
        _style: &StrokeStyle,
        _ctm: &Matrix,
        _ctm_inverse: &Matrix,
        _tolerance: f64,
        _antialias: Antialias,
        _clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        Err(SurfaceError::Unsupported)
    }

    fn fill(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        path: &Path,
        _fill_rule: FillRule,
        _tolerance: f64,
        _antialias: Antialias,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let rect = path.as_rect().ok_or(SurfaceError::Unsupported)?;
        if rect.is_empty() {
            return Ok(());
        }
        Self::composite_area(target, rect, op, Self::solid(source), clip)
    }

    fn show_glyphs(
        &self,
        _target: &mut dyn SurfaceBackend,
        _op: Operator,
        _source: &Pattern,
        _glyphs: &[Glyph],
        _font: &ScaledFont,
        _clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        Err(SurfaceError::Unsupported)
    }
}
