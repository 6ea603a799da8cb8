use crate::errors::SurfaceError;
use crate::geometry::RectInt;
use crate::render::pipeline::{
    Antialias, Clip, Color, FillRule, Glyph, LineCap, LineJoin, Matrix, Operator, Path, PathSegment, Pattern,
    RenderPipeline, ScaledFont, StrokeStyle,
};
use crate::surface::image::{pack, unpack, ImageSurface};
use crate::surface::SurfaceBackend;

/// Pipeline rendering with cairo.
///
/// Every operation maps the target, copies the mapped pixels into a scratch cairo image,
/// draws there and copies the result back before unmapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct CairoPipeline;

fn cairo_error(e: impl std::fmt::Display) -> SurfaceError {
    SurfaceError::device(&format!("cairo({})", e))
}

impl CairoPipeline {
    pub fn new() -> Self {
        Self
    }

    /// Runs `draw` on a cairo context whose device space matches the target's.
    ///
    /// Only the part of the target inside the clip and `bounds` is mapped, so only that part
    /// is damaged.
    fn render<F>(
        &self,
        target: &mut dyn SurfaceBackend,
        clip: Option<&Clip>,
        bounds: Option<RectInt>,
        draw: F,
    ) -> Result<(), SurfaceError>
    where
        F: FnOnce(&cairo::Context) -> Result<(), cairo::Error>,
    {
        let mut area = target.extents().ok_or(SurfaceError::Unsupported)?;
        if let Some(clip) = clip {
            let Some(clipped) = clip.bounds().and_then(|b| b.intersect(&area)) else {
                return Ok(());
            };
            area = clipped;
        }
        if let Some(bounds) = bounds {
            let Some(bounded) = bounds.intersect(&area) else {
                return Ok(());
            };
            area = bounded;
        }
        if area.is_empty() {
            return Ok(());
        }

        let image = target.map_to_image(Some(&area))?;
        let result = draw_into(&image, clip, draw);
        target.unmap_image(image)?;
        result
    }
}

fn draw_into<F>(image: &ImageSurface, clip: Option<&Clip>, draw: F) -> Result<(), SurfaceError>
where
    F: FnOnce(&cairo::Context) -> Result<(), cairo::Error>,
{
    let area = image.device_extents();
    let mut scratch = cairo::ImageSurface::create(cairo::Format::ARgb32, area.width, area.height).map_err(cairo_error)?;

    copy_to_scratch(image, &mut scratch)?;

    {
        let cr = cairo::Context::new(&scratch).map_err(cairo_error)?;
        cr.translate(-area.x as f64, -area.y as f64);
        if let Some(clip) = clip {
            for rect in clip.rects() {
                cr.rectangle(rect.x as f64, rect.y as f64, rect.width as f64, rect.height as f64);
            }
            cr.clip();
        }
        draw(&cr).map_err(cairo_error)?;
    }
    scratch.flush();

    copy_from_scratch(&mut scratch, image)
}

fn copy_to_scratch(image: &ImageSurface, scratch: &mut cairo::ImageSurface) -> Result<(), SurfaceError> {
    let area = image.device_extents();
    let stride = scratch.stride() as usize;
    let mut data = scratch.data().map_err(cairo_error)?;
    for y in 0..area.height {
        for x in 0..area.width {
            let raw = image.pixel(area.x + x, area.y + y).unwrap_or(0);
            let at = y as usize * stride + x as usize * 4;
            data[at..at + 4].copy_from_slice(&u32::from_be_bytes(unpack(image.format(), raw)).to_ne_bytes());
        }
    }
    Ok(())
}

fn copy_from_scratch(scratch: &mut cairo::ImageSurface, image: &ImageSurface) -> Result<(), SurfaceError> {
    let area = image.device_extents();
    let stride = scratch.stride() as usize;
    let data = scratch.data().map_err(cairo_error)?;
    for y in 0..area.height {
        for x in 0..area.width {
            let at = y as usize * stride + x as usize * 4;
            let mut px = [0u8; 4];
            px.copy_from_slice(&data[at..at + 4]);
            let argb = u32::from_ne_bytes(px).to_be_bytes();
            image.set_pixel(area.x + x, area.y + y, pack(image.format(), argb));
        }
    }
    Ok(())
}

fn operator(op: Operator) -> cairo::Operator {
    match op {
        Operator::Clear => cairo::Operator::Clear,
        Operator::Source => cairo::Operator::Source,
        Operator::Over => cairo::Operator::Over,
    }
}

fn set_source(cr: &cairo::Context, source: &Pattern) {
    let Pattern::Solid(Color { r, g, b, a }) = source;
    cr.set_source_rgba(*r as f64, *g as f64, *b as f64, *a as f64);
}

fn append_path(cr: &cairo::Context, path: &Path) {
    for seg in path.segments() {
        match *seg {
            PathSegment::MoveTo(x, y) => cr.move_to(x, y),
            PathSegment::LineTo(x, y) => cr.line_to(x, y),
            PathSegment::CurveTo(x1, y1, x2, y2, x3, y3) => cr.curve_to(x1, y1, x2, y2, x3, y3),
            PathSegment::Close => cr.close_path(),
        }
    }
}

fn antialias(aa: Antialias) -> cairo::Antialias {
    match aa {
        Antialias::Default => cairo::Antialias::Default,
        Antialias::None => cairo::Antialias::None,
        Antialias::Gray => cairo::Antialias::Gray,
        Antialias::Subpixel => cairo::Antialias::Subpixel,
    }
}

fn to_cairo_matrix(m: &Matrix) -> cairo::Matrix {
    cairo::Matrix::new(m.xx, m.yx, m.xy, m.yy, m.x0, m.y0)
}

/// Device-space area a stroke of `path` can touch, including joins and caps.
fn stroke_bounds(path: &Path, style: &StrokeStyle, ctm: &Matrix) -> Option<RectInt> {
    let bounds = path.bounds()?;
    let scale = (ctm.xx.abs() + ctm.xy.abs()).max(ctm.yx.abs() + ctm.yy.abs());
    let reach = style.line_width / 2.0 * style.miter_limit.max(std::f64::consts::SQRT_2) * scale;
    let pad = reach.ceil() as i32 + 1;
    Some(RectInt::new(
        bounds.x - pad,
        bounds.y - pad,
        bounds.width + 2 * pad,
        bounds.height + 2 * pad,
    ))
}

impl RenderPipeline for CairoPipeline {
    fn paint(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        self.render(target, clip, None, |cr| {
            cr.set_operator(operator(op));
            set_source(cr, source);
            cr.paint()
        })
    }

    fn mask(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        mask: &Pattern,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let Pattern::Solid(m) = mask;
        let mask = cairo::SolidPattern::from_rgba(m.r as f64, m.g as f64, m.b as f64, m.a as f64);
        self.render(target, clip, None, |cr| {
            cr.set_operator(operator(op));
            set_source(cr, source);
            cr.mask(&mask)
        })
    }

    fn stroke(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        path: &Path,
        style: &StrokeStyle,
        ctm: &Matrix,
        _ctm_inverse: &Matrix,
        tolerance: f64,
        aa: Antialias,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let Some(bounds) = stroke_bounds(path, style, ctm) else {
            return Ok(());
        };
        self.render(target, clip, Some(bounds), |cr| {
            cr.set_operator(operator(op));
            set_source(cr, source);
            cr.set_tolerance(tolerance);
            cr.set_antialias(antialias(aa));
            append_path(cr, path);

            // Line width and dashes are in user space.
            cr.save()?;
            cr.transform(to_cairo_matrix(&Matrix { x0: 0.0, y0: 0.0, ..*ctm }));
            cr.set_line_width(style.line_width);
            cr.set_line_cap(match style.line_cap {
                LineCap::Butt => cairo::LineCap::Butt,
                LineCap::Round => cairo::LineCap::Round,
                LineCap::Square => cairo::LineCap::Square,
            });
            cr.set_line_join(match style.line_join {
                LineJoin::Miter => cairo::LineJoin::Miter,
                LineJoin::Round => cairo::LineJoin::Round,
                LineJoin::Bevel => cairo::LineJoin::Bevel,
            });
            cr.set_miter_limit(style.miter_limit);
            cr.set_dash(&style.dash, style.dash_offset);
            let result = cr.stroke();
            cr.restore()?;
            result
        })
    }

    fn fill(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        path: &Path,
        fill_rule: FillRule,
        tolerance: f64,
        aa: Antialias,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let Some(bounds) = path.bounds() else {
            return Ok(());
        };
        self.render(target, clip, Some(bounds), |cr| {
            cr.set_operator(operator(op));
            set_source(cr, source);
            cr.set_tolerance(tolerance);
            cr.set_antialias(antialias(aa));
            cr.set_fill_rule(match fill_rule {
                FillRule::Winding => cairo::FillRule::Winding,
                FillRule::EvenOdd => cairo::FillRule::EvenOdd,
            });
            append_path(cr, path);
            cr.fill()
        })
    }

    fn show_glyphs(
        &self,
        target: &mut dyn SurfaceBackend,
        op: Operator,
        source: &Pattern,
        glyphs: &[Glyph],
        font: &ScaledFont,
        clip: Option<&Clip>,
    ) -> Result<(), SurfaceError> {
        let glyphs: Vec<cairo::Glyph> = glyphs.iter().map(|g| cairo::Glyph::new(g.index as _, g.x, g.y)).collect();
        self.render(target, clip, None, |cr| {
            cr.set_operator(operator(op));
            set_source(cr, source);
            cr.select_font_face(&font.family, cairo::FontSlant::Normal, cairo::FontWeight::Normal);
            cr.set_font_size(font.size);
            cr.show_glyphs(&glyphs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::platform::memory::MemoryPlatform;
    use crate::platform::ChannelMasks;
    use crate::surface::{DcSurface, FallbackState, FlushFlags, SurfaceContext};
    use std::sync::Arc;

    #[test]
    fn cairo_fills_a_rectangle() {
        let platform = Arc::new(MemoryPlatform::new());
        let mut surface = DcSurface::create_buffer(SurfaceContext::new(platform.clone()), Format::Argb32, 6, 6).unwrap();

        surface
            .fill(
                &CairoPipeline,
                Operator::Source,
                &Pattern::Solid(Color::from_u8(0, 0, 255, 255)),
                &Path::rectangle(1.0, 1.0, 2.0, 2.0),
                FillRule::Winding,
                0.1,
                Antialias::None,
                None,
            )
            .unwrap();

        let dc = surface.device_handle();
        assert_eq!(platform.pixel(dc, 1, 1), Some(0xff00_00ff));
        assert_eq!(platform.pixel(dc, 2, 2), Some(0xff00_00ff));
        assert_eq!(platform.pixel(dc, 3, 3), Some(0));
    }

    #[test]
    fn cairo_paint_respects_clip() {
        let platform = Arc::new(MemoryPlatform::new());
        let mut surface = DcSurface::create_buffer(SurfaceContext::new(platform.clone()), Format::Rgb24, 4, 4).unwrap();

        let clip = Clip::rect(RectInt::new(0, 0, 2, 4));
        surface
            .paint(&CairoPipeline, Operator::Over, &Pattern::Solid(Color::WHITE), Some(&clip))
            .unwrap();

        let dc = surface.device_handle();
        assert_eq!(platform.pixel(dc, 1, 3), Some(0xffff_ffff));
        assert_eq!(platform.pixel(dc, 2, 0), Some(0xff00_0000));
    }

    #[test]
    fn cairo_fill_damages_only_the_shape() {
        let platform = Arc::new(MemoryPlatform::new());
        let win = platform.create_window_dc(16, 16, 32, ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0));
        let mut surface = DcSurface::create(SurfaceContext::new(platform.clone()), win).unwrap();

        surface
            .fill(
                &CairoPipeline,
                Operator::Over,
                &Pattern::Solid(Color::WHITE),
                &Path::rectangle(2.0, 2.0, 3.0, 3.0),
                FillRule::Winding,
                0.1,
                Antialias::None,
                None,
            )
            .unwrap();

        platform.reset_block_copies();
        surface.flush(FlushFlags::empty()).unwrap();
        let copies = platform.stats().block_copies;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].dst_rect, RectInt::new(2, 2, 3, 3));
        assert_eq!(platform.pixel(win, 3, 3), Some(0xffff_ffff));
        assert_eq!(surface.fallback_state(), FallbackState::Active);
    }
}
