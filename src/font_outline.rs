//! `ttf-parser`-backed [`GlyphOutlineSource`](crate::glyph::GlyphOutlineSource),
//! gated behind the `font` feature.
//!
//! This exists so the outline pipeline is testable against real font
//! data without pulling in a full font-enumeration/shaping back end:
//! given raw font bytes and a glyph index, it produces a canonical
//! [`Outline`] the same way the rest of the crate would receive one
//! from an external `FontProvider`.

use ttf_parser::{Face, GlyphId, OutlineBuilder};

use crate::basics::Vector;
use crate::error::RenderError;
use crate::glyph::GlyphOutlineSource;
use crate::outline::Outline;
use crate::Result;

/// Collects `ttf-parser`'s move/line/quad/cubic outline callbacks into
/// this crate's canonical point/segment arrays directly, since
/// `ttf-parser` already emits fully-realized on-curve quadratics and
/// cubics (no FreeType-style implicit-midpoint tags to resolve).
struct OutlineCollector {
    outline: Outline,
    contour_start: usize,
    units_to_fixed: f64,
    failed: bool,
}

impl OutlineCollector {
    fn new(units_to_fixed: f64) -> Self {
        OutlineCollector {
            outline: Outline::new(),
            contour_start: 0,
            units_to_fixed,
            failed: false,
        }
    }

    /// Font units use a Y-up coordinate system; the canonical outline is
    /// Y-down like the rest of the pipeline, so Y is negated here (same
    /// flip `convert_from_font_outline` applies to FreeType-style
    /// tagged contours).
    fn to_vector(&self, x: f32, y: f32) -> Vector {
        Vector::new((x as f64 * self.units_to_fixed).round() as i32, (-(y as f64) * self.units_to_fixed).round() as i32)
    }

    fn push_point(&mut self, x: f32, y: f32) {
        if self.outline.add_point(self.to_vector(x, y)).is_err() {
            self.failed = true;
        }
    }
}

impl OutlineBuilder for OutlineCollector {
    fn move_to(&mut self, x: f32, y: f32) {
        self.contour_start = self.outline.n_points();
        self.push_point(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.push_point(x, y);
        self.outline.add_segment(crate::outline::make_segment(crate::outline::SegmentOrder::Line, false));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.push_point(x1, y1);
        self.push_point(x, y);
        self.outline.add_segment(crate::outline::make_segment(crate::outline::SegmentOrder::Quadratic, false));
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.push_point(x1, y1);
        self.push_point(x2, y2);
        self.push_point(x, y);
        self.outline.add_segment(crate::outline::make_segment(crate::outline::SegmentOrder::Cubic, false));
    }

    fn close(&mut self) {
        self.outline.close_contour();
        self.contour_start = self.outline.n_points();
    }
}

/// A `GlyphOutlineSource` backed by an owned TrueType/OpenType font
/// buffer, resolved by `face_index` on every call (ttf-parser faces
/// borrow their backing buffer, so we don't cache a `Face` across the
/// `Result`-returning trait boundary).
pub struct TtfOutlineSource {
    data: Vec<u8>,
}

impl TtfOutlineSource {
    pub fn new(data: Vec<u8>) -> Self {
        TtfOutlineSource { data }
    }
}

impl GlyphOutlineSource for TtfOutlineSource {
    fn glyph_outline(&self, font_ref: u64, face_index: u32, glyph_index: u32, font_size: f64) -> Result<(Outline, i32, i32, Vector)> {
        let face = Face::parse(&self.data, face_index).map_err(|_| RenderError::FontLookupFailed(font_ref))?;
        let units_per_em = face.units_per_em() as f64;
        if units_per_em <= 0.0 {
            return Err(RenderError::FontLookupFailed(font_ref));
        }
        // 26.6 fixed point at the requested point size.
        let units_to_fixed = font_size * 64.0 / units_per_em;

        let gid = GlyphId(u16::try_from(glyph_index).map_err(|_| RenderError::FontLookupFailed(font_ref))?);
        let mut collector = OutlineCollector::new(units_to_fixed);
        let bbox = face
            .outline_glyph(gid, &mut collector)
            .ok_or(RenderError::FontLookupFailed(font_ref))?;
        if collector.failed {
            return Err(RenderError::InvalidOutline("glyph outline coordinate out of range".into()));
        }
        if !collector.outline.segments.is_empty() && !crate::outline::segment_ends_contour(*collector.outline.segments.last().unwrap()) {
            collector.outline.close_contour();
        }

        let advance = face
            .glyph_hor_advance(gid)
            .map(|a| Vector::new((a as f64 * units_to_fixed).round() as i32, 0))
            .unwrap_or_else(|| Vector::new(0, 0));

        let ascent = (bbox.y_max as f64 * units_to_fixed).round() as i32;
        let descent = (bbox.y_min as f64 * units_to_fixed).round() as i32;

        Ok((collector.outline, ascent, descent, advance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_bytes_report_font_lookup_failure() {
        let source = TtfOutlineSource::new(vec![0u8; 16]);
        let err = source.glyph_outline(7, 0, 1, 32.0).unwrap_err();
        assert_eq!(err, RenderError::FontLookupFailed(7));
    }
}
