//! Canonical outline representation: parallel point/segment arrays shared
//! by the drawing-command parser, the font-outline converter, and the
//! stroker.
//!
//! An outline is two arrays: `points` (26.6 fixed-point vectors) and
//! `segments` (one byte each, encoding spline order + end-of-contour).
//! Each segment owns `order` consecutive points from a running cursor;
//! a segment's last point is the first point of the next segment, except
//! for a contour's last segment, which wraps to the contour's first
//! point. This mirrors the reference renderer's outline encoding exactly
//! (see `DESIGN.md`) because the stroker and rasterizer below are defined
//! in terms of it.

use crate::basics::{to_fixed, RectI, Vector, OUTLINE_MAX, OUTLINE_MIN};
use crate::error::{RenderError, Result};

/// Segment order (spline degree): line, quadratic, or cubic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOrder {
    Line = 1,
    Quadratic = 2,
    Cubic = 3,
}

impl SegmentOrder {
    #[inline]
    pub fn n_points(self) -> usize {
        self as usize
    }
}

pub const SEGMENT_COUNT_MASK: u8 = 0x03;
pub const SEGMENT_CONTOUR_END: u8 = 0x04;

/// Build a raw segment byte from an order and end-of-contour flag.
#[inline]
pub fn make_segment(order: SegmentOrder, end_of_contour: bool) -> u8 {
    order as u8 | if end_of_contour { SEGMENT_CONTOUR_END } else { 0 }
}

#[inline]
pub fn segment_order(seg: u8) -> Option<SegmentOrder> {
    match seg & SEGMENT_COUNT_MASK {
        1 => Some(SegmentOrder::Line),
        2 => Some(SegmentOrder::Quadratic),
        3 => Some(SegmentOrder::Cubic),
        _ => None,
    }
}

#[inline]
pub fn segment_ends_contour(seg: u8) -> bool {
    seg & SEGMENT_CONTOUR_END != 0
}

/// A canonical outline: parallel point and segment arrays under the
/// non-zero winding rule.
#[derive(Debug, Clone, Default)]
pub struct Outline {
    pub points: Vec<Vector>,
    pub segments: Vec<u8>,
}

impl Outline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate storage for `n_points` points and `n_segments`
    /// segments, mirroring the reference renderer's explicit
    /// capacity-doubling allocator (`Vec::with_capacity` gives us the
    /// same amortized-doubling growth without hand-rolled reallocation).
    pub fn with_capacity(n_points: usize, n_segments: usize) -> Self {
        Self {
            points: Vec::with_capacity(n_points),
            segments: Vec::with_capacity(n_segments),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.segments.clear();
    }

    /// Append a point, validating it lies within the representable
    /// fixed-point coordinate range.
    pub fn add_point(&mut self, pt: Vector) -> Result<()> {
        if pt.x < OUTLINE_MIN || pt.x > OUTLINE_MAX || pt.y < OUTLINE_MIN || pt.y > OUTLINE_MAX {
            return Err(RenderError::InvalidOutline(format!(
                "point ({}, {}) outside representable range",
                pt.x, pt.y
            )));
        }
        self.points.push(pt);
        Ok(())
    }

    pub fn add_segment(&mut self, seg: u8) {
        self.segments.push(seg);
    }

    /// Mark the most recently added segment as the last one in its
    /// contour.
    pub fn close_contour(&mut self) {
        if let Some(last) = self.segments.last_mut() {
            *last |= SEGMENT_CONTOUR_END;
        }
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        for p in &mut self.points {
            p.x += dx;
            p.y += dy;
        }
    }

    /// Integer scale along X combined with a translation. `scale_x == 1.0`
    /// reduces to a plain translate.
    pub fn adjust(&mut self, scale_x: f64, dx: i32, dy: i32) {
        let mul = (scale_x * 65536.0).round() as i64;
        if mul == 0x10000 {
            self.translate(dx, dy);
            return;
        }
        for p in &mut self.points {
            let x = (p.x as i64 * mul) >> 16;
            p.x = x as i32 + dx;
            p.y += dy;
        }
    }

    /// The control box (bounding box of the raw point array, not the
    /// rendered curves — curves may bulge outside their control points
    /// for quadratics/cubics with wide control handles, which is why
    /// this is a "cbox" and not a tight bbox).
    pub fn get_cbox(&self) -> RectI {
        if self.points.is_empty() {
            return RectI::new(0, 0, 0, 0);
        }
        let mut r = RectI::new(
            self.points[0].x,
            self.points[0].y,
            self.points[0].x,
            self.points[0].y,
        );
        for p in &self.points[1..] {
            r.x1 = r.x1.min(p.x);
            r.x2 = r.x2.max(p.x);
            r.y1 = r.y1.min(p.y);
            r.y2 = r.y2.max(p.y);
        }
        r
    }

    /// Validate structural invariants (testable property 1): every
    /// contour has >= 1 segment, the last segment of each contour carries
    /// the end-of-contour flag, and point count matches the sum of
    /// segment orders.
    pub fn validate(&self) -> bool {
        if self.segments.is_empty() {
            return self.points.is_empty();
        }
        if !segment_ends_contour(*self.segments.last().unwrap()) {
            return false;
        }
        let mut n_points = 0usize;
        for &seg in &self.segments {
            match segment_order(seg) {
                Some(order) => n_points += order.n_points(),
                None => return false,
            }
        }
        n_points == self.points.len()
    }
}

/// Point classification used by font outline sources (mirrors FreeType's
/// `FT_CURVE_TAG`): on-curve, conic (quadratic) off-curve, or cubic
/// off-curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointTag {
    OnCurve,
    Conic,
    Cubic,
}

/// A single glyph contour as produced by a font outline source, in font
/// units with Y pointing up (converted to the canonical Y-down outline
/// during `convert_from_font_outline`).
pub struct FontContour<'a> {
    pub points: &'a [(f64, f64)],
    pub tags: &'a [PointTag],
}

/// Converts an opaque font-library outline description (a sequence of
/// tagged contours, matching `FT_Outline`'s on-curve/conic/cubic point
/// tags) into the canonical outline form, flipping Y and scaling from
/// font units into 26.6 fixed point.
///
/// Degenerate two-point contours are silently skipped (matches broken
/// fonts the reference renderer tolerates); a malformed tag sequence
/// (e.g. three consecutive cubic off-curve points) is reported as an
/// error and leaves the outline untouched.
pub fn convert_from_font_outline(contours: &[FontContour], units_to_fixed: f64) -> Result<Outline> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        On,
        Q,
        C1,
        C2,
    }

    let mut out = Outline::new();
    for contour in contours {
        let n = contour.points.len();
        if n < 2 {
            continue;
        }
        if contour.tags.len() != n {
            return Err(RenderError::InvalidOutline(
                "tag count does not match point count".into(),
            ));
        }

        let to_vec = |(x, y): (f64, f64)| -> Vector {
            Vector::new(to_fixed(x * units_to_fixed), to_fixed(-y * units_to_fixed))
        };

        let mut state = match contour.tags[0] {
            PointTag::OnCurve => State::On,
            PointTag::Conic => {
                // Implicit on-curve midpoint between the last and first points.
                let midpoint = match contour.tags[n - 1] {
                    PointTag::OnCurve => contour.points[n - 1],
                    PointTag::Conic => (
                        (contour.points[n - 1].0 + contour.points[0].0) / 2.0,
                        (contour.points[n - 1].1 + contour.points[0].1) / 2.0,
                    ),
                    PointTag::Cubic => {
                        return Err(RenderError::InvalidOutline(
                            "contour starts with conic point after cubic".into(),
                        ))
                    }
                };
                out.add_point(to_vec(midpoint))?;
                State::Q
            }
            PointTag::Cubic => {
                return Err(RenderError::InvalidOutline(
                    "contour cannot start with a cubic off-curve point".into(),
                ))
            }
        };
        out.add_point(to_vec(contour.points[0]))?;

        for j in 1..n {
            match contour.tags[j] {
                PointTag::OnCurve => {
                    let seg = match state {
                        State::On => SegmentOrder::Line,
                        State::Q => SegmentOrder::Quadratic,
                        State::C2 => SegmentOrder::Cubic,
                        State::C1 => {
                            return Err(RenderError::InvalidOutline(
                                "single cubic off-curve point before on-curve point".into(),
                            ))
                        }
                    };
                    out.add_segment(make_segment(seg, false));
                    state = State::On;
                }
                PointTag::Conic => match state {
                    State::On => state = State::Q,
                    State::Q => {
                        out.add_segment(make_segment(SegmentOrder::Quadratic, false));
                        let midpoint = (
                            (contour.points[j - 1].0 + contour.points[j].0) / 2.0,
                            (contour.points[j - 1].1 + contour.points[j].1) / 2.0,
                        );
                        out.add_point(to_vec(midpoint))?;
                    }
                    _ => return Err(RenderError::InvalidOutline("unexpected conic point".into())),
                },
                PointTag::Cubic => match state {
                    State::On => state = State::C1,
                    State::C1 => state = State::C2,
                    _ => return Err(RenderError::InvalidOutline("unexpected cubic point".into())),
                },
            }
            out.add_point(to_vec(contour.points[j]))?;
        }

        let final_seg = match state {
            State::On => SegmentOrder::Line,
            State::Q => SegmentOrder::Quadratic,
            State::C2 => SegmentOrder::Cubic,
            State::C1 => {
                return Err(RenderError::InvalidOutline(
                    "contour ends mid cubic spline".into(),
                ))
            }
        };
        out.add_segment(make_segment(final_seg, true));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Outline {
        let mut o = Outline::new();
        for &(x, y) in &[(0, 0), (0, 64), (64, 64), (64, 0)] {
            o.add_point(Vector::new(x, y)).unwrap();
        }
        o.add_segment(make_segment(SegmentOrder::Line, false));
        o.add_segment(make_segment(SegmentOrder::Line, false));
        o.add_segment(make_segment(SegmentOrder::Line, false));
        o.add_segment(make_segment(SegmentOrder::Line, true));
        o
    }

    #[test]
    fn validate_accepts_closed_square() {
        let o = unit_square();
        assert!(o.validate());
    }

    #[test]
    fn validate_rejects_missing_end_of_contour() {
        let mut o = unit_square();
        *o.segments.last_mut().unwrap() &= !SEGMENT_CONTOUR_END;
        assert!(!o.validate());
    }

    #[test]
    fn cbox_matches_point_extents() {
        let o = unit_square();
        let b = o.get_cbox();
        assert_eq!(b, RectI::new(0, 0, 64, 64));
    }

    #[test]
    fn translate_shifts_all_points() {
        let mut o = unit_square();
        o.translate(10, -5);
        assert_eq!(o.points[0], Vector::new(10, -5));
        assert_eq!(o.points[2], Vector::new(74, 59));
    }

    #[test]
    fn adjust_identity_scale_is_translate() {
        let mut o = unit_square();
        o.adjust(1.0, 3, 7);
        assert_eq!(o.points[0], Vector::new(3, 7));
    }

    #[test]
    fn adjust_scales_x_only() {
        let mut o = unit_square();
        o.adjust(2.0, 0, 0);
        assert_eq!(o.points[2].x, 128);
        assert_eq!(o.points[2].y, 64);
    }

    #[test]
    fn add_point_rejects_out_of_range_coordinates() {
        let mut o = Outline::new();
        assert!(o.add_point(Vector::new(OUTLINE_MAX + 1, 0)).is_err());
    }

    #[test]
    fn convert_from_font_outline_degenerate_contour_skipped() {
        let points = [(0.0, 0.0)];
        let tags = [PointTag::OnCurve];
        let contours = [FontContour {
            points: &points,
            tags: &tags,
        }];
        let out = convert_from_font_outline(&contours, 1.0).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn convert_from_font_outline_all_on_curve_is_line_segments() {
        let points = [(0.0, 0.0), (0.0, 10.0), (10.0, 10.0)];
        let tags = [PointTag::OnCurve, PointTag::OnCurve, PointTag::OnCurve];
        let contours = [FontContour {
            points: &points,
            tags: &tags,
        }];
        let out = convert_from_font_outline(&contours, 64.0).unwrap();
        assert!(out.validate());
        assert_eq!(out.n_segments(), 3);
        // Y is flipped during conversion.
        assert_eq!(out.points[1].y, -10 * 64);
    }

    #[test]
    fn convert_from_font_outline_quadratic_produces_implicit_midpoint() {
        let points = [(0.0, 0.0), (5.0, 10.0), (10.0, 0.0)];
        let tags = [PointTag::OnCurve, PointTag::Conic, PointTag::OnCurve];
        let contours = [FontContour {
            points: &points,
            tags: &tags,
        }];
        let out = convert_from_font_outline(&contours, 1.0).unwrap();
        assert!(out.validate());
        assert_eq!(segment_order(out.segments[0]), Some(SegmentOrder::Quadratic));
    }
}
