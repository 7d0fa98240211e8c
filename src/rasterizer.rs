//! Anti-aliased rasterizer: converts a canonical [`Outline`] into an
//! 8-bit coverage bitmap.
//!
//! Curved segments are flattened to line segments first; each line then
//! contributes to a sparse grid of per-pixel cells that track two
//! running sums — `cover` (net vertical crossing count, scaled to
//! subpixel units) and `area` (the sub-cell portion of the pixel the
//! edge actually covers). A left-to-right sweep of each row turns the
//! accumulated cover/area pairs into coverage bytes: a cell carries the
//! edge's exact contribution, and every pixel to its right inherits the
//! accumulated `cover` as full or partial coverage until the next edge
//! cell changes it. This is the same cell-accumulation technique the
//! scanline rasterizer below it was modeled on (see `DESIGN.md`) —
//! distinct from a literal scanline-subdivision rewrite, but the same
//! asymptotic cost and the same anti-aliasing guarantee: coverage is
//! exact up to fixed-point rounding, never approximated by supersampling.

use std::collections::HashMap;

use crate::basics::{
    iceil, ifloor, CoverType, Fixed, FillingRule, RectI, Vector, COVER_FULL, COVER_SHIFT, FIXED_MASK, FIXED_SCALE,
    FIXED_SHIFT,
};
use crate::error::{RenderError, Result};
use crate::outline::{segment_ends_contour, segment_order, Outline, SegmentOrder};

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    x: i32,
    cover: i64,
    area: i64,
}

/// Accumulates polyline edges into per-row coverage cells, then sweeps
/// them into an output alpha buffer.
pub struct Rasterizer {
    rows: HashMap<i32, Vec<Cell>>,
    bbox: RectI,
    /// Maximum chord deviation (in fixed-point units) tolerated when
    /// flattening curves to line segments.
    outline_error: Fixed,
}

impl Rasterizer {
    pub fn new(outline_error: Fixed) -> Self {
        Self {
            rows: HashMap::new(),
            bbox: RectI::reset(),
            outline_error: outline_error.max(1),
        }
    }

    pub fn bbox(&self) -> RectI {
        self.bbox
    }

    fn cell_mut(&mut self, row: i32, x: i32) -> &mut Cell {
        let cells = self.rows.entry(row).or_default();
        match cells.iter().position(|c| c.x == x) {
            Some(i) => &mut cells[i],
            None => {
                cells.push(Cell { x, cover: 0, area: 0 });
                cells.last_mut().unwrap()
            }
        }
    }

    /// Render a single line segment, in fixed-point device coordinates,
    /// into the cell grid. `y1 == y2` contributes nothing (horizontal
    /// edges carry no winding information).
    fn add_line(&mut self, x1: Fixed, y1: Fixed, x2: Fixed, y2: Fixed) {
        if y1 == y2 {
            return;
        }
        self.bbox.update(&RectI::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)));

        let ey1 = y1 >> FIXED_SHIFT;
        let ey2 = y2 >> FIXED_SHIFT;
        let fy1 = y1 & FIXED_MASK;

        if ey1 == ey2 {
            self.render_hline(ey1, x1, fy1, x2, y2 & FIXED_MASK);
            return;
        }

        let incr: i32 = if y2 > y1 { 1 } else { -1 };
        let dx = (x2 - x1) as i64;
        let dy = (y2 - y1) as i64;

        let first = if y2 > y1 { FIXED_SCALE } else { 0 };
        let mut x_from = x1;
        let mut y_from = fy1;
        let mut ey = ey1;

        let delta_y0 = (first - fy1) as i64;
        let dx0 = div_floor(dx * delta_y0, dy);
        self.render_hline(ey, x_from, y_from, x_from + dx0 as i32, first);
        x_from += dx0 as i32;
        ey += incr;

        if ey != ey2 {
            let full_dy = if y2 > y1 { FIXED_SCALE as i64 } else { -(FIXED_SCALE as i64) };
            let dx_full = div_floor(dx * full_dy, dy);
            let y_top = if y2 > y1 { 0 } else { FIXED_SCALE };
            let y_bot = FIXED_SCALE - y_top;
            while ey != ey2 {
                self.render_hline(ey, x_from, y_top, x_from + dx_full as i32, y_bot);
                x_from += dx_full as i32;
                ey += incr;
            }
        }

        y_from = FIXED_SCALE - first;
        let fy2 = y2 & FIXED_MASK;
        self.render_hline(ey2, x_from, y_from, x2, fy2);
    }

    /// Render the portion of an edge that lies within a single scanline
    /// row, possibly spanning several pixel columns.
    fn render_hline(&mut self, ey: i32, x1: Fixed, y1: Fixed, x2: Fixed, y2: Fixed) {
        let ex1 = x1 >> FIXED_SHIFT;
        let ex2 = x2 >> FIXED_SHIFT;
        let fx1 = x1 & FIXED_MASK;
        let fx2 = x2 & FIXED_MASK;
        let dy = (y2 - y1) as i64;

        if ex1 == ex2 {
            let cell = self.cell_mut(ey, ex1);
            cell.cover += dy;
            cell.area += (fx1 + fx2) as i64 * dy;
            return;
        }

        let dx = (x2 - x1) as i64;
        let incr: i32 = if x2 > x1 { 1 } else { -1 };
        let (p_first, near_full) = if x2 > x1 {
            ((FIXED_SCALE - fx1) as i64, FIXED_SCALE as i64)
        } else {
            (-(fx1 as i64), 0i64)
        };

        let mut delta = div_floor(p_first * dy, dx);
        {
            let cell = self.cell_mut(ey, ex1);
            cell.cover += delta;
            cell.area += (fx1 as i64 + near_full) * delta;
        }
        let mut y = y1 as i64 + delta;
        let mut ex = ex1 + incr;

        if ex != ex2 {
            let lift = div_floor(FIXED_SCALE as i64 * dy, dx.abs()) * if x2 > x1 { 1 } else { -1 };
            let rem_total = (FIXED_SCALE as i64 * dy).rem_euclid(dx.abs());
            let mut rem = 0i64;
            while ex != ex2 {
                delta = lift;
                rem += rem_total;
                if rem >= dx.abs() {
                    rem -= dx.abs();
                    delta += if x2 > x1 { 1 } else { -1 };
                }
                let cell = self.cell_mut(ey, ex);
                cell.cover += delta;
                cell.area += FIXED_SCALE as i64 * delta;
                y += delta;
                ex += incr;
            }
        }

        delta = y2 as i64 - y;
        let cell = self.cell_mut(ey, ex2);
        cell.cover += delta;
        cell.area += fx2 as i64 * delta;
    }

    fn flatten_and_add(&mut self, pts: &[Vector], depth: u32) {
        let flat_enough = |pts: &[Vector]| -> bool {
            let (p0, pn) = (pts[0], pts[pts.len() - 1]);
            let dx = (pn.x - p0.x) as f64;
            let dy = (pn.y - p0.y) as f64;
            let len = (dx * dx + dy * dy).sqrt().max(1.0);
            pts[1..pts.len() - 1].iter().all(|p| {
                let num = (dy * (p.x - p0.x) as f64 - dx * (p.y - p0.y) as f64).abs();
                num / len < self.outline_error as f64
            })
        };

        if depth >= 24 || flat_enough(pts) {
            self.add_line(pts[0].x, pts[0].y, pts[pts.len() - 1].x, pts[pts.len() - 1].y);
            return;
        }

        let lerp = |a: Vector, b: Vector| Vector::new((a.x + b.x) / 2, (a.y + b.y) / 2);
        match pts.len() {
            3 => {
                let p01 = lerp(pts[0], pts[1]);
                let p12 = lerp(pts[1], pts[2]);
                let p012 = lerp(p01, p12);
                self.flatten_and_add(&[pts[0], p01, p012], depth + 1);
                self.flatten_and_add(&[p012, p12, pts[2]], depth + 1);
            }
            4 => {
                let p01 = lerp(pts[0], pts[1]);
                let p12 = lerp(pts[1], pts[2]);
                let p23 = lerp(pts[2], pts[3]);
                let p012 = lerp(p01, p12);
                let p123 = lerp(p12, p23);
                let p0123 = lerp(p012, p123);
                self.flatten_and_add(&[pts[0], p01, p012, p0123], depth + 1);
                self.flatten_and_add(&[p0123, p123, p23, pts[3]], depth + 1);
            }
            _ => unreachable!(),
        }
    }

    /// Decompose `outline` into line segments and accumulate them. Can
    /// be called more than once before `fill` to rasterize several
    /// outlines (e.g. a glyph and its clip path) with combined winding.
    pub fn add_outline(&mut self, outline: &Outline) -> Result<()> {
        let mut cursor = 0usize;
        let mut contour_start = 0usize;
        for &seg in &outline.segments {
            let order = segment_order(seg).ok_or_else(|| RenderError::InvalidOutline("malformed segment byte".into()))?;
            cursor += order.n_points();
            let ends = segment_ends_contour(seg);
            let end_idx = if ends { contour_start } else { cursor };
            let end = outline.points[end_idx];

            match order {
                SegmentOrder::Line => {
                    let start = outline.points[cursor - 1];
                    self.add_line(start.x, start.y, end.x, end.y);
                }
                SegmentOrder::Quadratic => {
                    let pts = [outline.points[cursor - 2], outline.points[cursor - 1], end];
                    self.flatten_and_add(&pts, 0);
                }
                SegmentOrder::Cubic => {
                    let pts = [
                        outline.points[cursor - 3],
                        outline.points[cursor - 2],
                        outline.points[cursor - 1],
                        end,
                    ];
                    self.flatten_and_add(&pts, 0);
                }
            }

            if ends {
                contour_start = cursor;
            }
        }
        Ok(())
    }

    fn calc_alpha(mut area: i64, rule: FillingRule) -> CoverType {
        const SHIFT: i64 = 2 * FIXED_SHIFT as i64 + 1 - COVER_SHIFT as i64;
        match rule {
            FillingRule::NonZero => {
                if area < 0 {
                    area = -area;
                }
            }
            FillingRule::EvenOdd => {
                let period = 2i64 << (2 * FIXED_SHIFT);
                area &= period - 1;
                if area > period / 2 {
                    area = period - area;
                }
            }
        }
        let v = area >> SHIFT;
        v.clamp(0, COVER_FULL as i64) as CoverType
    }

    /// Sweep accumulated cells into `buf`, a `stride`-aligned buffer
    /// covering the pixel window `(x0, y0, width, height)`. Rows/columns
    /// outside the accumulated bounding box are left untouched, so
    /// `buf` should already be zeroed.
    pub fn fill(&self, rule: FillingRule, buf: &mut [CoverType], x0: i32, y0: i32, width: usize, height: usize, stride: usize) {
        for row in y0..y0 + height as i32 {
            if let Some(cells) = self.rows.get(&row) {
                let mut sorted = cells.clone();
                sorted.sort_by_key(|c| c.x);
                let mut cover = 0i64;
                let mut prev_x = x0 - 1;
                let out_row = &mut buf[(row - y0) as usize * stride..][..width];
                for cell in &sorted {
                    if cell.x > prev_x + 1 {
                        let alpha = Self::calc_alpha(cover << (FIXED_SHIFT + 1), rule);
                        fill_span(out_row, prev_x + 1, cell.x, x0, width, alpha);
                    }
                    let alpha = Self::calc_alpha((cover << (FIXED_SHIFT + 1)) + cell.area, rule);
                    if cell.x >= x0 && (cell.x - x0) < width as i32 {
                        out_row[(cell.x - x0) as usize] = alpha;
                    }
                    cover += cell.cover;
                    prev_x = cell.x;
                }
                if prev_x + 1 < x0 + width as i32 {
                    let alpha = Self::calc_alpha(cover << (FIXED_SHIFT + 1), rule);
                    fill_span(out_row, prev_x + 1, x0 + width as i32, x0, width, alpha);
                }
            }
        }
    }
}

fn fill_span(row: &mut [CoverType], from_x: i32, to_x: i32, x0: i32, width: usize, alpha: CoverType) {
    if alpha == 0 {
        return;
    }
    let lo = (from_x - x0).max(0) as usize;
    let hi = ((to_x - x0).max(0) as usize).min(width);
    for v in &mut row[lo..hi] {
        *v = alpha;
    }
}

#[inline]
fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Convert an outline's control box into the pixel-aligned window a
/// `Rasterizer::fill` call needs to cover it fully.
pub fn pixel_window(bbox: RectI) -> (i32, i32, usize, usize) {
    let x0 = ifloor(bbox.x1 as f64 / FIXED_SCALE as f64);
    let y0 = ifloor(bbox.y1 as f64 / FIXED_SCALE as f64);
    let x1 = iceil(bbox.x2 as f64 / FIXED_SCALE as f64);
    let y1 = iceil(bbox.y2 as f64 / FIXED_SCALE as f64);
    (x0, y0, (x1 - x0).max(0) as usize, (y1 - y0).max(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::to_fixed;
    use crate::outline::{make_segment, SegmentOrder};

    fn rect_outline(x0: f64, y0: f64, x1: f64, y1: f64) -> Outline {
        let mut o = Outline::new();
        for &(x, y) in &[(x0, y0), (x0, y1), (x1, y1), (x1, y0)] {
            o.add_point(Vector::new(to_fixed(x), to_fixed(y))).unwrap();
        }
        for _ in 0..3 {
            o.add_segment(make_segment(SegmentOrder::Line, false));
        }
        o.add_segment(make_segment(SegmentOrder::Line, true));
        o
    }

    #[test]
    fn fully_covered_interior_pixel_is_opaque() {
        let outline = rect_outline(0.0, 0.0, 10.0, 10.0);
        let mut r = Rasterizer::new(4);
        r.add_outline(&outline).unwrap();
        let (x0, y0, w, h) = pixel_window(r.bbox());
        let mut buf = vec![0u8; w * h];
        r.fill(FillingRule::NonZero, &mut buf, x0, y0, w, h, w);
        // A pixel well inside the rectangle should have full coverage.
        let cx = (5 - x0) as usize;
        let cy = (5 - y0) as usize;
        assert_eq!(buf[cy * w + cx], COVER_FULL);
    }

    #[test]
    fn outside_bbox_is_zero() {
        let outline = rect_outline(2.0, 2.0, 8.0, 8.0);
        let mut r = Rasterizer::new(4);
        r.add_outline(&outline).unwrap();
        let (x0, y0, w, h) = pixel_window(r.bbox());
        let mut buf = vec![0u8; w * h];
        r.fill(FillingRule::NonZero, &mut buf, x0, y0, w, h, w);
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn empty_outline_produces_no_coverage() {
        let r = Rasterizer::new(4);
        let mut buf = vec![0u8; 16];
        r.fill(FillingRule::NonZero, &mut buf, 0, 0, 4, 4, 4);
        assert!(buf.iter().all(|&v| v == 0));
    }
}
