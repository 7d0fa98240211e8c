//! Border (stroke) generation: offsets a source outline by a border
//! radius in X and Y, producing two new outlines — the outward and
//! inward offset curves used respectively as "outer" and "inner"
//! boundaries of the glyph's border.
//!
//! Joins are circular arcs built by recursive angle bisection
//! (`draw_arc`/`process_arc`), subdivided until consecutive chord
//! normals are within `split_cos` of each other. Nearly-parallel
//! consecutive normals are merged without a join at all
//! (`merge_cos`), and a sharp reversal emits a degenerate zero-length
//! cap rather than a self-intersecting join. Quadratic and cubic
//! source segments are offset directly: each spline's two endpoint
//! normals are combined into a single candidate offset point and
//! checked against the radial (`err_q` for quadratics, `err_c` for
//! cubics) and angular (`err_a`) error estimators derived from the
//! B-spline algebra in `DESIGN.md`; a spline that fails either check
//! is subdivided at its midpoint and each half is retried. `min_len`
//! bounds how short a subdivided piece's derivative can get before
//! it's treated as degenerate and replaced with a line.

use crate::basics::{DVector, Vector, OUTLINE_MAX, OUTLINE_MIN};
use crate::error::{RenderError, Result};
use crate::outline::{make_segment, segment_ends_contour, segment_order, Outline, SegmentOrder};

#[inline]
fn vec_dot(a: DVector, b: DVector) -> f64 {
    a.x * b.x + a.y * b.y
}

#[inline]
fn vec_crs(a: DVector, b: DVector) -> f64 {
    a.x * b.y - a.y * b.x
}

#[inline]
fn vec_len(v: DVector) -> f64 {
    (v.x * v.x + v.y * v.y).sqrt()
}

const MAX_SUBDIV: usize = 15;

const FLAG_INTERSECTION: i32 = 1;
const FLAG_ZERO_0: i32 = 2;
const FLAG_ZERO_1: i32 = 4;
const FLAG_CLIP_0: i32 = 8;
const FLAG_CLIP_1: i32 = 16;
const FLAG_DIR_2: i32 = 32;
const FLAG_COUNT: i32 = 6;
const MASK_INTERSECTION: i32 = FLAG_INTERSECTION << FLAG_COUNT;
const MASK_ZERO_0: i32 = FLAG_ZERO_0 << FLAG_COUNT;
const MASK_ZERO_1: i32 = FLAG_ZERO_1 << FLAG_COUNT;
const MASK_CLIP_0: i32 = FLAG_CLIP_0 << FLAG_COUNT;
const MASK_CLIP_1: i32 = FLAG_CLIP_1 << FLAG_COUNT;

/// Normal direction and half-magnitude of a source spline's derivative
/// at one of its sample points, in normal (border) space.
#[derive(Debug, Clone, Copy)]
struct Normal {
    v: DVector,
    len: f64,
}

struct StrokerState {
    result: [Outline; 2],
    contour_first: [usize; 2],

    xbord: f64,
    ybord: f64,
    xscale: f64,
    yscale: f64,
    eps: i32,

    contour_start: bool,
    first_skip: i32,
    last_skip: i32,
    first_normal: DVector,
    last_normal: DVector,
    first_point: Vector,

    merge_cos: f64,
    split_cos: f64,
    min_len: f64,
    err_q: f64,
    err_c: f64,
    err_a: f64,
}

impl StrokerState {
    fn emit_point(&mut self, pt: Vector, offs: DVector, segment: u8, dir: i32) -> Result<()> {
        let dx = (self.xbord * offs.x) as i32;
        let dy = (self.ybord * offs.y) as i32;
        if dir & 1 != 0 {
            self.result[0].add_point(Vector::new(pt.x + dx, pt.y + dy))?;
            if segment != 0 {
                self.result[0].add_segment(segment);
            }
        }
        if dir & 2 != 0 {
            self.result[1].add_point(Vector::new(pt.x - dx, pt.y - dy))?;
            if segment != 0 {
                self.result[1].add_segment(segment);
            }
        }
        Ok(())
    }

    fn fix_first_point(&mut self, pt: Vector, offs: DVector, dir: i32) {
        let dx = (self.xbord * offs.x) as i32;
        let dy = (self.ybord * offs.y) as i32;
        if dir & 1 != 0 {
            let idx = self.contour_first[0];
            self.result[0].points[idx] = Vector::new(pt.x + dx, pt.y + dy);
        }
        if dir & 2 != 0 {
            let idx = self.contour_first[1];
            self.result[1].points[idx] = Vector::new(pt.x - dx, pt.y - dy);
        }
    }

    fn process_arc(&mut self, pt: Vector, normal0: DVector, normal1: DVector, mul: &[f64], level: usize, dir: i32) -> Result<()> {
        let center = DVector::new(
            (normal0.x + normal1.x) * mul[level],
            (normal0.y + normal1.y) * mul[level],
        );
        if level > 0 {
            self.process_arc(pt, normal0, center, mul, level - 1, dir)?;
            self.process_arc(pt, center, normal1, mul, level - 1, dir)?;
            return Ok(());
        }
        self.emit_point(pt, normal0, make_segment(SegmentOrder::Quadratic, false), dir)?;
        self.emit_point(pt, center, 0, dir)
    }

    fn draw_arc(&mut self, pt: Vector, normal0: DVector, normal1: DVector, mut c: f64, dir: i32) -> Result<()> {
        let mut mul = [0.0f64; MAX_SUBDIV + 1];
        let mut small_angle = true;
        let mut center = DVector::new(0.0, 0.0);

        if c < 0.0 {
            let base = if dir & 2 != 0 { -(0.5f64.sqrt()) } else { 0.5f64.sqrt() };
            let m = base / (1.0 - c).sqrt();
            center.x = (normal1.y - normal0.y) * m;
            center.y = (normal0.x - normal1.x) * m;
            c = (0.5 + 0.5 * c).max(0.0).sqrt();
            small_angle = false;
        }

        let mut pos = MAX_SUBDIV;
        while c < self.split_cos && pos > 0 {
            mul[pos] = 0.5f64.sqrt() / (1.0 + c).sqrt();
            c = (1.0 + c) * mul[pos];
            pos -= 1;
        }
        mul[pos] = 1.0 / (1.0 + c);

        if small_angle {
            self.process_arc(pt, normal0, normal1, &mul[pos..], MAX_SUBDIV - pos, dir)
        } else {
            self.process_arc(pt, normal0, center, &mul[pos..], MAX_SUBDIV - pos, dir)?;
            self.process_arc(pt, center, normal1, &mul[pos..], MAX_SUBDIV - pos, dir)
        }
    }

    fn draw_circle(&mut self, pt: Vector, dir: i32) -> Result<()> {
        let mut mul = [0.0f64; MAX_SUBDIV + 1];
        let mut c = 0.0f64;
        let mut pos = MAX_SUBDIV;
        while c < self.split_cos && pos > 0 {
            mul[pos] = 0.5f64.sqrt() / (1.0 + c).sqrt();
            c = (1.0 + c) * mul[pos];
            pos -= 1;
        }
        mul[pos] = 1.0 / (1.0 + c);

        let normal = [
            DVector::new(1.0, 0.0),
            DVector::new(0.0, 1.0),
            DVector::new(-1.0, 0.0),
            DVector::new(0.0, -1.0),
        ];
        for i in 0..4 {
            self.process_arc(pt, normal[i], normal[(i + 1) % 4], &mul[pos..], MAX_SUBDIV - pos, dir)?;
        }
        Ok(())
    }

    fn start_segment(&mut self, pt: Vector, normal: DVector, dir: i32) -> Result<()> {
        if self.contour_start {
            self.contour_start = false;
            self.first_skip = 0;
            self.last_skip = 0;
            self.first_normal = normal;
            self.last_normal = normal;
            self.first_point = pt;
            return Ok(());
        }

        let prev = self.last_normal;
        let c = vec_dot(prev, normal);
        if c > self.merge_cos {
            let mul = 1.0 / (1.0 + c);
            self.last_normal = DVector::new((self.last_normal.x + normal.x) * mul, (self.last_normal.y + normal.y) * mul);
            return Ok(());
        }
        self.last_normal = normal;

        let s = vec_crs(prev, normal);
        let skip_dir = if s < 0.0 { 1 } else { 2 };
        if dir & skip_dir != 0 {
            self.emit_point(pt, prev, make_segment(SegmentOrder::Line, false), !self.last_skip & skip_dir)?;
            self.emit_point(pt, DVector::new(0.0, 0.0), make_segment(SegmentOrder::Line, false), skip_dir)?;
        }
        self.last_skip = skip_dir;

        let dir = dir & !skip_dir;
        if dir == 0 {
            Ok(())
        } else {
            self.draw_arc(pt, prev, normal, c, dir)
        }
    }

    fn emit_first_point(&mut self, pt: Vector, segment: u8, dir: i32) -> Result<()> {
        self.last_skip &= !dir;
        let normal = self.last_normal;
        self.emit_point(pt, normal, segment, dir)
    }

    fn add_line(&mut self, pt0: Vector, pt1: Vector, dir: i32) -> Result<()> {
        let dx = pt1.x - pt0.x;
        let dy = pt1.y - pt0.y;
        if dx > -self.eps && dx < self.eps && dy > -self.eps && dy < self.eps {
            return Ok(());
        }
        let deriv = DVector::new(dy as f64 * self.yscale, -(dx as f64) * self.xscale);
        let scale = 1.0 / vec_len(deriv);
        let normal = DVector::new(deriv.x * scale, deriv.y * scale);
        self.start_segment(pt0, normal, dir)?;
        self.emit_first_point(pt0, make_segment(SegmentOrder::Line, false), dir)?;
        self.last_normal = normal;
        Ok(())
    }

    /// Prepare to skip part of a curve that would self-intersect under
    /// offset: a zero-length cap marker if this is the segment's first
    /// point, otherwise a line to the last emitted normal.
    fn prepare_skip(&mut self, pt: Vector, dir: i32, first: bool) -> Result<()> {
        if first {
            self.first_skip |= dir;
        } else {
            let normal = self.last_normal;
            self.emit_point(pt, normal, make_segment(SegmentOrder::Line, false), !self.last_skip & dir)?;
        }
        self.last_skip |= dir;
        Ok(())
    }

    /// Exact radial (`err_q`) and angular (`err_a`) error check for
    /// offsetting a whole quadratic spline with a single new control
    /// point, per the endpoint-normal algebra described in `DESIGN.md`.
    fn estimate_quadratic_error(&self, c: f64, s: f64, normal: &[Normal; 2]) -> Option<DVector> {
        if !((3.0 + c) * (3.0 + c) < self.err_q * (1.0 + c)) {
            return None;
        }

        let mul = 1.0 / (1.0 + c);
        let l0 = 2.0 * normal[0].len;
        let l1 = 2.0 * normal[1].len;
        let dot0 = l0 + normal[1].len * c;
        let crs0 = (l0 * mul - normal[1].len) * s;
        let dot1 = l1 + normal[0].len * c;
        let crs1 = (l1 * mul - normal[0].len) * s;
        if !(crs0.abs() < self.err_a * dot0 && crs1.abs() < self.err_a * dot1) {
            return None;
        }

        Some(DVector::new(
            (normal[0].v.x + normal[1].v.x) * mul,
            (normal[0].v.y + normal[1].v.y) * mul,
        ))
    }

    /// Offset one quadratic spline `pt[0..=2]`, subdividing at the
    /// midpoint and recursing when a single offset point can't meet
    /// the error estimators.
    fn process_quadratic(
        &mut self,
        pt: &[Vector; 3],
        deriv: &[DVector; 2],
        normal: &[Normal; 2],
        mut dir: i32,
        first: bool,
    ) -> Result<()> {
        let c = vec_dot(normal[0].v, normal[1].v);
        let s = vec_crs(normal[0].v, normal[1].v);
        let mut check_dir = dir;
        let skip_dir = if s < 0.0 { 1 } else { 2 };
        if dir & skip_dir != 0 {
            let abs_s = s.abs();
            let f0 = normal[0].len * c + normal[1].len;
            let f1 = normal[1].len * c + normal[0].len;
            let g0 = normal[0].len * abs_s;
            let g1 = normal[1].len * abs_s;
            if f0 < abs_s && f1 < abs_s {
                let d2 = (f0 * normal[1].len + f1 * normal[0].len) / 2.0;
                if d2 < g0 && d2 < g1 {
                    self.prepare_skip(pt[0], skip_dir, first)?;
                    if f0 < 0.0 || f1 < 0.0 {
                        let zero = DVector::new(0.0, 0.0);
                        self.emit_point(pt[0], zero, make_segment(SegmentOrder::Line, false), skip_dir)?;
                        self.emit_point(pt[2], zero, make_segment(SegmentOrder::Line, false), skip_dir)?;
                    } else {
                        let mul = f0 / abs_s;
                        let offs = DVector::new(normal[0].v.x * mul, normal[0].v.y * mul);
                        self.emit_point(pt[0], offs, make_segment(SegmentOrder::Line, false), skip_dir)?;
                    }
                    dir &= !skip_dir;
                    if dir == 0 {
                        self.last_normal = normal[1].v;
                        return Ok(());
                    }
                }
                check_dir ^= skip_dir;
            } else if c + g0 < 1.0 && c + g1 < 1.0 {
                check_dir ^= skip_dir;
            }
        }

        if check_dir != 0 {
            if let Some(result) = self.estimate_quadratic_error(c, s, normal) {
                self.emit_first_point(pt[0], make_segment(SegmentOrder::Quadratic, false), check_dir)?;
                self.emit_point(pt[1], result, 0, check_dir)?;
                dir &= !check_dir;
                if dir == 0 {
                    self.last_normal = normal[1].v;
                    return Ok(());
                }
            }
        }

        let mut next1 = Vector::new(pt[0].x + pt[1].x, pt[0].y + pt[1].y);
        let mut next3 = Vector::new(pt[1].x + pt[2].x, pt[1].y + pt[2].y);
        let next2 = Vector::new((next1.x + next3.x + 2) >> 2, (next1.y + next3.y + 2) >> 2);
        next1 = Vector::new(next1.x >> 1, next1.y >> 1);
        next3 = Vector::new(next3.x >> 1, next3.y >> 1);
        let next = [pt[0], next1, next2, next3, pt[2]];

        let next_deriv0 = DVector::new(deriv[0].x / 2.0, deriv[0].y / 2.0);
        let next_deriv2 = DVector::new(deriv[1].x / 2.0, deriv[1].y / 2.0);
        let next_deriv1 = DVector::new(
            (next_deriv0.x + next_deriv2.x) / 2.0,
            (next_deriv0.y + next_deriv2.y) / 2.0,
        );

        let len = vec_len(next_deriv1);
        if len < self.min_len {
            self.emit_first_point(next[0], make_segment(SegmentOrder::Line, false), dir)?;
            self.start_segment(next[2], normal[1].v, dir)?;
            self.last_skip &= !dir;
            let mid_normal = normal[1].v;
            return self.emit_point(next[2], mid_normal, make_segment(SegmentOrder::Line, false), dir);
        }

        let scale = 1.0 / len;
        let mid_normal = Normal {
            v: DVector::new(next_deriv1.x * scale, next_deriv1.y * scale),
            len,
        };
        let start_normal = Normal { v: normal[0].v, len: normal[0].len / 2.0 };
        let end_normal = Normal { v: normal[1].v, len: normal[1].len / 2.0 };

        self.process_quadratic(
            &[next[0], next[1], next[2]],
            &[next_deriv0, next_deriv1],
            &[start_normal, mid_normal],
            dir,
            first,
        )?;
        self.process_quadratic(
            &[next[2], next[3], next[4]],
            &[next_deriv1, next_deriv2],
            &[mid_normal, end_normal],
            dir,
            false,
        )
    }

    /// Offset a source quadratic spline, degenerating to a line when
    /// either control arm collapses within `eps`.
    fn add_quadratic(&mut self, pt: &[Vector; 3], dir: i32) -> Result<()> {
        let dx0 = pt[1].x - pt[0].x;
        let dy0 = pt[1].y - pt[0].y;
        if dx0 > -self.eps && dx0 < self.eps && dy0 > -self.eps && dy0 < self.eps {
            return self.add_line(pt[0], pt[2], dir);
        }
        let dx1 = pt[2].x - pt[1].x;
        let dy1 = pt[2].y - pt[1].y;
        if dx1 > -self.eps && dx1 < self.eps && dy1 > -self.eps && dy1 < self.eps {
            return self.add_line(pt[0], pt[2], dir);
        }

        let deriv = [
            DVector::new(dy0 as f64 * self.yscale, -(dx0 as f64) * self.xscale),
            DVector::new(dy1 as f64 * self.yscale, -(dx1 as f64) * self.xscale),
        ];
        let len0 = vec_len(deriv[0]);
        let scale0 = 1.0 / len0;
        let len1 = vec_len(deriv[1]);
        let scale1 = 1.0 / len1;
        let normal = [
            Normal { v: DVector::new(deriv[0].x * scale0, deriv[0].y * scale0), len: len0 },
            Normal { v: DVector::new(deriv[1].x * scale1, deriv[1].y * scale1), len: len1 },
        ];

        let first = self.contour_start;
        self.start_segment(pt[0], normal[0].v, dir)?;
        self.process_quadratic(pt, &deriv, &normal, dir, first)
    }

    /// Exact-ish radial (`err_c`, least-squares fit) and angular
    /// (`err_a`) error check for offsetting a whole cubic spline with
    /// two new control points. Returns the (possibly narrowed) `dir`
    /// bits the fit is good enough for, plus the two control offsets,
    /// or `None` if no requested direction passes.
    fn estimate_cubic_error(
        &self,
        c: f64,
        s: f64,
        dc: [f64; 2],
        ds: [f64; 2],
        normal: &[Normal; 2],
        check_flags: i32,
        mut dir: i32,
    ) -> Option<(i32, [DVector; 2])> {
        let t = (ds[0] + ds[1]) / (dc[0] + dc[1]);
        let c1 = 1.0 + c;
        let ss = s * s;
        let ts = t * s;
        let tt = t * t;
        let ttc = tt * c1;
        let ttcc = ttc * c1;

        const W: f64 = 0.4;
        let f0 = [
            10.0 * W * (c - 1.0) + 9.0 * W * tt * c,
            2.0 * (c - 1.0) + 3.0 * tt + 2.0 * ts,
            2.0 * (c - 1.0) + 3.0 * tt - 2.0 * ts,
        ];
        let f1 = [
            18.0 * W * (ss - ttc * c),
            2.0 * ss - 6.0 * ttc - 2.0 * ts * (c + 4.0),
            2.0 * ss - 6.0 * ttc + 2.0 * ts * (c + 4.0),
        ];
        let f2 = [
            9.0 * W * (ttcc - ss) * c,
            3.0 * ss + 3.0 * ttcc + 6.0 * ts * c1,
            3.0 * ss + 3.0 * ttcc - 6.0 * ts * c1,
        ];

        let mut aa = 0.0;
        let mut ab = 0.0;
        let ch = (c1 / 2.0).sqrt();
        let inv_ro0 = 1.5 * ch * (ch + 1.0);
        for i in 0..3 {
            let a = 2.0 * f2[i] + f1[i] * inv_ro0;
            let b = f2[i] - f0[i] * inv_ro0 * inv_ro0;
            aa += a * a;
            ab += a * b;
        }
        let ro = ab / (aa * inv_ro0 + 1e-9);

        let mut err2 = 0.0;
        for i in 0..3 {
            let err = f0[i] + ro * (f1[i] + ro * f2[i]);
            err2 += err * err;
        }
        if !(err2 < self.err_c) {
            return None;
        }

        let r = ro * c1 - 1.0;
        let ro0 = t * r - ro * s;
        let ro1 = t * r + ro * s;

        let check_dir = if check_flags & FLAG_DIR_2 != 0 { 2 } else { 1 };
        if dir & check_dir != 0 {
            let (mut test_s, mut test0, mut test1) = (s, ro0, ro1);
            if check_flags & FLAG_DIR_2 != 0 {
                test_s = -test_s;
                test0 = -test0;
                test1 = -test1;
            }
            let mut flags = 0i32;
            if 2.0 * test_s * r < dc[0] + dc[1] {
                flags |= FLAG_INTERSECTION;
            }
            if normal[0].len - test0 < 0.0 {
                flags |= FLAG_ZERO_0;
            }
            if normal[1].len + test1 < 0.0 {
                flags |= FLAG_ZERO_1;
            }
            if normal[0].len + dc[0] + test_s - test1 * c < 0.0 {
                flags |= FLAG_CLIP_0;
            }
            if normal[1].len + dc[1] + test_s + test0 * c < 0.0 {
                flags |= FLAG_CLIP_1;
            }
            if (flags ^ check_flags) & (check_flags >> FLAG_COUNT) != 0 {
                dir &= !check_dir;
                if dir == 0 {
                    return None;
                }
            }
        }

        let d0c = 2.0 * dc[0];
        let d0s = 2.0 * ds[0];
        let d1c = 2.0 * dc[1];
        let d1s = 2.0 * ds[1];
        let mut dot0 = d0c + 3.0 * normal[0].len;
        let mut crs0 = d0s + 3.0 * ro0 * normal[0].len;
        let mut dot1 = d1c + 3.0 * normal[1].len;
        let mut crs1 = d1s + 3.0 * ro1 * normal[1].len;
        if !(crs0.abs() < self.err_a * dot0 && crs1.abs() < self.err_a * dot1) {
            return None;
        }

        let cl0 = c * normal[0].len;
        let sl0 = s * normal[0].len;
        let cl1 = c * normal[1].len;
        let sl1 = -s * normal[1].len;
        dot0 = d0c - ro0 * d0s + cl0 + ro1 * sl0 + cl1 / 3.0;
        dot1 = d1c - ro1 * d1s + cl1 + ro0 * sl1 + cl0 / 3.0;
        crs0 = d0s + ro0 * d0c - sl0 + ro1 * cl0 - sl1 / 3.0;
        crs1 = d1s + ro1 * d1c - sl1 + ro0 * cl1 - sl0 / 3.0;
        if !(crs0.abs() < self.err_a * dot0 && crs1.abs() < self.err_a * dot1) {
            return None;
        }

        let result = [
            DVector::new(normal[0].v.x + normal[0].v.y * ro0, normal[0].v.y - normal[0].v.x * ro0),
            DVector::new(normal[1].v.x + normal[1].v.y * ro1, normal[1].v.y - normal[1].v.x * ro1),
        ];
        Some((dir, result))
    }

    /// Offset one cubic spline `pt[0..=3]`, subdividing at the
    /// midpoint and recursing when two offset control points can't
    /// meet the error estimators.
    fn process_cubic(
        &mut self,
        pt: &[Vector; 4],
        deriv: &[DVector; 3],
        normal: &[Normal; 2],
        mut dir: i32,
        first: bool,
    ) -> Result<()> {
        let c = vec_dot(normal[0].v, normal[1].v);
        let s = vec_crs(normal[0].v, normal[1].v);
        let dc = [vec_dot(normal[0].v, deriv[1]), vec_dot(normal[1].v, deriv[1])];
        let ds = [vec_crs(normal[0].v, deriv[1]), vec_crs(normal[1].v, deriv[1])];
        let f0 = normal[0].len * c + normal[1].len + dc[1];
        let f1 = normal[1].len * c + normal[0].len + dc[0];
        let mut g0 = normal[0].len * s - ds[1];
        let mut g1 = normal[1].len * s + ds[0];

        let abs_s;
        let skip_dir;
        let mut flags;
        if s < 0.0 {
            abs_s = -s;
            skip_dir = 1;
            flags = 0;
            g0 = -g0;
            g1 = -g1;
        } else {
            abs_s = s;
            skip_dir = 2;
            flags = FLAG_INTERSECTION | FLAG_DIR_2;
        }

        let mut check_dir = dir;
        if !(dc[0] + dc[1] > 0.0) {
            check_dir = 0;
        } else if dir & skip_dir != 0 {
            if f0 < abs_s && f1 < abs_s {
                let mut d2 = (f0 + dc[1]) * normal[1].len + (f1 + dc[0]) * normal[0].len;
                d2 = (d2 + vec_dot(deriv[1], deriv[1])) / 2.0;
                if d2 < g0 && d2 < g1 {
                    let mut q = (d2 / (2.0 - d2)).sqrt();
                    let h0 = (f0 * q + g0) * normal[1].len;
                    let h1 = (f1 * q + g1) * normal[0].len;
                    q *= (4.0 / 3.0) * d2;
                    if h0 > q && h1 > q {
                        self.prepare_skip(pt[0], skip_dir, first)?;
                        if f0 < 0.0 || f1 < 0.0 {
                            let zero = DVector::new(0.0, 0.0);
                            self.emit_point(pt[0], zero, make_segment(SegmentOrder::Line, false), skip_dir)?;
                            self.emit_point(pt[3], zero, make_segment(SegmentOrder::Line, false), skip_dir)?;
                        } else {
                            let mul = f0 / abs_s;
                            let offs = DVector::new(normal[0].v.x * mul, normal[0].v.y * mul);
                            self.emit_point(pt[0], offs, make_segment(SegmentOrder::Line, false), skip_dir)?;
                        }
                        dir &= !skip_dir;
                        if dir == 0 {
                            self.last_normal = normal[1].v;
                            return Ok(());
                        }
                    }
                }
                check_dir ^= skip_dir;
            } else {
                if ds[0] < 0.0 {
                    flags ^= MASK_INTERSECTION;
                }
                if ds[1] < 0.0 {
                    flags ^= MASK_INTERSECTION | FLAG_INTERSECTION;
                }
                let parallel = flags & MASK_INTERSECTION != 0;
                let mut badness = if parallel { 0 } else { 1 };
                if c + g0 < 1.0 {
                    if parallel {
                        flags ^= MASK_ZERO_0 | FLAG_ZERO_0;
                        if c < 0.0 {
                            flags ^= MASK_CLIP_0;
                        }
                        if f0 > abs_s {
                            flags ^= FLAG_ZERO_0 | FLAG_CLIP_0;
                        }
                    }
                    badness += 1;
                } else {
                    flags ^= MASK_INTERSECTION | FLAG_INTERSECTION;
                    if !parallel {
                        flags ^= MASK_ZERO_0;
                        if c > 0.0 {
                            flags ^= MASK_CLIP_0;
                        }
                    }
                }
                if c + g1 < 1.0 {
                    if parallel {
                        flags ^= MASK_ZERO_1 | FLAG_ZERO_1;
                        if c < 0.0 {
                            flags ^= MASK_CLIP_1;
                        }
                        if f1 > abs_s {
                            flags ^= FLAG_ZERO_1 | FLAG_CLIP_1;
                        }
                    }
                    badness += 1;
                } else {
                    flags ^= MASK_INTERSECTION;
                    if !parallel {
                        flags ^= MASK_ZERO_1;
                        if c > 0.0 {
                            flags ^= MASK_CLIP_1;
                        }
                    }
                }
                if badness > 2 {
                    check_dir ^= skip_dir;
                }
            }
        }

        let estimate = if check_dir != 0 {
            self.estimate_cubic_error(c, s, dc, ds, normal, flags, check_dir)
        } else {
            None
        };
        if let Some((resolved_dir, offs)) = estimate {
            self.emit_first_point(pt[0], make_segment(SegmentOrder::Cubic, false), resolved_dir)?;
            self.emit_point(pt[1], offs[0], 0, resolved_dir)?;
            self.emit_point(pt[2], offs[1], 0, resolved_dir)?;
            dir &= !resolved_dir;
            if dir == 0 {
                self.last_normal = normal[1].v;
                return Ok(());
            }
        }

        let mut next1 = Vector::new(pt[0].x + pt[1].x, pt[0].y + pt[1].y);
        let center = Vector::new(pt[1].x + pt[2].x + 2, pt[1].y + pt[2].y + 2);
        let mut next5 = Vector::new(pt[2].x + pt[3].x, pt[2].y + pt[3].y);
        let mut next2 = Vector::new(next1.x + center.x, next1.y + center.y);
        let mut next4 = Vector::new(center.x + next5.x, center.y + next5.y);
        let next3 = Vector::new((next2.x + next4.x - 1) >> 3, (next2.y + next4.y - 1) >> 3);
        next2 = Vector::new(next2.x >> 2, next2.y >> 2);
        next4 = Vector::new(next4.x >> 2, next4.y >> 2);
        next1 = Vector::new(next1.x >> 1, next1.y >> 1);
        next5 = Vector::new(next5.x >> 1, next5.y >> 1);
        let next = [pt[0], next1, next2, next3, next4, next5, pt[3]];

        let next_deriv0 = DVector::new(deriv[0].x / 2.0, deriv[0].y / 2.0);
        let center_deriv = DVector::new(deriv[1].x / 2.0, deriv[1].y / 2.0);
        let next_deriv4 = DVector::new(deriv[2].x / 2.0, deriv[2].y / 2.0);
        let next_deriv1 = DVector::new(
            (next_deriv0.x + center_deriv.x) / 2.0,
            (next_deriv0.y + center_deriv.y) / 2.0,
        );
        let next_deriv3 = DVector::new(
            (center_deriv.x + next_deriv4.x) / 2.0,
            (center_deriv.y + next_deriv4.y) / 2.0,
        );
        let next_deriv2 = DVector::new(
            (next_deriv1.x + next_deriv3.x) / 2.0,
            (next_deriv1.y + next_deriv3.y) / 2.0,
        );

        let len = vec_len(next_deriv2);
        if len < self.min_len {
            let start_normal = Normal { v: normal[0].v, len: normal[0].len / 2.0 };
            let end_normal = Normal { v: normal[1].v, len: normal[1].len / 2.0 };

            let next_deriv1b = DVector::new(next_deriv1.x + next_deriv2.x, next_deriv1.y + next_deriv2.y);
            let next_deriv3b = DVector::new(next_deriv3.x + next_deriv2.x, next_deriv3.y + next_deriv2.y);
            let next_deriv2b = DVector::new(0.0, 0.0);

            let len1 = vec_len(next_deriv1b);
            let mid_normal1 = if len1 < self.min_len {
                normal[0]
            } else {
                let scale = 1.0 / len1;
                Normal { v: DVector::new(next_deriv1b.x * scale, next_deriv1b.y * scale), len: len1 }
            };

            let len2 = vec_len(next_deriv3b);
            let mid_normal2 = if len2 < self.min_len {
                normal[1]
            } else {
                let scale = 1.0 / len2;
                Normal { v: DVector::new(next_deriv3b.x * scale, next_deriv3b.y * scale), len: len2 }
            };

            if len1 < self.min_len {
                self.emit_first_point(next[0], make_segment(SegmentOrder::Line, false), dir)?;
            } else {
                self.process_cubic(
                    &[next[0], next[1], next[2], next[3]],
                    &[next_deriv0, next_deriv1b, next_deriv2b],
                    &[start_normal, mid_normal1],
                    dir,
                    first,
                )?;
            }
            self.start_segment(next[2], mid_normal2.v, dir)?;
            if len2 < self.min_len {
                self.emit_first_point(next[3], make_segment(SegmentOrder::Line, false), dir)?;
            } else {
                self.process_cubic(
                    &[next[3], next[4], next[5], next[6]],
                    &[next_deriv2b, next_deriv3b, next_deriv4],
                    &[mid_normal2, end_normal],
                    dir,
                    false,
                )?;
            }
            return Ok(());
        }

        let scale = 1.0 / len;
        let mid_normal = Normal { v: DVector::new(next_deriv2.x * scale, next_deriv2.y * scale), len };
        let start_normal = Normal { v: normal[0].v, len: normal[0].len / 2.0 };
        let end_normal = Normal { v: normal[1].v, len: normal[1].len / 2.0 };

        self.process_cubic(
            &[next[0], next[1], next[2], next[3]],
            &[next_deriv0, next_deriv1, next_deriv2],
            &[start_normal, mid_normal],
            dir,
            first,
        )?;
        self.process_cubic(
            &[next[3], next[4], next[5], next[6]],
            &[next_deriv2, next_deriv3, next_deriv4],
            &[mid_normal, end_normal],
            dir,
            false,
        )
    }

    /// Offset a source cubic spline, degenerating to a line or a
    /// quadratic-like two-point case when one or more control arms
    /// collapse within `eps`.
    fn add_cubic(&mut self, pt: &[Vector; 4], dir: i32) -> Result<()> {
        let mut flags = 9i32;

        let mut dx0 = pt[1].x - pt[0].x;
        let mut dy0 = pt[1].y - pt[0].y;
        if dx0 > -self.eps && dx0 < self.eps && dy0 > -self.eps && dy0 < self.eps {
            dx0 = pt[2].x - pt[0].x;
            dy0 = pt[2].y - pt[0].y;
            if dx0 > -self.eps && dx0 < self.eps && dy0 > -self.eps && dy0 < self.eps {
                return self.add_line(pt[0], pt[3], dir);
            }
            flags ^= 1;
        }

        let mut dx2 = pt[3].x - pt[2].x;
        let mut dy2 = pt[3].y - pt[2].y;
        if dx2 > -self.eps && dx2 < self.eps && dy2 > -self.eps && dy2 < self.eps {
            dx2 = pt[3].x - pt[1].x;
            dy2 = pt[3].y - pt[1].y;
            if dx2 > -self.eps && dx2 < self.eps && dy2 > -self.eps && dy2 < self.eps {
                return self.add_line(pt[0], pt[3], dir);
            }
            flags ^= 4;
        }

        if flags == 12 {
            return self.add_line(pt[0], pt[3], dir);
        }

        let dx1 = pt[(flags >> 2) as usize].x - pt[(flags & 3) as usize].x;
        let dy1 = pt[(flags >> 2) as usize].y - pt[(flags & 3) as usize].y;

        let deriv = [
            DVector::new(dy0 as f64 * self.yscale, -(dx0 as f64) * self.xscale),
            DVector::new(dy1 as f64 * self.yscale, -(dx1 as f64) * self.xscale),
            DVector::new(dy2 as f64 * self.yscale, -(dx2 as f64) * self.xscale),
        ];
        let len0 = vec_len(deriv[0]);
        let scale0 = 1.0 / len0;
        let len2 = vec_len(deriv[2]);
        let scale2 = 1.0 / len2;
        let normal = [
            Normal { v: DVector::new(deriv[0].x * scale0, deriv[0].y * scale0), len: len0 },
            Normal { v: DVector::new(deriv[2].x * scale2, deriv[2].y * scale2), len: len2 },
        ];

        let first = self.contour_start;
        self.start_segment(pt[0], normal[0].v, dir)?;
        self.process_cubic(pt, &deriv, &normal, dir, first)
    }

    fn close_contour(&mut self, last_point: Vector, dir: i32) -> Result<()> {
        if self.contour_start {
            let d = if dir & 3 == 3 { 1 } else { dir };
            self.draw_circle(last_point, d)?;
        } else {
            self.add_line(last_point, self.first_point, dir)?;
            self.start_segment(self.first_point, self.first_normal, dir)?;
            let normal = self.first_normal;
            self.emit_point(
                self.first_point,
                normal,
                make_segment(SegmentOrder::Line, false),
                !self.last_skip & dir & self.first_skip,
            )?;
            if self.last_normal != self.first_normal {
                let last_normal = self.last_normal;
                self.fix_first_point(self.first_point, last_normal, !self.last_skip & dir & !self.first_skip);
            }
            self.contour_start = true;
        }
        if dir & 1 != 0 {
            self.result[0].close_contour();
        }
        if dir & 2 != 0 {
            self.result[1].close_contour();
        }
        self.contour_first[0] = self.result[0].n_points();
        self.contour_first[1] = self.result[1].n_points();
        Ok(())
    }
}

/// Stroke `path` with border radii `xbord`/`ybord` (both in 26.6 fixed
/// point), returning the two resulting offset outlines: `(outer, inner)`.
/// `eps` is the allowable error, in the same fixed-point units, below
/// which a source edge is treated as degenerate.
pub fn stroke_outline(path: &Outline, xbord: i32, ybord: i32, eps: i32) -> Result<(Outline, Outline)> {
    const DIR: i32 = 3;
    let rad = xbord.max(ybord);
    if rad < eps {
        return Err(RenderError::InvalidOutline("border radius smaller than error tolerance".into()));
    }

    for p in &path.points {
        if p.x < OUTLINE_MIN || p.x > OUTLINE_MAX || p.y < OUTLINE_MIN || p.y > OUTLINE_MAX {
            return Err(RenderError::InvalidOutline("source point outside representable range".into()));
        }
    }

    let rel_err = eps as f64 / rad as f64;
    let e = (2.0 * rel_err).sqrt();

    let mut str = StrokerState {
        result: [Outline::new(), Outline::new()],
        contour_first: [0, 0],
        xbord: xbord as f64,
        ybord: ybord as f64,
        xscale: 1.0 / eps.max(xbord) as f64,
        yscale: 1.0 / eps.max(ybord) as f64,
        eps,
        contour_start: true,
        first_skip: 0,
        last_skip: 0,
        first_normal: DVector::new(0.0, 0.0),
        last_normal: DVector::new(0.0, 0.0),
        first_point: Vector::ZERO,
        merge_cos: 1.0 - rel_err,
        split_cos: 1.0 + 8.0 * rel_err - 4.0 * (1.0 + rel_err) * e,
        min_len: rel_err / 4.0,
        err_q: 8.0 * (1.0 + rel_err) * (1.0 + rel_err),
        err_c: 390.0 * rel_err * rel_err,
        err_a: e,
    };

    let mut cursor = 0usize;
    let mut contour_start_idx = 0usize;
    for &seg in &path.segments {
        let order = segment_order(seg)
            .ok_or_else(|| RenderError::InvalidOutline("malformed segment byte".into()))?;
        let n = order.n_points();
        cursor += n;

        let ends_contour = segment_ends_contour(seg);
        let end_idx = if ends_contour { contour_start_idx } else { cursor };
        let end = path.points[end_idx];

        match order {
            SegmentOrder::Line => str.add_line(path.points[cursor - 1], end, DIR)?,
            SegmentOrder::Quadratic => {
                let pts = [path.points[cursor - 2], path.points[cursor - 1], end];
                str.add_quadratic(&pts, DIR)?;
            }
            SegmentOrder::Cubic => {
                let pts = [
                    path.points[cursor - 3],
                    path.points[cursor - 2],
                    path.points[cursor - 1],
                    end,
                ];
                str.add_cubic(&pts, DIR)?;
            }
        }

        if ends_contour {
            str.close_contour(end, DIR)?;
            contour_start_idx = cursor;
        }
    }

    let [outer, inner] = str.result;
    Ok((outer, inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::to_fixed;

    fn square(side: f64) -> Outline {
        let s = to_fixed(side);
        let mut o = Outline::new();
        for &(x, y) in &[(0, 0), (0, s), (s, s), (s, 0)] {
            o.add_point(Vector::new(x, y)).unwrap();
        }
        for _ in 0..3 {
            o.add_segment(make_segment(SegmentOrder::Line, false));
        }
        o.add_segment(make_segment(SegmentOrder::Line, true));
        o
    }

    #[test]
    fn stroking_a_square_produces_two_valid_outlines() {
        let src = square(10.0);
        let (outer, inner) = stroke_outline(&src, to_fixed(2.0), to_fixed(2.0), 4).unwrap();
        assert!(outer.validate());
        assert!(inner.validate());
        assert!(!outer.is_empty());
        assert!(!inner.is_empty());
    }

    #[test]
    fn stroking_expands_the_control_box() {
        let src = square(10.0);
        let border = to_fixed(2.0);
        let (outer, _inner) = stroke_outline(&src, border, border, 4).unwrap();
        let src_box = src.get_cbox();
        let outer_box = outer.get_cbox();
        assert!(outer_box.x1 < src_box.x1);
        assert!(outer_box.x2 > src_box.x2);
        assert!(outer_box.y1 < src_box.y1);
        assert!(outer_box.y2 > src_box.y2);
    }

    #[test]
    fn zero_length_edges_are_skipped() {
        let mut o = Outline::new();
        let s = to_fixed(10.0);
        // Duplicate point collapses one edge to zero length.
        for &(x, y) in &[(0, 0), (0, 0), (0, s), (s, s), (s, 0)] {
            o.add_point(Vector::new(x, y)).unwrap();
        }
        for _ in 0..4 {
            o.add_segment(make_segment(SegmentOrder::Line, false));
        }
        o.add_segment(make_segment(SegmentOrder::Line, true));
        let (outer, inner) = stroke_outline(&o, to_fixed(1.0), to_fixed(1.0), 4).unwrap();
        assert!(outer.validate());
        assert!(inner.validate());
    }

    #[test]
    fn rejects_border_radius_smaller_than_epsilon() {
        let src = square(10.0);
        assert!(stroke_outline(&src, 1, 1, 4).is_err());
    }
}
