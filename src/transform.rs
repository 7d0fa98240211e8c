//! 3-D glyph transform (`\frx`/`\fry`/`\frz`/`\fax`/`\fay`).
//!
//! VSFilter renders rotated glyphs by building a full 3x3 projection
//! matrix (rotate around each axis, shear, then a fixed-distance
//! perspective divide) and applying it to every outline point, rather
//! than doing a 2-D affine approximation. The shift vector recenters
//! the rotation around the glyph's baseline origin before the matrix
//! is applied, and is subtracted back out afterward.

use crate::basics::Vector;
use crate::outline::Outline;

/// A 3x3 transform matrix in row-major order, as built by
/// [`Transform3D::matrix`].
pub type Matrix3 = [[f64; 3]; 3];

/// Parameters for a 3-D glyph rotation/shear, in the same units
/// VSFilter exposes through `\frx`/`\fry`/`\frz`/`\fax`/`\fay`: the
/// rotation angles are in radians, the shear factors are unitless.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub frx: f64,
    pub fry: f64,
    pub frz: f64,
    pub fax: f64,
    pub fay: f64,
}

impl Transform3D {
    pub fn is_identity(&self) -> bool {
        self.frx == 0.0 && self.fry == 0.0 && self.frz == 0.0 && self.fax == 0.0 && self.fay == 0.0
    }

    /// Build the projection matrix for this rotation, applied around
    /// `shift` (the rotation origin, typically the glyph baseline
    /// point) at blur-scale `scale` and baseline-to-ascent distance
    /// `yshift` (used to counter-shear the shift vector itself, since
    /// VSFilter applies `\fax` to the pivot too).
    pub fn matrix(&self, shift: Vector, scale: f64, yshift: i32) -> Matrix3 {
        let (sx, cx) = (-self.frx.sin(), self.frx.cos());
        let (sy, cy) = (self.fry.sin(), self.fry.cos());
        let (sz, cz) = (-self.frz.sin(), self.frz.cos());

        let x1 = [1.0, self.fax, shift.x as f64 + self.fax * yshift as f64];
        let y1 = [self.fay, 1.0, shift.y as f64];

        let mut x2 = [0.0; 3];
        let mut y2 = [0.0; 3];
        for i in 0..3 {
            x2[i] = x1[i] * cz - y1[i] * sz;
            y2[i] = x1[i] * sz + y1[i] * cz;
        }

        let mut y3 = [0.0; 3];
        let mut z3 = [0.0; 3];
        for i in 0..3 {
            y3[i] = y2[i] * cx;
            z3[i] = y2[i] * sx;
        }

        let mut x4 = [0.0; 3];
        let mut z4 = [0.0; 3];
        for i in 0..3 {
            x4[i] = x2[i] * cy - z3[i] * sy;
            z4[i] = x2[i] * sy + z3[i] * cy;
        }

        let dist = 20000.0 * scale;
        let mut m = [[0.0; 3]; 3];
        for i in 0..3 {
            m[0][i] = x4[i] * dist;
            m[1][i] = y3[i] * dist;
            m[2][i] = z4[i];
        }
        m[2][2] += dist;
        m
    }

    /// Apply this transform to every point of `outlines`, in place.
    /// A no-op when the transform is the identity.
    pub fn apply(&self, shift: Vector, outlines: &mut [Outline], scale: f64, yshift: i32) {
        if self.is_identity() {
            return;
        }
        let m = self.matrix(shift, scale, yshift);
        for outline in outlines.iter_mut() {
            for p in outline.points.iter_mut() {
                let (px, py) = (p.x as f64, p.y as f64);
                let v0 = m[0][0] * px + m[0][1] * py + m[0][2];
                let v1 = m[1][0] * px + m[1][1] * py + m[1][2];
                let v2 = m[2][0] * px + m[2][1] * py + m[2][2];
                let w = 1.0 / v2.max(1000.0);
                p.x = (v0 * w).round() as i32 - shift.x;
                p.y = (v1 * w).round() as i32 - shift.y;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::{make_segment, SegmentOrder};

    fn unit_square() -> Outline {
        let mut o = Outline::new();
        for &(x, y) in &[(0, 0), (100, 0), (100, 100), (0, 100)] {
            o.add_point(Vector::new(x, y)).unwrap();
        }
        for i in 0..4 {
            o.add_segment(make_segment(SegmentOrder::Line, i == 3));
        }
        o
    }

    #[test]
    fn identity_transform_is_noop() {
        let t = Transform3D {
            frx: 0.0,
            fry: 0.0,
            frz: 0.0,
            fax: 0.0,
            fay: 0.0,
        };
        let mut outlines = [unit_square()];
        let before = outlines[0].points.clone();
        t.apply(Vector::new(0, 0), &mut outlines, 1.0, 0);
        assert_eq!(outlines[0].points, before);
    }

    #[test]
    fn z_rotation_by_half_turn_flips_points() {
        let t = Transform3D {
            frx: 0.0,
            fry: 0.0,
            frz: std::f64::consts::PI,
            fax: 0.0,
            fay: 0.0,
        };
        let mut outlines = [unit_square()];
        t.apply(Vector::new(0, 0), &mut outlines, 1.0, 0);
        // A half-turn around z negates x and y (up to perspective scaling).
        let p = outlines[0].points[1];
        assert!(p.x < 0, "expected x to flip sign, got {}", p.x);
    }

    #[test]
    fn shift_is_applied_then_subtracted_back() {
        let t = Transform3D {
            frx: 0.0,
            fry: 0.0,
            frz: 0.1,
            fax: 0.0,
            fay: 0.0,
        };
        let shift = Vector::new(50, 50);
        let mut outlines = [unit_square()];
        t.apply(shift, &mut outlines, 1.0, 0);
        // Output stays in roughly the same coordinate range as input,
        // since shift is added before rotation and removed after.
        let cbox = outlines[0].get_cbox();
        assert!(cbox.x1 > -500 && cbox.x2 < 1000);
    }
}
