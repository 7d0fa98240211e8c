//! ASS drawing-command (`\p`) parser: turns a vector-drawing string into
//! a canonical [`Outline`].
//!
//! The grammar is a flat stream of single-letter commands (`m`, `n`, `l`,
//! `b`, `q`, `s`, `c`) each followed by the coordinate pairs it consumes.
//! Unlike a strict parser, trailing incomplete commands (a `b` with fewer
//! than three points left in the stream, for example) are silently
//! dropped rather than rejected — this matches real-world scripts that
//! accumulate stray trailing tokens from editors, and is preserved
//! deliberately rather than "fixed" (see `DESIGN.md`).
//!
//! `q` (quadratic/conic Bezier) tokens are recognized by the tokenizer
//! but never produce geometry in the parse pass below — this mirrors the
//! reference renderer's own drawing parser, which tokenizes `q` without
//! a case in the command switch. Scripts don't use it in practice; we
//! keep the behavior rather than guess at an intended curve-degree
//! conversion.

use crate::basics::{to_fixed, RectI, Vector};
use crate::error::{RenderError, Result};
use crate::outline::{make_segment, Outline, SegmentOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenType {
    Move,
    MoveNc,
    Line,
    CubicBezier,
    ConicBezier,
    BSpline,
}

#[derive(Debug, Clone, Copy)]
struct DrawingToken {
    kind: TokenType,
    point: Vector,
}

/// Parses a leading floating-point literal from `s` at byte offset `pos`,
/// advancing `pos` past it. Returns `None` (without advancing) if no
/// number starts there.
fn parse_leading_double(s: &[u8], pos: &mut usize) -> Option<f64> {
    let start = *pos;
    let mut i = *pos;
    if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
        i += 1;
    }
    let digits_start = i;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
    }
    if i < s.len() && s[i] == b'.' {
        i += 1;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i == digits_start || (i == digits_start + 1 && s[digits_start] == b'.') {
        return None;
    }
    let text = std::str::from_utf8(&s[start..i]).ok()?;
    let val: f64 = text.parse().ok()?;
    *pos = i;
    Some(val)
}

fn token_check_values(tokens: &[DrawingToken], start: usize, count: usize, kind: TokenType) -> bool {
    if start + count > tokens.len() {
        return false;
    }
    tokens[start..start + count].iter().all(|t| t.kind == kind)
}

/// Tokenize a drawing string, expanding a trailing `c` (close b-spline)
/// into the three extra control points needed to close the spline.
fn tokenize(text: &str) -> Vec<DrawingToken> {
    let bytes = text.as_bytes();
    let mut pos = 0usize;
    let mut tokens: Vec<DrawingToken> = Vec::new();
    let mut spline_start: Option<usize> = None;

    let mut cur_type: Option<TokenType> = None;
    let mut point = Vector::ZERO;
    let mut is_set = 0u8;

    while pos < bytes.len() {
        let mut got_coord = false;
        let c = bytes[pos];

        if c == b'c' && spline_start.is_some() {
            let ss = spline_start.unwrap();
            if token_check_values(&tokens, ss + 1, 2, TokenType::BSpline) {
                for i in 0..3 {
                    let pt = tokens[ss + i].point;
                    tokens.push(DrawingToken {
                        kind: TokenType::BSpline,
                        point: pt,
                    });
                }
                spline_start = None;
            }
            pos += 1;
            continue;
        } else if is_set == 0 {
            let mut p = pos;
            if let Some(val) = parse_leading_double(bytes, &mut p) {
                point.x = to_fixed(val);
                is_set = 1;
                got_coord = true;
                pos = p;
            }
        } else if is_set == 1 {
            let mut p = pos;
            if let Some(val) = parse_leading_double(bytes, &mut p) {
                point.y = to_fixed(val);
                is_set = 2;
                got_coord = true;
                pos = p;
            }
        }

        if !got_coord {
            match c {
                b'm' => cur_type = Some(TokenType::Move),
                b'n' => cur_type = Some(TokenType::MoveNc),
                b'l' => cur_type = Some(TokenType::Line),
                b'b' => cur_type = Some(TokenType::CubicBezier),
                b'q' => cur_type = Some(TokenType::ConicBezier),
                b's' => cur_type = Some(TokenType::BSpline),
                _ => {}
            }
            is_set = 0;
            pos += 1;
        }

        if let Some(kind) = cur_type {
            if is_set == 2 {
                tokens.push(DrawingToken { kind, point });
                is_set = 0;
                if kind == TokenType::BSpline && spline_start.is_none() {
                    spline_start = Some(tokens.len() - 1);
                }
            }
        }
    }

    tokens
}

/// Resolved settings for a single drawing parse, mirroring the per-run
/// scale/baseline parameters a style override can attach to a `\p` block.
#[derive(Debug, Clone, Copy)]
pub struct DrawingSettings {
    /// Subpixel scale exponent, 1..=64 in the original unit (coordinates
    /// are divided by `2^(scale - 1)`).
    pub scale: u32,
    /// Baseline offset, applied after scaling.
    pub pbo: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl Default for DrawingSettings {
    fn default() -> Self {
        Self {
            scale: 1,
            pbo: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

/// Parsed drawing geometry: the outline plus the metrics derived from its
/// control box (advance and ascent/descent used to place it on the
/// baseline).
#[derive(Debug, Clone)]
pub struct ParsedDrawing {
    pub outline: Outline,
    pub advance: Vector,
    pub ascent: i32,
    pub descent: i32,
    pub cbox: RectI,
}

struct Translator {
    point_scale_x: f64,
    point_scale_y: f64,
    cbox: RectI,
}

impl Translator {
    fn translate(&mut self, p: Vector) -> Vector {
        let out = Vector::new(
            (self.point_scale_x * p.x as f64).round() as i32,
            (self.point_scale_y * p.y as f64).round() as i32,
        );
        self.cbox.update(&RectI::new(out.x, out.y, out.x, out.y));
        out
    }
}

/// Convert 4 raw control points of a uniform cubic B-spline segment into
/// the equivalent Bezier control points (the same blending the reference
/// renderer uses when expanding `s` commands).
fn spline_to_bezier(p: [Vector; 4]) -> [Vector; 4] {
    let x01 = (p[1].x - p[0].x) / 3;
    let y01 = (p[1].y - p[0].y) / 3;
    let x12 = (p[2].x - p[1].x) / 3;
    let y12 = (p[2].y - p[1].y) / 3;
    let x23 = (p[3].x - p[2].x) / 3;
    let y23 = (p[3].y - p[2].y) / 3;

    let mut out = p;
    out[0].x = p[1].x + ((x12 - x01) >> 1);
    out[0].y = p[1].y + ((y12 - y01) >> 1);
    out[3].x = p[2].x + ((x23 - x12) >> 1);
    out[3].y = p[2].y + ((y23 - y12) >> 1);
    out[1].x = p[1].x + x12;
    out[1].y = p[1].y + y12;
    out[2].x = p[2].x - x12;
    out[2].y = p[2].y - y12;
    out
}

/// Parse a `\p`-block drawing string into an outline plus baseline
/// metrics. `raw_mode` skips the baseline-placement pass (used for
/// vector clip paths, which are positioned by the caller instead).
pub fn parse_drawing(text: &str, settings: &DrawingSettings, raw_mode: bool) -> Result<ParsedDrawing> {
    if settings.scale == 0 {
        return Err(RenderError::InvalidDrawing("scale must be >= 1".into()));
    }
    let divisor = (1u64 << (settings.scale - 1)) as f64;
    let mut tr = Translator {
        point_scale_x: settings.scale_x / divisor,
        point_scale_y: settings.scale_y / divisor,
        cbox: RectI::reset(),
    };

    let tokens = tokenize(text);
    let mut outline = Outline::with_capacity(100, 100);
    let mut started = false;
    let mut pen = Vector::ZERO;

    let mut i = 0usize;
    while i < tokens.len() {
        match tokens[i].kind {
            TokenType::MoveNc => {
                pen = tr.translate(tokens[i].point);
                i += 1;
            }
            TokenType::Move => {
                pen = tr.translate(tokens[i].point);
                if started {
                    outline.add_segment(make_segment(SegmentOrder::Line, false));
                    outline.close_contour();
                    started = false;
                }
                i += 1;
            }
            TokenType::Line => {
                let to = tr.translate(tokens[i].point);
                if !started {
                    outline.add_point(pen)?;
                }
                outline.add_point(to)?;
                outline.add_segment(make_segment(SegmentOrder::Line, false));
                started = true;
                i += 1;
            }
            TokenType::CubicBezier => {
                if i > 0 && token_check_values(&tokens, i, 3, TokenType::CubicBezier) {
                    add_curve(&mut outline, &mut tr, [tokens[i - 1], tokens[i], tokens[i + 1], tokens[i + 2]], false, started)?;
                    started = true;
                    i += 3;
                } else {
                    i += 1;
                }
            }
            TokenType::BSpline => {
                if i > 0 && token_check_values(&tokens, i, 3, TokenType::BSpline) {
                    add_curve(&mut outline, &mut tr, [tokens[i - 1], tokens[i], tokens[i + 1], tokens[i + 2]], true, started)?;
                    started = true;
                    i += 1;
                } else {
                    i += 1;
                }
            }
            TokenType::ConicBezier => {
                i += 1;
            }
        }
    }

    if started {
        outline.add_segment(make_segment(SegmentOrder::Line, false));
        outline.close_contour();
    }

    let cbox = tr.cbox;
    if !cbox.is_valid() {
        return Ok(ParsedDrawing {
            outline,
            advance: Vector::ZERO,
            ascent: 0,
            descent: 0,
            cbox: RectI::new(0, 0, 0, 0),
        });
    }

    if raw_mode {
        return Ok(ParsedDrawing {
            outline,
            advance: Vector::new(cbox.x2 - cbox.x1, 0),
            ascent: 0,
            descent: 0,
            cbox,
        });
    }

    let advance = Vector::new(cbox.x2 - cbox.x1, 0);
    let pbo = settings.pbo / divisor;
    let descent = to_fixed(pbo * settings.scale_y);
    let ascent = cbox.y2 - cbox.y1 - descent;
    for p in &mut outline.points {
        p.y -= ascent;
    }

    Ok(ParsedDrawing {
        outline,
        advance,
        ascent,
        descent,
        cbox,
    })
}

fn add_curve(
    outline: &mut Outline,
    tr: &mut Translator,
    raw: [DrawingToken; 4],
    spline: bool,
    started: bool,
) -> Result<()> {
    let mut p = [Vector::ZERO; 4];
    for (slot, token) in p.iter_mut().zip(raw.iter()) {
        *slot = tr.translate(token.point);
    }
    if spline {
        p = spline_to_bezier(p);
    }
    if !started {
        outline.add_point(p[0])?;
    }
    outline.add_point(p[1])?;
    outline.add_point(p[2])?;
    outline.add_point(p[3])?;
    outline.add_segment(make_segment(SegmentOrder::Cubic, false));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_settings() -> DrawingSettings {
        DrawingSettings {
            scale: 1,
            pbo: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    #[test]
    fn parse_empty_string_yields_empty_outline() {
        let d = parse_drawing("", &default_settings(), false).unwrap();
        assert!(d.outline.is_empty());
    }

    #[test]
    fn parse_square_produces_closed_contour() {
        let d = parse_drawing("m 0 0 l 10 0 10 10 0 10", &default_settings(), true).unwrap();
        assert!(d.outline.validate());
        assert_eq!(d.outline.n_segments(), 4);
    }

    #[test]
    fn parse_line_without_move_uses_origin_as_pen() {
        let d = parse_drawing("l 10 0", &default_settings(), true).unwrap();
        assert!(d.outline.validate());
        assert_eq!(d.outline.points[0], Vector::ZERO);
    }

    #[test]
    fn conic_bezier_token_produces_no_geometry() {
        let d = parse_drawing("m 0 0 q 10 10 20 0", &default_settings(), true).unwrap();
        assert!(d.outline.is_empty());
    }

    #[test]
    fn cubic_bezier_requires_a_preceding_point() {
        // No move before the `b` — the first bezier token has no
        // `prev`, so it is skipped entirely, matching the reference
        // parser's token_check_values + token->prev guard.
        let d = parse_drawing("b 0 0 10 10 20 0", &default_settings(), true).unwrap();
        assert!(d.outline.is_empty());
    }

    #[test]
    fn cubic_bezier_after_move_produces_one_cubic_segment() {
        let d = parse_drawing("m 0 0 b 0 10 10 10 10 0", &default_settings(), true).unwrap();
        assert!(d.outline.validate());
        assert_eq!(d.outline.n_segments(), 2);
    }

    #[test]
    fn scale_divides_coordinates_by_power_of_two() {
        let settings = DrawingSettings {
            scale: 2,
            ..default_settings()
        };
        let d = parse_drawing("m 0 0 l 128 0", &settings, true).unwrap();
        // scale=2 halves coordinates (divisor = 2^(2-1) = 2).
        assert_eq!(d.outline.points[1].x, 64 * 64);
    }

    #[test]
    fn non_raw_mode_places_outline_on_baseline() {
        let d = parse_drawing("m 0 0 l 0 640 640 640 640 0", &default_settings(), false).unwrap();
        // Ascent equals the full cbox height when pbo is zero, so every
        // y coordinate should be shifted up by that amount.
        assert_eq!(d.ascent, 640 * 64);
    }
}
