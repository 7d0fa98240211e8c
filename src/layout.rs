//! External interfaces: the shapes a caller provides to and receives
//! from the renderer.
//!
//! Everything in this module is a boundary type. The crate does not
//! parse ASS script files, shape text, or enumerate system fonts —
//! callers hand in a [`TextLayout`] (already positioned by an external
//! shaper) and a [`FontProvider`] (already backed by loaded font
//! files), and get back [`ImageFragment`]s to paint.

use crate::basics::Vector;
use crate::color::Color;

/// Hinting strategy requested for glyph outlines. The outline pipeline
/// in this crate does not grid-fit outlines itself (that happens in
/// the font backend before outlines reach [`crate::outline`]); this
/// enum exists so a `RenderSettings` can round-trip the caller's
/// intent through to a `FontProvider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HintingMode {
    None,
    Light,
    #[default]
    Normal,
    Native,
}

/// Complexity level requested of the external shaper; carried here
/// only because it's part of the resolved configuration a caller
/// passes down, not interpreted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapingLevel {
    #[default]
    Simple,
    Complex,
}

/// Resolved, already-validated frame configuration. Unlike script- or
/// command-line-level configuration (out of scope for this crate),
/// every field here is a concrete value ready to drive a render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub frame_w: i32,
    pub frame_h: i32,
    pub storage_w: i32,
    pub storage_h: i32,
    pub margin_left: i32,
    pub margin_right: i32,
    pub margin_vertical: i32,
    /// Pixel aspect ratio; 0 means "derive from frame/storage dimensions".
    pub pixel_aspect_ratio: f64,
    pub line_spacing: f64,
    pub line_position: f64,
    pub hinting: HintingMode,
    pub shaping: ShapingLevel,
    pub font_scale: f64,
    /// Bitmask of style fields the caller forces regardless of script
    /// styling (selective style override).
    pub style_override_mask: u32,
    pub default_font: String,
    pub default_family: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            frame_w: 0,
            frame_h: 0,
            storage_w: 0,
            storage_h: 0,
            margin_left: 0,
            margin_right: 0,
            margin_vertical: 0,
            pixel_aspect_ratio: 0.0,
            line_spacing: 1.0,
            line_position: 0.0,
            hinting: HintingMode::Normal,
            shaping: ShapingLevel::Simple,
            font_scale: 1.0,
            style_override_mask: 0,
            default_font: String::new(),
            default_family: String::new(),
        }
    }
}

impl RenderSettings {
    /// Effective PAR: the configured value, or derived from frame vs.
    /// storage dimensions when unset.
    pub fn effective_par(&self) -> f64 {
        if self.pixel_aspect_ratio > 0.0 {
            return self.pixel_aspect_ratio;
        }
        if self.storage_w == 0 || self.storage_h == 0 || self.frame_w == 0 || self.frame_h == 0 {
            return 1.0;
        }
        (self.frame_w as f64 / self.frame_h as f64) / (self.storage_w as f64 / self.storage_h as f64)
    }
}

/// Which karaoke sweep, if any, a glyph participates in, and where the
/// sweep currently sits. The caller (which tracks wall-clock time against
/// the event's `{\kf}`/`{\ko}` timing tags) resolves the sweep position
/// to a frame-absolute pixel column before handing the glyph to this
/// crate — the core has no notion of "current time" below the frame
/// composer, so it only ever sees an already-resolved split point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KaraokeKind {
    #[default]
    None,
    /// `\kf`/`\K`: the fill color sweeps left to right.
    Fill,
    /// `\ko`: the border color sweeps left to right instead of the fill.
    Outline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KaraokeState {
    pub kind: KaraokeKind,
    /// Frame-absolute pixel x-coordinate of the sweep boundary.
    pub split_x: i32,
}

/// Per-glyph style attributes the shaper resolved for this glyph,
/// independent of its position.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleAttrs {
    pub color: Color,
    /// Karaoke's "already swept" color (ASS `SecondaryColour`); unused
    /// unless `GlyphRecord::karaoke` is not [`KaraokeKind::None`].
    pub secondary_color: Color,
    pub border_color: Color,
    pub shadow_color: Color,
    pub border_x: f64,
    pub border_y: f64,
    pub border_style: u8,
    pub shadow_x: f64,
    pub shadow_y: f64,
    pub blur: f64,
    pub be: i32,
    pub scale_x: f64,
    pub scale_y: f64,
    pub bold: i32,
    pub italic: i32,
    pub frx: f64,
    pub fry: f64,
    pub frz: f64,
    pub fax: f64,
    pub fay: f64,
    pub hspacing: f64,
}

/// One positioned glyph from an already-shaped run.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRecord {
    pub glyph_index: u32,
    pub face_index: u32,
    pub font_ref: u64,
    /// Pen position in 26.6 fixed point, frame-relative.
    pub position: Vector,
    pub cluster_advance: i32,
    pub style: StyleAttrs,
    pub is_drawing: bool,
    pub drawing_text: String,
    pub line_break: bool,
    pub karaoke: KaraokeState,
}

/// A `\clip`/`\iclip` vector mask attached to an event: every fragment
/// the event produces has its coverage alpha-multiplied by this path's
/// rasterization, zeroing pixels outside it (§4.F, §8 scenario 6).
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPath {
    /// Drawing-command text, in the same `m`/`l`/`b`/`s` grammar as a
    /// `\p` drawing, already in frame-absolute pixel coordinates.
    pub commands: String,
    /// `\iclip`: keep what's *outside* the path instead of inside.
    pub inverted: bool,
}

/// An ordered, already-shaped sequence of glyphs for one event.
#[derive(Debug, Clone, Default)]
pub struct TextLayout {
    pub glyphs: Vec<GlyphRecord>,
    pub layer: i32,
    pub read_order: i32,
    pub detect_collisions: bool,
    pub shift_direction_down: bool,
    pub clip: Option<ClipPath>,
}

/// Diagnostic classification of a rendered fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentType {
    Character,
    Outline,
    Shadow,
}

/// One paintable alpha-coverage image, frame-relative.
#[derive(Debug, Clone)]
pub struct ImageFragment {
    pub w: i32,
    pub h: i32,
    pub stride: i32,
    pub buffer: std::rc::Rc<Vec<u8>>,
    pub color: Color,
    pub dst_x: i32,
    pub dst_y: i32,
    pub kind: FragmentType,
}

/// What a caller provides to resolve font references into outline
/// data and substitutions. Font enumeration and file loading happen
/// entirely on the caller's side of this boundary.
pub trait FontProvider {
    fn check_postscript(&self, handle: u64) -> bool;
    fn check_glyph(&self, handle: u64, codepoint: u32) -> bool;
    fn get_data(&self, handle: u64, offset: usize, len: usize) -> Vec<u8>;
    fn match_fonts(&self, family: &str);
    fn get_fallback(&self, family: &str, codepoint: u32) -> Option<String>;
    fn get_substitutions(&self, family: &str) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_unit_line_spacing() {
        let s = RenderSettings::default();
        assert_eq!(s.line_spacing, 1.0);
    }

    #[test]
    fn effective_par_derives_from_dimensions_when_unset() {
        let mut s = RenderSettings::default();
        s.frame_w = 1920;
        s.frame_h = 1080;
        s.storage_w = 1280;
        s.storage_h = 720;
        assert!((s.effective_par() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn effective_par_prefers_explicit_value() {
        let mut s = RenderSettings::default();
        s.pixel_aspect_ratio = 1.5;
        assert_eq!(s.effective_par(), 1.5);
    }
}
