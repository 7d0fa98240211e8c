//! Top-level entry point: owns the caches, drives the per-glyph
//! pipeline over a frame's events, and composes + diffs the result.
//!
//! This is deliberately thin — everything it does is delegate to
//! [`glyph`](crate::glyph), [`frame`](crate::frame) and
//! [`cache`](crate::cache). Its only independent responsibility is the
//! "library reference lost" failure mode: if a caller's font source
//! starts failing entirely, `render_frame` still returns (an empty)
//! `Vec<ImageFragment>` rather than propagating an error, so the next
//! call can still succeed.

use crate::bitmap::{self, Bitmap};
use crate::cache::{BitmapCacheKey, BitmapCacheValue, Cache, OutlineCacheKey, OutlineCacheValue};
use crate::color::Color;
use crate::frame::{compose_frame, detect_change, EventRender, FrameChange};
use crate::glyph::{bitmap_cache_size, outline_cache_size, resolve_clip_mask, GlyphOutlineSource, GlyphPipeline};
use crate::layout::{FragmentType, ImageFragment, KaraokeKind, RenderSettings, TextLayout};

/// Byte budgets applied to each cache before every frame, mirroring
/// the reference engine's per-frame `cut` calls.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub outline_bytes: usize,
    pub bitmap_bytes: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        CacheLimits {
            outline_bytes: 8 << 20,
            bitmap_bytes: 32 << 20,
        }
    }
}

/// Owns the render caches and the previous frame's fragment list for
/// change detection across calls.
pub struct Renderer {
    settings: RenderSettings,
    limits: CacheLimits,
    outline_cache: Cache<OutlineCacheKey, OutlineCacheValue>,
    bitmap_cache: Cache<BitmapCacheKey, BitmapCacheValue>,
    /// `None` until the first `render_frame` call, so that call always
    /// reports `FrameChange::Content` even for an empty event list --
    /// there is no previous frame to be identical *to*.
    prev_frame: Option<Vec<ImageFragment>>,
}

impl Renderer {
    pub fn new(settings: RenderSettings, limits: CacheLimits) -> Self {
        Renderer {
            settings,
            limits,
            outline_cache: Cache::new(limits.outline_bytes, outline_cache_size),
            bitmap_cache: Cache::new(limits.bitmap_bytes, bitmap_cache_size),
            prev_frame: None,
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Render one frame from already-laid-out events. Never fails from
    /// the caller's perspective — per-glyph failures are caught deeper
    /// in the pipeline and degrade to placeholders, and the overall
    /// frame always produces a (possibly empty) fragment list plus a
    /// change classification against the previous call.
    pub fn render_frame<S: GlyphOutlineSource>(&mut self, source: &S, layouts: &[TextLayout]) -> (Vec<ImageFragment>, FrameChange) {
        self.outline_cache.cut(self.limits.outline_bytes);
        self.bitmap_cache.cut(self.limits.bitmap_bytes);

        let mut events = Vec::with_capacity(layouts.len());
        for layout in layouts {
            events.push(self.render_event(source, layout));
        }

        let fragments = compose_frame(events);
        let change = match &self.prev_frame {
            Some(prev) => detect_change(prev, &fragments),
            None => FrameChange::Content,
        };
        self.prev_frame = Some(fragments.clone());
        (fragments, change)
    }

    fn render_event<S: GlyphOutlineSource>(&mut self, source: &S, layout: &TextLayout) -> EventRender {
        let mut pipeline = GlyphPipeline::new(&mut self.outline_cache, &mut self.bitmap_cache);
        pipeline.border_scale = 1.0;
        pipeline.scale_x_par = self.settings.effective_par();

        let mut fragments = Vec::new();
        let mut min_top = i32::MAX;
        let mut max_bottom = i32::MIN;
        let mut min_left = i32::MAX;
        let mut max_right = i32::MIN;

        // Resolve every glyph's raw (unblurred) fill/border bitmaps first,
        // then batch contiguous glyphs that share every attribute the
        // blur/shadow/paint stages care about into one run (§4.F): their
        // bitmaps are combined via add_bitmaps into a single shape before
        // blurring once, instead of blurring each glyph's fragment on its
        // own and letting the edges show where they were cut apart.
        let mut raw: Vec<(&crate::layout::GlyphRecord, Option<Bitmap>, Option<Bitmap>)> = Vec::new();
        for glyph in &layout.glyphs {
            if glyph.line_break {
                continue;
            }
            let (fill, border) = pipeline.process(source, glyph);
            raw.push((glyph, fill, border));
        }

        let mut i = 0;
        while i < raw.len() {
            let mut j = i + 1;
            while j < raw.len() && same_run(&raw[i].0.style, &raw[j].0.style, &raw[i].0.karaoke, &raw[j].0.karaoke) {
                j += 1;
            }

            let glyph = raw[i].0;
            let fill_refs: Vec<&Bitmap> = raw[i..j].iter().filter_map(|(_, f, _)| f.as_ref()).collect();
            let border_refs: Vec<&Bitmap> = raw[i..j].iter().filter_map(|(_, _, b)| b.as_ref()).collect();
            let mut fill = bitmap::combine_bitmaps(&fill_refs);
            let mut border = bitmap::combine_bitmaps(&border_refs);

            // Edge blur, then the cascade Gaussian blur, apply to the
            // fill/border bitmaps themselves (§4.F); the shadow below is
            // generated as a copy afterward, so it inherits both.
            for bm in [&mut fill, &mut border].into_iter().flatten() {
                if glyph.style.be > 0 {
                    bitmap::be_blur(bm, glyph.style.be);
                }
                if glyph.style.blur > 0.0 {
                    bitmap::gaussian_blur_bitmap(bm, glyph.style.blur);
                }
            }

            i = j;

            // Painter's order: border first, fill second. A karaoke sweep
            // (§8 scenario 5) splits whichever bitmap it targets into an
            // already-swept half (secondary color) and a not-yet-swept
            // half (the glyph's ordinary color) at the caller-resolved
            // frame-absolute pixel column.
            match glyph.karaoke.kind {
                KaraokeKind::Outline => {
                    if let Some(border_bm) = &border {
                        let (swept, unswept) = bitmap::split_at_x(border_bm, glyph.karaoke.split_x);
                        if let Some(bm) = &swept {
                            push_fragment(&mut fragments, bm, glyph.style.secondary_color, FragmentType::Outline, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                        }
                        if let Some(bm) = &unswept {
                            push_fragment(&mut fragments, bm, glyph.style.border_color, FragmentType::Outline, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                        }
                    }
                    if let Some(fill_bm) = &fill {
                        push_fragment(&mut fragments, fill_bm, glyph.style.color, FragmentType::Character, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                    }
                }
                KaraokeKind::None => {
                    if let Some(border_bm) = &border {
                        push_fragment(&mut fragments, border_bm, glyph.style.border_color, FragmentType::Outline, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                    }
                    if let Some(fill_bm) = &fill {
                        push_fragment(&mut fragments, fill_bm, glyph.style.color, FragmentType::Character, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                    }
                }
                KaraokeKind::Fill => {
                    if let Some(border_bm) = &border {
                        push_fragment(&mut fragments, border_bm, glyph.style.border_color, FragmentType::Outline, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                    }
                    if let Some(fill_bm) = &fill {
                        let (swept, unswept) = bitmap::split_at_x(fill_bm, glyph.karaoke.split_x);
                        if let Some(bm) = &swept {
                            push_fragment(&mut fragments, bm, glyph.style.secondary_color, FragmentType::Character, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                        }
                        if let Some(bm) = &unswept {
                            push_fragment(&mut fragments, bm, glyph.style.color, FragmentType::Character, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                        }
                    }
                }
            }

            if glyph.style.shadow_x != 0.0 || glyph.style.shadow_y != 0.0 {
                // Border-style 3 (opaque box) shadows the fill; otherwise
                // prefer the outline, falling back to fill if there's no
                // border (§4.F).
                let shadow_source = if glyph.style.border_style == 3 {
                    fill.as_ref()
                } else {
                    border.as_ref().or(fill.as_ref())
                };
                if let Some(src) = shadow_source {
                    let mut shadow = src.clone();
                    // Split the shadow offset into whole pixels (moved via
                    // left/top) and a sub-pixel remainder, which needs the
                    // bilinear resample in shift_bitmap to show up at all.
                    let shift_x = (glyph.style.shadow_x * 64.0).round() as i32;
                    let shift_y = (glyph.style.shadow_y * 64.0).round() as i32;
                    shadow.left += shift_x.div_euclid(64);
                    shadow.top += shift_y.div_euclid(64);
                    bitmap::shift_bitmap(&mut shadow, shift_x.rem_euclid(64), shift_y.rem_euclid(64));
                    push_fragment(&mut fragments, &shadow, glyph.style.shadow_color, FragmentType::Shadow, &mut min_top, &mut max_bottom, &mut min_left, &mut max_right);
                }
            }
        }

        // Shadow fragments were appended after fill, but painter's order
        // wants shadow beneath everything: sort so shadow < outline < character.
        fragments.sort_by_key(|f| match f.kind {
            FragmentType::Shadow => 0,
            FragmentType::Outline => 1,
            FragmentType::Character => 2,
        });

        // Vector clip (§4.F, §8 scenario 6): alpha-multiply every
        // fragment this event produced by the clip path's rasterized
        // mask. A degenerate (empty) path rasterizes to a zero-sized
        // mask, which `apply_clip_mask_raw` already treats as "outside
        // the mask everywhere" -- `\clip` on an empty path clips
        // everything away, `\iclip` on one leaves everything visible.
        if let Some(clip) = &layout.clip {
            let mask_value = resolve_clip_mask(&mut self.bitmap_cache, clip);
            let empty_mask = Bitmap::alloc(0, 0);
            let mask = mask_value.glyph.as_ref().unwrap_or(&empty_mask);
            for frag in fragments.iter_mut() {
                let clipped = bitmap::apply_clip_mask_raw(&frag.buffer, frag.w, frag.h, frag.stride, frag.dst_x, frag.dst_y, mask, clip.inverted);
                frag.buffer = std::rc::Rc::new(clipped);
            }
        }

        if fragments.is_empty() {
            min_top = 0;
            max_bottom = 0;
            min_left = 0;
            max_right = 0;
        }

        EventRender {
            layer: layout.layer,
            read_order: layout.read_order,
            fragments,
            top: min_top,
            left: min_left,
            width: (max_right - min_left).max(0),
            height: (max_bottom - min_top).max(0),
            detect_collisions: layout.detect_collisions,
            shift_down: !layout.shift_direction_down,
        }
    }
}

/// Whether two glyphs belong in the same bitmap-assembly run: every
/// attribute that feeds the blur, the shadow, the karaoke split, or the
/// final paint color has to match, or merging them would blur across a
/// style change the viewer is supposed to see.
fn same_run(a: &crate::layout::StyleAttrs, b: &crate::layout::StyleAttrs, ka: &crate::layout::KaraokeState, kb: &crate::layout::KaraokeState) -> bool {
    a.color == b.color
        && a.secondary_color == b.secondary_color
        && a.border_color == b.border_color
        && a.shadow_color == b.shadow_color
        && a.border_style == b.border_style
        && a.blur == b.blur
        && a.be == b.be
        && a.shadow_x == b.shadow_x
        && a.shadow_y == b.shadow_y
        && ka.kind == kb.kind
        && ka.split_x == kb.split_x
}

fn push_fragment(
    fragments: &mut Vec<ImageFragment>,
    bm: &Bitmap,
    color: Color,
    kind: FragmentType,
    min_top: &mut i32,
    max_bottom: &mut i32,
    min_left: &mut i32,
    max_right: &mut i32,
) {
    if bm.is_empty() || color.is_fully_transparent() {
        return;
    }
    *min_top = (*min_top).min(bm.top);
    *max_bottom = (*max_bottom).max(bm.top + bm.h);
    *min_left = (*min_left).min(bm.left);
    *max_right = (*max_right).max(bm.left + bm.w);
    fragments.push(ImageFragment {
        w: bm.w,
        h: bm.h,
        stride: bm.stride,
        buffer: std::rc::Rc::new(bm.buffer.clone()),
        color,
        dst_x: bm.left,
        dst_y: bm.top,
        kind,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::Vector;
    use crate::error::RenderError;
    use crate::layout::{GlyphRecord, StyleAttrs};
    use crate::outline::Outline;
    use crate::Result;

    struct NoFonts;
    impl GlyphOutlineSource for NoFonts {
        fn glyph_outline(&self, font_ref: u64, _f: u32, _g: u32, _s: f64) -> Result<(Outline, i32, i32, Vector)> {
            Err(RenderError::FontLookupFailed(font_ref))
        }
    }

    fn style() -> StyleAttrs {
        StyleAttrs {
            color: Color::rgb(255, 255, 255),
            secondary_color: Color::rgb(255, 0, 0),
            border_color: Color::rgb(0, 0, 0),
            shadow_color: Color::rgb(0, 0, 0),
            border_x: 0.0,
            border_y: 0.0,
            border_style: 1,
            shadow_x: 0.0,
            shadow_y: 0.0,
            blur: 0.0,
            be: 0,
            scale_x: 1.0,
            scale_y: 1.0,
            bold: 0,
            italic: 0,
            frx: 0.0,
            fry: 0.0,
            frz: 0.0,
            fax: 0.0,
            fay: 0.0,
            hspacing: 0.0,
        }
    }

    #[test]
    fn empty_event_produces_no_fragments_and_reports_content_on_first_call() {
        let mut renderer = Renderer::new(RenderSettings::default(), CacheLimits::default());
        let layout = TextLayout {
            glyphs: vec![],
            layer: 0,
            read_order: 0,
            detect_collisions: true,
            shift_direction_down: true,
            clip: None,
        };
        let (frags, change) = renderer.render_frame(&NoFonts, &[layout]);
        assert!(frags.is_empty());
        assert_eq!(change, FrameChange::Content);
    }

    #[test]
    fn repeated_empty_frames_report_identical_after_the_first() {
        let mut renderer = Renderer::new(RenderSettings::default(), CacheLimits::default());
        let layout = TextLayout::default();
        let (_, first) = renderer.render_frame(&NoFonts, &[layout.clone()]);
        let (_, second) = renderer.render_frame(&NoFonts, &[layout]);
        assert_eq!(first, FrameChange::Content);
        assert_eq!(second, FrameChange::Identical);
    }

    #[test]
    fn drawing_glyph_renders_a_fragment_without_a_font_backend() {
        let mut renderer = Renderer::new(RenderSettings::default(), CacheLimits::default());
        let glyph = GlyphRecord {
            glyph_index: 0,
            face_index: 0,
            font_ref: 0,
            position: Vector::new(6400, 6400),
            cluster_advance: 640,
            style: style(),
            is_drawing: true,
            drawing_text: "m 0 0 l 640 0 640 640 0 640".to_string(),
            line_break: false,
            karaoke: Default::default(),
        };
        let layout = TextLayout {
            glyphs: vec![glyph],
            layer: 0,
            read_order: 0,
            detect_collisions: false,
            shift_direction_down: true,
            clip: None,
        };
        let (frags, _) = renderer.render_frame(&NoFonts, &[layout]);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].kind, FragmentType::Character);
    }

    #[test]
    fn karaoke_fill_splits_the_glyph_at_the_resolved_sweep_column() {
        let mut renderer = Renderer::new(RenderSettings::default(), CacheLimits::default());
        let mut glyph = GlyphRecord {
            glyph_index: 0,
            face_index: 0,
            font_ref: 0,
            position: Vector::new(0, 0),
            cluster_advance: 640,
            style: style(),
            is_drawing: true,
            drawing_text: "m 0 0 l 640 0 640 640 0 640".to_string(),
            line_break: false,
            karaoke: Default::default(),
        };
        glyph.karaoke = crate::layout::KaraokeState {
            kind: KaraokeKind::Fill,
            split_x: 5,
        };
        let layout = TextLayout {
            glyphs: vec![glyph],
            layer: 0,
            read_order: 0,
            detect_collisions: false,
            shift_direction_down: true,
            clip: None,
        };
        let (frags, _) = renderer.render_frame(&NoFonts, &[layout]);
        assert_eq!(frags.len(), 2, "expected a swept half and an unswept half");
        assert!(frags.iter().all(|f| f.kind == FragmentType::Character));
        assert!(frags.iter().any(|f| f.color == Color::rgb(255, 0, 0)));
        assert!(frags.iter().any(|f| f.color == Color::rgb(255, 255, 255)));
    }

    #[test]
    fn vector_clip_zeroes_pixels_outside_the_path() {
        let mut renderer = Renderer::new(RenderSettings::default(), CacheLimits::default());
        let glyph = GlyphRecord {
            glyph_index: 0,
            face_index: 0,
            font_ref: 0,
            position: Vector::new(0, 0),
            cluster_advance: 1280,
            style: style(),
            is_drawing: true,
            drawing_text: "m 0 0 l 1280 0 1280 1280 0 1280".to_string(),
            line_break: false,
            karaoke: Default::default(),
        };
        let layout = TextLayout {
            glyphs: vec![glyph],
            layer: 0,
            read_order: 0,
            detect_collisions: false,
            shift_direction_down: true,
            clip: Some(crate::layout::ClipPath {
                commands: "m 0 0 l 10 0 10 10 0 10".to_string(),
                inverted: false,
            }),
        };
        let (frags, _) = renderer.render_frame(&NoFonts, &[layout]);
        assert_eq!(frags.len(), 1);
        let frag = &frags[0];
        // Past column 10 (the clip square's right edge) every pixel in
        // any row must have been zeroed by the mask.
        for y in 0..frag.h {
            for x in 11..frag.w {
                let idx = (y * frag.stride + x) as usize;
                assert_eq!(frag.buffer[idx], 0, "pixel ({x},{y}) outside clip should be zero");
            }
        }
    }
}
