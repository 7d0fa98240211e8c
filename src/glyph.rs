//! Glyph pipeline: turns one positioned [`GlyphRecord`](crate::layout::GlyphRecord)
//! into cached fill/border bitmaps, per the five steps in the render
//! pipeline's glyph stage — outline lookup, bitmap-key composition,
//! 3-D transform, PAR correction, and rasterization.

use std::rc::Rc;

use crate::basics::{RectI, Vector};
use crate::bitmap::{outline_to_bitmap, Bitmap};
use crate::cache::{
    quantize_d16, quantize_d6, rotation_key, BitmapCacheKey, BitmapCacheValue, Cache, OutlineCacheKey, OutlineCacheValue,
};
use crate::drawing::{parse_drawing, DrawingSettings};
use crate::error::RenderError;
use crate::layout::{ClipPath, GlyphRecord};
use crate::outline::Outline;
use crate::stroker::stroke_outline;
use crate::transform::Transform3D;
use crate::Result;

/// Resolves a font reference + glyph index to a raw outline, ascent,
/// descent and advance. Implemented outside this crate (e.g. by the
/// `font` feature's ttf-parser adapter) since font parsing itself is
/// out of scope here.
pub trait GlyphOutlineSource {
    fn glyph_outline(&self, font_ref: u64, face_index: u32, glyph_index: u32, font_size: f64) -> Result<(Outline, i32, i32, Vector)>;
}

/// A glyph whose font reference could not be resolved: rendered as
/// nothing, advancing as nothing. The pipeline continues to the next
/// glyph rather than aborting the run.
pub fn blank_placeholder() -> OutlineCacheValue {
    OutlineCacheValue {
        outline: Outline::new(),
        border: [Outline::new(), Outline::new()],
        bbox_scaled: RectI::reset(),
        advance: Vector::new(0, 0),
        ascent: 0,
        descent: 0,
    }
}

fn outline_cache_key(g: &GlyphRecord, border_scale: f64) -> OutlineCacheKey {
    let bx = quantize_d6(g.style.border_x * border_scale);
    let by = quantize_d6(g.style.border_y * border_scale);
    let hspacing = if g.style.border_style == 3 {
        quantize_d16(g.style.hspacing)
    } else {
        0
    };
    if g.is_drawing {
        OutlineCacheKey::Drawing {
            hash: {
                use std::collections::hash_map::DefaultHasher;
                use std::hash::{Hash, Hasher};
                let mut h = DefaultHasher::new();
                g.drawing_text.hash(&mut h);
                h.finish()
            },
            scale_x: quantize_d16(g.style.scale_x),
            scale_y: quantize_d16(g.style.scale_y),
            border_x: bx,
            border_y: by,
            border_style: g.style.border_style,
            hspacing,
            pbo: 0,
            scale: 1,
        }
    } else {
        OutlineCacheKey::Glyph {
            font_id: g.font_ref,
            face_index: g.face_index,
            glyph_index: g.glyph_index,
            font_size: quantize_d6(g.cluster_advance as f64),
            bold: g.style.bold,
            italic: g.style.italic,
            scale_x: quantize_d16(g.style.scale_x),
            scale_y: quantize_d16(g.style.scale_y),
            border_x: bx,
            border_y: by,
            border_style: g.style.border_style,
            hspacing,
            flags: 0,
        }
    }
}

fn bitmap_cache_key(g: &GlyphRecord, outline_key: OutlineCacheKey) -> BitmapCacheKey {
    const SUBPIXEL_MASK: i32 = (1 << 3) - 1;
    BitmapCacheKey::Outline {
        outline_key: Box::new(outline_key),
        shift_x: g.position.x & SUBPIXEL_MASK,
        shift_y: g.position.y & SUBPIXEL_MASK,
        advance_x: g.position.x as i64,
        advance_y: g.position.y as i64,
        frx: rotation_key(g.style.frx),
        fry: rotation_key(g.style.fry),
        frz: rotation_key(g.style.frz),
        fax: quantize_d16(g.style.fax),
        fay: quantize_d16(g.style.fay),
    }
}

fn outline_value_size(v: &OutlineCacheValue) -> usize {
    (v.outline.n_points() + v.border[0].n_points() + v.border[1].n_points()) * std::mem::size_of::<Vector>()
}

fn bitmap_value_size(v: &BitmapCacheValue) -> usize {
    let g = v.glyph.as_ref().map(|b| (b.w * b.h) as usize).unwrap_or(0);
    let o = v.border.as_ref().map(|b| (b.w * b.h) as usize).unwrap_or(0);
    g + o
}

/// Build (or cache-hit) the fill and border outlines for a glyph.
pub fn resolve_outline<S: GlyphOutlineSource>(
    cache: &mut Cache<OutlineCacheKey, OutlineCacheValue>,
    source: &S,
    g: &GlyphRecord,
    border_scale: f64,
) -> Rc<OutlineCacheValue> {
    let key = outline_cache_key(g, border_scale);
    let built = cache.get_or_try_insert_with(key.clone(), || {
        if g.is_drawing {
            let settings = DrawingSettings {
                scale_x: g.style.scale_x,
                scale_y: g.style.scale_y,
                ..Default::default()
            };
            let parsed = parse_drawing(&g.drawing_text, &settings, false)?;
            let xbord = (g.style.border_x * border_scale * 64.0).round() as i32;
            let ybord = (g.style.border_y * border_scale * 64.0).round() as i32;
            let border = if xbord > 0 || ybord > 0 {
                stroke_outline(&parsed.outline, xbord, ybord, 2)?
            } else {
                (Outline::new(), Outline::new())
            };
            Ok(OutlineCacheValue {
                outline: parsed.outline,
                border: [border.0, border.1],
                bbox_scaled: parsed.cbox,
                advance: parsed.advance,
                ascent: parsed.ascent,
                descent: parsed.descent,
            })
        } else {
            match source.glyph_outline(g.font_ref, g.face_index, g.glyph_index, g.cluster_advance as f64) {
                Ok((outline, ascent, descent, advance)) => {
                    let xbord = (g.style.border_x * border_scale * 64.0).round() as i32;
                    let ybord = (g.style.border_y * border_scale * 64.0).round() as i32;
                    let border = if xbord > 0 || ybord > 0 {
                        stroke_outline(&outline, xbord, ybord, 2)?
                    } else {
                        (Outline::new(), Outline::new())
                    };
                    let bbox = outline.get_cbox();
                    Ok(OutlineCacheValue {
                        outline,
                        border: [border.0, border.1],
                        bbox_scaled: bbox,
                        advance,
                        ascent,
                        descent,
                    })
                }
                Err(RenderError::FontLookupFailed(handle)) => {
                    log::warn!("font lookup failed for handle {handle}, using blank placeholder");
                    Ok(blank_placeholder())
                }
                Err(e) => Err(e),
            }
        }
    });
    built.unwrap_or_else(|_| Rc::new(blank_placeholder()))
}

/// Apply the 3-D transform and PAR correction, then rasterize fill and
/// border outlines into cached bitmaps.
pub fn resolve_bitmaps(
    cache: &mut Cache<BitmapCacheKey, BitmapCacheValue>,
    g: &GlyphRecord,
    outline_value: &OutlineCacheValue,
    outline_key: OutlineCacheKey,
    scale_x_par: f64,
    blur_scale: f64,
) -> Rc<BitmapCacheValue> {
    let key = bitmap_cache_key(g, outline_key);
    cache
        .get_or_try_insert_with(key, || {
            let mut outlines = [outline_value.outline.clone(), outline_value.border[0].clone(), outline_value.border[1].clone()];

            let transform = Transform3D {
                frx: g.style.frx,
                fry: g.style.fry,
                frz: g.style.frz,
                fax: g.style.fax / g.style.scale_y * g.style.scale_x,
                fay: g.style.fay / g.style.scale_x * g.style.scale_y,
            };
            let shift = Vector::new(0, 0);
            transform.apply(shift, &mut outlines, blur_scale, outline_value.ascent);

            for o in outlines.iter_mut() {
                o.adjust(scale_x_par, (g.position.x & 7) as i32, (g.position.y & 7) as i32);
            }

            let glyph = if !outlines[0].is_empty() {
                Some(outline_to_bitmap(&outlines[0], crate::basics::FillingRule::NonZero)?)
            } else {
                None
            };
            let mut border_outline = outlines[1].clone();
            border_outline.segments.extend(outlines[2].segments.iter().copied());
            border_outline.points.extend(outlines[2].points.iter().copied());
            let border = if !border_outline.is_empty() {
                Some(outline_to_bitmap(&border_outline, crate::basics::FillingRule::NonZero)?)
            } else {
                None
            };

            Ok(BitmapCacheValue {
                valid: true,
                glyph,
                border,
            })
        })
        .unwrap_or_else(|_| {
            Rc::new(BitmapCacheValue {
                valid: false,
                glyph: None,
                border: None,
            })
        })
}

/// Build (or cache-hit) the rasterized mask for an event's `\clip`/
/// `\iclip` path (§4.F, §8 scenario 6). The path is parsed in raw mode
/// (no baseline placement — its coordinates are already frame-absolute)
/// and rasterized once per distinct `(commands, inverted)` pair; repeat
/// events sharing the same clip text hit the same bitmap cache entry.
pub fn resolve_clip_mask(cache: &mut Cache<BitmapCacheKey, BitmapCacheValue>, clip: &ClipPath) -> Rc<BitmapCacheValue> {
    let hash = {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut h = DefaultHasher::new();
        clip.commands.hash(&mut h);
        h.finish()
    };
    let key = BitmapCacheKey::Clip {
        outline_hash: hash,
        scale_x: quantize_d16(1.0),
        scale_y: quantize_d16(1.0),
        inverted: clip.inverted,
    };
    cache
        .get_or_try_insert_with(key, || {
            let parsed = parse_drawing(&clip.commands, &DrawingSettings::default(), true)?;
            let glyph = if !parsed.outline.is_empty() {
                Some(outline_to_bitmap(&parsed.outline, crate::basics::FillingRule::NonZero)?)
            } else {
                None
            };
            Ok(BitmapCacheValue { valid: true, glyph, border: None })
        })
        .unwrap_or_else(|_| Rc::new(BitmapCacheValue { valid: false, glyph: None, border: None }))
}

/// Convenience glue combining [`resolve_outline`] and [`resolve_bitmaps`]
/// for a single glyph.
pub struct GlyphPipeline<'a> {
    pub outline_cache: &'a mut Cache<OutlineCacheKey, OutlineCacheValue>,
    pub bitmap_cache: &'a mut Cache<BitmapCacheKey, BitmapCacheValue>,
    pub border_scale: f64,
    pub scale_x_par: f64,
    pub blur_scale: f64,
}

impl<'a> GlyphPipeline<'a> {
    pub fn new(outline_cache: &'a mut Cache<OutlineCacheKey, OutlineCacheValue>, bitmap_cache: &'a mut Cache<BitmapCacheKey, BitmapCacheValue>) -> Self {
        GlyphPipeline {
            outline_cache,
            bitmap_cache,
            border_scale: 1.0,
            scale_x_par: 1.0,
            blur_scale: 1.0,
        }
    }

    pub fn process<S: GlyphOutlineSource>(&mut self, source: &S, g: &GlyphRecord) -> (Option<Bitmap>, Option<Bitmap>) {
        let key = outline_cache_key(g, self.border_scale);
        let outline_value = resolve_outline(self.outline_cache, source, g, self.border_scale);
        let bitmaps = resolve_bitmaps(self.bitmap_cache, g, &outline_value, key, self.scale_x_par, self.blur_scale);
        (bitmaps.glyph.clone(), bitmaps.border.clone())
    }
}

pub fn outline_cache_size(v: &OutlineCacheValue) -> usize {
    outline_value_size(v)
}

pub fn bitmap_cache_size(v: &BitmapCacheValue) -> usize {
    bitmap_value_size(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::layout::StyleAttrs;

    struct FailingSource;
    impl GlyphOutlineSource for FailingSource {
        fn glyph_outline(&self, font_ref: u64, _face_index: u32, _glyph_index: u32, _font_size: f64) -> Result<(Outline, i32, i32, Vector)> {
            Err(RenderError::FontLookupFailed(font_ref))
        }
    }

    fn default_style() -> StyleAttrs {
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

    fn glyph(font_ref: u64) -> GlyphRecord {
        GlyphRecord {
            glyph_index: 1,
            face_index: 0,
            font_ref,
            position: Vector::new(0, 0),
            cluster_advance: 0,
            style: default_style(),
            is_drawing: false,
            drawing_text: String::new(),
            line_break: false,
            karaoke: Default::default(),
        }
    }

    #[test]
    fn font_lookup_failure_yields_blank_placeholder() {
        let mut outline_cache = Cache::new(1 << 20, outline_cache_size);
        let value = resolve_outline(&mut outline_cache, &FailingSource, &glyph(42), 1.0);
        assert!(value.outline.is_empty());
        assert_eq!(value.advance, Vector::new(0, 0));
    }

    #[test]
    fn drawing_glyph_parses_without_a_font_source() {
        let mut outline_cache = Cache::new(1 << 20, outline_cache_size);
        let mut g = glyph(0);
        g.is_drawing = true;
        g.drawing_text = "m 0 0 l 10 0 10 10 0 10".to_string();
        let value = resolve_outline(&mut outline_cache, &FailingSource, &g, 1.0);
        assert!(!value.outline.is_empty());
    }

    #[test]
    fn clip_mask_rasterizes_the_path_and_is_cached() {
        let mut bitmap_cache = Cache::new(1 << 20, bitmap_cache_size);
        let clip = ClipPath {
            commands: "m 0 0 l 100 0 100 100 0 100".to_string(),
            inverted: false,
        };
        let first = resolve_clip_mask(&mut bitmap_cache, &clip);
        assert!(first.valid);
        let mask = first.glyph.as_ref().expect("clip path should rasterize to a mask");
        assert!(mask.w > 0 && mask.h > 0);

        let second = resolve_clip_mask(&mut bitmap_cache, &clip);
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(bitmap_cache.stats().hits, 1);
    }
}
