//! Reference-counted, size-bounded caches for the render pipeline.
//!
//! Every expensive stage of the pipeline (outline conversion, glyph
//! rasterization, bitmap composition) is keyed by the parameters that
//! affect its result and cached behind an LRU eviction policy bounded
//! by a byte budget rather than an item count, since bitmaps vary
//! wildly in size. Unlike the teacher's hand-rolled intrusive
//! ref-counted cache, entries here are handed out as `Rc<V>`: a clone
//! held by in-flight render state keeps the strong count above one,
//! which is exactly the signal [`Cache::cut`] uses to skip entries
//! that are still in use instead of a manually incremented counter.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::rc::Rc;

use crate::basics::{RectI, Vector};
use crate::outline::Outline;
use crate::Result;

/// Quantize a floating-point value into a 16.16 fixed-point key
/// component, matching the granularity VSFilter hash keys use for
/// scale factors and shear amounts.
pub fn quantize_d16(v: f64) -> i64 {
    (v * 65536.0).round() as i64
}

/// Quantize a floating-point value into a 26.6 fixed-point key
/// component, matching the granularity used for border widths.
pub fn quantize_d6(v: f64) -> i64 {
    (v * 64.0).round() as i64
}

/// Snap a rotation angle to a coarse grid: VSFilter-compatible
/// rendering doesn't need sub-hundredth-of-a-degree cache precision,
/// and coarsening avoids a cache miss storm when an animation ticks a
/// rotation angle by a floating-point epsilon every frame.
pub fn rotation_key(radians: f64) -> i64 {
    (radians * 1800.0 / std::f64::consts::PI).round() as i64
}

/// Identifies a request to convert a glyph or drawing string into a
/// canonical [`Outline`] plus its generated borders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutlineCacheKey {
    Glyph {
        font_id: u64,
        face_index: u32,
        glyph_index: u32,
        font_size: i64,
        bold: i32,
        italic: i32,
        scale_x: i64,
        scale_y: i64,
        border_x: i64,
        border_y: i64,
        border_style: u8,
        hspacing: i64,
        flags: u32,
    },
    Drawing {
        hash: u64,
        scale_x: i64,
        scale_y: i64,
        border_x: i64,
        border_y: i64,
        border_style: u8,
        hspacing: i64,
        pbo: i64,
        scale: u32,
    },
}

/// A cached outline conversion result: the glyph's fill outline, its
/// two border outlines, the pre-rotation scaled bbox, and layout
/// metrics needed without re-deriving them from the font.
#[derive(Debug, Clone)]
pub struct OutlineCacheValue {
    pub outline: Outline,
    pub border: [Outline; 2],
    pub bbox_scaled: RectI,
    pub advance: Vector,
    pub ascent: i32,
    pub descent: i32,
}

/// Identifies a request to rasterize (and border/shadow-composite) an
/// already-transformed outline into a coverage bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BitmapCacheKey {
    Outline {
        outline_key: Box<OutlineCacheKey>,
        shift_x: i32,
        shift_y: i32,
        advance_x: i64,
        advance_y: i64,
        frx: i64,
        fry: i64,
        frz: i64,
        fax: i64,
        fay: i64,
    },
    Clip {
        outline_hash: u64,
        scale_x: i64,
        scale_y: i64,
        inverted: bool,
    },
}

/// A cached rasterization result: the glyph and border coverage
/// bitmaps, or `None` for either when the glyph is blank/unbordered.
#[derive(Debug, Clone)]
pub struct BitmapCacheValue {
    pub valid: bool,
    pub glyph: Option<crate::bitmap::Bitmap>,
    pub border: Option<crate::bitmap::Bitmap>,
}

/// Identifies a request to combine multiple glyph bitmap runs into one
/// blurred, shadow-extended composite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeCacheKey {
    pub be: i32,
    pub blur: i64,
    pub flags: u32,
    pub shadow_x: i64,
    pub shadow_y: i64,
    pub bitmap_refs: Vec<(u64, i32, i32)>,
}

/// Running hit/miss/size counters, mirroring what a caller would poll
/// to decide whether a cache is earning its keep.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u32,
    pub misses: u32,
    pub count: usize,
}

/// A size-bounded, LRU-evicting cache keyed by `K`, handing out
/// reference-counted values.
pub struct Cache<K, V> {
    map: HashMap<K, Rc<V>>,
    order: VecDeque<K>,
    size_of: fn(&V) -> usize,
    limit: usize,
    cache_size: usize,
    hits: u32,
    misses: u32,
}

impl<K: Eq + Hash + Clone, V> Cache<K, V> {
    pub fn new(limit: usize, size_of: fn(&V) -> usize) -> Self {
        Cache {
            map: HashMap::new(),
            order: VecDeque::new(),
            size_of,
            limit,
            cache_size: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up `key`, building and inserting a fresh value via `build`
    /// on a miss. `build` may fail (e.g. font lookup failure); a
    /// failed build is not cached.
    pub fn get_or_try_insert_with<F>(&mut self, key: K, build: F) -> Result<Rc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(v) = self.map.get(&key) {
            self.hits += 1;
            self.touch(&key);
            return Ok(v.clone());
        }
        self.misses += 1;
        let value = build()?;
        let size = (self.size_of)(&value);
        let rc = Rc::new(value);
        self.cache_size += size;
        self.map.insert(key.clone(), rc.clone());
        self.order.push_back(key);
        self.evict_to(self.limit);
        Ok(rc)
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
    }

    /// Evict least-recently-used entries, skipping any still held
    /// elsewhere (`Rc::strong_count > 1`), until `cache_size <= max_size`
    /// or every remaining entry is in use.
    pub fn cut(&mut self, max_size: usize) {
        self.evict_to(max_size);
    }

    fn evict_to(&mut self, max_size: usize) {
        if self.cache_size <= max_size {
            return;
        }
        let mut i = 0;
        while self.cache_size > max_size && i < self.order.len() {
            let key = &self.order[i];
            let in_use = self.map.get(key).map(|v| Rc::strong_count(v) > 1).unwrap_or(true);
            if in_use {
                i += 1;
                continue;
            }
            let key = self.order.remove(i).unwrap();
            if let Some(v) = self.map.remove(&key) {
                self.cache_size = self.cache_size.saturating_sub((self.size_of)(&v));
            }
        }
    }

    pub fn empty(&mut self) {
        self.map.clear();
        self.order.clear();
        self.cache_size = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.cache_size,
            hits: self.hits,
            misses: self.misses,
            count: self.map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size_of_usize(_: &usize) -> usize {
        1
    }

    #[test]
    fn repeated_lookup_is_a_hit_and_does_not_rebuild() {
        let mut cache: Cache<i32, usize> = Cache::new(100, size_of_usize);
        let mut builds = 0;
        cache.get_or_try_insert_with(1, || {
            builds += 1;
            Ok(10)
        }).unwrap();
        cache.get_or_try_insert_with(1, || {
            builds += 1;
            Ok(999)
        }).unwrap();
        assert_eq!(builds, 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn cut_evicts_unreferenced_entries_first() {
        let mut cache: Cache<i32, usize> = Cache::new(100, size_of_usize);
        for i in 0..5 {
            cache.get_or_try_insert_with(i, || Ok(i as usize)).unwrap();
        }
        let held = cache.get_or_try_insert_with(4, || Ok(4)).unwrap();
        cache.cut(1);
        assert!(cache.map.contains_key(&4));
        assert!(cache.stats().count <= 2 || Rc::strong_count(&held) > 1);
    }

    #[test]
    fn empty_clears_everything() {
        let mut cache: Cache<i32, usize> = Cache::new(100, size_of_usize);
        cache.get_or_try_insert_with(1, || Ok(1)).unwrap();
        cache.empty();
        assert_eq!(cache.stats().count, 0);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn quantize_round_trips_whole_numbers() {
        assert_eq!(quantize_d16(2.0), 131072);
        assert_eq!(quantize_d6(1.0), 64);
    }
}
