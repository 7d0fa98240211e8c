//! # ass-render
//!
//! A VSFilter-compatible rendering core for ASS/SSA subtitles: outline
//! acquisition, stroking, a tiled anti-aliasing rasterizer, cascade
//! Gaussian blur, and a reference-counted render cache, composed into a
//! frame-by-frame subtitle renderer.
//!
//! This crate renders already-laid-out glyph runs into RGBA image
//! fragments; it does not parse ASS script files, shape text, or load
//! fonts — callers provide a [`layout::FontProvider`] and pre-shaped
//! [`layout::TextLayout`] input (see `DESIGN.md` for the full scope
//! boundary).
//!
//! ## Pipeline
//!
//! 1. **Outline** — a glyph or drawing command string becomes a
//!    canonical point/segment [`outline::Outline`].
//! 2. **Stroke** — borders are generated as offset-curve outlines.
//! 3. **Rasterize** — outlines become anti-aliased coverage bitmaps via
//!    recursive tile subdivision.
//! 4. **Blur** — border and shadow bitmaps go through a cascade Gaussian
//!    blur.
//! 5. **Compose** — bitmaps are placed into frame-relative image
//!    fragments, with overlapping events resolved by collision
//!    placement.
//!
//! Every stage below the frame composer is cached at multiple levels
//! (outline, bitmap, glyph metrics, composite) to keep steady-state
//! playback cheap; see [`cache`].

pub mod basics;
pub mod bitmap;
pub mod blur;
pub mod cache;
pub mod color;
pub mod drawing;
pub mod error;
#[cfg(feature = "font")]
pub mod font_outline;
pub mod frame;
pub mod glyph;
pub mod layout;
pub mod outline;
pub mod rasterizer;
pub mod simul_eq;
pub mod stroker;
pub mod transform;

pub use color::Color;
pub use error::{RenderError, Result};
pub use outline::Outline;
