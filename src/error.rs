//! Error taxonomy for the rendering core.
//!
//! Most failures inside a render are *not* represented here: a malformed
//! glyph outline, a clamped style value, or a font lookup miss is handled
//! locally (the offending glyph or run is skipped, a diagnostic is
//! logged) and never surfaces past `Renderer::render_frame`. `RenderError`
//! exists for the smaller set of failures a caller needs to observe: a
//! cache that can't grow, or an outline/drawing that's too malformed to
//! even attempt a fallback for.

use thiserror::Error;

/// Failures a caller of the rendering core may need to react to.
///
/// Cache-key misses are not represented here — a miss is the normal path
/// that creates a new entry, not an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// An outline (from a font or the stroker) violated a structural
    /// invariant: a contour with no segments, a point outside
    /// `OUTLINE_MIN..=OUTLINE_MAX`, or a malformed tag sequence from the
    /// font-outline source.
    #[error("invalid outline: {0}")]
    InvalidOutline(String),

    /// A drawing-command string could not be parsed at all (as opposed
    /// to trailing-token truncation, which is not an error — see
    /// `DESIGN.md`).
    #[error("invalid drawing commands: {0}")]
    InvalidDrawing(String),

    /// A cache could not satisfy an allocation within its configured
    /// size ceiling even after a `cut`.
    #[error("cache `{cache}` exhausted (requested {requested} bytes, limit {limit} bytes)")]
    CacheExhausted {
        cache: &'static str,
        requested: usize,
        limit: usize,
    },

    /// The glyph's font reference could not resolve an outline or
    /// metrics. Callers that see this for a single glyph should treat it
    /// the same way the glyph pipeline does internally: substitute a
    /// zero-width, zero-advance placeholder and continue.
    #[error("font lookup failed for font reference {0:?}")]
    FontLookupFailed(u64),
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_messages_are_informative() {
        let e = RenderError::CacheExhausted {
            cache: "bitmap",
            requested: 4096,
            limit: 2048,
        };
        assert!(e.to_string().contains("bitmap"));
        assert!(e.to_string().contains("4096"));
    }
}
