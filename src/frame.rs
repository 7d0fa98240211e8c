//! Frame composer: sorts, collision-resolves, and concatenates one
//! frame's worth of per-event image fragments, then classifies how the
//! result differs from the previous frame.
//!
//! Event layout and rendering themselves happen upstream (per-event,
//! via [`crate::glyph`]); this module only does the parts that need
//! visibility across every event in the frame at once: layer/read-order
//! sorting, vertical collision placement, and the previous/current
//! frame diff.

use crate::layout::ImageFragment;

/// One event's contribution to a frame: its rendered fragments plus
/// the placement/collision metadata needed to resolve overlaps with
/// other events sharing the same layer.
#[derive(Debug, Clone)]
pub struct EventRender {
    pub layer: i32,
    pub read_order: i32,
    pub fragments: Vec<ImageFragment>,
    pub top: i32,
    pub left: i32,
    pub width: i32,
    pub height: i32,
    pub detect_collisions: bool,
    /// `true` shifts down on collision (top-aligned events), `false`
    /// shifts up (bottom-aligned events).
    pub shift_down: bool,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    a: i32,
    b: i32,
    ha: i32,
    hb: i32,
}

fn overlap(s: &Segment, t: &Segment) -> bool {
    !(s.b <= t.a || s.a >= t.b || s.hb <= t.ha || s.ha >= t.hb)
}

/// Find the smallest vertical shift (in the direction given by `dir`,
/// `true` = down) that moves `s` clear of every segment in `fixed`,
/// then insert it into `fixed` so later events avoid it too.
fn fit_segment(s: Segment, fixed: &mut Vec<Segment>, dir: bool) -> i32 {
    let mut shift = 0;
    if dir {
        for f in fixed.iter() {
            let moved = Segment {
                a: s.a + shift,
                b: s.b + shift,
                ..s
            };
            if overlap(&moved, f) {
                shift = f.b - s.a;
            }
        }
    } else {
        for f in fixed.iter().rev() {
            let moved = Segment {
                a: s.a + shift,
                b: s.b + shift,
                ..s
            };
            if overlap(&moved, f) {
                shift = f.a - s.b;
            }
        }
    }
    fixed.push(Segment {
        a: s.a + shift,
        b: s.b + shift,
        ha: s.ha,
        hb: s.hb,
    });
    fixed.sort_by_key(|seg| seg.a);
    shift
}

/// Resolve vertical collisions within one layer's worth of events,
/// shifting fragment `dst_y` in place. Events with `detect_collisions
/// == false` are left untouched and do not participate as obstacles.
fn fix_collisions(events: &mut [EventRender]) {
    let mut fixed: Vec<Segment> = Vec::new();
    for ev in events.iter_mut() {
        if !ev.detect_collisions {
            continue;
        }
        let s = Segment {
            a: ev.top,
            b: ev.top + ev.height,
            ha: ev.left,
            hb: ev.left + ev.width,
        };
        let shift = fit_segment(s, &mut fixed, ev.shift_down);
        if shift != 0 {
            for frag in ev.fragments.iter_mut() {
                frag.dst_y += shift;
            }
            ev.top += shift;
        }
    }
}

/// Sort by layer then read-order, resolve per-layer vertical
/// collisions, and concatenate into one frame's fragment list.
pub fn compose_frame(mut events: Vec<EventRender>) -> Vec<ImageFragment> {
    events.sort_by_key(|e| (e.layer, e.read_order));

    let mut i = 0;
    while i < events.len() {
        let mut j = i + 1;
        while j < events.len() && events[j].layer == events[i].layer {
            j += 1;
        }
        fix_collisions(&mut events[i..j]);
        i = j;
    }

    events.into_iter().flat_map(|e| e.fragments).collect()
}

/// Classification of how two consecutive frames' fragment lists differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameChange {
    Identical,
    PositionsOnly,
    Content,
}

fn fragment_same_content(a: &ImageFragment, b: &ImageFragment) -> bool {
    a.w == b.w && a.h == b.h && a.stride == b.stride && a.color == b.color && std::rc::Rc::ptr_eq(&a.buffer, &b.buffer)
}

/// Compare the previous frame's fragment list against the current
/// one, the same way a caller would decide whether a repaint is
/// needed at all versus just a blit offset.
pub fn detect_change(prev: &[ImageFragment], cur: &[ImageFragment]) -> FrameChange {
    if prev.len() != cur.len() {
        return FrameChange::Content;
    }
    let mut positions_differ = false;
    for (a, b) in prev.iter().zip(cur.iter()) {
        if !fragment_same_content(a, b) {
            return FrameChange::Content;
        }
        if a.dst_x != b.dst_x || a.dst_y != b.dst_y {
            positions_differ = true;
        }
    }
    if positions_differ {
        FrameChange::PositionsOnly
    } else {
        FrameChange::Identical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::layout::FragmentType;
    use std::rc::Rc;

    fn fragment(dst_x: i32, dst_y: i32) -> ImageFragment {
        ImageFragment {
            w: 4,
            h: 4,
            stride: 4,
            buffer: Rc::new(vec![255u8; 16]),
            color: Color::rgb(255, 255, 255),
            dst_x,
            dst_y,
            kind: FragmentType::Character,
        }
    }

    fn event(top: i32, height: i32, shift_down: bool) -> EventRender {
        EventRender {
            layer: 0,
            read_order: 0,
            fragments: vec![fragment(0, top)],
            top,
            left: 0,
            width: 10,
            height,
            detect_collisions: true,
            shift_down,
        }
    }

    #[test]
    fn non_overlapping_events_are_not_shifted() {
        let events = vec![event(0, 10, true), event(20, 10, true)];
        let frags = compose_frame(events);
        assert_eq!(frags[0].dst_y, 0);
        assert_eq!(frags[1].dst_y, 20);
    }

    #[test]
    fn overlapping_events_are_shifted_apart() {
        let events = vec![event(0, 10, true), event(5, 10, true)];
        let frags = compose_frame(events);
        assert_eq!(frags[0].dst_y, 0);
        assert!(frags[1].dst_y >= 10, "expected second event pushed clear, got {}", frags[1].dst_y);
    }

    #[test]
    fn identical_fragment_lists_report_identical() {
        let prev = vec![fragment(1, 2)];
        let cur = vec![fragment(1, 2)];
        // Same Rc-wrapped buffer needed for a true content match.
        let shared = prev[0].buffer.clone();
        let mut cur2 = cur;
        cur2[0].buffer = shared;
        assert_eq!(detect_change(&prev, &cur2), FrameChange::Identical);
    }

    #[test]
    fn moved_fragment_reports_positions_only() {
        let mut prev = vec![fragment(1, 2)];
        let mut cur = vec![fragment(5, 2)];
        let shared = prev[0].buffer.clone();
        cur[0].buffer = shared.clone();
        prev[0].buffer = shared;
        assert_eq!(detect_change(&prev, &cur), FrameChange::PositionsOnly);
    }

    #[test]
    fn different_length_lists_report_content() {
        let prev = vec![fragment(0, 0)];
        let cur = vec![fragment(0, 0), fragment(1, 1)];
        assert_eq!(detect_change(&prev, &cur), FrameChange::Content);
    }
}
