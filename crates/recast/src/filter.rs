// filter.rs - Walkability filters over the solid heightfield

use crate::heightfield::{Heightfield, SPAN_NONE};
use crate::{RC_NULL_AREA, dir_offset_x, dir_offset_y};

const MAX_HEIGHT: i32 = 0xffff;

/// Mark non-walkable spans walkable when they sit within `walkable_climb` of
/// a walkable span directly below (curbs, stairs).
pub fn filter_low_hanging_walkable_obstacles(hf: &mut Heightfield, walkable_climb: i32) {
    for y in 0..hf.height {
        for x in 0..hf.width {
            let mut prev = SPAN_NONE;
            let mut prev_walkable = false;
            let mut prev_area = RC_NULL_AREA;
            let mut cur = hf.first(x, y);
            while cur != SPAN_NONE {
                let walkable = hf.span(cur).area != RC_NULL_AREA;
                if !walkable && prev_walkable {
                    let below = hf.span(prev).smax as i32;
                    if (hf.span(cur).smax as i32 - below).abs() <= walkable_climb {
                        hf.span_mut(cur).area = prev_area;
                    }
                }
                // Copy the flag so it cannot propagate past several obstacles
                prev_walkable = walkable;
                prev_area = hf.span(cur).area;
                prev = cur;
                cur = hf.span(cur).next;
            }
        }
    }
}

/// Remove spans that are next to a drop deeper than `walkable_climb`, or whose
/// reachable neighbours differ in height by more than `walkable_climb`.
pub fn filter_ledge_spans(hf: &mut Heightfield, walkable_height: i32, walkable_climb: i32) {
    let w = hf.width;
    let h = hf.height;
    for y in 0..h {
        for x in 0..w {
            let mut cur = hf.first(x, y);
            while cur != SPAN_NONE {
                let s = *hf.span(cur);
                if s.area == RC_NULL_AREA {
                    cur = s.next;
                    continue;
                }

                let bot = s.smax as i32;
                let top = if s.next != SPAN_NONE { hf.span(s.next).smin as i32 } else { MAX_HEIGHT };

                let mut minh = MAX_HEIGHT;
                let mut asmin = bot;
                let mut asmax = bot;

                for dir in 0..4 {
                    let dx = x + dir_offset_x(dir);
                    let dy = y + dir_offset_y(dir);
                    if dx < 0 || dy < 0 || dx >= w || dy >= h {
                        minh = minh.min(-walkable_climb - bot);
                        continue;
                    }

                    // From minus infinity to the first span
                    let first = hf.first(dx, dy);
                    let nbot = -walkable_climb;
                    let ntop = if first != SPAN_NONE { hf.span(first).smin as i32 } else { MAX_HEIGHT };
                    if top.min(ntop) - bot.max(nbot) > walkable_height {
                        minh = minh.min(nbot - bot);
                    }

                    for ni in hf.column(dx, dy) {
                        let ns = hf.span(ni);
                        let nbot = ns.smax as i32;
                        let ntop = if ns.next != SPAN_NONE { hf.span(ns.next).smin as i32 } else { MAX_HEIGHT };
                        if top.min(ntop) - bot.max(nbot) > walkable_height {
                            minh = minh.min(nbot - bot);
                            if (nbot - bot).abs() <= walkable_climb {
                                asmin = asmin.min(nbot);
                                asmax = asmax.max(nbot);
                            }
                        }
                    }
                }

                if minh < -walkable_climb || asmax - asmin > walkable_climb {
                    hf.span_mut(cur).area = RC_NULL_AREA;
                }
                cur = s.next;
            }
        }
    }
}

/// Remove walkable spans without `walkable_height` of clearance above them
pub fn filter_walkable_low_height_spans(hf: &mut Heightfield, walkable_height: i32) {
    for y in 0..hf.height {
        for x in 0..hf.width {
            let mut cur = hf.first(x, y);
            while cur != SPAN_NONE {
                let s = *hf.span(cur);
                let bot = s.smax as i32;
                let top = if s.next != SPAN_NONE { hf.span(s.next).smin as i32 } else { MAX_HEIGHT };
                if top - bot <= walkable_height {
                    hf.span_mut(cur).area = RC_NULL_AREA;
                }
                cur = s.next;
            }
        }
    }
}
