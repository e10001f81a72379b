// compact.rs - Compact heightfield of walkable open space

use tracing::error;

use crate::heightfield::{Heightfield, SPAN_NONE};
use crate::{RC_NOT_CONNECTED, RC_NULL_AREA, Result, dir_offset_x, dir_offset_y};

const MAX_HEIGHT: i32 = 0xffff;

#[derive(Clone, Copy, Debug, Default)]
pub struct CompactCell {
    pub index: u32,
    pub count: u8,
}

/// Open space above a walkable solid span. `con` packs the neighbour layer
/// index of each of the four directions in 6 bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompactSpan {
    pub y: u16,
    pub reg: u16,
    pub con: u32,
    pub h: u8,
}

impl CompactSpan {
    #[inline]
    pub fn con(&self, dir: usize) -> u8 {
        ((self.con >> (dir * 6)) & 0x3f) as u8
    }

    #[inline]
    pub fn set_con(&mut self, dir: usize, layer: u8) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | (((layer as u32) & 0x3f) << shift);
    }

    #[inline]
    pub fn is_connected(&self, dir: usize) -> bool {
        self.con(dir) != RC_NOT_CONNECTED
    }
}

pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub border_size: i32,
    pub max_distance: u16,
    pub max_regions: u16,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    pub dist: Vec<u16>,
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    #[inline]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    #[inline]
    pub fn cell(&self, x: i32, y: i32) -> &CompactCell {
        &self.cells[(x + y * self.width) as usize]
    }

    /// Span index range of column (x, y)
    #[inline]
    pub fn cell_spans(&self, x: i32, y: i32) -> std::ops::Range<usize> {
        let c = self.cell(x, y);
        c.index as usize..c.index as usize + c.count as usize
    }

    /// Index of the span connected to `span` in direction `dir`
    #[inline]
    pub fn neighbour(&self, x: i32, y: i32, span: &CompactSpan, dir: usize) -> usize {
        let ax = x + dir_offset_x(dir);
        let ay = y + dir_offset_y(dir);
        self.cell(ax, ay).index as usize + span.con(dir) as usize
    }
}

/// Build the compact heightfield from the walkable spans of `hf`
pub fn build_compact_heightfield(walkable_height: i32, walkable_climb: i32, hf: &Heightfield) -> Result<CompactHeightfield> {
    let w = hf.width;
    let h = hf.height;
    let span_count = hf.walkable_span_count();

    let mut bmax = hf.bmax;
    bmax[1] += walkable_height as f32 * hf.ch;

    let mut chf = CompactHeightfield {
        width: w,
        height: h,
        walkable_height,
        walkable_climb,
        border_size: 0,
        max_distance: 0,
        max_regions: 0,
        bmin: hf.bmin,
        bmax,
        cs: hf.cs,
        ch: hf.ch,
        cells: vec![CompactCell::default(); (w * h) as usize],
        spans: Vec::with_capacity(span_count),
        dist: Vec::new(),
        areas: Vec::with_capacity(span_count),
    };

    for y in 0..h {
        for x in 0..w {
            let mut cur = hf.first(x, y);
            if cur == SPAN_NONE {
                continue;
            }
            let cell = &mut chf.cells[(x + y * w) as usize];
            cell.index = chf.spans.len() as u32;
            cell.count = 0;
            while cur != SPAN_NONE {
                let s = hf.span(cur);
                if s.area != RC_NULL_AREA {
                    let bot = s.smax as i32;
                    let top = if s.next != SPAN_NONE { hf.span(s.next).smin as i32 } else { MAX_HEIGHT };
                    chf.spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        reg: 0,
                        con: 0,
                        h: (top - bot).clamp(0, 0xff) as u8,
                    });
                    chf.areas.push(s.area);
                    cell.count = cell.count.saturating_add(1);
                }
                cur = s.next;
            }
        }
    }

    let max_layers = RC_NOT_CONNECTED as i32 - 1;
    let mut too_high = 0;
    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                let mut s = chf.spans[i];
                for dir in 0..4 {
                    s.set_con(dir, RC_NOT_CONNECTED);
                    let nx = x + dir_offset_x(dir);
                    let ny = y + dir_offset_y(dir);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let nc = *chf.cell(nx, ny);
                    for k in chf.cell_spans(nx, ny) {
                        let ns = &chf.spans[k];
                        let bot = s.y.max(ns.y) as i32;
                        let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                        if top - bot >= walkable_height && (ns.y as i32 - s.y as i32).abs() <= walkable_climb {
                            let layer = k as i32 - nc.index as i32;
                            if !(0..=max_layers).contains(&layer) {
                                too_high = too_high.max(layer);
                                continue;
                            }
                            s.set_con(dir, layer as u8);
                            break;
                        }
                    }
                }
                chf.spans[i] = s;
            }
        }
    }

    if too_high > max_layers {
        error!("Compact heightfield has too many layers {} (max: {})", too_high, max_layers);
    }

    Ok(chf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RC_WALKABLE_AREA;

    #[test]
    fn neighbours_connect_within_climb() {
        let mut hf = Heightfield::new(3, 1, [0.0; 3], [3.0, 40.0, 1.0], 1.0, 1.0).unwrap();
        hf.add_span(0, 0, 0, 10, RC_WALKABLE_AREA, 1);
        hf.add_span(1, 0, 0, 11, RC_WALKABLE_AREA, 1);
        hf.add_span(2, 0, 0, 30, RC_WALKABLE_AREA, 1);

        let chf = build_compact_heightfield(4, 2, &hf).unwrap();
        assert_eq!(chf.span_count(), 3);
        let left = chf.spans[0];
        let mid = chf.spans[1];
        assert_eq!(left.con(2), 0);
        assert!(!left.is_connected(0));
        assert_eq!(mid.con(0), 0);
        assert!(!mid.is_connected(2), "a 19 unit step is not climbable");
    }

    #[test]
    fn unwalkable_spans_are_skipped() {
        let mut hf = Heightfield::new(1, 1, [0.0; 3], [1.0, 40.0, 1.0], 1.0, 1.0).unwrap();
        hf.add_span(0, 0, 0, 5, RC_NULL_AREA, 1);
        hf.add_span(0, 0, 10, 12, RC_WALKABLE_AREA, 1);
        let chf = build_compact_heightfield(4, 2, &hf).unwrap();
        assert_eq!(chf.span_count(), 1);
        assert_eq!(chf.spans[0].y, 12);
        assert_eq!(chf.spans[0].h, 0xff);
    }
}
