// heightfield.rs - Solid span heightfield and triangle rasterization

use crate::math::{tri_normal, vmax, vmin};
use crate::{RC_NULL_AREA, RC_SPAN_MAX_HEIGHT, RC_WALKABLE_AREA, RecastError, Result};

/// End of a span list
pub const SPAN_NONE: u32 = u32::MAX;

/// A solid interval of one heightfield column
#[derive(Clone, Copy, Debug)]
pub struct Span {
    pub smin: u16,
    pub smax: u16,
    pub area: u8,
    pub next: u32,
}

/// Dynamic heightfield. Each column holds an ordered list of spans kept in a
/// shared pool; freed spans are recycled through a free list.
pub struct Heightfield {
    pub width: i32,
    pub height: i32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    columns: Vec<u32>,
    pool: Vec<Span>,
    free: u32,
}

impl Heightfield {
    pub fn new(width: i32, height: i32, bmin: [f32; 3], bmax: [f32; 3], cs: f32, ch: f32) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(RecastError::InvalidSize { width, height });
        }
        Ok(Heightfield {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![SPAN_NONE; (width * height) as usize],
            pool: Vec::new(),
            free: SPAN_NONE,
        })
    }

    /// Index of the lowest span in column (x, y)
    #[inline]
    pub fn first(&self, x: i32, y: i32) -> u32 {
        self.columns[(x + y * self.width) as usize]
    }

    #[inline]
    pub fn span(&self, index: u32) -> &Span {
        &self.pool[index as usize]
    }

    #[inline]
    pub fn span_mut(&mut self, index: u32) -> &mut Span {
        &mut self.pool[index as usize]
    }

    /// Iterate span indices of a column from bottom to top
    pub fn column(&self, x: i32, y: i32) -> ColumnIter<'_> {
        ColumnIter { hf: self, cur: self.first(x, y) }
    }

    /// Number of walkable spans over the whole field
    pub fn walkable_span_count(&self) -> usize {
        let mut count = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                count += self
                    .column(x, y)
                    .filter(|&i| self.span(i).area != RC_NULL_AREA)
                    .count();
            }
        }
        count
    }

    fn alloc_span(&mut self, span: Span) -> u32 {
        if self.free != SPAN_NONE {
            let index = self.free;
            self.free = self.pool[index as usize].next;
            self.pool[index as usize] = span;
            index
        } else {
            self.pool.push(span);
            (self.pool.len() - 1) as u32
        }
    }

    fn free_span(&mut self, index: u32) {
        self.pool[index as usize].next = self.free;
        self.free = index;
    }

    /// Insert a span into column (x, y), merging it with every span it overlaps.
    /// When the merged tops are within `merge_thr` the larger area id wins.
    pub fn add_span(&mut self, x: i32, y: i32, smin: u16, smax: u16, area: u8, merge_thr: i32) {
        let idx = (x + y * self.width) as usize;
        let mut new = Span { smin, smax, area, next: SPAN_NONE };

        let mut prev = SPAN_NONE;
        let mut cur = self.columns[idx];
        while cur != SPAN_NONE {
            let c = self.pool[cur as usize];
            if c.smin > new.smax {
                break;
            } else if c.smax < new.smin {
                prev = cur;
                cur = c.next;
            } else {
                new.smin = new.smin.min(c.smin);
                new.smax = new.smax.max(c.smax);
                if (new.smax as i32 - c.smax as i32).abs() <= merge_thr {
                    new.area = new.area.max(c.area);
                }
                let next = c.next;
                self.free_span(cur);
                if prev != SPAN_NONE {
                    self.pool[prev as usize].next = next;
                } else {
                    self.columns[idx] = next;
                }
                cur = next;
            }
        }

        if prev != SPAN_NONE {
            new.next = self.pool[prev as usize].next;
            let index = self.alloc_span(new);
            self.pool[prev as usize].next = index;
        } else {
            new.next = self.columns[idx];
            let index = self.alloc_span(new);
            self.columns[idx] = index;
        }
    }
}

pub struct ColumnIter<'a> {
    hf: &'a Heightfield,
    cur: u32,
}

impl Iterator for ColumnIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cur == SPAN_NONE {
            return None;
        }
        let index = self.cur;
        self.cur = self.hf.span(index).next;
        Some(index)
    }
}

// ============================================================================
// Triangle classification
// ============================================================================

/// Set the area of every triangle flatter than the slope limit to walkable
pub fn mark_walkable_triangles(walkable_slope_angle: f32, verts: &[f32], tris: &[i32], areas: &mut [u8]) {
    let thr = (walkable_slope_angle / 180.0 * std::f32::consts::PI).cos();
    for (i, tri) in tris.chunks_exact(3).enumerate() {
        if triangle_normal_y(verts, tri) > thr {
            areas[i] = RC_WALKABLE_AREA;
        }
    }
}

/// Clear the area of every triangle steeper than the slope limit
pub fn clear_unwalkable_triangles(walkable_slope_angle: f32, verts: &[f32], tris: &[i32], areas: &mut [u8]) {
    let thr = (walkable_slope_angle / 180.0 * std::f32::consts::PI).cos();
    for (i, tri) in tris.chunks_exact(3).enumerate() {
        if triangle_normal_y(verts, tri) <= thr {
            areas[i] = RC_NULL_AREA;
        }
    }
}

fn triangle_normal_y(verts: &[f32], tri: &[i32]) -> f32 {
    let v = |k: usize| &verts[tri[k] as usize * 3..tri[k] as usize * 3 + 3];
    tri_normal(v(0), v(1), v(2))[1]
}

// ============================================================================
// Rasterization
// ============================================================================

/// Rasterize indexed triangles into the heightfield
pub fn rasterize_triangles(
    hf: &mut Heightfield,
    verts: &[f32],
    tris: &[i32],
    areas: &[u8],
    flag_merge_thr: i32,
) -> Result<()> {
    if areas.len() * 3 != tris.len() {
        return Err(RecastError::Mismatch("one area per triangle expected"));
    }
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;
    for (i, tri) in tris.chunks_exact(3).enumerate() {
        let mut corners = [[0.0f32; 3]; 3];
        for k in 0..3 {
            let base = tri[k] as usize * 3;
            let v = verts
                .get(base..base + 3)
                .ok_or(RecastError::Mismatch("triangle index out of range"))?;
            corners[k] = [v[0], v[1], v[2]];
        }
        rasterize_tri(hf, &corners, areas[i], ics, ich, flag_merge_thr);
    }
    Ok(())
}

const POLY_BUF: usize = 7 * 3;

/// Split a convex polygon by the plane `axis = x`. Returns the vertex counts
/// of the part below the plane (`out1`) and the remainder (`out2`).
fn divide_poly(input: &[f32], nin: usize, out1: &mut [f32], out2: &mut [f32], x: f32, axis: usize) -> (usize, usize) {
    // earlier cuts may have consumed the whole polygon
    if nin == 0 {
        return (0, 0);
    }

    let mut d = [0.0f32; 12];
    for i in 0..nin {
        d[i] = x - input[i * 3 + axis];
    }

    let (mut m, mut n) = (0usize, 0usize);
    let mut j = nin - 1;
    for i in 0..nin {
        let ina = d[j] >= 0.0;
        let inb = d[i] >= 0.0;
        if ina != inb {
            let s = d[j] / (d[j] - d[i]);
            for k in 0..3 {
                let v = input[j * 3 + k] + (input[i * 3 + k] - input[j * 3 + k]) * s;
                out1[m * 3 + k] = v;
                out2[n * 3 + k] = v;
            }
            m += 1;
            n += 1;
            if d[i] > 0.0 {
                out1[m * 3..m * 3 + 3].copy_from_slice(&input[i * 3..i * 3 + 3]);
                m += 1;
            } else if d[i] < 0.0 {
                out2[n * 3..n * 3 + 3].copy_from_slice(&input[i * 3..i * 3 + 3]);
                n += 1;
            }
        } else {
            if d[i] >= 0.0 {
                out1[m * 3..m * 3 + 3].copy_from_slice(&input[i * 3..i * 3 + 3]);
                m += 1;
                if d[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            out2[n * 3..n * 3 + 3].copy_from_slice(&input[i * 3..i * 3 + 3]);
            n += 1;
        }
        j = i;
    }
    (m, n)
}

fn rasterize_tri(hf: &mut Heightfield, v: &[[f32; 3]; 3], area: u8, ics: f32, ich: f32, flag_merge_thr: i32) {
    let w = hf.width;
    let h = hf.height;
    let bmin = hf.bmin;
    let bmax = hf.bmax;
    let cs = hf.cs;
    let by = bmax[1] - bmin[1];

    let mut tmin = v[0];
    let mut tmax = v[0];
    vmin(&mut tmin, &v[1]);
    vmin(&mut tmin, &v[2]);
    vmax(&mut tmax, &v[1]);
    vmax(&mut tmax, &v[2]);

    let overlaps = (0..3).all(|k| bmin[k] <= tmax[k] && bmax[k] >= tmin[k]);
    if !overlaps {
        return;
    }

    // -1 so the polygon is cut properly at the start of the field
    let y0 = (((tmin[2] - bmin[2]) * ics) as i32).clamp(-1, h - 1);
    let y1 = (((tmax[2] - bmin[2]) * ics) as i32).clamp(0, h - 1);

    let mut input = [0.0f32; POLY_BUF];
    let mut inrow = [0.0f32; POLY_BUF];
    let mut p1 = [0.0f32; POLY_BUF];
    let mut p2 = [0.0f32; POLY_BUF];
    input[0..3].copy_from_slice(&v[0]);
    input[3..6].copy_from_slice(&v[1]);
    input[6..9].copy_from_slice(&v[2]);
    let mut nv_in = 3;

    for y in y0..=y1 {
        let cz = bmin[2] + y as f32 * cs;
        let (nvrow, rest) = divide_poly(&input, nv_in, &mut inrow, &mut p1, cz + cs, 2);
        nv_in = rest;
        std::mem::swap(&mut input, &mut p1);
        if nvrow < 3 || y < 0 {
            continue;
        }

        let mut min_x = inrow[0];
        let mut max_x = inrow[0];
        for i in 1..nvrow {
            min_x = min_x.min(inrow[i * 3]);
            max_x = max_x.max(inrow[i * 3]);
        }
        let x0 = ((min_x - bmin[0]) * ics) as i32;
        let x1 = ((max_x - bmin[0]) * ics) as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        let mut nv2 = nvrow;
        for x in x0..=x1 {
            let cx = bmin[0] + x as f32 * cs;
            let (nv, rest) = divide_poly(&inrow, nv2, &mut p1, &mut p2, cx + cs, 0);
            nv2 = rest;
            std::mem::swap(&mut inrow, &mut p2);
            if nv < 3 || x < 0 {
                continue;
            }

            let mut smin = p1[1];
            let mut smax = p1[1];
            for i in 1..nv {
                smin = smin.min(p1[i * 3 + 1]);
                smax = smax.max(p1[i * 3 + 1]);
            }
            smin -= bmin[1];
            smax -= bmin[1];
            if smax < 0.0 || smin > by {
                continue;
            }
            let smin = smin.max(0.0);
            let smax = smax.min(by);

            // leave room for a one unit span at the top of the range
            let ismin = ((smin * ich).floor() as i32).clamp(0, RC_SPAN_MAX_HEIGHT - 1);
            let ismax = ((smax * ich).ceil() as i32).clamp(ismin + 1, RC_SPAN_MAX_HEIGHT);
            hf.add_span(x, y, ismin as u16, ismax as u16, area, flag_merge_thr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Heightfield {
        Heightfield::new(4, 4, [0.0, 0.0, 0.0], [4.0, 10.0, 4.0], 1.0, 0.5).unwrap()
    }

    #[test]
    fn rejects_empty_field() {
        assert!(Heightfield::new(0, 3, [0.0; 3], [1.0; 3], 1.0, 1.0).is_err());
    }

    #[test]
    fn overlapping_spans_merge() {
        let mut hf = field();
        hf.add_span(1, 1, 0, 4, 1, 1);
        hf.add_span(1, 1, 10, 12, 1, 1);
        hf.add_span(1, 1, 3, 11, 5, 1);
        let spans: Vec<_> = hf.column(1, 1).map(|i| *hf.span(i)).collect();
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].smin, spans[0].smax), (0, 12));
        assert_eq!(spans[0].area, 5);
    }

    #[test]
    fn spans_stay_sorted() {
        let mut hf = field();
        hf.add_span(0, 0, 10, 12, 1, 0);
        hf.add_span(0, 0, 0, 2, 1, 0);
        hf.add_span(0, 0, 5, 6, 1, 0);
        let mins: Vec<_> = hf.column(0, 0).map(|i| hf.span(i).smin).collect();
        assert_eq!(mins, vec![0, 5, 10]);
    }

    #[test]
    fn flat_quad_fills_every_cell() {
        let mut hf = field();
        let verts = [0.0, 1.0, 0.0, 0.0, 1.0, 4.0, 4.0, 1.0, 4.0, 4.0, 1.0, 0.0];
        let tris = [0, 1, 2, 0, 2, 3];
        let mut areas = [0u8; 2];
        mark_walkable_triangles(45.0, &verts, &tris, &mut areas);
        assert_eq!(areas, [RC_WALKABLE_AREA; 2]);
        rasterize_triangles(&mut hf, &verts, &tris, &areas, 1).unwrap();
        for y in 0..4 {
            for x in 0..4 {
                let spans: Vec<_> = hf.column(x, y).collect();
                assert_eq!(spans.len(), 1, "cell {x},{y}");
                let s = hf.span(spans[0]);
                assert_eq!(s.smin, 2);
                assert_eq!(s.area, RC_WALKABLE_AREA);
            }
        }
        assert_eq!(hf.walkable_span_count(), 16);
    }

    #[test]
    fn steep_triangles_are_cleared() {
        let verts = [0.0, 0.0, 0.0, 0.0, 5.0, 1.0, 1.0, 0.0, 0.0];
        let tris = [0, 1, 2];
        let mut areas = [RC_WALKABLE_AREA];
        clear_unwalkable_triangles(60.0, &verts, &tris, &mut areas);
        assert_eq!(areas, [RC_NULL_AREA]);
    }
    #[test]
    fn triangle_across_many_cells() {
        // cell size that is not exact in binary, like the real unit profiles
        let mut hf = Heightfield::new(20, 20, [0.0; 3], [6.0, 10.0, 6.0], 0.3, 0.5).unwrap();
        let verts = [
            0.45, 1.0, 0.45, 0.45, 1.0, 5.55, 5.55, 1.0, 5.55, // inside the field
            -1.0, 1.0, -1.0, 7.0, 1.0, 7.0, 7.0, 1.0, -1.0, // sticks out on two sides
        ];
        let tris = [0, 1, 2];
        rasterize_triangles(&mut hf, &verts, &tris, &[RC_WALKABLE_AREA], 1).unwrap();

        assert!(hf.column(2, 15).next().is_some());
        assert!(hf.column(15, 2).next().is_none());
        // about 13 square units over 0.09 per cell, plus partial cells on the edges
        let count = hf.walkable_span_count();
        assert!((130..=220).contains(&count), "{count} spans");

        let mut clipped = Heightfield::new(20, 20, [0.0; 3], [6.0, 10.0, 6.0], 0.3, 0.5).unwrap();
        rasterize_triangles(&mut clipped, &verts, &[3, 4, 5], &[RC_WALKABLE_AREA], 1).unwrap();
        assert!(clipped.column(19, 0).next().is_some());
        assert!(clipped.column(0, 19).next().is_none());
    }

    #[test]
    fn spans_at_top_of_height_range() {
        let mut hf = Heightfield::new(2, 2, [0.0; 3], [2.0, 100.0, 2.0], 1.0, 0.001).unwrap();
        let verts = [0.0, 80.0, 0.0, 0.0, 80.0, 2.0, 2.0, 80.0, 2.0];
        rasterize_triangles(&mut hf, &verts, &[0, 1, 2], &[RC_WALKABLE_AREA], 1).unwrap();

        let span = hf.span(hf.column(0, 1).next().unwrap());
        assert_eq!((span.smin, span.smax), (0xfffe, 0xffff));
    }
}
