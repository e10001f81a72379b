// area.rs - Area erosion and smoothing on the compact heightfield

use crate::compact::CompactHeightfield;
use crate::{RC_NULL_AREA, Result, dir_offset_x, dir_offset_y};

/// Relax `dist[i]` through the neighbour in `dir` (cost 2) and its neighbour
/// in `diag` (cost 3).
fn relax(chf: &CompactHeightfield, dist: &mut [u8], x: i32, y: i32, i: usize, dir: usize, diag: usize) {
    let s = &chf.spans[i];
    if !s.is_connected(dir) {
        return;
    }
    let ax = x + dir_offset_x(dir);
    let ay = y + dir_offset_y(dir);
    let ai = chf.neighbour(x, y, s, dir);
    let nd = (dist[ai] as i32 + 2).min(255) as u8;
    if nd < dist[i] {
        dist[i] = nd;
    }

    let a = &chf.spans[ai];
    if a.is_connected(diag) {
        let aai = chf.neighbour(ax, ay, a, diag);
        let nd = (dist[aai] as i32 + 3).min(255) as u8;
        if nd < dist[i] {
            dist[i] = nd;
        }
    }
}

/// Shrink the walkable area by `radius` cells away from obstacles
pub fn erode_walkable_area(radius: i32, chf: &mut CompactHeightfield) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![0xffu8; chf.span_count()];

    // Boundary cells
    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                if chf.areas[i] == RC_NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let s = &chf.spans[i];
                let walkable_neighbours = (0..4)
                    .filter(|&dir| s.is_connected(dir))
                    .filter(|&dir| chf.areas[chf.neighbour(x, y, s, dir)] != RC_NULL_AREA)
                    .count();
                if walkable_neighbours != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    // Pass 1
    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                relax(chf, &mut dist, x, y, i, 0, 3);
                relax(chf, &mut dist, x, y, i, 3, 2);
            }
        }
    }

    // Pass 2
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            for i in chf.cell_spans(x, y) {
                relax(chf, &mut dist, x, y, i, 2, 1);
                relax(chf, &mut dist, x, y, i, 1, 0);
            }
        }
    }

    let thr = (radius * 2).clamp(0, 255) as u8;
    for (area, d) in chf.areas.iter_mut().zip(dist) {
        if d < thr {
            *area = RC_NULL_AREA;
        }
    }
    Ok(())
}

/// 3x3 median filter over area ids; removes single-cell noise
pub fn median_filter_walkable_area(chf: &mut CompactHeightfield) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut areas = vec![0xffu8; chf.span_count()];

    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                let s = &chf.spans[i];
                if chf.areas[i] == RC_NULL_AREA {
                    areas[i] = RC_NULL_AREA;
                    continue;
                }

                let mut nei = [chf.areas[i]; 9];
                for dir in 0..4 {
                    if !s.is_connected(dir) {
                        continue;
                    }
                    let ax = x + dir_offset_x(dir);
                    let ay = y + dir_offset_y(dir);
                    let ai = chf.neighbour(x, y, s, dir);
                    if chf.areas[ai] != RC_NULL_AREA {
                        nei[dir * 2] = chf.areas[ai];
                    }
                    let a = &chf.spans[ai];
                    let dir2 = (dir + 1) & 0x3;
                    if a.is_connected(dir2) {
                        let ai2 = chf.neighbour(ax, ay, a, dir2);
                        if chf.areas[ai2] != RC_NULL_AREA {
                            nei[dir * 2 + 1] = chf.areas[ai2];
                        }
                    }
                }
                nei.sort_unstable();
                areas[i] = nei[4];
            }
        }
    }

    chf.areas = areas;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::RC_WALKABLE_AREA;
    use crate::compact::build_compact_heightfield;
    use crate::heightfield::Heightfield;

    /// Flat open field of `size` x `size` cells at height 10
    pub(crate) fn flat_compact(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(size, size, [0.0; 3], [size as f32, 40.0, size as f32], 1.0, 1.0).unwrap();
        for y in 0..size {
            for x in 0..size {
                hf.add_span(x, y, 0, 10, RC_WALKABLE_AREA, 1);
            }
        }
        build_compact_heightfield(4, 2, &hf).unwrap()
    }

    fn area_at(chf: &CompactHeightfield, x: i32, y: i32) -> u8 {
        chf.areas[chf.cell(x, y).index as usize]
    }

    #[test]
    fn erosion_clears_edges() {
        let mut chf = flat_compact(9);
        erode_walkable_area(2, &mut chf).unwrap();
        assert_eq!(area_at(&chf, 0, 4), RC_NULL_AREA);
        assert_eq!(area_at(&chf, 1, 4), RC_NULL_AREA);
        assert_eq!(area_at(&chf, 2, 4), RC_WALKABLE_AREA);
        assert_eq!(area_at(&chf, 4, 4), RC_WALKABLE_AREA);
    }

    #[test]
    fn median_removes_speckle() {
        let mut chf = flat_compact(5);
        let center = chf.cell(2, 2).index as usize;
        chf.areas[center] = 7;
        median_filter_walkable_area(&mut chf).unwrap();
        assert_eq!(chf.areas[center], RC_WALKABLE_AREA);
    }
}
