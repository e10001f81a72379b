// region.rs - Distance field and watershed region partitioning

use tracing::{error, warn};

use crate::compact::CompactHeightfield;
use crate::{RC_BORDER_REG, RC_NULL_AREA, RecastError, Result, dir_offset_x, dir_offset_y};

// ============================================================================
// Distance field
// ============================================================================

fn relax_distance(chf: &CompactHeightfield, src: &mut [u16], x: i32, y: i32, i: usize, dir: usize, diag: usize) {
    let s = &chf.spans[i];
    if !s.is_connected(dir) {
        return;
    }
    let ax = x + dir_offset_x(dir);
    let ay = y + dir_offset_y(dir);
    let ai = chf.neighbour(x, y, s, dir);
    if (src[ai] as i32) + 2 < src[i] as i32 {
        src[i] = src[ai] + 2;
    }

    let a = &chf.spans[ai];
    if a.is_connected(diag) {
        let aai = chf.neighbour(ax, ay, a, diag);
        if (src[aai] as i32) + 3 < src[i] as i32 {
            src[i] = src[aai] + 3;
        }
    }
}

fn calculate_distance_field(chf: &CompactHeightfield) -> (Vec<u16>, u16) {
    let w = chf.width;
    let h = chf.height;
    let mut src = vec![0xffffu16; chf.span_count()];

    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                let s = &chf.spans[i];
                let area = chf.areas[i];
                let same = (0..4)
                    .filter(|&dir| s.is_connected(dir) && chf.areas[chf.neighbour(x, y, s, dir)] == area)
                    .count();
                if same != 4 {
                    src[i] = 0;
                }
            }
        }
    }

    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                relax_distance(chf, &mut src, x, y, i, 0, 3);
                relax_distance(chf, &mut src, x, y, i, 3, 2);
            }
        }
    }

    for y in (0..h).rev() {
        for x in (0..w).rev() {
            for i in chf.cell_spans(x, y) {
                relax_distance(chf, &mut src, x, y, i, 2, 1);
                relax_distance(chf, &mut src, x, y, i, 1, 0);
            }
        }
    }

    let max_dist = src.iter().copied().max().unwrap_or(0);
    (src, max_dist)
}

fn box_blur(chf: &CompactHeightfield, thr: i32, src: &[u16]) -> Vec<u16> {
    let thr = thr * 2;
    let mut dst = vec![0u16; src.len()];
    for y in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, y) {
                let s = &chf.spans[i];
                let cd = src[i] as i32;
                if cd <= thr {
                    dst[i] = cd as u16;
                    continue;
                }

                let mut d = cd;
                for dir in 0..4 {
                    if s.is_connected(dir) {
                        let ax = x + dir_offset_x(dir);
                        let ay = y + dir_offset_y(dir);
                        let ai = chf.neighbour(x, y, s, dir);
                        d += src[ai] as i32;
                        let a = &chf.spans[ai];
                        let dir2 = (dir + 1) & 0x3;
                        if a.is_connected(dir2) {
                            d += src[chf.neighbour(ax, ay, a, dir2)] as i32;
                        } else {
                            d += cd;
                        }
                    } else {
                        d += cd * 2;
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }
    dst
}

/// Distance of every span to the nearest area boundary, lightly blurred
pub fn build_distance_field(chf: &mut CompactHeightfield) -> Result<()> {
    let (src, max_dist) = calculate_distance_field(chf);
    chf.max_distance = max_dist;
    chf.dist = box_blur(chf, 1, &src);
    Ok(())
}

// ============================================================================
// Watershed
// ============================================================================

#[derive(Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    y: i32,
    index: i32,
}

const NB_STACKS: usize = 8;
const EXPAND_ITERS: i32 = 8;

fn paint_rect_region(chf: &CompactHeightfield, src_reg: &mut [u16], minx: i32, maxx: i32, miny: i32, maxy: i32, reg: u16) {
    for y in miny..maxy {
        for x in minx..maxx {
            for i in chf.cell_spans(x, y) {
                if chf.areas[i] != RC_NULL_AREA {
                    src_reg[i] = reg;
                }
            }
        }
    }
}

fn flood_region(
    chf: &CompactHeightfield,
    x: i32,
    y: i32,
    i: usize,
    level: u16,
    r: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<(i32, i32, usize)>,
) -> bool {
    let area = chf.areas[i];
    stack.clear();
    stack.push((x, y, i));
    src_reg[i] = r;
    src_dist[i] = 0;

    let lev = level.saturating_sub(2);
    let mut count = 0;

    while let Some((cx, cy, ci)) = stack.pop() {
        let cs = &chf.spans[ci];

        // Stop at cells touching another region
        let mut ar = 0u16;
        for dir in 0..4 {
            if !cs.is_connected(dir) {
                continue;
            }
            let ax = cx + dir_offset_x(dir);
            let ay = cy + dir_offset_y(dir);
            let ai = chf.neighbour(cx, cy, cs, dir);
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if nr & RC_BORDER_REG != 0 {
                continue;
            }
            if nr != 0 && nr != r {
                ar = nr;
                break;
            }

            let a = &chf.spans[ai];
            let dir2 = (dir + 1) & 0x3;
            if a.is_connected(dir2) {
                let ai2 = chf.neighbour(ax, ay, a, dir2);
                if chf.areas[ai2] != area {
                    continue;
                }
                let nr2 = src_reg[ai2];
                if nr2 != 0 && nr2 != r {
                    ar = nr2;
                    break;
                }
            }
        }
        if ar != 0 {
            src_reg[ci] = 0;
            continue;
        }

        count += 1;

        for dir in 0..4 {
            if !cs.is_connected(dir) {
                continue;
            }
            let ax = cx + dir_offset_x(dir);
            let ay = cy + dir_offset_y(dir);
            let ai = chf.neighbour(cx, cy, cs, dir);
            if chf.areas[ai] != area {
                continue;
            }
            if chf.dist[ai] >= lev && src_reg[ai] == 0 {
                src_reg[ai] = r;
                src_dist[ai] = 0;
                stack.push((ax, ay, ai));
            }
        }
    }

    count > 0
}

fn expand_regions(
    chf: &CompactHeightfield,
    max_iter: i32,
    level: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
    stack: &mut Vec<LevelStackEntry>,
    fill_stack: bool,
) {
    if fill_stack {
        stack.clear();
        for y in 0..chf.height {
            for x in 0..chf.width {
                for i in chf.cell_spans(x, y) {
                    if chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != RC_NULL_AREA {
                        stack.push(LevelStackEntry { x, y, index: i as i32 });
                    }
                }
            }
        }
    } else {
        for entry in stack.iter_mut() {
            if entry.index >= 0 && src_reg[entry.index as usize] != 0 {
                entry.index = -1;
            }
        }
    }

    let mut dirty: Vec<(usize, u16, u16)> = Vec::new();
    let mut iter = 0;
    while !stack.is_empty() {
        let mut failed = 0;
        dirty.clear();

        for entry in stack.iter_mut() {
            if entry.index < 0 {
                failed += 1;
                continue;
            }
            let (x, y, i) = (entry.x, entry.y, entry.index as usize);
            let mut r = src_reg[i];
            let mut d2 = 0xffffu16;
            let area = chf.areas[i];
            let s = &chf.spans[i];
            for dir in 0..4 {
                if !s.is_connected(dir) {
                    continue;
                }
                let ai = chf.neighbour(x, y, s, dir);
                if chf.areas[ai] != area {
                    continue;
                }
                if src_reg[ai] > 0 && src_reg[ai] & RC_BORDER_REG == 0 && (src_dist[ai] as i32) + 2 < d2 as i32 {
                    r = src_reg[ai];
                    d2 = src_dist[ai] + 2;
                }
            }
            if r != 0 {
                entry.index = -1;
                dirty.push((i, r, d2));
            } else {
                failed += 1;
            }
        }

        for &(idx, reg, dist) in &dirty {
            src_reg[idx] = reg;
            src_dist[idx] = dist;
        }

        if failed == stack.len() {
            break;
        }
        if level > 0 {
            iter += 1;
            if iter >= max_iter {
                break;
            }
        }
    }
}

fn sort_cells_by_level(chf: &CompactHeightfield, start_level: u16, src_reg: &[u16], stacks: &mut [Vec<LevelStackEntry>], log_levels: u32) {
    let start = (start_level >> log_levels) as i32;
    for stack in stacks.iter_mut() {
        stack.clear();
    }
    for y in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, y) {
                if chf.areas[i] == RC_NULL_AREA || src_reg[i] != 0 {
                    continue;
                }
                let level = (chf.dist[i] >> log_levels) as i32;
                let sid = start - level;
                if sid >= stacks.len() as i32 {
                    continue;
                }
                stacks[sid.max(0) as usize].push(LevelStackEntry { x, y, index: i as i32 });
            }
        }
    }
}

/// Partition the walkable area into watershed regions. Spans within
/// `border_size` of the field edge get border regions.
pub fn build_regions(chf: &mut CompactHeightfield, border_size: i32, min_region_area: i32, merge_region_area: i32) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let n = chf.span_count();

    let mut src_reg = vec![0u16; n];
    let mut src_dist = vec![0u16; n];
    let mut lvl_stacks: Vec<Vec<LevelStackEntry>> = (0..NB_STACKS).map(|_| Vec::with_capacity(256)).collect();
    let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);
    let mut flood_stack = Vec::with_capacity(256);

    let mut region_id: u16 = 1;
    let mut level: u16 = (chf.max_distance.saturating_add(1)) & !1;

    if border_size > 0 {
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        paint_rect_region(chf, &mut src_reg, 0, bw, 0, h, region_id | RC_BORDER_REG);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, w - bw, w, 0, h, region_id | RC_BORDER_REG);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, w, 0, bh, region_id | RC_BORDER_REG);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, w, h - bh, h, region_id | RC_BORDER_REG);
        region_id += 1;
    }
    chf.border_size = border_size;

    let mut sid: i32 = -1;
    while level > 0 {
        level = level.saturating_sub(2);
        sid = (sid + 1) & (NB_STACKS as i32 - 1);

        if sid == 0 {
            sort_cells_by_level(chf, level, &src_reg, &mut lvl_stacks, 1);
        } else {
            // Carry over cells left from the previous level
            let (prev, cur) = lvl_stacks.split_at_mut(sid as usize);
            let left = &prev[sid as usize - 1];
            for entry in left {
                if entry.index >= 0 && src_reg[entry.index as usize] == 0 {
                    cur[0].push(*entry);
                }
            }
        }

        expand_regions(chf, EXPAND_ITERS, level, &mut src_reg, &mut src_dist, &mut lvl_stacks[sid as usize], false);

        for j in 0..lvl_stacks[sid as usize].len() {
            let entry = lvl_stacks[sid as usize][j];
            if entry.index >= 0 && src_reg[entry.index as usize] == 0 {
                let flooded = flood_region(
                    chf,
                    entry.x,
                    entry.y,
                    entry.index as usize,
                    level,
                    region_id,
                    &mut src_reg,
                    &mut src_dist,
                    &mut flood_stack,
                );
                if flooded {
                    if region_id == 0xffff {
                        error!("Region ID overflow");
                        return Err(RecastError::RegionOverflow);
                    }
                    region_id += 1;
                }
            }
        }
    }

    expand_regions(chf, EXPAND_ITERS * 8, 0, &mut src_reg, &mut src_dist, &mut stack, true);

    let mut max_region = region_id;
    let overlaps = merge_and_filter_regions(chf, min_region_area, merge_region_area, &mut max_region, &mut src_reg);
    chf.max_regions = max_region;
    if !overlaps.is_empty() {
        warn!("{} overlapping regions", overlaps.len());
    }

    for (span, reg) in chf.spans.iter_mut().zip(src_reg) {
        span.reg = reg;
    }
    Ok(())
}

// ============================================================================
// Region merging and filtering
// ============================================================================

#[derive(Default, Clone)]
struct Region {
    span_count: i32,
    id: u16,
    area_type: u8,
    remap: bool,
    visited: bool,
    overlap: bool,
    connections: Vec<i32>,
    floors: Vec<i32>,
}

fn remove_adjacent_duplicates(list: &mut Vec<i32>) {
    let mut i = 0;
    while i < list.len() && list.len() > 1 {
        let ni = (i + 1) % list.len();
        if list[i] == list[ni] {
            list.remove(i);
        } else {
            i += 1;
        }
    }
}

fn replace_neighbour(reg: &mut Region, old_id: u16, new_id: u16) {
    let mut changed = false;
    for c in reg.connections.iter_mut() {
        if *c == old_id as i32 {
            *c = new_id as i32;
            changed = true;
        }
    }
    for f in reg.floors.iter_mut() {
        if *f == old_id as i32 {
            *f = new_id as i32;
        }
    }
    if changed {
        remove_adjacent_duplicates(&mut reg.connections);
    }
}

fn can_merge_with_region(a: &Region, b: &Region) -> bool {
    if a.area_type != b.area_type {
        return false;
    }
    let shared = a.connections.iter().filter(|&&c| c == b.id as i32).count();
    if shared > 1 {
        return false;
    }
    !a.floors.contains(&(b.id as i32))
}

fn add_unique_floor(reg: &mut Region, n: i32) {
    if !reg.floors.contains(&n) {
        reg.floors.push(n);
    }
}

fn merge_regions(a: &mut Region, b: &mut Region) -> bool {
    let aid = a.id as i32;
    let bid = b.id as i32;
    let acon = a.connections.clone();

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        return false;
    };
    let Some(insb) = b.connections.iter().position(|&c| c == aid) else {
        return false;
    };

    a.connections.clear();
    let na = acon.len();
    for i in 0..na - 1 {
        a.connections.push(acon[(insa + 1 + i) % na]);
    }
    let nb = b.connections.len();
    for i in 0..nb - 1 {
        a.connections.push(b.connections[(insb + 1 + i) % nb]);
    }
    remove_adjacent_duplicates(&mut a.connections);

    for &f in &b.floors {
        add_unique_floor(a, f);
    }
    a.span_count += b.span_count;
    b.span_count = 0;
    b.connections.clear();
    true
}

fn is_region_connected_to_border(reg: &Region) -> bool {
    reg.connections.contains(&0)
}

fn is_solid_edge(chf: &CompactHeightfield, src_reg: &[u16], x: i32, y: i32, i: usize, dir: usize) -> bool {
    let s = &chf.spans[i];
    let r = if s.is_connected(dir) { src_reg[chf.neighbour(x, y, s, dir)] } else { 0 };
    r != src_reg[i]
}

fn walk_contour(chf: &CompactHeightfield, src_reg: &[u16], mut x: i32, mut y: i32, mut i: usize, mut dir: usize, cont: &mut Vec<i32>) {
    let start_dir = dir;
    let start_i = i;

    let ss = &chf.spans[i];
    let mut cur_reg = if ss.is_connected(dir) { src_reg[chf.neighbour(x, y, ss, dir)] } else { 0 };
    cont.push(cur_reg as i32);

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= 40000 {
            break;
        }
        let s = &chf.spans[i];
        if is_solid_edge(chf, src_reg, x, y, i, dir) {
            let r = if s.is_connected(dir) { src_reg[chf.neighbour(x, y, s, dir)] } else { 0 };
            if r != cur_reg {
                cur_reg = r;
                cont.push(cur_reg as i32);
            }
            dir = (dir + 1) & 0x3;
        } else {
            if !s.is_connected(dir) {
                return;
            }
            let ni = chf.neighbour(x, y, s, dir);
            x += dir_offset_x(dir);
            y += dir_offset_y(dir);
            i = ni;
            dir = (dir + 3) & 0x3;
        }
        if start_i == i && start_dir == dir {
            break;
        }
    }

    if cont.len() > 1 {
        remove_adjacent_duplicates(cont);
    }
}

fn pair_mut<T>(v: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (lo, hi) = v.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = v.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

fn merge_and_filter_regions(
    chf: &CompactHeightfield,
    min_region_area: i32,
    merge_region_size: i32,
    max_region_id: &mut u16,
    src_reg: &mut [u16],
) -> Vec<u16> {
    let nreg = *max_region_id as usize + 1;
    let mut regions: Vec<Region> = (0..nreg)
        .map(|i| Region { id: i as u16, ..Default::default() })
        .collect();

    // Find the neighbours of every region by walking its contour
    for y in 0..chf.height {
        for x in 0..chf.width {
            let range = chf.cell_spans(x, y);
            for i in range.clone() {
                let r = src_reg[i] as usize;
                if r == 0 || r >= nreg {
                    continue;
                }
                regions[r].span_count += 1;

                for j in range.clone() {
                    if i == j {
                        continue;
                    }
                    let floor = src_reg[j] as usize;
                    if floor == 0 || floor >= nreg {
                        continue;
                    }
                    if floor == r {
                        regions[r].overlap = true;
                    }
                    add_unique_floor(&mut regions[r], floor as i32);
                }

                if !regions[r].connections.is_empty() {
                    continue;
                }
                regions[r].area_type = chf.areas[i];

                if let Some(ndir) = (0..4).find(|&dir| is_solid_edge(chf, src_reg, x, y, i, dir)) {
                    let mut cont = Vec::new();
                    walk_contour(chf, src_reg, x, y, i, ndir, &mut cont);
                    regions[r].connections = cont;
                }
            }
        }
    }

    // Remove too small regions
    let mut stack: Vec<usize> = Vec::with_capacity(32);
    let mut trace: Vec<usize> = Vec::with_capacity(32);
    for i in 0..nreg {
        {
            let reg = &regions[i];
            if reg.id == 0 || reg.id & RC_BORDER_REG != 0 || reg.span_count == 0 || reg.visited {
                continue;
            }
        }

        let mut connects_to_border = false;
        let mut span_count = 0;
        stack.clear();
        trace.clear();
        regions[i].visited = true;
        stack.push(i);

        while let Some(ri) = stack.pop() {
            span_count += regions[ri].span_count;
            trace.push(ri);
            for j in 0..regions[ri].connections.len() {
                let c = regions[ri].connections[j];
                if c & RC_BORDER_REG as i32 != 0 {
                    connects_to_border = true;
                    continue;
                }
                let nei = &mut regions[c as usize];
                if nei.visited || nei.id == 0 || nei.id & RC_BORDER_REG != 0 {
                    continue;
                }
                stack.push(nei.id as usize);
                nei.visited = true;
            }
        }

        // Regions touching the border cannot be sized correctly, keep them
        if span_count < min_region_area && !connects_to_border {
            for &t in &trace {
                regions[t].span_count = 0;
                regions[t].id = 0;
            }
        }
    }

    // Merge too small regions into neighbours
    loop {
        let mut merge_count = 0;
        for i in 0..nreg {
            let (reg_id, merge_id) = {
                let reg = &regions[i];
                if reg.id == 0 || reg.id & RC_BORDER_REG != 0 || reg.overlap || reg.span_count == 0 {
                    continue;
                }
                if reg.span_count > merge_region_size && is_region_connected_to_border(reg) {
                    continue;
                }

                let mut smallest = 0x0fff_ffff;
                let mut merge_id = reg.id;
                for &c in &reg.connections {
                    if c & RC_BORDER_REG as i32 != 0 {
                        continue;
                    }
                    let mreg = &regions[c as usize];
                    if mreg.id == 0 || mreg.id & RC_BORDER_REG != 0 || mreg.overlap {
                        continue;
                    }
                    if mreg.span_count < smallest && can_merge_with_region(reg, mreg) && can_merge_with_region(mreg, reg) {
                        smallest = mreg.span_count;
                        merge_id = mreg.id;
                    }
                }
                (reg.id, merge_id)
            };

            if merge_id == reg_id {
                continue;
            }
            let old_id = reg_id;
            let (target, reg) = pair_mut(&mut regions, merge_id as usize, i);
            if merge_regions(target, reg) {
                for other in regions.iter_mut() {
                    if other.id == 0 || other.id & RC_BORDER_REG != 0 {
                        continue;
                    }
                    if other.id == old_id {
                        other.id = merge_id;
                    }
                    replace_neighbour(other, old_id, merge_id);
                }
                merge_count += 1;
            }
        }
        if merge_count == 0 {
            break;
        }
    }

    // Compress region ids
    for reg in regions.iter_mut() {
        reg.remap = reg.id != 0 && reg.id & RC_BORDER_REG == 0;
    }
    let mut id_gen: u16 = 0;
    for i in 0..nreg {
        if !regions[i].remap {
            continue;
        }
        let old_id = regions[i].id;
        id_gen += 1;
        for reg in regions[i..].iter_mut() {
            if reg.id == old_id {
                reg.id = id_gen;
                reg.remap = false;
            }
        }
    }
    *max_region_id = id_gen;

    for r in src_reg.iter_mut() {
        if *r & RC_BORDER_REG == 0 {
            *r = regions[*r as usize].id;
        }
    }

    regions.iter().filter(|r| r.overlap).map(|r| r.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::tests::flat_compact;
    use std::collections::BTreeSet;

    /// Region ids actually carried by spans. `max_regions` may be higher,
    /// emptied regions keep their compressed id.
    fn span_regions(chf: &CompactHeightfield) -> BTreeSet<u16> {
        chf.spans.iter().map(|s| s.reg).filter(|&r| r != 0).collect()
    }

    #[test]
    fn distance_field_peaks_in_the_middle() {
        let mut chf = flat_compact(9);
        build_distance_field(&mut chf).unwrap();
        let edge = chf.dist[chf.cell(0, 4).index as usize];
        let center = chf.dist[chf.cell(4, 4).index as usize];
        assert_eq!(edge, 0);
        assert!(center > edge);
        assert_eq!(chf.max_distance, 8);
    }

    #[test]
    fn open_field_is_one_region() {
        let mut chf = flat_compact(12);
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 4, 10).unwrap();
        let first = chf.spans[0].reg;
        assert_ne!(first, 0);
        assert!(chf.spans.iter().all(|s| s.reg == first));
        assert_eq!(span_regions(&chf).len(), 1);
        assert!(chf.max_regions >= first);
    }

    #[test]
    fn border_strip_gets_border_regions() {
        let mut chf = flat_compact(12);
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 2, 4, 10).unwrap();
        let border = chf.spans[chf.cell(0, 5).index as usize].reg;
        let inner = chf.spans[chf.cell(5, 5).index as usize].reg;
        assert_ne!(border & RC_BORDER_REG, 0);
        assert_eq!(inner & RC_BORDER_REG, 0);
        assert_ne!(inner, 0);
    }

    #[test]
    fn tiny_isolated_region_is_removed() {
        let mut chf = flat_compact(4);
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 100, 10).unwrap();
        assert!(chf.spans.iter().all(|s| s.reg == 0));
        assert!(span_regions(&chf).is_empty());
    }
}
