// contour.rs - Region outline tracing and simplification
//
// Contour vertices stay in heightfield cell coordinates, border padding
// included; the polygon mesh decides which outline edges are tile portals.

use tracing::warn;

use crate::compact::CompactHeightfield;
use crate::{
    RC_AREA_BORDER, RC_BORDER_REG, RC_BORDER_VERTEX, RC_CONTOUR_REG_MASK, RC_CONTOUR_TESS_AREA_EDGES,
    RC_CONTOUR_TESS_WALL_EDGES, Result, dir_offset_x, dir_offset_y,
};

/// Simplified outline of one region. `verts` holds (x, y, z, flags) quads.
#[derive(Clone, Debug, Default)]
pub struct Contour {
    pub verts: Vec<i32>,
    pub rverts: Vec<i32>,
    pub reg: u16,
    pub area: u8,
}

impl Contour {
    #[inline]
    pub fn nverts(&self) -> usize {
        self.verts.len() / 4
    }
}

#[derive(Clone, Debug, Default)]
pub struct ContourSet {
    pub conts: Vec<Contour>,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

fn corner_height(chf: &CompactHeightfield, x: i32, y: i32, i: usize, dir: usize) -> (i32, bool) {
    let s = &chf.spans[i];
    let mut ch = s.y as i32;
    let dirp = (dir + 1) & 0x3;

    // Region and area combined so vertices between two areas survive
    let mut regs = [0u32; 4];
    regs[0] = chf.spans[i].reg as u32 | ((chf.areas[i] as u32) << 16);

    if s.is_connected(dir) {
        let ax = x + dir_offset_x(dir);
        let ay = y + dir_offset_y(dir);
        let ai = chf.neighbour(x, y, s, dir);
        let a = &chf.spans[ai];
        ch = ch.max(a.y as i32);
        regs[1] = a.reg as u32 | ((chf.areas[ai] as u32) << 16);
        if a.is_connected(dirp) {
            let ai2 = chf.neighbour(ax, ay, a, dirp);
            let a2 = &chf.spans[ai2];
            ch = ch.max(a2.y as i32);
            regs[2] = a2.reg as u32 | ((chf.areas[ai2] as u32) << 16);
        }
    }
    if s.is_connected(dirp) {
        let ax = x + dir_offset_x(dirp);
        let ay = y + dir_offset_y(dirp);
        let ai = chf.neighbour(x, y, s, dirp);
        let a = &chf.spans[ai];
        ch = ch.max(a.y as i32);
        regs[3] = a.reg as u32 | ((chf.areas[ai] as u32) << 16);
        if a.is_connected(dir) {
            let ai2 = chf.neighbour(ax, ay, a, dir);
            let a2 = &chf.spans[ai2];
            ch = ch.max(a2.y as i32);
            regs[2] = a2.reg as u32 | ((chf.areas[ai2] as u32) << 16);
        }
    }

    let border = RC_BORDER_REG as u32;
    let mut is_border_vertex = false;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 0x3;
        let c = (j + 2) & 0x3;
        let d = (j + 3) & 0x3;
        // Two identical exterior cells followed by two interior cells of one area
        let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            is_border_vertex = true;
            break;
        }
    }
    (ch, is_border_vertex)
}

fn walk_contour(chf: &CompactHeightfield, mut x: i32, mut y: i32, mut i: usize, flags: &mut [u8], points: &mut Vec<i32>) {
    let mut dir = 0usize;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= 40000 {
            break;
        }
        if flags[i] & (1 << dir) != 0 {
            let (py, is_border_vertex) = corner_height(chf, x, y, i, dir);
            let mut px = x;
            let mut pz = y;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut r = 0i32;
            let mut is_area_border = false;
            let s = &chf.spans[i];
            if s.is_connected(dir) {
                let ai = chf.neighbour(x, y, s, dir);
                r = chf.spans[ai].reg as i32;
                is_area_border = area != chf.areas[ai];
            }
            if is_border_vertex {
                r |= RC_BORDER_VERTEX;
            }
            if is_area_border {
                r |= RC_AREA_BORDER;
            }
            points.extend_from_slice(&[px, py, pz, r]);

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 0x3;
        } else {
            let s = &chf.spans[i];
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
}

fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

fn insert_point(simplified: &mut Vec<i32>, after: usize, points: &[i32], pi: usize) {
    let at = (after + 1) * 4;
    let p = [points[pi * 4], points[pi * 4 + 1], points[pi * 4 + 2], pi as i32];
    simplified.splice(at..at, p);
}

fn simplify_contour(points: &[i32], simplified: &mut Vec<i32>, max_error: f32, max_edge_len: i32, build_flags: i32) {
    let pn = points.len() / 4;

    let has_connections = points.chunks_exact(4).any(|p| p[3] & RC_CONTOUR_REG_MASK != 0);
    if has_connections {
        // Seed a point wherever the neighbour region changes
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs = (points[i * 4 + 3] & RC_CONTOUR_REG_MASK) != (points[ii * 4 + 3] & RC_CONTOUR_REG_MASK);
            let area_borders = (points[i * 4 + 3] & RC_AREA_BORDER) != (points[ii * 4 + 3] & RC_AREA_BORDER);
            if different_regs || area_borders {
                simplified.extend_from_slice(&[points[i * 4], points[i * 4 + 1], points[i * 4 + 2], i as i32]);
            }
        }
    }

    if simplified.is_empty() {
        // Lower-left and upper-right vertices as the initial shape
        let (mut llx, mut lly, mut llz, mut lli) = (points[0], points[1], points[2], 0usize);
        let (mut urx, mut ury, mut urz, mut uri) = (points[0], points[1], points[2], 0usize);
        for (i, p) in points.chunks_exact(4).enumerate() {
            let (x, y, z) = (p[0], p[1], p[2]);
            if x < llx || (x == llx && z < llz) {
                (llx, lly, llz, lli) = (x, y, z, i);
            }
            if x > urx || (x == urx && z > urz) {
                (urx, ury, urz, uri) = (x, y, z, i);
            }
        }
        simplified.extend_from_slice(&[llx, lly, llz, lli as i32, urx, ury, urz, uri as i32]);
    }

    // Add points until every raw point is within tolerance
    let mut i = 0;
    while i < simplified.len() / 4 {
        let ii = (i + 1) % (simplified.len() / 4);
        let (mut ax, mut az, ai) = (simplified[i * 4], simplified[i * 4 + 2], simplified[i * 4 + 3] as usize);
        let (mut bx, mut bz, bi) = (simplified[ii * 4], simplified[ii * 4 + 2], simplified[ii * 4 + 3] as usize);

        // Walk segments in lexical order so opposite edges simplify alike
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % pn, 1, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            ((bi + pn - 1) % pn, pn - 1, ai)
        };

        let mut maxd = 0.0f32;
        let mut maxi: Option<usize> = None;
        if points[ci * 4 + 3] & RC_CONTOUR_REG_MASK == 0 || points[ci * 4 + 3] & RC_AREA_BORDER != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci * 4], points[ci * 4 + 2], ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(mi) if maxd > max_error * max_error => insert_point(simplified, i, points, mi),
            _ => i += 1,
        }
    }

    // Split overlong edges
    if max_edge_len > 0 && build_flags & (RC_CONTOUR_TESS_WALL_EDGES | RC_CONTOUR_TESS_AREA_EDGES) != 0 {
        let mut i = 0;
        while i < simplified.len() / 4 {
            let ii = (i + 1) % (simplified.len() / 4);
            let (ax, az, ai) = (simplified[i * 4], simplified[i * 4 + 2], simplified[i * 4 + 3] as usize);
            let (bx, bz, bi) = (simplified[ii * 4], simplified[ii * 4 + 2], simplified[ii * 4 + 3] as usize);

            let ci = (ai + 1) % pn;
            let tess = (build_flags & RC_CONTOUR_TESS_WALL_EDGES != 0 && points[ci * 4 + 3] & RC_CONTOUR_REG_MASK == 0)
                || (build_flags & RC_CONTOUR_TESS_AREA_EDGES != 0 && points[ci * 4 + 3] & RC_AREA_BORDER != 0);

            let mut maxi = None;
            if tess {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        maxi = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + n.div_ceil(2)) % pn
                        });
                    }
                }
            }

            match maxi {
                Some(mi) => insert_point(simplified, i, points, mi),
                None => i += 1,
            }
        }
    }

    // Edge flags come from the current raw point, the neighbour region from the next one
    for i in 0..simplified.len() / 4 {
        let bi = simplified[i * 4 + 3] as usize;
        let ai = (bi + 1) % pn;
        simplified[i * 4 + 3] =
            (points[ai * 4 + 3] & (RC_CONTOUR_REG_MASK | RC_AREA_BORDER)) | (points[bi * 4 + 3] & RC_BORDER_VERTEX);
    }
}

fn remove_degenerate_segments(simplified: &mut Vec<i32>) {
    let mut npts = simplified.len() / 4;
    let mut i = 0;
    while i < npts {
        let ni = if i + 1 < npts { i + 1 } else { 0 };
        if simplified[i * 4] == simplified[ni * 4] && simplified[i * 4 + 2] == simplified[ni * 4 + 2] {
            simplified.drain(i * 4..i * 4 + 4);
            npts -= 1;
        }
        i += 1;
    }
}

fn calc_area_of_polygon_2d(verts: &[i32]) -> i32 {
    let n = verts.len() / 4;
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = &verts[i * 4..];
        let vj = &verts[j * 4..];
        area += vi[0] * vj[2] - vj[0] * vi[2];
        j = i;
    }
    (area + 1) / 2
}

#[inline]
fn ileft(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2]) <= 0
}

fn closest_indices(vertsa: &[i32], vertsb: &[i32]) -> Option<(usize, usize)> {
    let na = vertsa.len() / 4;
    let nb = vertsb.len() / 4;
    let mut closest = 0x0fff_ffff;
    let mut best = None;
    for i in 0..na {
        let inext = (i + 1) % na;
        let iprev = (i + na - 1) % na;
        let va = &vertsa[i * 4..];
        let van = &vertsa[inext * 4..];
        let vap = &vertsa[iprev * 4..];
        for j in 0..nb {
            let vb = &vertsb[j * 4..];
            // vb must be in front of va
            if ileft(vap, va, vb) && ileft(va, van, vb) {
                let dx = vb[0] - va[0];
                let dz = vb[2] - va[2];
                let d = dx * dx + dz * dz;
                if d < closest {
                    best = Some((i, j));
                    closest = d;
                }
            }
        }
    }
    best
}

fn merge_contours(ca: &mut Contour, cb: &mut Contour, ia: usize, ib: usize) {
    let na = ca.nverts();
    let nb = cb.nverts();
    let mut verts = Vec::with_capacity((na + nb + 2) * 4);
    for i in 0..=na {
        let src = ((ia + i) % na) * 4;
        verts.extend_from_slice(&ca.verts[src..src + 4]);
    }
    for i in 0..=nb {
        let src = ((ib + i) % nb) * 4;
        verts.extend_from_slice(&cb.verts[src..src + 4]);
    }
    ca.verts = verts;
    cb.verts.clear();
}

/// Trace and simplify the outline of every region of `chf`
pub fn build_contours(chf: &CompactHeightfield, max_error: f32, max_edge_len: i32, build_flags: i32) -> Result<ContourSet> {
    let w = chf.width;
    let h = chf.height;

    let mut cset = ContourSet {
        conts: Vec::with_capacity((chf.max_regions as usize).max(8)),
        bmin: chf.bmin,
        bmax: chf.bmax,
        cs: chf.cs,
        ch: chf.ch,
        width: w,
        height: h,
        border_size: chf.border_size,
        max_error,
    };

    // Mark boundary edges
    let mut flags = vec![0u8; chf.span_count()];
    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                let s = &chf.spans[i];
                if s.reg == 0 || s.reg & RC_BORDER_REG != 0 {
                    flags[i] = 0;
                    continue;
                }
                let mut res = 0u8;
                for dir in 0..4 {
                    let r = if s.is_connected(dir) { chf.spans[chf.neighbour(x, y, s, dir)].reg } else { 0 };
                    if r == s.reg {
                        res |= 1 << dir;
                    }
                }
                flags[i] = res ^ 0xf;
            }
        }
    }

    let mut verts: Vec<i32> = Vec::with_capacity(256);
    let mut simplified: Vec<i32> = Vec::with_capacity(64);

    for y in 0..h {
        for x in 0..w {
            for i in chf.cell_spans(x, y) {
                if flags[i] == 0 || flags[i] == 0xf {
                    flags[i] = 0;
                    continue;
                }
                let reg = chf.spans[i].reg;
                if reg == 0 || reg & RC_BORDER_REG != 0 {
                    continue;
                }
                let area = chf.areas[i];

                verts.clear();
                simplified.clear();
                walk_contour(chf, x, y, i, &mut flags, &mut verts);
                if verts.is_empty() {
                    continue;
                }
                simplify_contour(&verts, &mut simplified, max_error, max_edge_len, build_flags);
                remove_degenerate_segments(&mut simplified);

                if simplified.len() / 4 >= 3 {
                    cset.conts.push(Contour {
                        verts: simplified.clone(),
                        rverts: verts.clone(),
                        reg,
                        area,
                    });
                }
            }
        }
    }

    // Merge backwards wound holes into the outline of the same region
    for i in 0..cset.conts.len() {
        if calc_area_of_polygon_2d(&cset.conts[i].verts) >= 0 {
            continue;
        }
        let reg = cset.conts[i].reg;
        let merge_idx = (0..cset.conts.len()).find(|&j| {
            j != i
                && cset.conts[j].nverts() > 0
                && cset.conts[j].reg == reg
                && calc_area_of_polygon_2d(&cset.conts[j].verts) != 0
        });

        let Some(mi) = merge_idx else {
            warn!("Could not find merge target for bad contour {}", i);
            continue;
        };

        let Some((ia, ib)) = closest_indices(&cset.conts[mi].verts, &cset.conts[i].verts) else {
            warn!("Failed to find merge points for contours {} and {}", i, mi);
            continue;
        };

        let (target, hole) = if mi < i {
            let (lo, hi) = cset.conts.split_at_mut(i);
            (&mut lo[mi], &mut hi[0])
        } else {
            let (lo, hi) = cset.conts.split_at_mut(mi);
            (&mut hi[0], &mut lo[i])
        };
        merge_contours(target, hole, ia, ib);
    }

    Ok(cset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::tests::flat_compact;
    use crate::region::{build_distance_field, build_regions};

    #[test]
    fn square_region_simplifies_to_four_corners() {
        let mut chf = flat_compact(10);
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 4, 10).unwrap();
        let cset = build_contours(&chf, 1.3, 0, RC_CONTOUR_TESS_WALL_EDGES).unwrap();
        assert_eq!(cset.conts.len(), 1);
        let cont = &cset.conts[0];
        assert_eq!(cont.nverts(), 4);
        let mut xs: Vec<i32> = cont.verts.chunks_exact(4).map(|v| v[0]).collect();
        xs.sort();
        assert_eq!(xs, vec![0, 0, 10, 10]);
        assert!(calc_area_of_polygon_2d(&cont.verts) != 0);
    }

    #[test]
    fn long_wall_edges_are_split() {
        let mut chf = flat_compact(10);
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 4, 10).unwrap();
        let cset = build_contours(&chf, 1.3, 4, RC_CONTOUR_TESS_WALL_EDGES).unwrap();
        let cont = &cset.conts[0];
        assert!(cont.nverts() > 4);
        let n = cont.nverts();
        for i in 0..n {
            let a = &cont.verts[i * 4..];
            let b = &cont.verts[((i + 1) % n) * 4..];
            let (dx, dz) = (b[0] - a[0], b[2] - a[2]);
            assert!(dx * dx + dz * dz <= 16, "edge {i} too long");
        }
    }

    #[test]
    fn degenerate_segments_are_dropped() {
        let mut pts = vec![0, 0, 0, 0, 0, 5, 0, 0, 4, 0, 0, 0, 4, 0, 4, 0];
        remove_degenerate_segments(&mut pts);
        assert_eq!(pts.len(), 12);
    }
}
