// detail.rs - Height detail triangulation of polygon meshes

use std::collections::VecDeque;

use tracing::{error, warn};

use crate::compact::CompactHeightfield;
use crate::math::{dist_pt_seg_sq_2d, vdist_2d, vmax, vmin};
use crate::mesh::PolyMesh;
use crate::{RC_MESH_NULL_IDX, RC_MULTIPLE_REGS, RC_NOT_CONNECTED, Result, dir_for_offset, dir_offset_x, dir_offset_y};

const UNSET_HEIGHT: u16 = 0xffff;
const MAX_VERTS: usize = 127;
// Delaunay produces at most 2n-2-k triangles
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

/// Edge flag of a detail triangle edge lying on the polygon boundary
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x01;

/// Detail sub-meshes, one per polygon. `meshes[i]` is
/// `[vert_base, vert_count, tri_base, tri_count]`; each triangle is three
/// local vertex indices plus an edge flag byte.
#[derive(Clone, Debug, Default)]
pub struct PolyMeshDetail {
    pub meshes: Vec<[u32; 4]>,
    pub verts: Vec<f32>,
    pub tris: Vec<u8>,
}

impl PolyMeshDetail {
    pub fn nverts(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn ntris(&self) -> usize {
        self.tris.len() / 4
    }
}

/// Height samples around one polygon, in cells relative to the field origin
struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    ymin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    fn at(&self, x: i32, y: i32) -> u16 {
        self.data[(x + y * self.width) as usize]
    }

    fn set(&mut self, x: i32, y: i32, h: u16) {
        self.data[(x + y * self.width) as usize] = h;
    }
}

// ============================================================================
// Geometry helpers
// ============================================================================

#[inline]
fn vdot2(a: &[f32], b: &[f32]) -> f32 {
    a[0] * b[0] + a[2] * b[2]
}

#[inline]
fn vcross2(p1: &[f32], p2: &[f32], p3: &[f32]) -> f32 {
    let u1 = p2[0] - p1[0];
    let v1 = p2[2] - p1[2];
    let u2 = p3[0] - p1[0];
    let v2 = p3[2] - p1[2];
    u1 * v2 - v1 * u2
}

#[inline]
fn pt(verts: &[f32], i: usize) -> &[f32] {
    &verts[i * 3..i * 3 + 3]
}

/// Circumcircle of a triangle in xz, computed relative to `p1`
fn circum_circle(p1: &[f32], p2: &[f32], p3: &[f32]) -> ([f32; 3], f32) {
    const EPS: f32 = 1e-6;
    let v1 = [0.0f32; 3];
    let v2 = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
    let v3 = [p3[0] - p1[0], p3[1] - p1[1], p3[2] - p1[2]];

    let cp = vcross2(&v1, &v2, &v3);
    if cp.abs() > EPS {
        let v1sq = vdot2(&v1, &v1);
        let v2sq = vdot2(&v2, &v2);
        let v3sq = vdot2(&v3, &v3);
        let mut c = [
            (v1sq * (v2[2] - v3[2]) + v2sq * (v3[2] - v1[2]) + v3sq * (v1[2] - v2[2])) / (2.0 * cp),
            0.0,
            (v1sq * (v3[0] - v2[0]) + v2sq * (v1[0] - v3[0]) + v3sq * (v2[0] - v1[0])) / (2.0 * cp),
        ];
        let r = vdist_2d(&c, &v1);
        c[0] += p1[0];
        c[1] += p1[1];
        c[2] += p1[2];
        return (c, r);
    }
    ([p1[0], p1[1], p1[2]], 0.0)
}

/// Vertical distance from `p` to triangle abc, or `f32::MAX` when outside
fn dist_pt_tri(p: &[f32], a: &[f32], b: &[f32], c: &[f32]) -> f32 {
    let v0 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let v1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v2 = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];

    let dot00 = vdot2(&v0, &v0);
    let dot01 = vdot2(&v0, &v1);
    let dot02 = vdot2(&v0, &v2);
    let dot11 = vdot2(&v1, &v1);
    let dot12 = vdot2(&v1, &v2);

    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    const EPS: f32 = 1e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a[1] + v0[1] * u + v1[1] * v;
        return (y - p[1]).abs();
    }
    f32::MAX
}

/// Squared 3D distance from `pt` to segment pq
fn dist_pt_seg_sq(pt: &[f32], p: &[f32], q: &[f32]) -> f32 {
    let pq = [q[0] - p[0], q[1] - p[1], q[2] - p[2]];
    let d = [pt[0] - p[0], pt[1] - p[1], pt[2] - p[2]];
    let len = pq[0] * pq[0] + pq[1] * pq[1] + pq[2] * pq[2];
    let mut t = pq[0] * d[0] + pq[1] * d[1] + pq[2] * d[2];
    if len > 0.0 {
        t /= len;
    }
    t = t.clamp(0.0, 1.0);
    let dx = p[0] + t * pq[0] - pt[0];
    let dy = p[1] + t * pq[1] - pt[1];
    let dz = p[2] + t * pq[2] - pt[2];
    dx * dx + dy * dy + dz * dz
}

fn dist_to_tri_mesh(p: &[f32], verts: &[f32], tris: &[i32]) -> Option<f32> {
    let mut dmin = f32::MAX;
    for t in tris.chunks_exact(4) {
        let d = dist_pt_tri(p, pt(verts, t[0] as usize), pt(verts, t[1] as usize), pt(verts, t[2] as usize));
        dmin = dmin.min(d);
    }
    if dmin == f32::MAX { None } else { Some(dmin) }
}

/// Signed 2D distance to a polygon outline, negative inside
fn dist_to_poly(verts: &[f32], p: &[f32]) -> f32 {
    let n = verts.len() / 3;
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = pt(verts, i);
        let vj = pt(verts, j);
        if ((vi[2] > p[2]) != (vj[2] > p[2])) && (p[0] < (vj[0] - vi[0]) * (p[2] - vi[2]) / (vj[2] - vi[2]) + vi[0]) {
            inside = !inside;
        }
        dmin = dmin.min(dist_pt_seg_sq_2d(p, vj, vi));
        j = i;
    }
    if inside { -dmin } else { dmin }
}

/// Smallest polygon width: the minimum over edges of the farthest vertex distance
fn poly_min_extent(verts: &[f32]) -> f32 {
    let n = verts.len() / 3;
    let mut min_dist = f32::MAX;
    for i in 0..n {
        let ni = (i + 1) % n;
        let p1 = pt(verts, i);
        let p2 = pt(verts, ni);
        let mut max_edge_dist = 0.0f32;
        for j in 0..n {
            if j == i || j == ni {
                continue;
            }
            max_edge_dist = max_edge_dist.max(dist_pt_seg_sq_2d(pt(verts, j), p1, p2));
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

#[inline]
fn jitter_x(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

#[inline]
fn jitter_y(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

/// Height at a local position. Unset cells fall back to a spiral search of
/// up to `radius` cells for the height closest to `fy`.
fn get_height(fx: f32, fy: f32, fz: f32, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let ix = ((fx * ics + 0.01).floor() as i32 - hp.xmin).clamp(0, hp.width - 1);
    let iz = ((fz * ics + 0.01).floor() as i32 - hp.ymin).clamp(0, hp.height - 1);
    let mut h = hp.at(ix, iz);
    if h != UNSET_HEIGHT {
        return h;
    }

    let (mut x, mut z, mut dx, mut dz) = (1i32, 0i32, 1i32, 0i32);
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;
    let mut next_ring_start = 8;
    let mut next_ring_iters = 16;
    let mut dmin = f32::MAX;
    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if nx >= 0 && nz >= 0 && nx < hp.width && nz < hp.height {
            let nh = hp.at(nx, nz);
            if nh != UNSET_HEIGHT {
                let d = (nh as f32 * ch - fy).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }

        // Stop after the first ring that produced a height
        if i + 1 == next_ring_start {
            if h != UNSET_HEIGHT {
                break;
            }
            next_ring_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            let tmp = dx;
            dx = -dz;
            dz = tmp;
        }
        x += dx;
        z += dz;
    }
    h
}

// ============================================================================
// Triangulation
// ============================================================================

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

fn find_edge(edges: &[[i32; 4]], s: i32, t: i32) -> Option<usize> {
    edges.iter().position(|e| (e[0] == s && e[1] == t) || (e[0] == t && e[1] == s))
}

fn add_edge(edges: &mut Vec<[i32; 4]>, max_edges: usize, s: i32, t: i32, l: i32, r: i32) {
    if edges.len() >= max_edges {
        error!("Too many detail edges ({}/{})", edges.len(), max_edges);
        return;
    }
    if find_edge(edges, s, t).is_none() {
        edges.push([s, t, l, r]);
    }
}

fn update_left_face(e: &mut [i32; 4], s: i32, t: i32, f: i32) {
    if e[0] == s && e[1] == t && e[2] == EV_UNDEF {
        e[2] = f;
    } else if e[1] == s && e[0] == t && e[3] == EV_UNDEF {
        e[3] = f;
    }
}

fn overlap_seg_seg_2d(a: &[f32], b: &[f32], c: &[f32], d: &[f32]) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(pts: &[f32], edges: &[[i32; 4]], s1: i32, t1: i32) -> bool {
    edges.iter().any(|e| {
        let (s0, t0) = (e[0], e[1]);
        if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
            return false;
        }
        overlap_seg_seg_2d(pt(pts, s0 as usize), pt(pts, t0 as usize), pt(pts, s1 as usize), pt(pts, t1 as usize))
    })
}

fn complete_facet(pts: &[f32], edges: &mut Vec<[i32; 4]>, max_edges: usize, nfaces: &mut i32, e: usize) {
    const EPS: f32 = 1e-5;
    let edge = edges[e];

    let (s, t) = if edge[2] == EV_UNDEF {
        (edge[0], edge[1])
    } else if edge[3] == EV_UNDEF {
        (edge[1], edge[0])
    } else {
        return;
    };

    let npts = (pts.len() / 3) as i32;
    let mut best = npts;
    let mut c = [0.0f32; 3];
    let mut r = -1.0f32;
    let (ps, pt_t) = (pt(pts, s as usize), pt(pts, t as usize));
    for u in 0..npts {
        if u == s || u == t {
            continue;
        }
        let pu = pt(pts, u as usize);
        if vcross2(ps, pt_t, pu) <= EPS {
            continue;
        }
        if r < 0.0 {
            best = u;
            (c, r) = circum_circle(ps, pt_t, pu);
            continue;
        }
        let d = vdist_2d(&c, pu);
        const TOL: f32 = 0.001;
        if d > r * (1.0 + TOL) {
            continue;
        } else if d < r * (1.0 - TOL) {
            best = u;
            (c, r) = circum_circle(ps, pt_t, pu);
        } else {
            // On the circle: accept only if the new edges cross nothing
            if overlap_edges(pts, edges, s, u) || overlap_edges(pts, edges, t, u) {
                continue;
            }
            best = u;
            (c, r) = circum_circle(ps, pt_t, pu);
        }
    }

    if best < npts {
        update_left_face(&mut edges[e], s, t, *nfaces);

        match find_edge(edges, best, s) {
            None => add_edge(edges, max_edges, best, s, *nfaces, EV_UNDEF),
            Some(i) => update_left_face(&mut edges[i], best, s, *nfaces),
        }
        match find_edge(edges, t, best) {
            None => add_edge(edges, max_edges, t, best, *nfaces, EV_UNDEF),
            Some(i) => update_left_face(&mut edges[i], t, best, *nfaces),
        }
        *nfaces += 1;
    } else {
        update_left_face(&mut edges[e], s, t, EV_HULL);
    }
}

/// Delaunay triangulation of `pts` constrained to the hull outline
fn delaunay_hull(pts: &[f32], hull: &[usize], tris: &mut Vec<i32>, edges: &mut Vec<[i32; 4]>) {
    let npts = pts.len() / 3;
    let max_edges = npts * 10;
    let mut nfaces = 0;
    edges.clear();

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        add_edge(edges, max_edges, hull[j] as i32, hull[i] as i32, EV_HULL, EV_UNDEF);
        j = i;
    }

    let mut current = 0;
    while current < edges.len() {
        if edges[current][2] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current);
        }
        if edges[current][3] == EV_UNDEF {
            complete_facet(pts, edges, max_edges, &mut nfaces, current);
        }
        current += 1;
    }

    tris.clear();
    tris.resize(nfaces as usize * 4, -1);
    for e in edges.iter() {
        if e[3] >= 0 {
            let t = &mut tris[e[3] as usize * 4..e[3] as usize * 4 + 4];
            if t[0] == -1 {
                t[0] = e[0];
                t[1] = e[1];
            } else if t[0] == e[1] {
                t[2] = e[0];
            } else if t[1] == e[0] {
                t[2] = e[1];
            }
        }
        if e[2] >= 0 {
            let t = &mut tris[e[2] as usize * 4..e[2] as usize * 4 + 4];
            if t[0] == -1 {
                t[0] = e[1];
                t[1] = e[0];
            } else if t[0] == e[0] {
                t[2] = e[1];
            } else if t[1] == e[1] {
                t[2] = e[0];
            }
        }
    }

    let mut i = 0;
    while i < tris.len() / 4 {
        let t = &tris[i * 4..i * 4 + 4];
        if t[0] == -1 || t[1] == -1 || t[2] == -1 {
            warn!("Removing dangling detail face {} [{},{},{}]", i, t[0], t[1], t[2]);
            let last = tris.len() - 4;
            tris.copy_within(last..last + 4, i * 4);
            tris.truncate(last);
        } else {
            i += 1;
        }
    }
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

/// Fan-like triangulation of the hull, advancing whichever side yields the
/// shorter perimeter. Starts from the original vertex with the smallest ear.
fn triangulate_hull(verts: &[f32], hull: &[usize], nin: usize, tris: &mut Vec<i32>) {
    let nhull = hull.len();
    let (mut start, mut left, mut right) = (0, 1, nhull - 1);

    let mut dmin = f32::MAX;
    for i in 0..nhull {
        // Edge samples lie on straight segments and cannot be ears
        if hull[i] >= nin {
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = pt(verts, hull[pi]);
        let cv = pt(verts, hull[i]);
        let nv = pt(verts, hull[ni]);
        let d = vdist_2d(pv, cv) + vdist_2d(cv, nv) + vdist_2d(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    tris.extend_from_slice(&[hull[start] as i32, hull[left] as i32, hull[right] as i32, 0]);

    while next(left, nhull) != right {
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = pt(verts, hull[left]);
        let nvleft = pt(verts, hull[nleft]);
        let cvright = pt(verts, hull[right]);
        let nvright = pt(verts, hull[nright]);
        let dleft = vdist_2d(cvleft, nvleft) + vdist_2d(nvleft, cvright);
        let dright = vdist_2d(cvright, nvright) + vdist_2d(cvleft, nvright);

        if dleft < dright {
            tris.extend_from_slice(&[hull[left] as i32, hull[nleft] as i32, hull[right] as i32, 0]);
            left = nleft;
        } else {
            tris.extend_from_slice(&[hull[left] as i32, hull[nright] as i32, hull[right] as i32, 0]);
            right = nright;
        }
    }
}

fn on_hull(a: i32, b: i32, hull: &[usize]) -> bool {
    let nhull = hull.len() as i32;
    // Interior samples are appended after the hull vertices
    if a >= nhull || b >= nhull {
        return false;
    }
    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        if a == hull[j] as i32 && b == hull[i] as i32 {
            return true;
        }
        j = i;
    }
    false
}

/// Flag triangle edges lying on the hull, two bits per edge
fn set_tri_flags(tris: &mut [i32], hull: &[usize]) {
    for t in tris.chunks_exact_mut(4) {
        let (a, b, c) = (t[0], t[1], t[2]);
        let mut flags = 0;
        if on_hull(a, b, hull) {
            flags |= (DETAIL_EDGE_BOUNDARY as i32) << 0;
        }
        if on_hull(b, c, hull) {
            flags |= (DETAIL_EDGE_BOUNDARY as i32) << 2;
        }
        if on_hull(c, a, hull) {
            flags |= (DETAIL_EDGE_BOUNDARY as i32) << 4;
        }
        t[3] = flags;
    }
}

// ============================================================================
// Per polygon detail
// ============================================================================

struct DetailParams {
    sample_dist: f32,
    sample_max_error: f32,
    height_search_radius: i32,
    cs: f32,
    ch: f32,
}

/// Triangulate one polygon (local coordinates in `input`), adding edge and
/// interior samples until the surface error drops below the threshold.
fn build_poly_detail(input: &[f32], params: &DetailParams, hp: &HeightPatch, verts: &mut Vec<f32>, tris: &mut Vec<i32>, edges: &mut Vec<[i32; 4]>) {
    let nin = input.len() / 3;
    let DetailParams { sample_dist, sample_max_error, height_search_radius, cs, ch } = *params;
    let ics = 1.0 / cs;

    verts.clear();
    verts.extend_from_slice(input);
    edges.clear();
    tris.clear();

    let mut hull: Vec<usize> = Vec::with_capacity(MAX_VERTS);
    let min_extent = poly_min_extent(verts);

    // Tessellate outline edges first so neighbouring polygons share heights
    if sample_dist > 0.0 {
        let mut edge = [0.0f32; (MAX_VERTS_PER_EDGE + 1) * 3];
        let mut j = nin - 1;
        for i in 0..nin {
            let (mut vj, mut vi) = (pt(input, j), pt(input, i));
            let mut swapped = false;
            // Fixed segment order avoids seams between polygons
            if (vj[0] - vi[0]).abs() < 1e-6 {
                if vj[2] > vi[2] {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
            } else if vj[0] > vi[0] {
                std::mem::swap(&mut vj, &mut vi);
                swapped = true;
            }

            let dx = vi[0] - vj[0];
            let dy = vi[1] - vj[1];
            let dz = vi[2] - vj[2];
            let d = (dx * dx + dz * dz).sqrt();
            let mut nn = 1 + (d / sample_dist).floor() as usize;
            if nn >= MAX_VERTS_PER_EDGE {
                nn = MAX_VERTS_PER_EDGE - 1;
            }
            let nverts = verts.len() / 3;
            if nverts + nn >= MAX_VERTS {
                nn = (MAX_VERTS - 1).saturating_sub(nverts);
            }

            for k in 0..=nn {
                let u = if nn > 0 { k as f32 / nn as f32 } else { 0.0 };
                let pos = &mut edge[k * 3..k * 3 + 3];
                pos[0] = vj[0] + dx * u;
                pos[1] = vj[1] + dy * u;
                pos[2] = vj[2] + dz * u;
                pos[1] = get_height(pos[0], pos[1], pos[2], ics, ch, height_search_radius, hp) as f32 * ch;
            }

            // Simplify the samples
            let mut idx = [0usize; MAX_VERTS_PER_EDGE];
            idx[1] = nn;
            let mut nidx = 2;
            let mut k = 0;
            while k < nidx - 1 {
                let a = idx[k];
                let b = idx[k + 1];
                let va = &edge[a * 3..a * 3 + 3];
                let vb = &edge[b * 3..b * 3 + 3];
                let mut maxd = 0.0;
                let mut maxi = None;
                for m in a + 1..b {
                    let dev = dist_pt_seg_sq(&edge[m * 3..m * 3 + 3], va, vb);
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                match maxi {
                    Some(m) if maxd > sample_max_error * sample_max_error && nidx < MAX_VERTS_PER_EDGE => {
                        for n in (k + 1..=nidx).rev() {
                            idx[n] = idx[n - 1];
                        }
                        idx[k + 1] = m;
                        nidx += 1;
                    }
                    _ => k += 1,
                }
            }

            hull.push(j);
            let push_sample = |k: usize, verts: &mut Vec<f32>, hull: &mut Vec<usize>| {
                hull.push(verts.len() / 3);
                verts.extend_from_slice(&edge[idx[k] * 3..idx[k] * 3 + 3]);
            };
            if swapped {
                for k in (1..nidx - 1).rev() {
                    push_sample(k, verts, &mut hull);
                }
            } else {
                for k in 1..nidx - 1 {
                    push_sample(k, verts, &mut hull);
                }
            }
            j = i;
        }
    } else {
        hull.extend(0..nin);
    }

    // Slivers get no interior samples
    if min_extent < sample_dist * 2.0 {
        triangulate_hull(verts, &hull, nin, tris);
        set_tri_flags(tris, &hull);
        return;
    }

    triangulate_hull(verts, &hull, nin, tris);
    if tris.is_empty() {
        warn!("Could not triangulate polygon ({} verts)", verts.len() / 3);
        return;
    }

    if sample_dist > 0.0 {
        let mut bmin = [input[0], input[1], input[2]];
        let mut bmax = bmin;
        for v in input.chunks_exact(3).skip(1) {
            vmin(&mut bmin, v);
            vmax(&mut bmax, v);
        }
        let x0 = (bmin[0] / sample_dist).floor() as i32;
        let x1 = (bmax[0] / sample_dist).ceil() as i32;
        let z0 = (bmin[2] / sample_dist).floor() as i32;
        let z1 = (bmax[2] / sample_dist).ceil() as i32;

        // (x, height, z, added)
        let mut samples: Vec<[i32; 4]> = Vec::new();
        for z in z0..z1 {
            for x in x0..x1 {
                let p = [x as f32 * sample_dist, (bmax[1] + bmin[1]) * 0.5, z as f32 * sample_dist];
                // Keep samples away from the edges
                if dist_to_poly(input, &p) > -sample_dist / 2.0 {
                    continue;
                }
                let h = get_height(p[0], p[1], p[2], ics, ch, height_search_radius, hp);
                samples.push([x, h as i32, z, 0]);
            }
        }

        // Add the worst sample until the error is within bounds
        for _ in 0..samples.len() {
            if verts.len() / 3 >= MAX_VERTS {
                break;
            }

            let mut bestpt = [0.0f32; 3];
            let mut bestd = 0.0;
            let mut besti = None;
            for (i, s) in samples.iter().enumerate() {
                if s[3] != 0 {
                    continue;
                }
                // Jitter breaks up the symmetry of the sample grid
                let p = [
                    s[0] as f32 * sample_dist + jitter_x(i) * cs * 0.1,
                    s[1] as f32 * ch,
                    s[2] as f32 * sample_dist + jitter_y(i) * cs * 0.1,
                ];
                let Some(d) = dist_to_tri_mesh(&p, verts, tris) else {
                    continue;
                };
                if d > bestd {
                    bestd = d;
                    besti = Some(i);
                    bestpt = p;
                }
            }

            let Some(besti) = besti else {
                break;
            };
            if bestd <= sample_max_error {
                break;
            }
            samples[besti][3] = 1;
            verts.extend_from_slice(&bestpt);

            // TODO: insert the sample incrementally instead of rebuilding
            delaunay_hull(verts, &hull, tris, edges);
        }
    }

    let ntris = tris.len() / 4;
    if ntris > MAX_TRIS {
        tris.truncate(MAX_TRIS * 4);
        error!("Shrinking detail triangle count from {} to max {}", ntris, MAX_TRIS);
    }
    set_tri_flags(tris, &hull);
}

// ============================================================================
// Height sampling
// ============================================================================

/// Walk from the compact span nearest a polygon vertex to the polygon centre
/// and seed the patch there. Used when no span of the polygon's region lies
/// under it.
fn seed_with_poly_center(chf: &CompactHeightfield, poly: &[u16], verts: &[u16], hp: &mut HeightPatch, queue: &mut VecDeque<(i32, i32, usize)>) {
    const OFFSET: [(i32, i32); 9] = [(0, 0), (-1, -1), (0, -1), (1, -1), (1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0)];

    let mut start: Option<(i32, i32, usize)> = None;
    let mut dmin = UNSET_HEIGHT as i32;
    'search: for &pv in poly {
        let v = &verts[pv as usize * 3..pv as usize * 3 + 3];
        for (ox, oz) in OFFSET {
            let ax = v[0] as i32 + ox;
            let ay = v[1] as i32;
            let az = v[2] as i32 + oz;
            if ax < hp.xmin || ax >= hp.xmin + hp.width || az < hp.ymin || az >= hp.ymin + hp.height {
                continue;
            }
            for i in chf.cell_spans(ax, az) {
                let d = (ay - chf.spans[i].y as i32).abs();
                if d < dmin {
                    start = Some((ax, az, i));
                    dmin = d;
                }
                if dmin == 0 {
                    break 'search;
                }
            }
        }
    }

    let Some(start) = start else {
        warn!("No compact span found under polygon");
        hp.data.fill(UNSET_HEIGHT);
        return;
    };

    let n = poly.len() as i32;
    let pcx = poly.iter().map(|&p| verts[p as usize * 3] as i32).sum::<i32>() / n;
    let pcy = poly.iter().map(|&p| verts[p as usize * 3 + 2] as i32).sum::<i32>() / n;

    // Depth first walk towards the centre, recording visited cells
    let mut stack = vec![start];
    let mut dirs = [0usize, 1, 2, 3];
    hp.data.fill(0);
    let (mut cx, mut cy, mut ci) = start;
    loop {
        let Some(top) = stack.pop() else {
            warn!("Walk towards polygon center failed to reach center");
            break;
        };
        (cx, cy, ci) = top;
        if cx == pcx && cy == pcy {
            break;
        }

        // Prefer stepping straight at the centre
        let direct = if cx == pcx {
            dir_for_offset(0, if pcy > cy { 1 } else { -1 })
        } else {
            dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
        };
        dirs.swap(direct, 3);

        let span = chf.spans[ci];
        for &dir in &dirs {
            if span.con(dir) == RC_NOT_CONNECTED {
                continue;
            }
            let nx = cx + dir_offset_x(dir);
            let ny = cy + dir_offset_y(dir);
            let hpx = nx - hp.xmin;
            let hpy = ny - hp.ymin;
            if hpx < 0 || hpx >= hp.width || hpy < 0 || hpy >= hp.height {
                continue;
            }
            if hp.at(hpx, hpy) != 0 {
                continue;
            }
            hp.set(hpx, hpy, 1);
            stack.push((nx, ny, chf.cell(nx, ny).index as usize + span.con(dir) as usize));
        }

        dirs.swap(direct, 3);
    }

    queue.clear();
    queue.push_back((cx, cy, ci));
    hp.data.fill(UNSET_HEIGHT);
    hp.set(cx - hp.xmin, cy - hp.ymin, chf.spans[ci].y);
}

/// Fill the patch with span heights under the polygon by flooding from the
/// edges of its region (or from its centre)
fn get_height_data(chf: &CompactHeightfield, poly: &[u16], verts: &[u16], hp: &mut HeightPatch, region: u16) {
    let mut queue: VecDeque<(i32, i32, usize)> = VecDeque::new();
    hp.data.fill(UNSET_HEIGHT);

    let mut empty = true;

    // Polygons merged across regions may overlap others of those regions
    if region != RC_MULTIPLE_REGS {
        for hy in 0..hp.height {
            let y = hp.ymin + hy;
            for hx in 0..hp.width {
                let x = hp.xmin + hx;
                for i in chf.cell_spans(x, y) {
                    let s = &chf.spans[i];
                    if s.reg != region {
                        continue;
                    }
                    hp.set(hx, hy, s.y);
                    empty = false;

                    let border = (0..4).any(|dir| {
                        if s.con(dir) == RC_NOT_CONNECTED {
                            return false;
                        }
                        let ai = chf.neighbour(x, y, s, dir);
                        chf.spans[ai].reg != region
                    });
                    if border {
                        queue.push_back((x, y, i));
                    }
                    break;
                }
            }
        }
    }

    if empty {
        seed_with_poly_center(chf, poly, verts, hp, &mut queue);
    }

    while let Some((cx, cy, ci)) = queue.pop_front() {
        let s = chf.spans[ci];
        for dir in 0..4 {
            if s.con(dir) == RC_NOT_CONNECTED {
                continue;
            }
            let ax = cx + dir_offset_x(dir);
            let ay = cy + dir_offset_y(dir);
            let hx = ax - hp.xmin;
            let hy = ay - hp.ymin;
            if hx < 0 || hx >= hp.width || hy < 0 || hy >= hp.height {
                continue;
            }
            if hp.at(hx, hy) != UNSET_HEIGHT {
                continue;
            }
            let ai = chf.neighbour(cx, cy, &s, dir);
            hp.set(hx, hy, chf.spans[ai].y);
            queue.push_back((ax, ay, ai));
        }
    }
}

// ============================================================================
// Detail mesh
// ============================================================================

/// Build a detail mesh for every polygon of `mesh`. Polygon vertices must be
/// in cell coordinates of `chf`; output vertices are in world space.
pub fn build_poly_mesh_detail(mesh: &PolyMesh, chf: &CompactHeightfield, sample_dist: f32, sample_max_error: f32) -> Result<PolyMeshDetail> {
    let mut dmesh = PolyMeshDetail::default();
    if mesh.nverts() == 0 || mesh.npolys() == 0 {
        return Ok(dmesh);
    }

    let nvp = mesh.nvp;
    let (cs, ch) = (mesh.cs, mesh.ch);
    let orig = mesh.bmin;
    let params = DetailParams {
        sample_dist,
        sample_max_error,
        height_search_radius: 1.max(mesh.max_edge_error.ceil() as i32),
        cs,
        ch,
    };

    // Cell bounds of each polygon, grown by one cell
    let mut bounds = Vec::with_capacity(mesh.npolys());
    let mut max_area = 0;
    for i in 0..mesh.npolys() {
        let p = &mesh.poly(i)[..nvp];
        let (mut xmin, mut xmax, mut ymin, mut ymax) = (chf.width, 0, chf.height, 0);
        for &vi in p.iter().take_while(|&&v| v != RC_MESH_NULL_IDX) {
            let v = &mesh.verts[vi as usize * 3..vi as usize * 3 + 3];
            xmin = xmin.min(v[0] as i32);
            xmax = xmax.max(v[0] as i32);
            ymin = ymin.min(v[2] as i32);
            ymax = ymax.max(v[2] as i32);
        }
        xmin = 0.max(xmin - 1);
        xmax = chf.width.min(xmax + 1);
        ymin = 0.max(ymin - 1);
        ymax = chf.height.min(ymax + 1);
        if xmin < xmax && ymin < ymax {
            max_area = max_area.max(((xmax - xmin) * (ymax - ymin)) as usize);
        }
        bounds.push([xmin, xmax, ymin, ymax]);
    }

    let mut hp = HeightPatch { data: Vec::with_capacity(max_area), xmin: 0, ymin: 0, width: 0, height: 0 };
    let mut verts: Vec<f32> = Vec::with_capacity(MAX_VERTS * 3);
    let mut tris: Vec<i32> = Vec::new();
    let mut edges: Vec<[i32; 4]> = Vec::new();
    let mut poly: Vec<f32> = Vec::with_capacity(nvp * 3);

    dmesh.meshes.reserve(mesh.npolys());

    for i in 0..mesh.npolys() {
        let p: Vec<u16> = mesh.poly(i)[..nvp].iter().copied().take_while(|&v| v != RC_MESH_NULL_IDX).collect();

        poly.clear();
        for &vi in &p {
            let v = &mesh.verts[vi as usize * 3..vi as usize * 3 + 3];
            poly.extend_from_slice(&[v[0] as f32 * cs, v[1] as f32 * ch, v[2] as f32 * cs]);
        }

        let [xmin, xmax, ymin, ymax] = bounds[i];
        if xmin < xmax && ymin < ymax {
            hp.xmin = xmin;
            hp.ymin = ymin;
            hp.width = xmax - xmin;
            hp.height = ymax - ymin;
            hp.data.clear();
            hp.data.resize((hp.width * hp.height) as usize, UNSET_HEIGHT);
            get_height_data(chf, &p, &mesh.verts, &mut hp, mesh.regs[i]);
            build_poly_detail(&poly, &params, &hp, &mut verts, &mut tris, &mut edges);
        } else {
            // Degenerate footprint: keep the outline heights
            let flat = DetailParams { sample_dist: 0.0, ..params };
            hp.xmin = xmin;
            hp.ymin = ymin;
            hp.width = 1;
            hp.height = 1;
            hp.data.clear();
            hp.data.push(UNSET_HEIGHT);
            build_poly_detail(&poly, &flat, &hp, &mut verts, &mut tris, &mut edges);
        }

        let nverts = verts.len() / 3;
        let ntris = tris.len() / 4;
        dmesh.meshes.push([dmesh.nverts() as u32, nverts as u32, dmesh.ntris() as u32, ntris as u32]);

        for v in verts.chunks_exact(3) {
            dmesh.verts.extend_from_slice(&[v[0] + orig[0], v[1] + orig[1] + ch, v[2] + orig[2]]);
        }
        for t in tris.chunks_exact(4) {
            dmesh.tris.extend_from_slice(&[t[0] as u8, t[1] as u8, t[2] as u8, t[3] as u8]);
        }
    }

    Ok(dmesh)
}

/// Concatenate detail meshes, rebasing vertex and triangle offsets
pub fn merge_poly_mesh_details(meshes: &[PolyMeshDetail]) -> PolyMeshDetail {
    let mut merged = PolyMeshDetail {
        meshes: Vec::with_capacity(meshes.iter().map(|m| m.meshes.len()).sum()),
        verts: Vec::with_capacity(meshes.iter().map(|m| m.verts.len()).sum()),
        tris: Vec::with_capacity(meshes.iter().map(|m| m.tris.len()).sum()),
    };

    for dm in meshes {
        let vbase = merged.nverts() as u32;
        let tbase = merged.ntris() as u32;
        merged
            .meshes
            .extend(dm.meshes.iter().map(|m| [vbase + m[0], m[1], tbase + m[2], m[3]]));
        merged.verts.extend_from_slice(&dm.verts);
        merged.tris.extend_from_slice(&dm.tris);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RC_CONTOUR_TESS_WALL_EDGES;
    use crate::area::tests::flat_compact;
    use crate::contour::build_contours;
    use crate::mesh::build_poly_mesh;
    use crate::region::{build_distance_field, build_regions};

    #[test]
    fn min_extent_of_square() {
        let verts = [0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 0.0, 4.0, 4.0, 0.0, 0.0];
        assert!((poly_min_extent(&verts) - 4.0).abs() < 1e-5);
    }

    #[test]
    fn hull_triangulation_covers_polygon() {
        let verts = [0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 0.0, 4.0, 4.0, 0.0, 0.0, 2.0, 0.0, 4.0];
        let hull = [0, 1, 4, 2, 3];
        let mut tris = Vec::new();
        triangulate_hull(&verts, &hull, 4, &mut tris);
        assert_eq!(tris.len() / 4, 3);
    }

    #[test]
    fn delaunay_with_center_point() {
        let pts = [0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 0.0, 4.0, 4.0, 0.0, 0.0, 2.0, 1.0, 2.0];
        let hull = [0, 1, 2, 3];
        let mut tris = Vec::new();
        let mut edges = Vec::new();
        delaunay_hull(&pts, &hull, &mut tris, &mut edges);
        assert_eq!(tris.len() / 4, 4);
        assert!(tris.chunks_exact(4).all(|t| t[..3].contains(&4)));
    }

    #[test]
    fn spiral_search_finds_nearest_height() {
        let mut hp = HeightPatch { data: vec![UNSET_HEIGHT; 25], xmin: 0, ymin: 0, width: 5, height: 5 };
        hp.set(3, 2, 7);
        assert_eq!(get_height(2.0, 0.0, 2.0, 1.0, 1.0, 2, &hp), 7);
        assert_eq!(get_height(3.0, 0.0, 2.0, 1.0, 1.0, 2, &hp), 7);
    }

    #[test]
    fn flat_polygon_detail() {
        let mut chf = flat_compact(10);
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, 0, 4, 10).unwrap();
        let cset = build_contours(&chf, 1.3, 0, RC_CONTOUR_TESS_WALL_EDGES).unwrap();
        let mesh = build_poly_mesh(&cset, 6).unwrap();

        let dmesh = build_poly_mesh_detail(&mesh, &chf, 2.0, 1.0).unwrap();
        assert_eq!(dmesh.meshes.len(), 1);
        assert_eq!(dmesh.meshes[0], [0, 4, 0, 2]);
        for v in dmesh.verts.chunks_exact(3) {
            assert!((v[1] - 11.0).abs() < 1e-4);
        }
    }

    #[test]
    fn merge_rebases_offsets() {
        let a = PolyMeshDetail { meshes: vec![[0, 3, 0, 1]], verts: vec![0.0; 9], tris: vec![0, 1, 2, 0] };
        let b = a.clone();
        let merged = merge_poly_mesh_details(&[a, b]);
        assert_eq!(merged.meshes, vec![[0, 3, 0, 1], [3, 3, 1, 1]]);
        assert_eq!(merged.nverts(), 6);
        assert_eq!(merged.ntris(), 2);
    }
}
