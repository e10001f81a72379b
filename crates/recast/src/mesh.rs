// mesh.rs - Convex polygon mesh from region contours

use tracing::{error, warn};

use crate::contour::ContourSet;
use crate::{RC_BORDER_VERTEX, RC_MESH_NULL_IDX, RC_MULTIPLE_REGS, RecastError, Result};

/// Polygon mesh. Each polygon takes `2 * nvp` entries of `polys`: vertex
/// indices followed by neighbour polygon indices (or portal/border codes).
#[derive(Clone, Debug, Default)]
pub struct PolyMesh {
    pub verts: Vec<u16>,
    pub polys: Vec<u16>,
    pub regs: Vec<u16>,
    pub flags: Vec<u16>,
    pub areas: Vec<u8>,
    pub nvp: usize,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    #[inline]
    pub fn nverts(&self) -> usize {
        self.verts.len() / 3
    }

    #[inline]
    pub fn npolys(&self) -> usize {
        self.regs.len()
    }

    /// Vertex indices and neighbour entries of polygon `i`
    #[inline]
    pub fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * self.nvp * 2..(i + 1) * self.nvp * 2]
    }

    /// Number of used vertex slots of polygon `i`
    pub fn poly_vert_count(&self, i: usize) -> usize {
        count_poly_verts(&self.poly(i)[..self.nvp])
    }

    fn swap_remove_poly(&mut self, i: usize) {
        let nvp = self.nvp;
        let last = self.npolys() - 1;
        if i != last {
            self.polys.copy_within(last * nvp * 2..last * nvp * 2 + nvp, i * nvp * 2);
        }
        self.polys[i * nvp * 2 + nvp..(i + 1) * nvp * 2].fill(RC_MESH_NULL_IDX);
        self.polys.truncate(last * nvp * 2);
        self.regs.swap_remove(i);
        self.areas.swap_remove(i);
    }
}

// ============================================================================
// Geometry predicates
// ============================================================================

const VERTEX_BUCKET_COUNT: usize = 1 << 12;
const INDEX_MASK: u32 = 0x0fff_ffff;
const REMOVABLE: u32 = 0x8000_0000;

#[inline]
fn vertex_hash(x: i32, y: i32, z: i32) -> usize {
    let h1: u32 = 0x8da6_b343;
    let h2: u32 = 0xd816_3841;
    let h3: u32 = 0xcb1a_b31f;
    let n = h1
        .wrapping_mul(x as u32)
        .wrapping_add(h2.wrapping_mul(y as u32))
        .wrapping_add(h3.wrapping_mul(z as u32));
    (n as usize) & (VERTEX_BUCKET_COUNT - 1)
}

/// Vertex welding table: equal x and z, y within 2 cells
struct VertexWelder {
    first: Vec<i32>,
    next: Vec<i32>,
}

impl VertexWelder {
    fn new() -> Self {
        VertexWelder { first: vec![-1; VERTEX_BUCKET_COUNT], next: Vec::new() }
    }

    fn add(&mut self, x: u16, y: u16, z: u16, verts: &mut Vec<u16>) -> usize {
        let bucket = vertex_hash(x as i32, 0, z as i32);
        let mut i = self.first[bucket];
        while i != -1 {
            let v = &verts[i as usize * 3..i as usize * 3 + 3];
            if v[0] == x && (v[1] as i32 - y as i32).abs() <= 2 && v[2] == z {
                return i as usize;
            }
            i = self.next[i as usize];
        }
        let index = verts.len() / 3;
        verts.extend_from_slice(&[x, y, z]);
        self.next.push(self.first[bucket]);
        self.first[bucket] = index as i32;
        index
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

#[inline]
fn area2(a: &[i32], b: &[i32], c: &[i32]) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

#[inline]
fn left(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    area2(a, b, c) < 0
}

#[inline]
fn left_on(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
fn collinear(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    area2(a, b, c) == 0
}

fn intersect_prop(a: &[i32], b: &[i32], c: &[i32], d: &[i32]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

fn between(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

fn intersect(a: &[i32], b: &[i32], c: &[i32], d: &[i32]) -> bool {
    intersect_prop(a, b, c, d) || between(a, b, c) || between(a, b, d) || between(c, d, a) || between(c, d, b)
}

#[inline]
fn vequal(a: &[i32], b: &[i32]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

#[inline]
fn vert<'a>(verts: &'a [i32], indices: &[u32], i: usize) -> &'a [i32] {
    let v = (indices[i] & INDEX_MASK) as usize * 4;
    &verts[v..v + 4]
}

/// (i, j) is a proper diagonal ignoring edges incident to i and j
fn diagonalie(i: usize, j: usize, n: usize, verts: &[i32], indices: &[u32], loose: bool) -> bool {
    let d0 = vert(verts, indices, i);
    let d1 = vert(verts, indices, j);
    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vert(verts, indices, k);
        let p1 = vert(verts, indices, k1);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        let hit = if loose { intersect_prop(d0, d1, p0, p1) } else { intersect(d0, d1, p0, p1) };
        if hit {
            return false;
        }
    }
    true
}

/// Diagonal (i, j) is internal to the polygon around vertex i
fn in_cone(i: usize, j: usize, n: usize, verts: &[i32], indices: &[u32], loose: bool) -> bool {
    let pi = vert(verts, indices, i);
    let pj = vert(verts, indices, j);
    let pi1 = vert(verts, indices, next(i, n));
    let pin1 = vert(verts, indices, prev(i, n));

    if left_on(pin1, pi, pi1) {
        if loose {
            return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
        }
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn diagonal(i: usize, j: usize, n: usize, verts: &[i32], indices: &[u32]) -> bool {
    in_cone(i, j, n, verts, indices, false) && diagonalie(i, j, n, verts, indices, false)
}

fn diagonal_loose(i: usize, j: usize, n: usize, verts: &[i32], indices: &[u32]) -> bool {
    in_cone(i, j, n, verts, indices, true) && diagonalie(i, j, n, verts, indices, true)
}

/// Ear-clipping triangulation of an (x, y, z, flags) outline. Returns the
/// triangle count; `Err` carries the partial result when the outline is
/// too broken to finish.
fn triangulate(mut n: usize, verts: &[i32], indices: &mut [u32], tris: &mut Vec<i32>) -> std::result::Result<usize, usize> {
    tris.clear();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, n, verts, indices) {
            indices[i1] |= REMOVABLE;
        }
    }

    while n > 3 {
        let mut min_len = -1;
        let mut mini: Option<usize> = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & REMOVABLE != 0 {
                let p0 = vert(verts, indices, i);
                let p2 = vert(verts, indices, next(i1, n));
                let dx = p2[0] - p0[0];
                let dz = p2[2] - p0[2];
                let len = dx * dx + dz * dz;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    mini = Some(i);
                }
            }
        }

        if mini.is_none() {
            // Overlapping segments; retry with a relaxed cone test
            min_len = -1;
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, n, verts, indices) {
                    let p0 = vert(verts, indices, i);
                    let p2 = vert(verts, indices, next(i2, n));
                    let dx = p2[0] - p0[0];
                    let dz = p2[2] - p0[2];
                    let len = dx * dx + dz * dz;
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        mini = Some(i);
                    }
                }
            }
        }

        let Some(i) = mini else {
            return Err(tris.len() / 3);
        };
        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push((indices[i] & INDEX_MASK) as i32);
        tris.push((indices[i1] & INDEX_MASK) as i32);
        tris.push((indices[i2] & INDEX_MASK) as i32);

        // Drop P[i1]
        n -= 1;
        for k in i1..n {
            indices[k] = indices[k + 1];
        }
        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);

        if diagonal(prev(i, n), i1, n, verts, indices) {
            indices[i] |= REMOVABLE;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), n, verts, indices) {
            indices[i1] |= REMOVABLE;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    tris.push((indices[0] & INDEX_MASK) as i32);
    tris.push((indices[1] & INDEX_MASK) as i32);
    tris.push((indices[2] & INDEX_MASK) as i32);
    Ok(tris.len() / 3)
}

// ============================================================================
// Polygon merging
// ============================================================================

fn count_poly_verts(p: &[u16]) -> usize {
    p.iter().position(|&v| v == RC_MESH_NULL_IDX).unwrap_or(p.len())
}

#[inline]
fn uleft(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    (b[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32) - (c[0] as i32 - a[0] as i32) * (b[2] as i32 - a[2] as i32) < 0
}

/// Squared length of the shared edge if `pa` and `pb` merge into a convex
/// polygon of at most `nvp` vertices, with the edge indices on each side.
fn poly_merge_value(pa: &[u16], pb: &[u16], verts: &[u16], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);
    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |i: u16| &verts[i as usize * 3..i as usize * 3 + 3];
    if !uleft(v(pa[(ea + na - 1) % na]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !uleft(v(pb[(eb + nb - 1) % nb]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let a = v(pa[ea]);
    let b = v(pa[(ea + 1) % na]);
    let dx = a[0] as i32 - b[0] as i32;
    let dz = a[2] as i32 - b[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize, nvp: usize) -> Vec<u16> {
    let na = count_poly_verts(pa);
    let nb = count_poly_verts(pb);
    let mut tmp = vec![RC_MESH_NULL_IDX; nvp];
    let mut n = 0;
    for i in 0..na - 1 {
        tmp[n] = pa[(ea + 1 + i) % na];
        n += 1;
    }
    for i in 0..nb - 1 {
        tmp[n] = pb[(eb + 1 + i) % nb];
        n += 1;
    }
    tmp
}

/// Greedily merge triangles (stride `nvp`) into convex polygons. `regs`, when
/// given, tracks the region of each polygon.
fn merge_polys(polys: &mut Vec<u16>, verts: &[u16], nvp: usize, mut regs: Option<&mut Vec<u16>>, mut areas: Option<&mut Vec<u8>>) {
    if nvp <= 3 {
        return;
    }
    loop {
        let npolys = polys.len() / nvp;
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..npolys.saturating_sub(1) {
            for k in j + 1..npolys {
                let pj = &polys[j * nvp..(j + 1) * nvp];
                let pk = &polys[k * nvp..(k + 1) * nvp];
                if let Some((v, ea, eb)) = poly_merge_value(pj, pk, verts, nvp) {
                    if v > best.map_or(0, |b| b.0) {
                        best = Some((v, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        let merged = merge_poly_verts(&polys[pa * nvp..(pa + 1) * nvp], &polys[pb * nvp..(pb + 1) * nvp], ea, eb, nvp);
        polys[pa * nvp..(pa + 1) * nvp].copy_from_slice(&merged);

        let last = npolys - 1;
        if pb != last {
            polys.copy_within(last * nvp..(last + 1) * nvp, pb * nvp);
        }
        polys.truncate(last * nvp);

        if let Some(regs) = regs.as_deref_mut() {
            if regs[pa] != regs[pb] {
                regs[pa] = RC_MULTIPLE_REGS;
            }
            regs.swap_remove(pb);
        }
        if let Some(areas) = areas.as_deref_mut() {
            areas.swap_remove(pb);
        }
    }
}

// ============================================================================
// Border vertex removal
// ============================================================================

fn can_remove_vertex(mesh: &PolyMesh, rem: u16) -> bool {
    let nvp = mesh.nvp;

    let mut num_touched = 0;
    let mut num_remaining_edges = 0;
    for i in 0..mesh.npolys() {
        let p = &mesh.poly(i)[..nvp];
        let nv = count_poly_verts(p);
        let removed = p[..nv].iter().filter(|&&v| v == rem).count();
        if removed > 0 {
            num_touched += removed;
            num_remaining_edges += nv as i32 - (removed as i32 + 1);
        }
    }

    // Too few edges would remain to form a polygon
    if num_remaining_edges <= 2 {
        return false;
    }

    let mut edges: Vec<[i32; 3]> = Vec::with_capacity(num_touched * 2);
    for i in 0..mesh.npolys() {
        let p = &mesh.poly(i)[..nvp];
        let nv = count_poly_verts(p);
        let mut k = nv - 1;
        for j in 0..nv {
            if p[j] == rem || p[k] == rem {
                let (mut a, mut b) = (p[j] as i32, p[k] as i32);
                if b == rem as i32 {
                    std::mem::swap(&mut a, &mut b);
                }
                let mut exists = false;
                for e in edges.iter_mut() {
                    if e[1] == b {
                        e[2] += 1;
                        exists = true;
                    }
                }
                if !exists {
                    edges.push([a, b, 1]);
                }
            }
            k = j;
        }
    }

    // More than two open edges means unrelated polygons share the vertex
    edges.iter().filter(|e| e[2] < 2).count() <= 2
}

fn remove_vertex(mesh: &mut PolyMesh, rem: u16, max_polys: usize) -> Result<()> {
    let nvp = mesh.nvp;

    // (a, b, reg, area) edges of removed polygons not touching `rem`
    let mut edges: Vec<[i32; 4]> = Vec::new();
    let mut i = 0;
    while i < mesh.npolys() {
        let p = &mesh.poly(i)[..nvp];
        let nv = count_poly_verts(p);
        if p[..nv].contains(&rem) {
            let mut k = nv - 1;
            for j in 0..nv {
                if p[j] != rem && p[k] != rem {
                    edges.push([p[k] as i32, p[j] as i32, mesh.regs[i] as i32, mesh.areas[i] as i32]);
                }
                k = j;
            }
            mesh.swap_remove_poly(i);
        } else {
            i += 1;
        }
    }

    let r = rem as usize;
    mesh.verts.drain(r * 3..r * 3 + 3);

    for i in 0..mesh.npolys() {
        let base = i * nvp * 2;
        let nv = count_poly_verts(&mesh.polys[base..base + nvp]);
        for v in &mut mesh.polys[base..base + nv] {
            if *v > rem {
                *v -= 1;
            }
        }
    }
    for e in edges.iter_mut() {
        if e[0] > rem as i32 {
            e[0] -= 1;
        }
        if e[1] > rem as i32 {
            e[1] -= 1;
        }
    }

    if edges.is_empty() {
        return Ok(());
    }

    // Chain the edges into the outline of the hole
    let mut hole = std::collections::VecDeque::new();
    let mut hreg = std::collections::VecDeque::new();
    let mut harea = std::collections::VecDeque::new();
    hole.push_back(edges[0][0]);
    hreg.push_back(edges[0][2]);
    harea.push_back(edges[0][3]);

    while !edges.is_empty() {
        let mut matched = false;
        let mut i = 0;
        while i < edges.len() {
            let [ea, eb, r, a] = edges[i];
            let mut add = false;
            if hole.front() == Some(&eb) {
                hole.push_front(ea);
                hreg.push_front(r);
                harea.push_front(a);
                add = true;
            } else if hole.back() == Some(&ea) {
                hole.push_back(eb);
                hreg.push_back(r);
                harea.push_back(a);
                add = true;
            }
            if add {
                edges.swap_remove(i);
                matched = true;
            } else {
                i += 1;
            }
        }
        if !matched {
            break;
        }
    }

    let hole: Vec<i32> = hole.into();
    let hreg: Vec<i32> = hreg.into();
    let harea: Vec<i32> = harea.into();
    let nhole = hole.len();

    let mut tverts = Vec::with_capacity(nhole * 4);
    for &pi in &hole {
        let v = &mesh.verts[pi as usize * 3..pi as usize * 3 + 3];
        tverts.extend_from_slice(&[v[0] as i32, v[1] as i32, v[2] as i32, 0]);
    }
    let mut thole: Vec<u32> = (0..nhole as u32).collect();
    let mut tris = Vec::new();
    if triangulate(nhole, &tverts, &mut thole, &mut tris).is_err() {
        warn!("Vertex removal produced a bad triangulation");
    }

    let mut polys: Vec<u16> = Vec::new();
    let mut pregs: Vec<u16> = Vec::new();
    let mut pareas: Vec<u8> = Vec::new();
    for t in tris.chunks_exact(3) {
        let (a, b, c) = (t[0] as usize, t[1] as usize, t[2] as usize);
        if a != b && a != c && b != c {
            let start = polys.len();
            polys.resize(start + nvp, RC_MESH_NULL_IDX);
            polys[start] = hole[a] as u16;
            polys[start + 1] = hole[b] as u16;
            polys[start + 2] = hole[c] as u16;
            // Polygons spanning several regions lose their region id
            if hreg[a] != hreg[b] || hreg[b] != hreg[c] {
                pregs.push(RC_MULTIPLE_REGS);
            } else {
                pregs.push(hreg[a] as u16);
            }
            pareas.push(harea[a] as u8);
        }
    }
    if pregs.is_empty() {
        return Ok(());
    }

    merge_polys(&mut polys, &mesh.verts, nvp, Some(&mut pregs), Some(&mut pareas));

    for (i, poly) in polys.chunks_exact(nvp).enumerate() {
        if mesh.npolys() >= max_polys {
            break;
        }
        mesh.polys.extend_from_slice(poly);
        mesh.polys.extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp));
        mesh.regs.push(pregs[i]);
        mesh.areas.push(pareas[i]);
    }
    Ok(())
}

// ============================================================================
// Adjacency
// ============================================================================

#[derive(Clone, Copy)]
struct Edge {
    vert: [u16; 2],
    poly_edge: [u16; 2],
    poly: [u32; 2],
}

/// Fill the neighbour half of every polygon from shared edges
pub fn build_mesh_adjacency(polys: &mut [u16], npolys: usize, nverts: usize, nvp: usize) {
    const NONE: u32 = u32::MAX;
    let mut first_edge = vec![NONE; nverts];
    let mut next_edge: Vec<u32> = Vec::with_capacity(npolys * nvp);
    let mut edges: Vec<Edge> = Vec::with_capacity(npolys * nvp);

    let edge_verts = |t: &[u16], j: usize| {
        let v0 = t[j];
        let v1 = if j + 1 >= nvp || t[j + 1] == RC_MESH_NULL_IDX { t[0] } else { t[j + 1] };
        (v0, v1)
    };

    for i in 0..npolys {
        let t = &polys[i * nvp * 2..i * nvp * 2 + nvp];
        for j in 0..nvp {
            if t[j] == RC_MESH_NULL_IDX {
                break;
            }
            let (v0, v1) = edge_verts(t, j);
            if v0 < v1 {
                edges.push(Edge { vert: [v0, v1], poly: [i as u32, i as u32], poly_edge: [j as u16, 0] });
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = (edges.len() - 1) as u32;
            }
        }
    }

    for i in 0..npolys {
        let t = &polys[i * nvp * 2..i * nvp * 2 + nvp];
        for j in 0..nvp {
            if t[j] == RC_MESH_NULL_IDX {
                break;
            }
            let (v0, v1) = edge_verts(t, j);
            if v0 > v1 {
                let mut e = first_edge[v1 as usize];
                while e != NONE {
                    let edge = &mut edges[e as usize];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i as u32;
                        edge.poly_edge[1] = j as u16;
                        break;
                    }
                    e = next_edge[e as usize];
                }
            }
        }
    }

    for e in &edges {
        if e.poly[0] != e.poly[1] {
            let p0 = e.poly[0] as usize * nvp * 2;
            let p1 = e.poly[1] as usize * nvp * 2;
            polys[p0 + nvp + e.poly_edge[0] as usize] = e.poly[1] as u16;
            polys[p1 + nvp + e.poly_edge[1] as usize] = e.poly[0] as u16;
        }
    }
}

// ============================================================================
// Mesh building
// ============================================================================

/// Build a polygon mesh with at most `nvp` vertices per polygon. Outline
/// edges lying on the inner edge of the border strip are marked as portals
/// (`0x8000 | dir`, dir 0..4 = -x, +z, +x, -z).
pub fn build_poly_mesh(cset: &ContourSet, nvp: usize) -> Result<PolyMesh> {
    if !(3..=crate::DT_VERTS_PER_POLYGON).contains(&nvp) {
        return Err(RecastError::InvalidVertsPerPoly(nvp));
    }

    let mut mesh = PolyMesh {
        nvp,
        bmin: cset.bmin,
        bmax: cset.bmax,
        cs: cset.cs,
        ch: cset.ch,
        border_size: cset.border_size,
        max_edge_error: cset.max_error,
        ..Default::default()
    };

    let mut max_vertices = 0;
    let mut max_tris = 0;
    for cont in cset.conts.iter().filter(|c| c.nverts() >= 3) {
        max_vertices += cont.nverts();
        max_tris += cont.nverts() - 2;
    }
    if max_vertices >= 0xfffe {
        error!("Too many vertices {}", max_vertices);
        return Err(RecastError::TooManyVertices { count: max_vertices, limit: 0xfffe });
    }

    let mut vflags: Vec<bool> = Vec::with_capacity(max_vertices);
    let mut welder = VertexWelder::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut tris: Vec<i32> = Vec::new();

    for (ci, cont) in cset.conts.iter().enumerate() {
        let nv = cont.nverts();
        if nv < 3 {
            continue;
        }

        indices.clear();
        indices.extend(0..nv as u32);
        if triangulate(nv, &cont.verts, &mut indices, &mut tris).is_err() {
            warn!("Bad triangulation of contour {}", ci);
        }

        // Weld outline vertices into the mesh
        let mut remap = vec![0usize; nv];
        for (j, v) in cont.verts.chunks_exact(4).enumerate() {
            let index = welder.add(v[0] as u16, v[1] as u16, v[2] as u16, &mut mesh.verts);
            if index >= vflags.len() {
                vflags.resize(index + 1, false);
            }
            if v[3] & RC_BORDER_VERTEX != 0 {
                vflags[index] = true;
            }
            remap[j] = index;
        }

        let mut polys: Vec<u16> = Vec::new();
        for t in tris.chunks_exact(3) {
            let (a, b, c) = (t[0] as usize, t[1] as usize, t[2] as usize);
            if a != b && a != c && b != c {
                let start = polys.len();
                polys.resize(start + nvp, RC_MESH_NULL_IDX);
                polys[start] = remap[a] as u16;
                polys[start + 1] = remap[b] as u16;
                polys[start + 2] = remap[c] as u16;
            }
        }
        if polys.is_empty() {
            continue;
        }

        merge_polys(&mut polys, &mesh.verts, nvp, None, None);

        for poly in polys.chunks_exact(nvp) {
            mesh.polys.extend_from_slice(poly);
            mesh.polys.extend(std::iter::repeat_n(RC_MESH_NULL_IDX, nvp));
            mesh.regs.push(cont.reg);
            mesh.areas.push(cont.area);
            if mesh.npolys() > max_tris {
                error!("Too many polygons {} (max: {})", mesh.npolys(), max_tris);
                return Err(RecastError::TooManyPolygons { count: mesh.npolys(), limit: max_tris });
            }
        }
    }

    // Remove vertices flagged as border strip corners
    let mut i = 0;
    while i < mesh.nverts() {
        if vflags.get(i).copied().unwrap_or(false) {
            if !can_remove_vertex(&mesh, i as u16) {
                i += 1;
                continue;
            }
            remove_vertex(&mut mesh, i as u16, max_tris)?;
            vflags.remove(i);
        } else {
            i += 1;
        }
    }

    let (npolys, nverts) = (mesh.npolys(), mesh.nverts());
    build_mesh_adjacency(&mut mesh.polys, npolys, nverts, nvp);

    if mesh.border_size > 0 {
        mark_portal_edges(&mut mesh, cset.width, cset.height);
    }

    mesh.flags = vec![0; mesh.npolys()];

    if mesh.nverts() > 0xffff {
        error!("The resulting mesh has too many vertices {} (max 65535)", mesh.nverts());
    }
    if mesh.npolys() > 0xffff {
        error!("The resulting mesh has too many polygons {} (max 65535)", mesh.npolys());
    }
    Ok(mesh)
}

fn mark_portal_edges(mesh: &mut PolyMesh, width: i32, height: i32) {
    let nvp = mesh.nvp;
    let b = mesh.border_size;
    let (minc, maxx, maxz) = (b, width - b, height - b);
    for i in 0..mesh.npolys() {
        let base = i * nvp * 2;
        for j in 0..nvp {
            let pj = mesh.polys[base + j];
            if pj == RC_MESH_NULL_IDX {
                break;
            }
            if mesh.polys[base + nvp + j] != RC_MESH_NULL_IDX {
                continue;
            }
            let nj = if j + 1 >= nvp || mesh.polys[base + j + 1] == RC_MESH_NULL_IDX { 0 } else { j + 1 };
            let pn = mesh.polys[base + nj];
            let va = &mesh.verts[pj as usize * 3..pj as usize * 3 + 3];
            let vb = &mesh.verts[pn as usize * 3..pn as usize * 3 + 3];
            let (ax, az, bx, bz) = (va[0] as i32, va[2] as i32, vb[0] as i32, vb[2] as i32);
            let dir = if ax == minc && bx == minc {
                Some(0)
            } else if az == maxz && bz == maxz {
                Some(1)
            } else if ax == maxx && bx == maxx {
                Some(2)
            } else if az == minc && bz == minc {
                Some(3)
            } else {
                None
            };
            if let Some(dir) = dir {
                mesh.polys[base + nvp + j] = 0x8000 | dir;
            }
        }
    }
}

// ============================================================================
// Mesh merging
// ============================================================================

/// Merge chunk meshes into one mesh spanning `bmin`..`bmax` (cell aligned).
/// Shared vertices are welded, adjacency is rebuilt across seams and only
/// portals on the outer boundary of the merged area are kept.
pub fn merge_poly_meshes(meshes: &[PolyMesh], bmin: [f32; 3], bmax: [f32; 3]) -> Result<PolyMesh> {
    let Some(first) = meshes.first() else {
        return Ok(PolyMesh::default());
    };
    let nvp = first.nvp;
    let cs = first.cs;

    let mut mesh = PolyMesh {
        nvp,
        bmin,
        bmax,
        cs,
        ch: first.ch,
        border_size: first.border_size,
        max_edge_error: first.max_edge_error,
        ..Default::default()
    };

    let total_w = ((bmax[0] - bmin[0]) / cs + 0.5).floor() as i32;
    let total_h = ((bmax[2] - bmin[2]) / cs + 0.5).floor() as i32;

    let max_verts: usize = meshes.iter().map(PolyMesh::nverts).sum();
    let max_polys: usize = meshes.iter().map(PolyMesh::npolys).sum();
    mesh.verts.reserve(max_verts * 3);
    mesh.polys.reserve(max_polys * nvp * 2);

    let mut welder = VertexWelder::new();

    for pmesh in meshes {
        if pmesh.nvp != nvp {
            return Err(RecastError::Mismatch("meshes use different vertices per polygon"));
        }
        let ox = ((pmesh.bmin[0] - bmin[0]) / cs + 0.5).floor() as i32;
        let oz = ((pmesh.bmin[2] - bmin[2]) / cs + 0.5).floor() as i32;
        let w = ((pmesh.bmax[0] - pmesh.bmin[0]) / cs + 0.5).floor() as i32;
        let h = ((pmesh.bmax[2] - pmesh.bmin[2]) / cs + 0.5).floor() as i32;

        let is_min_x = ox == 0;
        let is_min_z = oz == 0;
        let is_max_x = ox + w >= total_w;
        let is_max_z = oz + h >= total_h;
        let is_on_border = is_min_x || is_min_z || is_max_x || is_max_z;

        let mut vremap = Vec::with_capacity(pmesh.nverts());
        for v in pmesh.verts.chunks_exact(3) {
            let x = v[0] as i32 + ox;
            let z = v[2] as i32 + oz;
            let index = welder.add(x as u16, v[1], z as u16, &mut mesh.verts);
            if mesh.nverts() > 0xffff {
                return Err(RecastError::TooManyVertices { count: mesh.nverts(), limit: 0xffff });
            }
            vremap.push(index as u16);
        }

        for i in 0..pmesh.npolys() {
            let src = pmesh.poly(i);
            let mut tgt = vec![RC_MESH_NULL_IDX; nvp * 2];
            for k in 0..nvp {
                if src[k] == RC_MESH_NULL_IDX {
                    break;
                }
                tgt[k] = vremap[src[k] as usize];
            }

            if is_on_border {
                for k in nvp..nvp * 2 {
                    let code = src[k];
                    if code & 0x8000 == 0 || code == RC_MESH_NULL_IDX {
                        continue;
                    }
                    let keep = match code & 0xf {
                        0 => is_min_x,
                        1 => is_max_z,
                        2 => is_max_x,
                        3 => is_min_z,
                        _ => false,
                    };
                    if keep {
                        tgt[k] = code;
                    }
                }
            }

            mesh.polys.extend_from_slice(&tgt);
            mesh.regs.push(pmesh.regs[i]);
            mesh.areas.push(pmesh.areas[i]);
            mesh.flags.push(pmesh.flags.get(i).copied().unwrap_or(0));
        }
    }

    let (npolys, nverts) = (mesh.npolys(), mesh.nverts());
    build_mesh_adjacency(&mut mesh.polys, npolys, nverts, nvp);

    if mesh.npolys() > 0xffff {
        return Err(RecastError::TooManyPolygons { count: mesh.npolys(), limit: 0xffff });
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::tests::flat_compact;
    use crate::contour::build_contours;
    use crate::region::{build_distance_field, build_regions};
    use crate::RC_CONTOUR_TESS_WALL_EDGES;

    fn square_mesh(size: i32, border: i32) -> PolyMesh {
        let mut chf = flat_compact(size);
        build_distance_field(&mut chf).unwrap();
        build_regions(&mut chf, border, 4, 10).unwrap();
        let cset = build_contours(&chf, 1.3, 0, RC_CONTOUR_TESS_WALL_EDGES).unwrap();
        build_poly_mesh(&cset, 6).unwrap()
    }

    /// One quad mesh of `size` cells at offset (x, z) cells from the origin
    fn quad(size: u16, x: f32, z: f32) -> PolyMesh {
        let mut polys = vec![0, 1, 2, 3, RC_MESH_NULL_IDX, RC_MESH_NULL_IDX];
        polys.extend([RC_MESH_NULL_IDX; 6]);
        PolyMesh {
            verts: vec![0, 1, 0, 0, 1, size, size, 1, size, size, 1, 0],
            polys,
            regs: vec![1],
            flags: vec![0],
            areas: vec![63],
            nvp: 6,
            bmin: [x, 0.0, z],
            bmax: [x + size as f32, 10.0, z + size as f32],
            cs: 1.0,
            ch: 1.0,
            border_size: 0,
            max_edge_error: 1.3,
        }
    }

    #[test]
    fn triangulates_convex_outline() {
        let verts = [0, 0, 0, 0, 0, 0, 4, 0, 4, 0, 4, 0, 4, 0, 0, 0];
        let mut indices = vec![0, 1, 2, 3];
        let mut tris = Vec::new();
        assert_eq!(triangulate(4, &verts, &mut indices, &mut tris), Ok(2));
        assert_eq!(tris.len(), 6);
    }

    #[test]
    fn flat_square_becomes_one_polygon() {
        let mesh = square_mesh(10, 0);
        assert_eq!(mesh.npolys(), 1);
        assert_eq!(mesh.poly_vert_count(0), 4);
        assert_eq!(mesh.flags.len(), 1);
        assert!(mesh.poly(0)[6..10].iter().all(|&n| n == RC_MESH_NULL_IDX));
    }

    #[test]
    fn border_edges_become_portals() {
        let mesh = square_mesh(14, 3);
        assert!(mesh.npolys() >= 1);
        let mut dirs = Vec::new();
        for i in 0..mesh.npolys() {
            for &n in &mesh.poly(i)[6..12] {
                if n != RC_MESH_NULL_IDX && n & 0x8000 != 0 {
                    dirs.push(n & 0xf);
                }
            }
        }
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn merge_welds_shared_edge() {
        let a = quad(4, 0.0, 0.0);
        let b = quad(4, 4.0, 0.0);
        let merged = merge_poly_meshes(&[a, b], [0.0, 0.0, 0.0], [8.0, 10.0, 4.0]).unwrap();
        assert_eq!(merged.npolys(), 2);
        assert_eq!(merged.nverts(), 8 - 2);
        // Polygons are neighbours across the seam
        assert!(merged.poly(0)[6..10].contains(&1));
        assert!(merged.poly(1)[6..10].contains(&0));
    }

    #[test]
    fn merge_drops_inner_portals() {
        let mut a = quad(4, 0.0, 0.0);
        let mut b = quad(4, 4.0, 0.0);
        // a: +x portal on edge 2 (inner seam) and -x portal on edge 0
        a.polys[6] = 0x8000;
        a.polys[8] = 0x8002;
        b.polys[8] = 0x8002;
        let merged = merge_poly_meshes(&[a, b], [0.0, 0.0, 0.0], [8.0, 10.0, 4.0]).unwrap();
        assert_eq!(merged.poly(0)[6], 0x8000);
        assert_eq!(merged.poly(0)[8], 1);
        assert_eq!(merged.poly(1)[8], 0x8002);
    }

    #[test]
    fn merge_rejects_vertex_overflow() {
        let mut big = quad(4, 0.0, 0.0);
        big.verts.clear();
        for i in 0..40000u32 {
            big.verts.extend_from_slice(&[(i % 200) as u16, (i / 200) as u16 * 10, (i / 200) as u16]);
        }
        let mut other = big.clone();
        other.bmin = [300.0, 0.0, 0.0];
        other.bmax = [304.0, 10.0, 4.0];
        let result = merge_poly_meshes(&[big, other], [0.0; 3], [600.0, 10.0, 600.0]);
        assert!(matches!(result, Err(RecastError::TooManyVertices { .. })));
    }
}
