// builder.rs - Pack a polygon mesh into a Detour tile blob

use tracing::debug;

use super::{
    BvNode, DT_EXT_LINK, DT_NAVMESH_MAGIC, DT_NAVMESH_VERSION, DT_OFFMESH_CON_BIDIR, DT_POLYTYPE_GROUND,
    DT_POLYTYPE_OFFMESH_CONNECTION, DetourError, DetourResult, Link, MeshHeader, OffMeshConnection, Poly, PolyDetail,
    pad4, write_f32s,
};
use crate::{DT_VERTS_PER_POLYGON, RC_MESH_NULL_IDX};

/// Inputs of a tile. Polygon data uses the `PolyMesh` layout, off-mesh
/// connections are given as parallel arrays.
#[derive(Clone, Debug, Default)]
pub struct NavMeshCreateParams<'a> {
    pub verts: &'a [u16],
    pub polys: &'a [u16],
    pub poly_flags: &'a [u16],
    pub poly_areas: &'a [u8],
    pub nvp: usize,

    pub detail_meshes: &'a [[u32; 4]],
    pub detail_verts: &'a [f32],
    pub detail_tris: &'a [u8],

    pub off_mesh_con_verts: &'a [f32],
    pub off_mesh_con_rad: &'a [f32],
    pub off_mesh_con_flags: &'a [u16],
    pub off_mesh_con_areas: &'a [u8],
    pub off_mesh_con_dir: &'a [u8],
    pub off_mesh_con_user_id: &'a [u32],

    pub user_id: u32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],

    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub cs: f32,
    pub ch: f32,
    pub build_bv_tree: bool,
}

impl NavMeshCreateParams<'_> {
    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn poly_count(&self) -> usize {
        self.poly_areas.len()
    }

    pub fn off_mesh_con_count(&self) -> usize {
        self.off_mesh_con_rad.len()
    }

    fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * self.nvp * 2..(i + 1) * self.nvp * 2]
    }

    fn poly_vert_count(&self, i: usize) -> usize {
        self.poly(i)[..self.nvp].iter().take_while(|&&v| v != RC_MESH_NULL_IDX).count()
    }
}

// ============================================================================
// Bounding volume tree
// ============================================================================

#[derive(Clone, Copy, Default)]
struct BvItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

fn calc_extents(items: &[BvItem]) -> ([u16; 3], [u16; 3]) {
    let mut bmin = items[0].bmin;
    let mut bmax = items[0].bmax;
    for it in &items[1..] {
        for k in 0..3 {
            bmin[k] = bmin[k].min(it.bmin[k]);
            bmax[k] = bmax[k].max(it.bmax[k]);
        }
    }
    (bmin, bmax)
}

fn longest_axis(x: u16, y: u16, z: u16) -> usize {
    let mut axis = 0;
    let mut max = x;
    if y > max {
        axis = 1;
        max = y;
    }
    if z > max {
        axis = 2;
    }
    axis
}

fn subdivide(items: &mut [BvItem], nodes: &mut Vec<BvNode>) {
    let icur = nodes.len();
    nodes.push(BvNode::default());

    if items.len() == 1 {
        nodes[icur] = BvNode { bmin: items[0].bmin, bmax: items[0].bmax, i: items[0].i };
        return;
    }

    let (bmin, bmax) = calc_extents(items);
    let axis = longest_axis(bmax[0] - bmin[0], bmax[1] - bmin[1], bmax[2] - bmin[2]);
    items.sort_by_key(|it| it.bmin[axis]);

    let split = items.len() / 2;
    let (left, right) = items.split_at_mut(split);
    subdivide(left, nodes);
    subdivide(right, nodes);

    // Negative index is the escape offset
    let escape = (nodes.len() - icur) as i32;
    nodes[icur] = BvNode { bmin, bmax, i: -escape };
}

fn create_bv_tree(params: &NavMeshCreateParams) -> Vec<BvNode> {
    let quant = 1.0 / params.cs;
    let quantize = |v: f32, origin: f32| ((v - origin) * quant) as i32;
    let npolys = params.poly_count();

    let mut items = Vec::with_capacity(npolys);
    for i in 0..npolys {
        let mut it = BvItem { i: i as i32, ..Default::default() };
        if !params.detail_meshes.is_empty() {
            let [vb, ndv, _, _] = params.detail_meshes[i];
            let dv = &params.detail_verts[vb as usize * 3..(vb + ndv) as usize * 3];
            let (bmin, bmax) = crate::calc_bounds(dv);
            // Quantized with cs on every axis
            for k in 0..3 {
                it.bmin[k] = quantize(bmin[k], params.bmin[k]).clamp(0, 0xffff) as u16;
                it.bmax[k] = quantize(bmax[k], params.bmin[k]).clamp(0, 0xffff) as u16;
            }
        } else {
            let p = params.poly(i);
            let v0 = &params.verts[p[0] as usize * 3..p[0] as usize * 3 + 3];
            it.bmin.copy_from_slice(v0);
            it.bmax.copy_from_slice(v0);
            for &vi in p[1..params.nvp].iter().take_while(|&&v| v != RC_MESH_NULL_IDX) {
                let v = &params.verts[vi as usize * 3..vi as usize * 3 + 3];
                for k in 0..3 {
                    it.bmin[k] = it.bmin[k].min(v[k]);
                    it.bmax[k] = it.bmax[k].max(v[k]);
                }
            }
            it.bmin[1] = (it.bmin[1] as f32 * params.ch / params.cs).floor() as u16;
            it.bmax[1] = (it.bmax[1] as f32 * params.ch / params.cs).ceil() as u16;
        }
        items.push(it);
    }

    let mut nodes = Vec::with_capacity(npolys * 2);
    if !items.is_empty() {
        subdivide(&mut items, &mut nodes);
    }
    nodes
}

// ============================================================================
// Off-mesh connections
// ============================================================================

/// Outcode of a point against the tile bounds: 0..8 for the neighbouring
/// tile sides, 0xff when inside
pub fn classify_off_mesh_point(pt: &[f32], bmin: &[f32; 3], bmax: &[f32; 3]) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if pt[0] >= bmax[0] {
        outcode |= XP;
    }
    if pt[2] >= bmax[2] {
        outcode |= ZP;
    }
    if pt[0] < bmin[0] {
        outcode |= XM;
    }
    if pt[2] < bmin[2] {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => 0xff,
    }
}

// ============================================================================
// Tile data
// ============================================================================

/// Serialize a tile. Only off-mesh connections starting inside the tile are
/// stored; they become two-vertex polygons after the mesh polygons.
pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> DetourResult<Vec<u8>> {
    let nvp = params.nvp;
    if nvp > DT_VERTS_PER_POLYGON {
        return Err(DetourError::InvalidVertsPerPoly(nvp));
    }
    if params.vert_count() >= 0xffff {
        return Err(DetourError::TooManyVertices(params.vert_count()));
    }
    if params.vert_count() == 0 {
        return Err(DetourError::NoVertices);
    }
    if params.poly_count() == 0 {
        return Err(DetourError::NoPolygons);
    }

    let npolys = params.poly_count();
    let ncons = params.off_mesh_con_count();

    // Classify off-mesh endpoints against the tile with tight height bounds
    let mut con_class = vec![0u8; ncons * 2];
    let mut stored_cons = 0;
    let mut con_link_count = 0;
    if ncons > 0 {
        let (mut hmin, mut hmax) = (f32::MAX, f32::MIN);
        if !params.detail_verts.is_empty() {
            for v in params.detail_verts.chunks_exact(3) {
                hmin = hmin.min(v[1]);
                hmax = hmax.max(v[1]);
            }
        } else {
            for v in params.verts.chunks_exact(3) {
                let h = params.bmin[1] + v[1] as f32 * params.ch;
                hmin = hmin.min(h);
                hmax = hmax.max(h);
            }
        }
        hmin -= params.walkable_climb;
        hmax += params.walkable_climb;
        let mut bmin = params.bmin;
        let mut bmax = params.bmax;
        bmin[1] = hmin;
        bmax[1] = hmax;

        for i in 0..ncons {
            let p0 = &params.off_mesh_con_verts[i * 6..i * 6 + 3];
            let p1 = &params.off_mesh_con_verts[i * 6 + 3..i * 6 + 6];
            con_class[i * 2] = classify_off_mesh_point(p0, &bmin, &bmax);
            con_class[i * 2 + 1] = classify_off_mesh_point(p1, &bmin, &bmax);

            // Start points above or below the mesh cannot touch it
            if con_class[i * 2] == 0xff && (p0[1] < bmin[1] || p0[1] > bmax[1]) {
                con_class[i * 2] = 0;
            }
            if con_class[i * 2] == 0xff {
                con_link_count += 1;
                stored_cons += 1;
            }
            if con_class[i * 2 + 1] == 0xff {
                con_link_count += 1;
            }
        }
    }

    let tot_poly_count = npolys + stored_cons;
    let tot_vert_count = params.vert_count() + stored_cons * 2;

    let mut edge_count = 0;
    let mut portal_count = 0;
    for i in 0..npolys {
        let p = params.poly(i);
        for j in 0..params.poly_vert_count(i) {
            edge_count += 1;
            if p[nvp + j] & 0x8000 != 0 && p[nvp + j] & 0xf != 0xf {
                portal_count += 1;
            }
        }
    }
    let max_link_count = edge_count + portal_count * 2 + con_link_count * 2;

    // The first vertices of each detail sub-mesh equal the polygon's and are not stored
    let has_detail = !params.detail_meshes.is_empty();
    let (unique_detail_verts, detail_tri_count) = if has_detail {
        let unique = (0..npolys).map(|i| (params.detail_meshes[i][1] as usize).saturating_sub(params.poly_vert_count(i))).sum();
        (unique, params.detail_tris.len() / 4)
    } else {
        (0, (0..npolys).map(|i| params.poly_vert_count(i) - 2).sum())
    };

    let bv_tree = if params.build_bv_tree { create_bv_tree(params) } else { Vec::new() };
    let bv_node_count = if params.build_bv_tree { npolys * 2 } else { 0 };

    let header = MeshHeader {
        magic: DT_NAVMESH_MAGIC,
        version: DT_NAVMESH_VERSION,
        x: params.tile_x,
        y: params.tile_y,
        layer: params.tile_layer,
        user_id: params.user_id,
        poly_count: tot_poly_count as i32,
        vert_count: tot_vert_count as i32,
        max_link_count: max_link_count as i32,
        detail_mesh_count: npolys as i32,
        detail_vert_count: unique_detail_verts as i32,
        detail_tri_count: detail_tri_count as i32,
        bv_node_count: bv_node_count as i32,
        off_mesh_con_count: stored_cons as i32,
        off_mesh_base: npolys as i32,
        walkable_height: params.walkable_height,
        walkable_radius: params.walkable_radius,
        walkable_climb: params.walkable_climb,
        bmin: params.bmin,
        bmax: params.bmax,
        bv_quant_factor: 1.0 / params.cs,
    };

    let mut data = Vec::new();
    header.write_to(&mut data)?;
    pad4(&mut data);

    // Vertices
    for v in params.verts.chunks_exact(3) {
        write_f32s(
            &mut data,
            &[
                params.bmin[0] + v[0] as f32 * params.cs,
                params.bmin[1] + v[1] as f32 * params.ch,
                params.bmin[2] + v[2] as f32 * params.cs,
            ],
        )?;
    }
    for i in (0..ncons).filter(|&i| con_class[i * 2] == 0xff) {
        write_f32s(&mut data, &params.off_mesh_con_verts[i * 6..i * 6 + 6])?;
    }
    pad4(&mut data);

    // Polygons
    for i in 0..npolys {
        let src = params.poly(i);
        let mut p = Poly { flags: params.poly_flags.get(i).copied().unwrap_or(0), ..Default::default() };
        p.set_area(params.poly_areas[i]);
        p.set_type(DT_POLYTYPE_GROUND);
        for j in 0..params.poly_vert_count(i) {
            p.verts[j] = src[j];
            let nei = src[nvp + j];
            p.neis[j] = if nei & 0x8000 != 0 {
                match nei & 0xf {
                    0 => DT_EXT_LINK | 4,
                    1 => DT_EXT_LINK | 2,
                    2 => DT_EXT_LINK,
                    3 => DT_EXT_LINK | 6,
                    _ => 0,
                }
            } else {
                nei + 1
            };
            p.vert_count += 1;
        }
        p.write_to(&mut data)?;
    }
    let off_mesh_verts_base = params.vert_count();
    for (n, i) in (0..ncons).filter(|&i| con_class[i * 2] == 0xff).enumerate() {
        let mut p = Poly { vert_count: 2, flags: params.off_mesh_con_flags[i], ..Default::default() };
        p.verts[0] = (off_mesh_verts_base + n * 2) as u16;
        p.verts[1] = (off_mesh_verts_base + n * 2 + 1) as u16;
        p.set_area(params.off_mesh_con_areas[i]);
        p.set_type(DT_POLYTYPE_OFFMESH_CONNECTION);
        p.write_to(&mut data)?;
    }
    pad4(&mut data);

    // Links are filled in when the tile is added to a navmesh
    for _ in 0..max_link_count {
        Link::default().write_to(&mut data)?;
    }
    pad4(&mut data);

    // Detail meshes, extra detail vertices and triangles
    if has_detail {
        let mut vbase = 0u32;
        let mut extra_verts: Vec<f32> = Vec::with_capacity(unique_detail_verts * 3);
        for i in 0..npolys {
            let [vb, ndv, tb, ntris] = params.detail_meshes[i];
            let nv = params.poly_vert_count(i) as u32;
            PolyDetail { vert_base: vbase, tri_base: tb, vert_count: ndv.saturating_sub(nv) as u8, tri_count: ntris as u8 }
                .write_to(&mut data)?;
            if ndv > nv {
                extra_verts.extend_from_slice(&params.detail_verts[(vb + nv) as usize * 3..(vb + ndv) as usize * 3]);
                vbase += ndv - nv;
            }
        }
        pad4(&mut data);
        write_f32s(&mut data, &extra_verts)?;
        pad4(&mut data);
        data.extend_from_slice(&params.detail_tris[..detail_tri_count * 4]);
        pad4(&mut data);
    } else {
        // Fan triangulation of each polygon
        let mut tris = Vec::with_capacity(detail_tri_count * 4);
        let mut tbase = 0u32;
        for i in 0..npolys {
            let nv = params.poly_vert_count(i);
            PolyDetail { vert_base: 0, tri_base: tbase, vert_count: 0, tri_count: (nv - 2) as u8 }.write_to(&mut data)?;
            for j in 2..nv {
                let mut flags = 1 << 2;
                if j == 2 {
                    flags |= 1 << 0;
                }
                if j == nv - 1 {
                    flags |= 1 << 4;
                }
                tris.extend_from_slice(&[0, (j - 1) as u8, j as u8, flags]);
                tbase += 1;
            }
        }
        pad4(&mut data);
        pad4(&mut data);
        data.extend_from_slice(&tris);
        pad4(&mut data);
    }

    // BV tree, padded with empty nodes to its reserved size
    for node in &bv_tree {
        node.write_to(&mut data)?;
    }
    for _ in bv_tree.len()..bv_node_count {
        BvNode::default().write_to(&mut data)?;
    }
    pad4(&mut data);

    for (n, i) in (0..ncons).filter(|&i| con_class[i * 2] == 0xff).enumerate() {
        let mut pos = [0.0f32; 6];
        pos.copy_from_slice(&params.off_mesh_con_verts[i * 6..i * 6 + 6]);
        OffMeshConnection {
            pos,
            rad: params.off_mesh_con_rad[i],
            poly: (npolys + n) as u16,
            flags: if params.off_mesh_con_dir[i] != 0 { DT_OFFMESH_CON_BIDIR } else { 0 },
            side: con_class[i * 2 + 1],
            user_id: params.off_mesh_con_user_id.get(i).copied().unwrap_or(0),
        }
        .write_to(&mut data)?;
    }
    pad4(&mut data);

    debug!(
        "Packed tile ({},{}): {} polys, {} verts, {} links, {} bytes",
        params.tile_x,
        params.tile_y,
        tot_poly_count,
        tot_vert_count,
        max_link_count,
        data.len()
    );
    Ok(data)
}
