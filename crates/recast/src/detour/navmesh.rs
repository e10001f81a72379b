// navmesh.rs - In-memory tile container
//
// Holds parsed tiles in a fixed number of slots addressed by salted
// references. The build uses it to prove each packed tile loads.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::{
    BV_NODE_SIZE, BvNode, DT_EXT_LINK, DT_NAVMESH_MAGIC, DT_NAVMESH_VERSION, DT_NULL_LINK, DT_POLYTYPE_OFFMESH_CONNECTION,
    DetourError, DetourResult, LINK_SIZE, Link, MESH_HEADER_SIZE, MeshHeader, OFF_MESH_CON_SIZE, OffMeshConnection,
    POLY_DETAIL_SIZE, POLY_SIZE, Poly, PolyDetail, align4, read_f32s, write_f32s,
};

/// Reference to a polygon: salt, tile slot and polygon index packed in 64 bits
pub type PolyRef = u64;
/// Reference to a tile (a `PolyRef` with polygon index 0)
pub type TileRef = u64;

pub const SALT_BITS: u32 = 16;
pub const TILE_BITS: u32 = 28;
pub const POLY_BITS: u32 = 20;

#[inline]
pub fn encode_poly_id(salt: u32, tile: u32, poly: u32) -> PolyRef {
    ((salt as u64) << (POLY_BITS + TILE_BITS)) | ((tile as u64) << POLY_BITS) | poly as u64
}

/// (salt, tile, poly)
#[inline]
pub fn decode_poly_id(reference: PolyRef) -> (u32, u32, u32) {
    let salt = (reference >> (POLY_BITS + TILE_BITS)) & ((1 << SALT_BITS) - 1);
    let tile = (reference >> POLY_BITS) & ((1 << TILE_BITS) - 1);
    let poly = reference & ((1 << POLY_BITS) - 1);
    (salt as u32, tile as u32, poly as u32)
}

/// World origin and tile grid of a navmesh. Persisted as the 28 byte map
/// parameter record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NavMeshParams {
    pub orig: [f32; 3],
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys: i32,
}

impl NavMeshParams {
    pub const SIZE: usize = 28;

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_f32s(w, &self.orig)?;
        w.write_f32::<LittleEndian>(self.tile_width)?;
        w.write_f32::<LittleEndian>(self.tile_height)?;
        w.write_i32::<LittleEndian>(self.max_tiles)?;
        w.write_i32::<LittleEndian>(self.max_polys)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut p = NavMeshParams::default();
        read_f32s(r, &mut p.orig)?;
        p.tile_width = r.read_f32::<LittleEndian>()?;
        p.tile_height = r.read_f32::<LittleEndian>()?;
        p.max_tiles = r.read_i32::<LittleEndian>()?;
        p.max_polys = r.read_i32::<LittleEndian>()?;
        Ok(p)
    }
}

/// One tile slot. Empty slots have no header.
#[derive(Clone, Debug, Default)]
pub struct MeshTile {
    pub salt: u32,
    pub header: Option<MeshHeader>,
    pub verts: Vec<f32>,
    pub polys: Vec<Poly>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<f32>,
    pub detail_tris: Vec<u8>,
    pub bv_tree: Vec<BvNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    links_free_list: u32,
    data: Vec<u8>,
    next_free: Option<usize>,
}

impl MeshTile {
    /// Polygon indices linked from polygon `poly` within this tile
    pub fn linked_polys(&self, poly: usize) -> Vec<u32> {
        let mut out = Vec::new();
        let mut l = self.polys[poly].first_link;
        while l != DT_NULL_LINK {
            let link = &self.links[l as usize];
            out.push(decode_poly_id(link.reference).2);
            l = link.next;
        }
        out
    }

    fn alloc_link(&mut self) -> u32 {
        if self.links_free_list == DT_NULL_LINK {
            return DT_NULL_LINK;
        }
        let link = self.links_free_list;
        self.links_free_list = self.links[link as usize].next;
        link
    }

    /// Link polygons to their neighbours inside the tile
    fn connect_int_links(&mut self, base: PolyRef) {
        for i in 0..self.polys.len() {
            self.polys[i].first_link = DT_NULL_LINK;
            if self.polys[i].poly_type() == DT_POLYTYPE_OFFMESH_CONNECTION {
                continue;
            }

            // Build in reverse so the list reads in edge order
            for j in (0..self.polys[i].vert_count as usize).rev() {
                let nei = self.polys[i].neis[j];
                if nei == 0 || nei & DT_EXT_LINK != 0 {
                    continue;
                }
                let idx = self.alloc_link();
                if idx == DT_NULL_LINK {
                    continue;
                }
                self.links[idx as usize] = Link {
                    reference: base | (nei as u64 - 1),
                    next: self.polys[i].first_link,
                    edge: j as u8,
                    side: 0xff,
                    bmin: 0,
                    bmax: 0,
                };
                self.polys[i].first_link = idx;
            }
        }
    }

    fn clear(&mut self) {
        let salt = self.salt;
        let next_free = self.next_free;
        *self = MeshTile { salt, next_free, ..Default::default() };
    }
}

/// Parse the sections of a tile blob following its header
fn parse_tile(data: &[u8], header: &MeshHeader, tile: &mut MeshTile) -> DetourResult<()> {
    let count = |n: i32| n.max(0) as usize;
    let verts_size = align4(4 * 3 * count(header.vert_count));
    let polys_size = align4(POLY_SIZE * count(header.poly_count));
    let links_size = align4(LINK_SIZE * count(header.max_link_count));
    let dmeshes_size = align4(POLY_DETAIL_SIZE * count(header.detail_mesh_count));
    let dverts_size = align4(4 * 3 * count(header.detail_vert_count));
    let dtris_size = align4(4 * count(header.detail_tri_count));
    let bv_size = align4(BV_NODE_SIZE * count(header.bv_node_count));
    let cons_size = align4(OFF_MESH_CON_SIZE * count(header.off_mesh_con_count));

    let expected = align4(MESH_HEADER_SIZE)
        + verts_size
        + polys_size
        + links_size
        + dmeshes_size
        + dverts_size
        + dtris_size
        + bv_size
        + cons_size;
    if data.len() < expected {
        return Err(DetourError::SizeMismatch { expected, actual: data.len() });
    }

    let mut r = Cursor::new(data);
    r.set_position(align4(MESH_HEADER_SIZE) as u64);

    tile.verts = vec![0.0; count(header.vert_count) * 3];
    read_f32s(&mut r, &mut tile.verts)?;
    r.set_position(align4(r.position() as usize) as u64);

    tile.polys = (0..count(header.poly_count)).map(|_| Poly::read_from(&mut r)).collect::<io::Result<_>>()?;
    r.set_position(r.position() + (links_size + polys_size - POLY_SIZE * count(header.poly_count)) as u64);

    tile.links = vec![Link::default(); count(header.max_link_count)];

    tile.detail_meshes =
        (0..count(header.detail_mesh_count)).map(|_| PolyDetail::read_from(&mut r)).collect::<io::Result<_>>()?;
    r.set_position(align4(r.position() as usize) as u64);

    tile.detail_verts = vec![0.0; count(header.detail_vert_count) * 3];
    read_f32s(&mut r, &mut tile.detail_verts)?;
    r.set_position(align4(r.position() as usize) as u64);

    tile.detail_tris = vec![0; count(header.detail_tri_count) * 4];
    r.read_exact(&mut tile.detail_tris)?;
    r.set_position(align4(r.position() as usize) as u64);

    tile.bv_tree = (0..count(header.bv_node_count)).map(|_| BvNode::read_from(&mut r)).collect::<io::Result<_>>()?;
    r.set_position(align4(r.position() as usize) as u64);

    tile.off_mesh_cons =
        (0..count(header.off_mesh_con_count)).map(|_| OffMeshConnection::read_from(&mut r)).collect::<io::Result<_>>()?;

    Ok(())
}

/// Fixed capacity tile container
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<MeshTile>,
    next_free: Option<usize>,
    lookup: HashMap<(i32, i32, i32), usize>,
}

impl NavMesh {
    pub fn init(params: &NavMeshParams) -> DetourResult<Self> {
        if params.max_tiles <= 0 || params.max_tiles as u64 > 1 << TILE_BITS {
            return Err(DetourError::InvalidParam("maxTiles out of range"));
        }
        if params.max_polys <= 0 || params.max_polys as u64 > 1 << POLY_BITS {
            return Err(DetourError::InvalidParam("maxPolys out of range"));
        }

        let max_tiles = params.max_tiles as usize;
        let mut tiles = vec![MeshTile { salt: 1, ..Default::default() }; max_tiles];
        for (i, tile) in tiles.iter_mut().enumerate() {
            tile.next_free = if i + 1 < max_tiles { Some(i + 1) } else { None };
        }

        Ok(NavMesh { params: params.clone(), tiles, next_free: Some(0), lookup: HashMap::new() })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Number of loaded tiles
    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn tile_ref(&self, index: usize) -> TileRef {
        encode_poly_id(self.tiles[index].salt, index as u32, 0)
    }

    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.lookup.get(&(x, y, layer)).map(|&i| &self.tiles[i])
    }

    pub fn tile_by_ref(&self, reference: TileRef) -> Option<&MeshTile> {
        let (salt, index, _) = decode_poly_id(reference);
        let tile = self.tiles.get(index as usize)?;
        (tile.header.is_some() && tile.salt == salt).then_some(tile)
    }

    /// Tile grid location containing a world position
    pub fn calc_tile_loc(&self, pos: &[f32; 3]) -> (i32, i32) {
        (
            ((pos[0] - self.params.orig[0]) / self.params.tile_width).floor() as i32,
            ((pos[2] - self.params.orig[2]) / self.params.tile_height).floor() as i32,
        )
    }

    /// Load a tile blob. The container keeps the data until the tile is removed.
    pub fn add_tile(&mut self, data: Vec<u8>) -> DetourResult<TileRef> {
        let header = MeshHeader::read_from(&mut Cursor::new(&data))?;
        if header.magic != DT_NAVMESH_MAGIC {
            return Err(DetourError::WrongMagic(header.magic));
        }
        if header.version != DT_NAVMESH_VERSION {
            return Err(DetourError::WrongVersion(header.version));
        }
        if header.poly_count as u64 > 1 << POLY_BITS {
            return Err(DetourError::InvalidParam("tile has too many polygons"));
        }
        if self.lookup.contains_key(&(header.x, header.y, header.layer)) {
            return Err(DetourError::AlreadyOccupied { x: header.x, y: header.y, layer: header.layer });
        }

        let index = self.next_free.ok_or(DetourError::OutOfMemory)?;
        let mut tile = MeshTile { salt: self.tiles[index].salt, ..Default::default() };
        parse_tile(&data, &header, &mut tile)?;

        // Chain all links into the free list
        let nlinks = tile.links.len();
        for (i, link) in tile.links.iter_mut().enumerate() {
            link.next = if i + 1 < nlinks { (i + 1) as u32 } else { DT_NULL_LINK };
        }
        tile.links_free_list = if nlinks > 0 { 0 } else { DT_NULL_LINK };

        let base = encode_poly_id(tile.salt, index as u32, 0);
        tile.connect_int_links(base);

        debug!("Added tile ({},{}) to slot {} with {} polys", header.x, header.y, index, header.poly_count);

        self.lookup.insert((header.x, header.y, header.layer), index);
        self.next_free = self.tiles[index].next_free;
        tile.header = Some(header);
        tile.data = data;
        tile.next_free = None;
        self.tiles[index] = tile;

        Ok(base)
    }

    /// Unload a tile, returning its data. The slot's salt is bumped so stale
    /// references no longer resolve.
    pub fn remove_tile(&mut self, reference: TileRef) -> DetourResult<Vec<u8>> {
        let (salt, index, _) = decode_poly_id(reference);
        let index = index as usize;
        let Some(tile) = self.tiles.get_mut(index) else {
            return Err(DetourError::InvalidParam("tile index out of range"));
        };
        if tile.salt != salt {
            return Err(DetourError::InvalidParam("stale tile reference"));
        }
        let Some(header) = tile.header.take() else {
            return Err(DetourError::InvalidParam("tile slot is empty"));
        };

        self.lookup.remove(&(header.x, header.y, header.layer));
        let data = std::mem::take(&mut tile.data);
        tile.clear();

        tile.salt = (tile.salt + 1) & ((1 << SALT_BITS) - 1);
        if tile.salt == 0 {
            tile.salt = 1;
        }
        tile.next_free = self.next_free;
        self.next_free = Some(index);

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detour::builder::tests::{quad_params, quad_tile};
    use crate::detour::create_nav_mesh_data;

    fn single_tile_mesh() -> NavMesh {
        NavMesh::init(&NavMeshParams {
            orig: [0.0; 3],
            tile_width: 8.0,
            tile_height: 8.0,
            max_tiles: 1,
            max_polys: 1 << 20,
        })
        .unwrap()
    }

    #[test]
    fn poly_refs_round_trip_fields() {
        let r = encode_poly_id(7, 123_456, 1023);
        assert_eq!(decode_poly_id(r), (7, 123_456, 1023));
    }

    #[test]
    fn params_record_is_28_bytes() {
        let params = NavMeshParams { orig: [1.0, 2.0, 3.0], tile_width: 533.3333, tile_height: 533.3333, max_tiles: 4, max_polys: 1 << 20 };
        let mut buf = Vec::new();
        params.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), NavMeshParams::SIZE);
        assert_eq!(NavMeshParams::read_from(&mut Cursor::new(&buf)).unwrap(), params);
    }

    #[test]
    fn init_rejects_oversized_params() {
        let params = NavMeshParams { max_tiles: 1, max_polys: (1 << 20) + 1, ..Default::default() };
        assert!(NavMesh::init(&params).is_err());
    }

    #[test]
    fn add_tile_connects_internal_links() {
        let tile = quad_tile();
        let data = create_nav_mesh_data(&quad_params(&tile)).unwrap();
        let mut mesh = single_tile_mesh();
        let tref = mesh.add_tile(data).unwrap();

        let loaded = mesh.tile_by_ref(tref).unwrap();
        assert_eq!(loaded.polys.len(), 2);
        assert_eq!(loaded.linked_polys(0), vec![1]);
        assert_eq!(loaded.linked_polys(1), vec![0]);
        // Portal edge is an external link, not an internal one
        assert_eq!(loaded.polys[0].neis[0], DT_EXT_LINK | 4);
        assert!(mesh.tile_at(1, 2, 0).is_some());
    }

    #[test]
    fn occupied_location_and_capacity() {
        let tile = quad_tile();
        let data = create_nav_mesh_data(&quad_params(&tile)).unwrap();
        let mut mesh = single_tile_mesh();
        mesh.add_tile(data.clone()).unwrap();
        assert!(matches!(mesh.add_tile(data.clone()), Err(DetourError::AlreadyOccupied { .. })));

        let mut params = quad_params(&tile);
        params.tile_x = 5;
        let other = create_nav_mesh_data(&params).unwrap();
        assert!(matches!(mesh.add_tile(other), Err(DetourError::OutOfMemory)));
    }

    #[test]
    fn remove_tile_bumps_salt() {
        let tile = quad_tile();
        let data = create_nav_mesh_data(&quad_params(&tile)).unwrap();
        let mut mesh = single_tile_mesh();
        let tref = mesh.add_tile(data.clone()).unwrap();

        let returned = mesh.remove_tile(tref).unwrap();
        assert_eq!(returned, data);
        assert_eq!(mesh.tile_count(), 0);
        assert!(mesh.tile_by_ref(tref).is_none());
        assert!(mesh.remove_tile(tref).is_err());

        let again = mesh.add_tile(data).unwrap();
        assert_ne!(again, tref);
        assert_eq!(decode_poly_id(again).0, 2);
    }

    #[test]
    fn rejects_wrong_version() {
        let tile = quad_tile();
        let mut data = create_nav_mesh_data(&quad_params(&tile)).unwrap();
        data[4] = 6;
        let mut mesh = single_tile_mesh();
        assert!(matches!(mesh.add_tile(data), Err(DetourError::WrongVersion(6))));
    }

    #[test]
    fn rejects_truncated_tile() {
        let tile = quad_tile();
        let mut data = create_nav_mesh_data(&quad_params(&tile)).unwrap();
        data.truncate(data.len() - 8);
        let mut mesh = single_tile_mesh();
        assert!(matches!(mesh.add_tile(data), Err(DetourError::SizeMismatch { .. })));
    }
}
