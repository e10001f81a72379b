// detour/mod.rs - Runtime navigation tile format
//
// Binary layout of a Detour tile (DT_NAVMESH_VERSION 7) and the records it
// is made of. All records are little-endian and every section of a tile
// blob is padded to four bytes.

pub mod builder;
pub mod navmesh;

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

pub use builder::{NavMeshCreateParams, create_nav_mesh_data};
pub use navmesh::{MeshTile, NavMesh, NavMeshParams, PolyRef, TileRef};

use crate::DT_VERTS_PER_POLYGON;

/// 'DNAV'
pub const DT_NAVMESH_MAGIC: i32 = (b'D' as i32) << 24 | (b'N' as i32) << 16 | (b'A' as i32) << 8 | b'V' as i32;
pub const DT_NAVMESH_VERSION: i32 = 7;

/// Neighbour value flag marking an edge that links to another tile
pub const DT_EXT_LINK: u16 = 0x8000;
pub const DT_NULL_LINK: u32 = 0xffff_ffff;
/// Off-mesh connection can be traversed both ways
pub const DT_OFFMESH_CON_BIDIR: u8 = 1;

pub const DT_POLYTYPE_GROUND: u8 = 0;
pub const DT_POLYTYPE_OFFMESH_CONNECTION: u8 = 1;

pub const MESH_HEADER_SIZE: usize = 100;
pub const POLY_SIZE: usize = 32;
pub const LINK_SIZE: usize = 16;
pub const POLY_DETAIL_SIZE: usize = 12;
pub const BV_NODE_SIZE: usize = 16;
pub const OFF_MESH_CON_SIZE: usize = 36;

#[inline]
pub fn align4(x: usize) -> usize {
    (x + 3) & !3
}

#[derive(Debug, Error)]
pub enum DetourError {
    #[error("invalid vertices per polygon: {0}")]
    InvalidVertsPerPoly(usize),

    #[error("too many vertices: {0}")]
    TooManyVertices(usize),

    #[error("no vertices")]
    NoVertices,

    #[error("no polygons")]
    NoPolygons,

    #[error("wrong tile magic {0:#x}")]
    WrongMagic(i32),

    #[error("wrong tile version {0}")]
    WrongVersion(i32),

    #[error("tile ({x},{y}) layer {layer} is already loaded")]
    AlreadyOccupied { x: i32, y: i32, layer: i32 },

    #[error("navmesh is out of tile slots")]
    OutOfMemory,

    #[error("invalid navmesh parameters: {0}")]
    InvalidParam(&'static str),

    #[error("tile data is truncated: {0}")]
    Truncated(#[from] io::Error),

    #[error("tile data size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

pub type DetourResult<T> = std::result::Result<T, DetourError>;

// ============================================================================
// Records
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshHeader {
    pub magic: i32,
    pub version: i32,
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    pub poly_count: i32,
    pub vert_count: i32,
    pub max_link_count: i32,
    pub detail_mesh_count: i32,
    pub detail_vert_count: i32,
    pub detail_tri_count: i32,
    pub bv_node_count: i32,
    pub off_mesh_con_count: i32,
    pub off_mesh_base: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub bv_quant_factor: f32,
}

impl MeshHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for v in [self.magic, self.version, self.x, self.y, self.layer] {
            w.write_i32::<LittleEndian>(v)?;
        }
        w.write_u32::<LittleEndian>(self.user_id)?;
        for v in [
            self.poly_count,
            self.vert_count,
            self.max_link_count,
            self.detail_mesh_count,
            self.detail_vert_count,
            self.detail_tri_count,
            self.bv_node_count,
            self.off_mesh_con_count,
            self.off_mesh_base,
        ] {
            w.write_i32::<LittleEndian>(v)?;
        }
        for v in [self.walkable_height, self.walkable_radius, self.walkable_climb] {
            w.write_f32::<LittleEndian>(v)?;
        }
        write_f32s(w, &self.bmin)?;
        write_f32s(w, &self.bmax)?;
        w.write_f32::<LittleEndian>(self.bv_quant_factor)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut h = MeshHeader {
            magic: r.read_i32::<LittleEndian>()?,
            version: r.read_i32::<LittleEndian>()?,
            x: r.read_i32::<LittleEndian>()?,
            y: r.read_i32::<LittleEndian>()?,
            layer: r.read_i32::<LittleEndian>()?,
            user_id: r.read_u32::<LittleEndian>()?,
            poly_count: r.read_i32::<LittleEndian>()?,
            vert_count: r.read_i32::<LittleEndian>()?,
            max_link_count: r.read_i32::<LittleEndian>()?,
            detail_mesh_count: r.read_i32::<LittleEndian>()?,
            detail_vert_count: r.read_i32::<LittleEndian>()?,
            detail_tri_count: r.read_i32::<LittleEndian>()?,
            bv_node_count: r.read_i32::<LittleEndian>()?,
            off_mesh_con_count: r.read_i32::<LittleEndian>()?,
            off_mesh_base: r.read_i32::<LittleEndian>()?,
            walkable_height: r.read_f32::<LittleEndian>()?,
            walkable_radius: r.read_f32::<LittleEndian>()?,
            walkable_climb: r.read_f32::<LittleEndian>()?,
            ..Default::default()
        };
        read_f32s(r, &mut h.bmin)?;
        read_f32s(r, &mut h.bmax)?;
        h.bv_quant_factor = r.read_f32::<LittleEndian>()?;
        Ok(h)
    }
}

/// Navigation polygon. `neis` holds 1-based internal neighbours, `DT_EXT_LINK
/// | side` for portals and 0 for solid edges.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Poly {
    pub first_link: u32,
    pub verts: [u16; DT_VERTS_PER_POLYGON],
    pub neis: [u16; DT_VERTS_PER_POLYGON],
    pub flags: u16,
    pub vert_count: u8,
    pub area_and_type: u8,
}

impl Poly {
    pub fn area(&self) -> u8 {
        self.area_and_type & 0x3f
    }

    pub fn poly_type(&self) -> u8 {
        self.area_and_type >> 6
    }

    pub fn set_area(&mut self, area: u8) {
        self.area_and_type = (self.area_and_type & 0xc0) | (area & 0x3f);
    }

    pub fn set_type(&mut self, t: u8) {
        self.area_and_type = (self.area_and_type & 0x3f) | (t << 6);
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.first_link)?;
        for v in self.verts.iter().chain(self.neis.iter()) {
            w.write_u16::<LittleEndian>(*v)?;
        }
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u8(self.vert_count)?;
        w.write_u8(self.area_and_type)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut p = Poly { first_link: r.read_u32::<LittleEndian>()?, ..Default::default() };
        r.read_u16_into::<LittleEndian>(&mut p.verts)?;
        r.read_u16_into::<LittleEndian>(&mut p.neis)?;
        p.flags = r.read_u16::<LittleEndian>()?;
        p.vert_count = r.read_u8()?;
        p.area_and_type = r.read_u8()?;
        Ok(p)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Link {
    pub reference: u64,
    pub next: u32,
    pub edge: u8,
    pub side: u8,
    pub bmin: u8,
    pub bmax: u8,
}

impl Link {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.reference)?;
        w.write_u32::<LittleEndian>(self.next)?;
        w.write_all(&[self.edge, self.side, self.bmin, self.bmax])
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolyDetail {
    pub vert_base: u32,
    pub tri_base: u32,
    pub vert_count: u8,
    pub tri_count: u8,
}

impl PolyDetail {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.vert_base)?;
        w.write_u32::<LittleEndian>(self.tri_base)?;
        w.write_all(&[self.vert_count, self.tri_count, 0, 0])
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let d = PolyDetail {
            vert_base: r.read_u32::<LittleEndian>()?,
            tri_base: r.read_u32::<LittleEndian>()?,
            vert_count: r.read_u8()?,
            tri_count: r.read_u8()?,
        };
        r.read_u16::<LittleEndian>()?;
        Ok(d)
    }
}

/// Bounding volume tree node. Negative `i` is the escape offset of an
/// internal node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BvNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

impl BvNode {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for v in self.bmin.iter().chain(self.bmax.iter()) {
            w.write_u16::<LittleEndian>(*v)?;
        }
        w.write_i32::<LittleEndian>(self.i)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut n = BvNode::default();
        r.read_u16_into::<LittleEndian>(&mut n.bmin)?;
        r.read_u16_into::<LittleEndian>(&mut n.bmax)?;
        n.i = r.read_i32::<LittleEndian>()?;
        Ok(n)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OffMeshConnection {
    pub pos: [f32; 6],
    pub rad: f32,
    pub poly: u16,
    pub flags: u8,
    pub side: u8,
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_f32s(w, &self.pos)?;
        w.write_f32::<LittleEndian>(self.rad)?;
        w.write_u16::<LittleEndian>(self.poly)?;
        w.write_u8(self.flags)?;
        w.write_u8(self.side)?;
        w.write_u32::<LittleEndian>(self.user_id)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut c = OffMeshConnection::default();
        read_f32s(r, &mut c.pos)?;
        c.rad = r.read_f32::<LittleEndian>()?;
        c.poly = r.read_u16::<LittleEndian>()?;
        c.flags = r.read_u8()?;
        c.side = r.read_u8()?;
        c.user_id = r.read_u32::<LittleEndian>()?;
        Ok(c)
    }
}

pub(crate) fn write_f32s<W: Write>(w: &mut W, values: &[f32]) -> io::Result<()> {
    for v in values {
        w.write_f32::<LittleEndian>(*v)?;
    }
    Ok(())
}

pub(crate) fn read_f32s<R: Read>(r: &mut R, out: &mut [f32]) -> io::Result<()> {
    r.read_f32_into::<LittleEndian>(out)
}

/// Pad the buffer to a four byte boundary
pub(crate) fn pad4(buf: &mut Vec<u8>) {
    buf.resize(align4(buf.len()), 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn record_sizes_match_layout() {
        let mut buf = Vec::new();
        MeshHeader::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), MESH_HEADER_SIZE);

        buf.clear();
        Poly::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), POLY_SIZE);

        buf.clear();
        Link::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), LINK_SIZE);

        buf.clear();
        PolyDetail::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), POLY_DETAIL_SIZE);

        buf.clear();
        BvNode::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), BV_NODE_SIZE);

        buf.clear();
        OffMeshConnection::default().write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), OFF_MESH_CON_SIZE);
    }

    #[test]
    fn magic_spells_dnav() {
        assert_eq!(DT_NAVMESH_MAGIC, 0x444E_4156);
    }

    #[test]
    fn header_reads_back() {
        let header = MeshHeader {
            magic: DT_NAVMESH_MAGIC,
            version: DT_NAVMESH_VERSION,
            x: 3,
            y: -2,
            poly_count: 12,
            bmin: [1.0, 2.0, 3.0],
            bmax: [4.0, 5.0, 6.0],
            bv_quant_factor: 3.75,
            ..Default::default()
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let parsed = MeshHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn poly_area_and_type_pack() {
        let mut p = Poly::default();
        p.set_area(0x3f);
        p.set_type(DT_POLYTYPE_OFFMESH_CONNECTION);
        assert_eq!(p.area(), 0x3f);
        assert_eq!(p.poly_type(), DT_POLYTYPE_OFFMESH_CONNECTION);
        assert_eq!(p.area_and_type, 0x7f);
    }
}
