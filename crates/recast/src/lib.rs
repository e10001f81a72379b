// lib.rs - Voxel navigation mesh construction
//
// Heightfield rasterization, region partitioning, contour tracing and
// polygonization, plus the Detour tile packer and an in-memory tile container.

pub mod area;
pub mod compact;
pub mod contour;
pub mod detail;
pub mod detour;
pub mod filter;
pub mod heightfield;
pub mod math;
pub mod mesh;
pub mod region;

use thiserror::Error;

pub use compact::CompactHeightfield;
pub use contour::{ContourSet, build_contours};
pub use detail::{PolyMeshDetail, build_poly_mesh_detail, merge_poly_mesh_details};
pub use heightfield::{Heightfield, rasterize_triangles};
pub use mesh::{PolyMesh, build_poly_mesh, merge_poly_meshes};

// ============================================================================
// Constants
// ============================================================================

/// Area id of unwalkable spans
pub const RC_NULL_AREA: u8 = 0;
/// Default area id of walkable spans
pub const RC_WALKABLE_AREA: u8 = 63;

/// Neighbour value of a compact span with no connection in a direction
pub const RC_NOT_CONNECTED: u8 = 0x3f;

/// Region flag of the tile border strip
pub const RC_BORDER_REG: u16 = 0x8000;
/// Region id of polygons merged from more than one region
pub const RC_MULTIPLE_REGS: u16 = 0;

/// Contour vertex flag: vertex lies on the border strip
pub const RC_BORDER_VERTEX: i32 = 0x10000;
/// Contour vertex flag: vertex lies on an area boundary
pub const RC_AREA_BORDER: i32 = 0x20000;
/// Mask extracting the region id of a contour vertex
pub const RC_CONTOUR_REG_MASK: i32 = 0xffff;

/// Tessellate solid wall edges while simplifying contours
pub const RC_CONTOUR_TESS_WALL_EDGES: i32 = 0x01;
/// Tessellate edges between areas while simplifying contours
pub const RC_CONTOUR_TESS_AREA_EDGES: i32 = 0x02;

/// Unused vertex slot of a polygon
pub const RC_MESH_NULL_IDX: u16 = 0xffff;

/// Largest span height representable in the heightfield
pub const RC_SPAN_MAX_HEIGHT: i32 = 0xffff;

/// Maximum number of vertices per polygon supported by the tile format
pub const DT_VERTS_PER_POLYGON: usize = 6;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum RecastError {
    #[error("invalid heightfield size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },

    #[error("region id overflow, too many regions")]
    RegionOverflow,

    #[error("too many vertices: {count} (limit {limit})")]
    TooManyVertices { count: usize, limit: usize },

    #[error("too many polygons: {count} (limit {limit})")]
    TooManyPolygons { count: usize, limit: usize },

    #[error("invalid vertices per polygon: {0}")]
    InvalidVertsPerPoly(usize),

    #[error("mismatched inputs: {0}")]
    Mismatch(&'static str),
}

pub type Result<T> = std::result::Result<T, RecastError>;

// ============================================================================
// Build configuration
// ============================================================================

/// Parameters shared by every stage of a chunk build (mirrors rcConfig)
#[derive(Clone, Debug, Default)]
pub struct RcConfig {
    pub width: i32,
    pub height: i32,
    pub tile_size: i32,
    pub border_size: i32,
    pub cs: f32,
    pub ch: f32,
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    pub walkable_slope_angle: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub walkable_radius: i32,
    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    pub min_region_area: i32,
    pub merge_region_area: i32,
    pub max_verts_per_poly: i32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
}

/// Axis aligned bounds of a flat xyz vertex array
pub fn calc_bounds(verts: &[f32]) -> ([f32; 3], [f32; 3]) {
    let mut bmin = [f32::MAX; 3];
    let mut bmax = [f32::MIN; 3];
    for v in verts.chunks_exact(3) {
        for k in 0..3 {
            bmin[k] = bmin[k].min(v[k]);
            bmax[k] = bmax[k].max(v[k]);
        }
    }
    (bmin, bmax)
}

/// Number of cells along x and z covering the bounds
pub fn calc_grid_size(bmin: &[f32; 3], bmax: &[f32; 3], cs: f32) -> (i32, i32) {
    (
        ((bmax[0] - bmin[0]) / cs + 0.5) as i32,
        ((bmax[2] - bmin[2]) / cs + 0.5) as i32,
    )
}

/// Direction offsets used by the compact heightfield, indexed 0..4 (-x, +z, +x, -z)
#[inline]
pub fn dir_offset_x(dir: usize) -> i32 {
    const OFFSET: [i32; 4] = [-1, 0, 1, 0];
    OFFSET[dir & 3]
}

#[inline]
pub fn dir_offset_y(dir: usize) -> i32 {
    const OFFSET: [i32; 4] = [0, 1, 0, -1];
    OFFSET[dir & 3]
}

/// Direction pointing along a unit offset
#[inline]
pub fn dir_for_offset(x: i32, y: i32) -> usize {
    const DIRS: [usize; 5] = [3, 0, usize::MAX, 2, 1];
    DIRS[(((y + 1) << 1) + x) as usize]
}
