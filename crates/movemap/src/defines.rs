// defines.rs - Shared constants of the map, vmap and mmap formats

use mmap_recast::detour::navmesh::POLY_BITS;

// ============================================================================
// World grid
// ============================================================================

/// Grid size in world units (one map tile)
pub const GRID_SIZE: f32 = 533.333_3;

/// Number of tiles along each axis of a map
pub const TILES_PER_AXIS: u32 = 64;

/// Height grid sizes of a .map tile
pub const V9_SIZE: usize = 129;
pub const V9_SIZE_SQ: usize = V9_SIZE * V9_SIZE;
pub const V8_SIZE: usize = 128;
pub const V8_SIZE_SQ: usize = V8_SIZE * V8_SIZE;

/// Size of one V8 cell
pub const GRID_PART_SIZE: f32 = GRID_SIZE / V8_SIZE as f32;

// Liquid sentinel values
pub const INVALID_MAP_LIQ_HEIGHT: f32 = -500.0;
pub const INVALID_MAP_LIQ_HEIGHT_MAX: f32 = 5000.0;

// ============================================================================
// .map file format
// ============================================================================

pub const MAP_VERSION_MAGIC: &[u8; 4] = b"s1.4";

pub const MAP_HEIGHT_NO_HEIGHT: u32 = 0x0001;
pub const MAP_HEIGHT_AS_INT16: u32 = 0x0002;
pub const MAP_HEIGHT_AS_INT8: u32 = 0x0004;

pub const MAP_LIQUID_NO_TYPE: u8 = 0x01;
pub const MAP_LIQUID_NO_HEIGHT: u8 = 0x02;

pub const MAP_LIQUID_TYPE_NO_WATER: u8 = 0x00;
pub const MAP_LIQUID_TYPE_MAGMA: u8 = 0x01;
pub const MAP_LIQUID_TYPE_OCEAN: u8 = 0x02;
pub const MAP_LIQUID_TYPE_SLIME: u8 = 0x04;
pub const MAP_LIQUID_TYPE_WATER: u8 = 0x08;
pub const MAP_LIQUID_TYPE_DEEP_WATER: u8 = 0x10;

/// Hole lookup tables
pub const HOLETAB_H: [u16; 4] = [0x1111, 0x2222, 0x4444, 0x8888];
pub const HOLETAB_V: [u16; 4] = [0x000F, 0x00F0, 0x0F00, 0xF000];

// ============================================================================
// vmap file format
// ============================================================================

pub const VMAP_MAGIC: &[u8; 8] = b"VMAP_7.0";

pub const MOD_M2: u32 = 1;
pub const MOD_HAS_BOUND: u32 = 1 << 2;

// ============================================================================
// Navigation areas
// ============================================================================

pub const NAV_AREA_EMPTY: u8 = 0;
pub const NAV_AREA_GROUND: u8 = 11;
pub const NAV_AREA_WATER: u8 = 9;
pub const NAV_AREA_MAGMA_SLIME: u8 = 8;
pub const NAV_AREA_ALL_MASK: u8 = 0x3F;

// ============================================================================
// mmap file format
// ============================================================================

pub const MMAP_MAGIC: u32 = 0x4d4d_4150; // 'MMAP'
pub const MMAP_VERSION: u32 = 8;

/// Polygons addressable inside one tile
pub const MAX_POLYS_PER_TILE: i32 = 1 << POLY_BITS;

// ============================================================================
// Unit profiles
// ============================================================================

/// Voxel density used for a build. The big profile halves the resolution and
/// the agent dimensions expressed in cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnitProfile {
    #[default]
    Normal,
    Big,
}

impl UnitProfile {
    pub fn from_big_base_unit(big: bool) -> Self {
        if big { UnitProfile::Big } else { UnitProfile::Normal }
    }

    /// Size of one voxel in world units. Must divide GRID_SIZE.
    pub fn base_unit_dim(self) -> f32 {
        match self {
            UnitProfile::Normal => 0.266_666,
            UnitProfile::Big => 0.533_333,
        }
    }

    /// Voxels along one side of a tile
    pub fn vertex_per_map(self) -> i32 {
        (GRID_SIZE / self.base_unit_dim() + 0.5) as i32
    }

    /// Voxels along one side of a chunk; divides `vertex_per_map`
    pub fn vertex_per_chunk(self) -> i32 {
        match self {
            UnitProfile::Normal => 80,
            UnitProfile::Big => 40,
        }
    }

    /// Chunks along one side of a tile
    pub fn chunks_per_tile(self) -> i32 {
        self.vertex_per_map() / self.vertex_per_chunk()
    }

    pub fn walkable_radius(self) -> i32 {
        match self {
            UnitProfile::Normal => 2,
            UnitProfile::Big => 1,
        }
    }

    pub fn walkable_height(self) -> i32 {
        match self {
            UnitProfile::Normal => 6,
            UnitProfile::Big => 3,
        }
    }

    pub fn walkable_climb(self) -> i32 {
        match self {
            UnitProfile::Normal => 4,
            UnitProfile::Big => 2,
        }
    }
}

// ============================================================================
// Tile ids and bounds
// ============================================================================

pub fn pack_tile_id(x: u32, y: u32) -> u32 {
    (x << 16) | y
}

pub fn unpack_tile_id(packed: u32) -> (u32, u32) {
    (packed >> 16, packed & 0xFFFF)
}

/// World bounds of tile (x, y). Height comes from `verts` when given.
pub fn get_tile_bounds(tile_x: u32, tile_y: u32, verts: &[f32]) -> ([f32; 3], [f32; 3]) {
    let (mut bmin, mut bmax) = if verts.len() >= 3 {
        mmap_recast::calc_bounds(verts)
    } else {
        ([0.0, f32::MIN, 0.0], [0.0, f32::MAX, 0.0])
    };

    bmax[0] = (32 - tile_x as i32) as f32 * GRID_SIZE;
    bmax[2] = (32 - tile_y as i32) as f32 * GRID_SIZE;
    bmin[0] = bmax[0] - GRID_SIZE;
    bmin[2] = bmax[2] - GRID_SIZE;

    (bmin, bmax)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trips_whole_grid() {
        for x in 0..TILES_PER_AXIS {
            for y in 0..TILES_PER_AXIS {
                assert_eq!(unpack_tile_id(pack_tile_id(x, y)), (x, y));
            }
        }
    }

    #[test]
    fn both_profiles_have_25_chunks() {
        assert_eq!(UnitProfile::Normal.vertex_per_map(), 2000);
        assert_eq!(UnitProfile::Big.vertex_per_map(), 1000);
        assert_eq!(UnitProfile::Normal.chunks_per_tile(), 25);
        assert_eq!(UnitProfile::Big.chunks_per_tile(), 25);
        assert_eq!(UnitProfile::from_big_base_unit(true).walkable_climb(), 2);
    }

    #[test]
    fn tile_bounds_follow_centered_grid() {
        let (bmin, bmax) = get_tile_bounds(32, 31, &[1.0, 5.0, 2.0, 3.0, -2.0, 4.0]);
        assert_eq!(bmax[0], 0.0);
        assert_eq!(bmin[0], -GRID_SIZE);
        assert_eq!(bmax[2], GRID_SIZE);
        assert_eq!(bmin[2], 0.0);
        assert_eq!((bmin[1], bmax[1]), (-2.0, 5.0));

        let (bmin, bmax) = get_tile_bounds(0, 0, &[]);
        assert_eq!(bmin[1], f32::MIN);
        assert_eq!(bmax[1], f32::MAX);
    }
}
