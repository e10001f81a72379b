// bounds.rs - Tile ranges for maps that only ship a global model

use crate::defines::{GRID_SIZE, TILES_PER_AXIS};
use crate::mesh_data::MeshData;
use crate::terrain::GeometryProvider;

/// Inclusive tile rectangle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRange {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    /// Every (x, y) in the range
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.min_x..=self.max_x).flat_map(move |x| (self.min_y..=self.max_y).map(move |y| (x, y)))
    }
}

/// Tiles covered by a recast-space bounding box
pub fn tile_range_for_bounds(bmin: &[f32; 3], bmax: &[f32; 3]) -> TileRange {
    let to_tile = |v: f32| -> u32 {
        let tile = (32.0 - v / GRID_SIZE) as i32;
        tile.clamp(0, TILES_PER_AXIS as i32 - 1) as u32
    };

    TileRange {
        min_x: to_tile(bmax[0]),
        max_x: to_tile(bmin[0]),
        min_y: to_tile(bmax[2]),
        max_y: to_tile(bmin[2]),
    }
}

/// Load the whole map's models and derive the tiles they cover
pub fn estimate_tile_range<P: GeometryProvider + ?Sized>(provider: &P, map_id: u32) -> Option<TileRange> {
    let mut mesh = MeshData::default();
    provider.load_full_map(map_id, &mut mesh);

    let verts = mesh.all_verts();
    if verts.len() < 3 {
        return None;
    }

    let (bmin, bmax) = mmap_recast::calc_bounds(&verts);
    Some(tile_range_for_bounds(&bmin, &bmax))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ModelOnly(Vec<f32>);

    impl GeometryProvider for ModelOnly {
        fn load_terrain(&self, _: u32, _: u32, _: u32, _: &mut MeshData) -> bool {
            false
        }

        fn load_collision(&self, _: u32, _: u32, _: u32, _: &mut MeshData) -> bool {
            false
        }

        fn load_full_map(&self, _: u32, mesh: &mut MeshData) -> bool {
            mesh.solid_verts.extend_from_slice(&self.0);
            !self.0.is_empty()
        }

        fn uses_liquids(&self) -> bool {
            true
        }
    }

    #[test]
    fn range_covers_geometry() {
        let provider = ModelOnly(vec![100.0, 0.0, -300.0, 700.0, 20.0, 50.0]);
        let range = estimate_tile_range(&provider, 600).unwrap();
        assert_eq!(range, TileRange { min_x: 30, max_x: 31, min_y: 31, max_y: 32 });

        // union of the tile bounds contains the geometry box
        let (mut lo, mut hi) = ([f32::MAX; 2], [f32::MIN; 2]);
        for (x, y) in range.tiles() {
            let (bmin, bmax) = crate::defines::get_tile_bounds(x, y, &[]);
            lo = [lo[0].min(bmin[0]), lo[1].min(bmin[2])];
            hi = [hi[0].max(bmax[0]), hi[1].max(bmax[2])];
        }
        assert!(lo[0] <= 100.0 && hi[0] >= 700.0);
        assert!(lo[1] <= -300.0 && hi[1] >= 50.0);
        assert_eq!(range.tiles().count(), 4);
    }

    #[test]
    fn range_is_clamped() {
        let range = tile_range_for_bounds(&[-1.0e6, 0.0, -1.0e6], &[1.0e6, 0.0, 1.0e6]);
        assert_eq!(range, TileRange { min_x: 0, max_x: 63, min_y: 0, max_y: 63 });
    }

    #[test]
    fn no_geometry_means_no_range() {
        assert!(estimate_tile_range(&ModelOnly(Vec::new()), 600).is_none());
    }
}
