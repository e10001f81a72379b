// Synthetic geometry shared by the integration tests

#![allow(dead_code)]

use movemap::{GeometryProvider, MeshData};

/// Map tile that holds the walkable quad
pub const QUAD_TILE: (u32, u32) = (32, 32);
/// Footprint of the quad on the x and z axes
pub const QUAD_MIN: f32 = -522.0;
pub const QUAD_MAX: f32 = -502.0;
pub const QUAD_HEIGHT: f32 = 10.0;

/// One flat square of ground inside tile (32, 32) and nothing else
pub struct QuadProvider {
    pub map_id: u32,
}

impl QuadProvider {
    fn add_quad(mesh: &mut MeshData) {
        let verts = [
            [QUAD_MIN, QUAD_HEIGHT, QUAD_MIN],
            [QUAD_MIN, QUAD_HEIGHT, QUAD_MAX],
            [QUAD_MAX, QUAD_HEIGHT, QUAD_MAX],
            [QUAD_MAX, QUAD_HEIGHT, QUAD_MIN],
        ];
        // counter-clockwise seen from above, so the faces point up
        mesh.add_solid(&verts, &[[0, 1, 2], [0, 2, 3]], false);
    }
}

impl GeometryProvider for QuadProvider {
    fn load_terrain(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) -> bool {
        if map_id != self.map_id || (tile_x, tile_y) != QUAD_TILE {
            return false;
        }
        Self::add_quad(mesh);
        true
    }

    fn load_collision(&self, _: u32, _: u32, _: u32, _: &mut MeshData) -> bool {
        false
    }

    fn load_full_map(&self, map_id: u32, mesh: &mut MeshData) -> bool {
        if map_id != self.map_id {
            return false;
        }
        Self::add_quad(mesh);
        true
    }

    fn uses_liquids(&self) -> bool {
        false
    }
}
