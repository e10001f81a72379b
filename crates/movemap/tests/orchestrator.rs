// Map selection and tile discovery of the build orchestrator

mod common;

use std::sync::atomic::Ordering;

use movemap::config::SkipFlags;
use movemap::persistence;
use movemap::{
    BuildOptions, GeometryProvider, MapBuilder, MeshData, SkipLists, TileCatalog, pack_tile_id, unpack_tile_id,
};

use common::{QUAD_TILE, QuadProvider};

#[test]
fn skipped_maps_are_not_built() {
    let dir = tempfile::tempdir().unwrap();

    let mut catalog = TileCatalog::new();
    catalog.insert(0, QUAD_TILE.0, QUAD_TILE.1);
    catalog.insert(600, QUAD_TILE.0, QUAD_TILE.1);

    let mut options = BuildOptions::new(dir.path());
    options.skip = SkipFlags { continents: true, ..Default::default() };

    let mut builder = MapBuilder::new(QuadProvider { map_id: 0 }, catalog, options);
    let summary = builder.build_all();

    assert_eq!(summary.maps, 2);
    assert_eq!(summary.written, 0);
    assert!(!persistence::map_params_file_name(dir.path(), 0).exists());
    // map 600 has no geometry at all but still gets its parameters
    assert!(persistence::map_params_file_name(dir.path(), 600).exists());
    assert_eq!(summary.empty, 1);
}

#[test]
fn skip_list_comes_from_options() {
    let dir = tempfile::tempdir().unwrap();

    let mut catalog = TileCatalog::new();
    catalog.insert(600, QUAD_TILE.0, QUAD_TILE.1);

    let mut options = BuildOptions::new(dir.path());
    options.skip = SkipFlags { junk_maps: true, ..Default::default() };
    options.skip_lists = SkipLists { junk: [600].into(), ..SkipLists::default() };

    let mut builder = MapBuilder::new(QuadProvider { map_id: 600 }, catalog, options);
    let summary = builder.build_maps(&[600]);

    assert_eq!(summary.written, 0);
    assert!(!persistence::map_params_file_name(dir.path(), 600).exists());
}

#[test]
fn map_without_tiles_uses_model_bounds() {
    let dir = tempfile::tempdir().unwrap();

    let mut catalog = TileCatalog::new();
    catalog.get_or_create(600);

    let mut builder = MapBuilder::new(QuadProvider { map_id: 600 }, catalog, BuildOptions::new(dir.path()));
    let summary = builder.build_map(600);

    let tiles = builder.catalog().tiles(600).unwrap();
    assert!(tiles.contains(&pack_tile_id(QUAD_TILE.0, QUAD_TILE.1)));
    assert!(tiles.iter().map(|&t| unpack_tile_id(t)).all(|(x, y)| x < 64 && y < 64));
    assert_eq!(summary.written, 1);

    let params = persistence::read_map_params(dir.path(), 600).unwrap();
    assert_eq!(params.max_tiles as usize, tiles.len());
}

#[test]
fn map_without_tiles_or_models_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = MapBuilder::new(QuadProvider { map_id: 600 }, TileCatalog::new(), BuildOptions::new(dir.path()));
    let summary = builder.build_map(601);

    assert_eq!(summary.written + summary.empty + summary.failed, 0);
    assert!(!persistence::map_params_file_name(dir.path(), 601).exists());
}

#[test]
fn stop_flag_halts_before_next_map() {
    let dir = tempfile::tempdir().unwrap();

    let mut catalog = TileCatalog::new();
    catalog.insert(600, QUAD_TILE.0, QUAD_TILE.1);

    let mut builder = MapBuilder::new(QuadProvider { map_id: 600 }, catalog, BuildOptions::new(dir.path()));
    builder.stop_flag().store(true, Ordering::Relaxed);

    let summary = builder.build_all();
    assert_eq!(summary.maps, 0);
    assert!(!persistence::map_params_file_name(dir.path(), 600).exists());
}

#[test]
fn parallel_build_matches_sequential() {
    let dir = tempfile::tempdir().unwrap();

    let mut catalog = TileCatalog::new();
    for (x, y) in [QUAD_TILE, (31, 32), (32, 31), (31, 31)] {
        catalog.insert(600, x, y);
    }

    let mut options = BuildOptions::new(dir.path());
    options.threads = 4;

    let mut builder = MapBuilder::new(QuadProvider { map_id: 600 }, catalog, options);
    let summary = builder.build_map(600);

    assert_eq!((summary.written, summary.empty, summary.failed), (1, 3, 0));
    assert!(persistence::tile_file_name(dir.path(), 600, QUAD_TILE.0, QUAD_TILE.1).exists());
    assert!(!persistence::tile_file_name(dir.path(), 600, 31, 31).exists());
}

/// Quad geometry, but loading tile (31, 31) blows up
struct BrokenTileProvider(QuadProvider);

impl GeometryProvider for BrokenTileProvider {
    fn load_terrain(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) -> bool {
        if (tile_x, tile_y) == (31, 31) {
            panic!("corrupt terrain for tile {},{}", tile_x, tile_y);
        }
        self.0.load_terrain(map_id, tile_x, tile_y, mesh)
    }

    fn load_collision(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) -> bool {
        self.0.load_collision(map_id, tile_x, tile_y, mesh)
    }

    fn load_full_map(&self, map_id: u32, mesh: &mut MeshData) -> bool {
        self.0.load_full_map(map_id, mesh)
    }

    fn uses_liquids(&self) -> bool {
        false
    }
}

#[test]
fn panicking_tile_does_not_stop_the_map() {
    for threads in [1, 2] {
        let dir = tempfile::tempdir().unwrap();

        let mut catalog = TileCatalog::new();
        for (x, y) in [(31, 31), QUAD_TILE, (31, 32)] {
            catalog.insert(600, x, y);
        }

        let mut options = BuildOptions::new(dir.path());
        options.threads = threads;

        let mut builder = MapBuilder::new(BrokenTileProvider(QuadProvider { map_id: 600 }), catalog, options);
        let summary = builder.build_maps(&[600, 601]);

        assert_eq!(summary.maps, 2);
        assert_eq!((summary.written, summary.empty, summary.failed), (1, 1, 1), "{threads} thread(s)");
        assert!(persistence::tile_file_name(dir.path(), 600, QUAD_TILE.0, QUAD_TILE.1).exists());
    }
}
