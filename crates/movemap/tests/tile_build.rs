// End-to-end tile builds from synthetic geometry

mod common;

use std::collections::{BTreeSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use mmap_recast::detour::NavMesh;
use movemap::persistence::{self, TileFileHeader};
use movemap::tile_builder::nav_mesh_params_for;
use movemap::{
    BuildOptions, MapBuilder, MmapConfig, TileBuilder, TileCatalog, TileOutcome, UnitProfile, pack_tile_id,
};

use common::{QUAD_HEIGHT, QUAD_MAX, QUAD_MIN, QUAD_TILE, QuadProvider};

const MAP: u32 = 600;

fn quad_catalog() -> TileCatalog {
    let mut catalog = TileCatalog::new();
    catalog.insert(MAP, QUAD_TILE.0, QUAD_TILE.1);
    catalog
}

#[test]
fn quad_tile_is_written_and_connected() {
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = QUAD_TILE;

    let index = BTreeSet::from([pack_tile_id(x, y)]);
    let params = nav_mesh_params_for(&index).unwrap();
    let mut nav_mesh = NavMesh::init(&params).unwrap();

    let builder = TileBuilder::new(UnitProfile::Normal, MmapConfig::for_profile(UnitProfile::Normal, 60.0), dir.path());
    let outcome = builder
        .build_tile(&QuadProvider { map_id: MAP }, MAP, x, y, 1, None, &mut nav_mesh)
        .unwrap();

    let TileOutcome::Written { path, size } = outcome else {
        panic!("tile was not written: {:?}", outcome);
    };
    assert_eq!(path, persistence::tile_file_name(dir.path(), MAP, x, y));
    assert_eq!(fs::metadata(&path).unwrap().len() as usize, size);
    // the validation copy is gone again
    assert_eq!(nav_mesh.tile_count(), 0);

    let (header, blob) = persistence::read_tile(&path).unwrap();
    assert!(header.is_current());
    assert_eq!(header.uses_liquids, 0);

    let tile_ref = nav_mesh.add_tile(blob).unwrap();
    let tile = nav_mesh.tile_by_ref(tile_ref).unwrap();
    assert!(!tile.polys.is_empty());

    // every vertex lies on the quad, allowing a cell of slack
    let slack = 1.0;
    for v in tile.verts.chunks_exact(3) {
        assert!(v[0] >= QUAD_MIN - slack && v[0] <= QUAD_MAX + slack, "x {} outside quad", v[0]);
        assert!(v[2] >= QUAD_MIN - slack && v[2] <= QUAD_MAX + slack, "z {} outside quad", v[2]);
        assert!((v[1] - QUAD_HEIGHT).abs() < 2.0, "y {} off the ground", v[1]);
    }

    // the polygons cover most of the quad, erosion trims the agent radius off the rim
    let covered: f32 = tile
        .polys
        .iter()
        .map(|poly| {
            let corner = |i: usize| {
                let v = poly.verts[i] as usize * 3;
                (tile.verts[v] - QUAD_MIN, tile.verts[v + 2] - QUAD_MIN)
            };
            let n = poly.vert_count as usize;
            let twice: f32 = (0..n)
                .map(|i| {
                    let (ax, az) = corner(i);
                    let (bx, bz) = corner((i + 1) % n);
                    ax * bz - bx * az
                })
                .sum();
            twice.abs() / 2.0
        })
        .sum();
    let footprint = (QUAD_MAX - QUAD_MIN) * (QUAD_MAX - QUAD_MIN);
    assert!(covered > 0.8 * footprint && covered <= footprint + 1.0, "covered {covered} of {footprint}");

    // one connected group of polygons
    let mut seen = vec![false; tile.polys.len()];
    let mut queue = VecDeque::from([0usize]);
    seen[0] = true;
    while let Some(poly) = queue.pop_front() {
        for next in tile.linked_polys(poly) {
            let next = next as usize;
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    assert!(seen.iter().all(|&s| s), "polygons are not all connected");
}

#[test]
fn tile_without_geometry_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let index = BTreeSet::from([pack_tile_id(10, 10)]);
    let mut nav_mesh = NavMesh::init(&nav_mesh_params_for(&index).unwrap()).unwrap();

    let builder = TileBuilder::new(UnitProfile::Normal, MmapConfig::for_profile(UnitProfile::Normal, 60.0), dir.path());
    let outcome = builder
        .build_tile(&QuadProvider { map_id: MAP }, MAP, 10, 10, 1, None, &mut nav_mesh)
        .unwrap();

    assert_eq!(outcome, TileOutcome::NoGeometry);
    assert!(!persistence::tile_file_name(dir.path(), MAP, 10, 10).exists());
}

#[test]
fn current_tiles_are_skipped_and_stale_ones_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = QUAD_TILE;

    let mut builder = MapBuilder::new(QuadProvider { map_id: MAP }, quad_catalog(), BuildOptions::new(dir.path()));
    let first = builder.build_map(MAP);
    assert_eq!(first.written, 1);
    assert!(persistence::map_params_file_name(dir.path(), MAP).exists());

    let tile_path = persistence::tile_file_name(dir.path(), MAP, x, y);
    assert!(persistence::should_skip_tile(dir.path(), MAP, x, y));

    let second = builder.build_map(MAP);
    assert_eq!((second.written, second.skipped), (0, 1));

    // an older generator version in the header makes the file stale
    patch_header_field(&tile_path, 8, 1);
    assert!(!persistence::read_tile_header(&tile_path).unwrap().is_current());
    assert!(!persistence::should_skip_tile(dir.path(), MAP, x, y));

    let third = builder.build_map(MAP);
    assert_eq!((third.written, third.skipped), (1, 0));
    let header = persistence::read_tile_header(&tile_path).unwrap();
    assert_eq!(header, TileFileHeader::new(header.size, false));
}

/// Overwrite one u32 of the tile file header
fn patch_header_field(path: &Path, offset: u64, value: u32) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&value.to_le_bytes()).unwrap();
}

#[test]
fn any_foreign_header_field_forces_a_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = QUAD_TILE;
    let tile_path = persistence::write_tile(dir.path(), MAP, x, y, &[7; 16], false).unwrap().0;
    assert!(persistence::should_skip_tile(dir.path(), MAP, x, y));

    // magic, detour version, generator version
    for offset in [0, 4, 8] {
        let original = fs::read(&tile_path).unwrap();
        patch_header_field(&tile_path, offset, 0xdead_beef);
        assert!(!persistence::should_skip_tile(dir.path(), MAP, x, y), "field at offset {offset}");

        fs::write(&tile_path, original).unwrap();
        assert!(persistence::should_skip_tile(dir.path(), MAP, x, y));
    }

    // size and liquid flag are not part of the version check
    patch_header_field(&tile_path, 16, 1);
    assert!(persistence::should_skip_tile(dir.path(), MAP, x, y));

    fs::write(&tile_path, [0u8; 6]).unwrap();
    assert!(!persistence::should_skip_tile(dir.path(), MAP, x, y));
}

#[test]
fn single_tile_ignores_current_file() {
    let dir = tempfile::tempdir().unwrap();
    let (x, y) = QUAD_TILE;

    let mut builder = MapBuilder::new(QuadProvider { map_id: MAP }, TileCatalog::new(), BuildOptions::new(dir.path()));
    assert_eq!(builder.build_single_tile(MAP, x, y).written, 1);
    assert!(persistence::should_skip_tile(dir.path(), MAP, x, y));

    let again = builder.build_single_tile(MAP, x, y);
    assert_eq!((again.written, again.skipped), (1, 0));
    assert!(builder.catalog().tiles(MAP).unwrap().contains(&pack_tile_id(x, y)));
}
