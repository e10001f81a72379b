// builder.rs - Map level build orchestration
//
// Walks the catalog map by map. Tiles of one map are built on a rayon pool,
// each worker validating its tiles against its own navmesh container.

use std::any::Any;
use std::ops::AddAssign;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use mmap_recast::detour::{NavMesh, NavMeshParams};
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::bounds::estimate_tile_range;
use crate::catalog::TileCatalog;
use crate::config::{MapConfigs, SkipFlags, SkipLists};
use crate::defines::{UnitProfile, pack_tile_id, unpack_tile_id};
use crate::persistence;
use crate::terrain::GeometryProvider;
use crate::tile_builder::{TileBuilder, TileLabel, TileOutcome};

/// Settings shared by every map of a run
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub profile: UnitProfile,
    pub max_walkable_angle: f32,
    pub skip: SkipFlags,
    pub skip_lists: SkipLists,
    pub mmaps_dir: PathBuf,
    /// Debug meshes are written here when set
    pub debug_dir: Option<PathBuf>,
    pub off_mesh_path: Option<PathBuf>,
    pub threads: usize,
    pub map_configs: MapConfigs,
}

impl BuildOptions {
    pub fn new(mmaps_dir: impl Into<PathBuf>) -> Self {
        BuildOptions {
            profile: UnitProfile::Normal,
            max_walkable_angle: 60.0,
            skip: SkipFlags::default(),
            skip_lists: SkipLists::default(),
            mmaps_dir: mmaps_dir.into(),
            debug_dir: None,
            off_mesh_path: None,
            threads: 1,
            map_configs: MapConfigs::default(),
        }
    }
}

/// Tile counts of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub maps: u32,
    pub written: u32,
    /// Already current on disk
    pub skipped: u32,
    /// Built but produced nothing worth writing
    pub empty: u32,
    pub failed: u32,
}

impl AddAssign for BuildSummary {
    fn add_assign(&mut self, other: Self) {
        self.maps += other.maps;
        self.written += other.written;
        self.skipped += other.skipped;
        self.empty += other.empty;
        self.failed += other.failed;
    }
}

pub struct MapBuilder<P: GeometryProvider> {
    provider: P,
    catalog: TileCatalog,
    options: BuildOptions,
    stop: Arc<AtomicBool>,
    build_index: AtomicU32,
}

impl<P: GeometryProvider> MapBuilder<P> {
    pub fn new(provider: P, catalog: TileCatalog, options: BuildOptions) -> Self {
        info!("Using {} thread(s) for processing.", options.threads);
        MapBuilder {
            provider,
            catalog,
            options,
            stop: Arc::new(AtomicBool::new(false)),
            build_index: AtomicU32::new(0),
        }
    }

    /// Set to stop the run after the tiles in progress
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn catalog(&self) -> &TileCatalog {
        &self.catalog
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn next_index(&self) -> u32 {
        self.build_index.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Every discovered map that is not on an active skip list
    pub fn build_all(&mut self) -> BuildSummary {
        let ids = self.catalog.map_ids();
        self.build_maps(&ids)
    }

    pub fn build_maps(&mut self, ids: &[u32]) -> BuildSummary {
        let mut summary = BuildSummary::default();
        for &map_id in ids {
            if self.stopped() {
                warn!("Stop requested, {} map(s) left unbuilt", ids.len() as u32 - summary.maps);
                break;
            }
            if self.options.skip_lists.should_skip_map(map_id, self.options.skip) {
                info!("[Map {:03}] Skipped", map_id);
            } else {
                summary += self.build_map(map_id);
            }
            summary.maps += 1;
        }
        summary
    }

    /// Build every tile of a map that is not already current on disk
    pub fn build_map(&mut self, map_id: u32) -> BuildSummary {
        info!("Building map {:03}:", map_id);
        let mut summary = BuildSummary::default();

        let Some(params) = self.prepare_map(map_id) else {
            return summary;
        };

        let index = self.catalog.tiles(map_id).cloned().unwrap_or_default();
        info!("[Map {:03}] We have {} tiles.", map_id, index.len());

        let mmaps_dir = &self.options.mmaps_dir;
        let mut pending = Vec::with_capacity(index.len());
        for (tile_x, tile_y) in index.iter().map(|&t| unpack_tile_id(t)) {
            if persistence::should_skip_tile(mmaps_dir, map_id, tile_x, tile_y) {
                summary.skipped += 1;
            } else {
                pending.push((tile_x, tile_y));
            }
        }
        if summary.skipped > 0 {
            info!("[Map {:03}] {} tile(s) already current", map_id, summary.skipped);
        }

        let tile_builder = self.tile_builder(map_id);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.options.threads).build();

        let built = match pool {
            Ok(pool) => pool.install(|| {
                pending
                    .par_iter()
                    .map_init(
                        || NavMesh::init(&params),
                        |nav_mesh, &(tile_x, tile_y)| match nav_mesh {
                            Ok(nav_mesh) => self.build_tile(&tile_builder, nav_mesh, map_id, tile_x, tile_y),
                            Err(e) => {
                                error!("[Map {:03}] Failed creating navmesh: {}", map_id, e);
                                BuildSummary { failed: 1, ..Default::default() }
                            }
                        },
                    )
                    .reduce(BuildSummary::default, |mut a, b| {
                        a += b;
                        a
                    })
            }),
            Err(e) => {
                warn!("Failed to create thread pool: {}, using single-threaded", e);
                self.build_sequential(&tile_builder, &params, map_id, &pending)
            }
        };

        summary += built;
        info!(
            "[Map {:03}] Done: {} written, {} empty, {} failed",
            map_id, summary.written, summary.empty, summary.failed
        );
        summary
    }

    /// Build one tile regardless of skip lists and existing files
    pub fn build_single_tile(&mut self, map_id: u32, tile_x: u32, tile_y: u32) -> BuildSummary {
        self.catalog.insert(map_id, tile_x, tile_y);

        let Some(params) = self.prepare_map(map_id) else {
            return BuildSummary::default();
        };

        let tile_builder = self.tile_builder(map_id);
        let mut summary = self.build_sequential(&tile_builder, &params, map_id, &[(tile_x, tile_y)]);
        summary.maps = 1;
        summary
    }

    /// Make sure the map has a tile index and write its parameter file
    fn prepare_map(&mut self, map_id: u32) -> Option<NavMeshParams> {
        if self.catalog.tiles(map_id).is_none_or(|tiles| tiles.is_empty()) {
            match estimate_tile_range(&self.provider, map_id) {
                Some(range) => {
                    let tiles = self.catalog.get_or_create(map_id);
                    tiles.extend(range.tiles().map(|(x, y)| pack_tile_id(x, y)));
                    info!(
                        "[Map {:03}] Using tiles [{},{}] to [{},{}] from model bounds",
                        map_id, range.min_x, range.min_y, range.max_x, range.max_y
                    );
                }
                None => {
                    info!("[Map {:03}] No tiles and no model geometry, nothing to build", map_id);
                    return None;
                }
            }
        }

        let params = self.catalog.tiles(map_id).and_then(crate::tile_builder::nav_mesh_params_for)?;
        match persistence::write_map_params(&self.options.mmaps_dir, map_id, &params) {
            Ok(path) => info!("[Map {:03}] Created navMesh params {}", map_id, path.display()),
            Err(e) => {
                error!("[Map {:03}] Failed creating navmesh params: {}", map_id, e);
                return None;
            }
        }
        Some(params)
    }

    fn tile_builder(&self, map_id: u32) -> TileBuilder {
        let options = &self.options;
        let config = options.map_configs.config_for(map_id, options.profile, options.max_walkable_angle);
        TileBuilder::new(options.profile, config, options.mmaps_dir.clone()).with_debug_dir(options.debug_dir.clone())
    }

    fn build_sequential(
        &self,
        tile_builder: &TileBuilder,
        params: &NavMeshParams,
        map_id: u32,
        tiles: &[(u32, u32)],
    ) -> BuildSummary {
        let mut nav_mesh = match NavMesh::init(params) {
            Ok(nav_mesh) => nav_mesh,
            Err(e) => {
                error!("[Map {:03}] Failed creating navmesh: {}", map_id, e);
                return BuildSummary { failed: tiles.len() as u32, ..Default::default() };
            }
        };

        let mut summary = BuildSummary::default();
        for &(tile_x, tile_y) in tiles {
            summary += self.build_tile(tile_builder, &mut nav_mesh, map_id, tile_x, tile_y);
        }
        summary
    }

    fn build_tile(
        &self,
        tile_builder: &TileBuilder,
        nav_mesh: &mut NavMesh,
        map_id: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> BuildSummary {
        let mut summary = BuildSummary::default();
        if self.stopped() {
            return summary;
        }

        let index = self.next_index();
        let label = TileLabel { map_id, tile_x, tile_y, index };
        let off_mesh = self.options.off_mesh_path.as_deref();

        // a panicking tile is abandoned like a failing one
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            tile_builder.build_tile(&self.provider, map_id, tile_x, tile_y, index, off_mesh, nav_mesh)
        }));
        match result {
            Ok(Ok(TileOutcome::Written { .. })) => summary.written += 1,
            Ok(Ok(_)) => summary.empty += 1,
            Ok(Err(e)) => {
                error!("{} {}", label, e);
                summary.failed += 1;
            }
            Err(payload) => {
                error!("{} Tile build panicked: {}", label, panic_message(&*payload));
                // the tile may have been left in the container, start over with an empty one
                let params = nav_mesh.params().clone();
                if let Ok(fresh) = NavMesh::init(&params) {
                    *nav_mesh = fresh;
                }
                summary.failed += 1;
            }
        }
        summary
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
