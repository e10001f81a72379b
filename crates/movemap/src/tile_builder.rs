// tile_builder.rs - Build one navmesh tile from its input geometry
//
// A tile is voxelized as N x N chunks, each padded by the border size so
// neighbouring chunks agree on their shared edges. Chunk meshes are merged
// into a single tile mesh, packed into a Detour tile and written to disk.

use std::fmt;
use std::path::{Path, PathBuf};

use mmap_recast::area::{erode_walkable_area, median_filter_walkable_area};
use mmap_recast::compact::build_compact_heightfield;
use mmap_recast::detour::{DetourError, NavMesh, NavMeshCreateParams, NavMeshParams, create_nav_mesh_data};
use mmap_recast::filter::{filter_ledge_spans, filter_low_hanging_walkable_obstacles, filter_walkable_low_height_spans};
use mmap_recast::heightfield::clear_unwalkable_triangles;
use mmap_recast::region::{build_distance_field, build_regions};
use mmap_recast::{
    DT_VERTS_PER_POLYGON, Heightfield, PolyMesh, PolyMeshDetail, RC_CONTOUR_TESS_WALL_EDGES, RcConfig, RecastError,
    build_contours, build_poly_mesh, build_poly_mesh_detail, merge_poly_mesh_details, merge_poly_meshes,
    rasterize_triangles,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::TileIndex;
use crate::config::MmapConfig;
use crate::debug as debug_export;
use crate::defines::*;
use crate::mesh_data::MeshData;
use crate::persistence::{self, PersistenceError};
use crate::terrain::GeometryProvider;

// ============================================================================
// Results
// ============================================================================

/// Log prefix identifying a tile and its position in the build
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileLabel {
    pub map_id: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    pub index: u32,
}

impl fmt::Display for TileLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Map {:03}] [{:02},{:02}] #:{:04}", self.map_id, self.tile_x, self.tile_y, self.index)
    }
}

/// How a tile build ended when it did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TileOutcome {
    Written { path: PathBuf, size: usize },
    /// Provider returned nothing for the tile
    NoGeometry,
    /// Every chunk failed
    NoChunks,
    NoVertices,
    /// Nothing walkable, or a flat tile of one polygon per chunk
    NoPolygons,
}

#[derive(Debug, Error)]
pub enum TileBuildError {
    #[error("invalid verts-per-polygon value {0}")]
    InvalidVertsPerPoly(usize),

    #[error("too many vertices ({0})")]
    TooManyVertices(usize),

    #[error("no detail mesh to build tile")]
    NoDetailMesh,

    #[error("failed merging chunk meshes: {0}")]
    Recast(#[from] RecastError),

    #[error("failed building navmesh tile: {0}")]
    Detour(#[from] DetourError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

// ============================================================================
// Chunk pipeline
// ============================================================================

/// Voxelize the tile geometry inside the chunk bounds of `cfg` and build its
/// polygon and detail meshes. Intermediate fields are dropped on return.
pub fn build_chunk(cfg: &RcConfig, mesh: &MeshData, liquid_merge_threshold: i32) -> mmap_recast::Result<(PolyMesh, PolyMeshDetail)> {
    let mut solid = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch)?;

    if !mesh.solid_tris.is_empty() {
        let mut areas = vec![NAV_AREA_GROUND; mesh.solid_tris.len() / 3];
        clear_unwalkable_triangles(cfg.walkable_slope_angle, &mesh.solid_verts, &mesh.solid_tris, &mut areas);
        rasterize_triangles(&mut solid, &mesh.solid_verts, &mesh.solid_tris, &areas, cfg.walkable_climb)?;
    }

    filter_low_hanging_walkable_obstacles(&mut solid, cfg.walkable_climb);
    filter_ledge_spans(&mut solid, cfg.walkable_height, cfg.walkable_climb);
    filter_walkable_low_height_spans(&mut solid, cfg.walkable_height);

    // liquid goes in after filtering so it is never treated as a ledge
    if !mesh.liquid_tris.is_empty() {
        rasterize_triangles(&mut solid, &mesh.liquid_verts, &mesh.liquid_tris, &mesh.liquid_type, liquid_merge_threshold)?;
    }

    let mut chf = build_compact_heightfield(cfg.walkable_height, cfg.walkable_climb, &solid)?;
    drop(solid);

    erode_walkable_area(cfg.walkable_radius, &mut chf)?;
    median_filter_walkable_area(&mut chf)?;
    build_distance_field(&mut chf)?;
    build_regions(&mut chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)?;

    let cset = build_contours(&chf, cfg.max_simplification_error, cfg.max_edge_len, RC_CONTOUR_TESS_WALL_EDGES)?;
    let pmesh = build_poly_mesh(&cset, cfg.max_verts_per_poly as usize)?;
    drop(cset);

    let dmesh = build_poly_mesh_detail(&pmesh, &chf, cfg.detail_sample_dist, cfg.detail_sample_max_error)?;
    Ok((pmesh, dmesh))
}

/// Navmesh parameters of a map: the grid origin sits at the corner of the
/// highest tile so every tile of the index gets a non-negative position.
pub fn nav_mesh_params_for(index: &TileIndex) -> Option<NavMeshParams> {
    if index.is_empty() {
        return None;
    }

    let (max_x, max_y) = index
        .iter()
        .map(|&t| unpack_tile_id(t))
        .fold((0, 0), |(mx, my), (x, y)| (mx.max(x), my.max(y)));
    let (bmin, _) = get_tile_bounds(max_x, max_y, &[]);

    Some(NavMeshParams {
        orig: bmin,
        tile_width: GRID_SIZE,
        tile_height: GRID_SIZE,
        max_tiles: index.len() as i32,
        max_polys: MAX_POLYS_PER_TILE,
    })
}

// ============================================================================
// TileBuilder
// ============================================================================

pub struct TileBuilder {
    pub profile: UnitProfile,
    pub config: MmapConfig,
    pub mmaps_dir: PathBuf,
    /// Debug meshes are exported here when set
    pub debug_dir: Option<PathBuf>,
}

impl TileBuilder {
    pub fn new(profile: UnitProfile, config: MmapConfig, mmaps_dir: impl Into<PathBuf>) -> Self {
        TileBuilder { profile, config, mmaps_dir: mmaps_dir.into(), debug_dir: None }
    }

    pub fn with_debug_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.debug_dir = dir;
        self
    }

    /// Gather the tile's geometry and build it
    #[allow(clippy::too_many_arguments)]
    pub fn build_tile<P: GeometryProvider + ?Sized>(
        &self,
        provider: &P,
        map_id: u32,
        tile_x: u32,
        tile_y: u32,
        index: u32,
        off_mesh_path: Option<&Path>,
        nav_mesh: &mut NavMesh,
    ) -> Result<TileOutcome, TileBuildError> {
        let label = TileLabel { map_id, tile_x, tile_y, index };

        let mut mesh = MeshData::default();
        provider.load_terrain(map_id, tile_x, tile_y, &mut mesh);
        provider.load_collision(map_id, tile_x, tile_y, &mut mesh);

        if !mesh.has_geometry() {
            debug!("{} No geometry", label);
            return Ok(TileOutcome::NoGeometry);
        }

        mesh.clean();
        let all_verts = mesh.all_verts();
        if all_verts.is_empty() {
            debug!("{} No referenced geometry", label);
            return Ok(TileOutcome::NoGeometry);
        }

        let (bmin, bmax) = get_tile_bounds(tile_x, tile_y, &all_verts);
        provider.load_off_mesh_connections(map_id, tile_x, tile_y, off_mesh_path, &mut mesh);

        self.build_move_map_tile(&label, &mesh, &bmin, &bmax, provider.uses_liquids(), nav_mesh)
    }

    /// Run the chunk pipeline over the tile, merge and persist the result
    pub fn build_move_map_tile(
        &self,
        label: &TileLabel,
        mesh: &MeshData,
        bmin: &[f32; 3],
        bmax: &[f32; 3],
        uses_liquids: bool,
        nav_mesh: &mut NavMesh,
    ) -> Result<TileOutcome, TileBuildError> {
        info!("{} Building movemap tile...", label);

        let mut rc = self.config.to_rc_config(self.profile);
        rc.bmin = *bmin;
        rc.bmax = *bmax;

        let chunks = self.profile.chunks_per_tile();
        let ts = rc.tile_size;
        let border = rc.border_size;
        let cs = rc.cs;

        let mut poly_meshes = Vec::new();
        let mut detail_meshes = Vec::new();
        for y in 0..chunks {
            for x in 0..chunks {
                let mut chunk = rc.clone();
                chunk.bmin[0] = bmin[0] + (x * ts - border) as f32 * cs;
                chunk.bmin[2] = bmin[2] + (y * ts - border) as f32 * cs;
                chunk.bmax[0] = bmin[0] + ((x + 1) * ts + border) as f32 * cs;
                chunk.bmax[2] = bmin[2] + ((y + 1) * ts + border) as f32 * cs;

                match build_chunk(&chunk, mesh, self.config.liquid_flag_merge_threshold) {
                    Ok((pmesh, dmesh)) => {
                        poly_meshes.push(pmesh);
                        detail_meshes.push(dmesh);
                    }
                    Err(e) => warn!("{} Chunk [{},{}] failed: {}", label, x, y, e),
                }
            }
        }

        if poly_meshes.is_empty() {
            info!("{} No poly meshes to merge", label);
            return Ok(TileOutcome::NoChunks);
        }

        let pad = border as f32 * cs;
        let span = (chunks * ts + border) as f32 * cs;
        let merge_bmin = [bmin[0] - pad, bmin[1], bmin[2] - pad];
        let merge_bmax = [bmin[0] + span, bmax[1], bmin[2] + span];

        let mut pmesh = match merge_poly_meshes(&poly_meshes, merge_bmin, merge_bmax) {
            Ok(merged) => merged,
            Err(RecastError::TooManyVertices { count, .. }) => return Err(TileBuildError::TooManyVertices(count)),
            Err(e) => return Err(e.into()),
        };
        let dmesh = merge_poly_mesh_details(&detail_meshes);
        drop(poly_meshes);
        drop(detail_meshes);

        // tile-local coordinates
        let border_cells = border.max(0) as u16;
        for v in pmesh.verts.chunks_exact_mut(3) {
            v[0] = v[0].saturating_sub(border_cells);
            v[2] = v[2].saturating_sub(border_cells);
        }

        for (flag, &area) in pmesh.flags.iter_mut().zip(&pmesh.areas) {
            if area & NAV_AREA_ALL_MASK != 0 {
                *flag = area as u16;
            }
        }

        if let Some(dir) = &self.debug_dir {
            self.export_debug(dir, label, mesh, &pmesh, &dmesh, border_cells);
        }

        self.assemble_tile(label, mesh, &pmesh, &dmesh, bmin, bmax, uses_liquids, nav_mesh)
    }

    /// Validate the merged mesh, pack it and write it. The tile passes
    /// through `nav_mesh` as a format check and is removed again.
    #[allow(clippy::too_many_arguments)]
    fn assemble_tile(
        &self,
        label: &TileLabel,
        mesh: &MeshData,
        pmesh: &PolyMesh,
        dmesh: &PolyMeshDetail,
        bmin: &[f32; 3],
        bmax: &[f32; 3],
        uses_liquids: bool,
        nav_mesh: &mut NavMesh,
    ) -> Result<TileOutcome, TileBuildError> {
        let base = self.profile.base_unit_dim();
        let orig = nav_mesh.params().orig;

        let params = NavMeshCreateParams {
            verts: &pmesh.verts,
            polys: &pmesh.polys,
            poly_flags: &pmesh.flags,
            poly_areas: &pmesh.areas,
            nvp: pmesh.nvp,

            detail_meshes: &dmesh.meshes,
            detail_verts: &dmesh.verts,
            detail_tris: &dmesh.tris,

            off_mesh_con_verts: &mesh.off_mesh_connections,
            off_mesh_con_rad: &mesh.off_mesh_connection_rads,
            off_mesh_con_flags: &mesh.off_mesh_connections_flags,
            off_mesh_con_areas: &mesh.off_mesh_connections_areas,
            off_mesh_con_dir: &mesh.off_mesh_connection_dirs,
            off_mesh_con_user_id: &[],

            tile_x: (((bmin[0] + bmax[0]) / 2.0 - orig[0]) / GRID_SIZE) as i32,
            tile_y: (((bmin[2] + bmax[2]) / 2.0 - orig[2]) / GRID_SIZE) as i32,
            tile_layer: 0,
            bmin: *bmin,
            bmax: *bmax,

            walkable_height: base * self.config.walkable_height as f32,
            walkable_radius: base * self.config.walkable_radius as f32,
            walkable_climb: base * self.config.walkable_climb as f32,
            cs: pmesh.cs,
            ch: pmesh.ch,
            build_bv_tree: true,
            ..Default::default()
        };

        if params.nvp > DT_VERTS_PER_POLYGON {
            return Err(TileBuildError::InvalidVertsPerPoly(params.nvp));
        }
        if params.vert_count() >= 0xffff {
            return Err(TileBuildError::TooManyVertices(params.vert_count()));
        }
        if params.vert_count() == 0 {
            return Ok(TileOutcome::NoVertices);
        }
        let chunks = self.profile.chunks_per_tile() as usize;
        if params.poly_count() == 0 || params.poly_count() == chunks * chunks {
            info!("{} No polygons to build on tile", label);
            return Ok(TileOutcome::NoPolygons);
        }
        if params.detail_meshes.is_empty() || params.detail_verts.is_empty() || params.detail_tris.is_empty() {
            return Err(TileBuildError::NoDetailMesh);
        }

        let data = create_nav_mesh_data(&params)?;
        let tile_ref = nav_mesh.add_tile(data.clone())?;

        let written = persistence::write_tile(&self.mmaps_dir, label.map_id, label.tile_x, label.tile_y, &data, uses_liquids);
        if let Err(e) = nav_mesh.remove_tile(tile_ref) {
            warn!("{} Failed removing tile from navmesh: {}", label, e);
        }
        let (path, size) = written?;

        info!("{} Written to {} [size={}]", label, path.display(), size);
        Ok(TileOutcome::Written { path, size })
    }

    fn export_debug(&self, dir: &Path, label: &TileLabel, mesh: &MeshData, pmesh: &PolyMesh, dmesh: &PolyMeshDetail, border: u16) {
        let base = dir.join(format!("{:03}{:02}{:02}", label.map_id, label.tile_y, label.tile_x));

        // restore the padding so the dump lines up with the chunk grid
        let mut padded = pmesh.clone();
        for v in padded.verts.chunks_exact_mut(3) {
            v[0] = v[0].saturating_add(border);
            v[2] = v[2].saturating_add(border);
        }

        let results = [
            debug_export::write_obj(&base.with_extension("obj"), mesh),
            debug_export::write_poly_mesh(&base.with_extension("pmesh"), &padded),
            debug_export::write_detail_mesh(&base.with_extension("dmesh"), dmesh),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            warn!("{} Failed writing debug mesh: {}", label, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn builder(dir: &Path) -> TileBuilder {
        TileBuilder::new(UnitProfile::Normal, MmapConfig::for_profile(UnitProfile::Normal, 60.0), dir)
    }

    fn single_tile_mesh(x: u32, y: u32) -> NavMesh {
        let index = BTreeSet::from([pack_tile_id(x, y)]);
        NavMesh::init(&nav_mesh_params_for(&index).unwrap()).unwrap()
    }

    #[test]
    fn label_format() {
        let label = TileLabel { map_id: 1, tile_x: 31, tile_y: 42, index: 7 };
        assert_eq!(label.to_string(), "[Map 001] [31,42] #:0007");
    }

    #[test]
    fn map_params_use_highest_tile() {
        let index = BTreeSet::from([pack_tile_id(30, 40), pack_tile_id(33, 35), pack_tile_id(31, 41)]);
        let params = nav_mesh_params_for(&index).unwrap();
        let (bmin, _) = get_tile_bounds(33, 41, &[]);
        assert_eq!(params.orig, bmin);
        assert_eq!(params.max_tiles, 3);
        assert_eq!(params.max_polys, 1 << 20);
        assert_eq!(params.tile_width, GRID_SIZE);

        assert!(nav_mesh_params_for(&TileIndex::new()).is_none());
    }

    #[test]
    fn too_many_vertices_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path());
        let mut nav_mesh = single_tile_mesh(32, 32);

        let mut pmesh = PolyMesh { nvp: 6, cs: 0.266_666, ch: 0.266_666, ..Default::default() };
        for i in 0..0xffffu32 {
            pmesh.verts.extend_from_slice(&[(i % 2000) as u16, 0, (i / 2000) as u16]);
        }
        pmesh.polys = vec![0, 1, 2, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL];
        pmesh.areas = vec![NAV_AREA_GROUND];
        pmesh.flags = vec![NAV_AREA_GROUND as u16];
        pmesh.regs = vec![1];

        let label = TileLabel { map_id: 1, tile_x: 32, tile_y: 32, index: 1 };
        let (bmin, bmax) = get_tile_bounds(32, 32, &[0.0, 0.0, 0.0]);
        let result = tb.assemble_tile(&label, &MeshData::default(), &pmesh, &PolyMeshDetail::default(), &bmin, &bmax, false, &mut nav_mesh);

        assert!(matches!(result, Err(TileBuildError::TooManyVertices(0xffff))));
        assert!(!persistence::tile_file_name(dir.path(), 1, 32, 32).exists());
    }

    #[test]
    fn empty_mesh_is_skipped_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path());
        let mut nav_mesh = single_tile_mesh(32, 32);
        let label = TileLabel { map_id: 1, tile_x: 32, tile_y: 32, index: 1 };
        let (bmin, bmax) = get_tile_bounds(32, 32, &[0.0, 0.0, 0.0]);

        let pmesh = PolyMesh { nvp: 6, ..Default::default() };
        let result = tb.assemble_tile(&label, &MeshData::default(), &pmesh, &PolyMeshDetail::default(), &bmin, &bmax, false, &mut nav_mesh);
        assert_eq!(result.unwrap(), TileOutcome::NoVertices);

        let bad = PolyMesh { nvp: 7, ..Default::default() };
        let result = tb.assemble_tile(&label, &MeshData::default(), &bad, &PolyMeshDetail::default(), &bmin, &bmax, false, &mut nav_mesh);
        assert!(matches!(result, Err(TileBuildError::InvalidVertsPerPoly(7))));
    }

    #[test]
    fn missing_detail_mesh_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path());
        let mut nav_mesh = single_tile_mesh(32, 32);
        let label = TileLabel { map_id: 1, tile_x: 32, tile_y: 32, index: 1 };
        let (bmin, bmax) = get_tile_bounds(32, 32, &[0.0, 0.0, 0.0]);

        let pmesh = PolyMesh {
            verts: vec![0, 0, 0, 0, 0, 10, 10, 0, 10],
            polys: vec![0, 1, 2, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL, RC_NULL],
            regs: vec![1],
            flags: vec![11],
            areas: vec![11],
            nvp: 6,
            ..Default::default()
        };
        let result = tb.assemble_tile(&label, &MeshData::default(), &pmesh, &PolyMeshDetail::default(), &bmin, &bmax, false, &mut nav_mesh);
        assert!(matches!(result, Err(TileBuildError::NoDetailMesh)));
    }

    #[test]
    fn unwalkable_geometry_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path());
        let mut nav_mesh = single_tile_mesh(32, 32);
        let label = TileLabel { map_id: 1, tile_x: 32, tile_y: 32, index: 1 };

        // vertical wall only, every chunk yields an empty mesh
        let mut mesh = MeshData::default();
        mesh.add_solid(&[[-100.0, 0.0, -100.0], [-100.0, 50.0, -100.0], [-100.0, 0.0, -90.0]], &[[0, 1, 2]], false);
        let (bmin, bmax) = get_tile_bounds(32, 32, &mesh.all_verts());

        let outcome = tb.build_move_map_tile(&label, &mesh, &bmin, &bmax, false, &mut nav_mesh).unwrap();
        assert_eq!(outcome, TileOutcome::NoVertices);
        assert!(!persistence::tile_file_name(dir.path(), 1, 32, 32).exists());
    }

    #[test]
    fn failing_chunks_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path());
        let mut nav_mesh = single_tile_mesh(32, 32);
        let label = TileLabel { map_id: 1, tile_x: 32, tile_y: 32, index: 1 };

        // liquid triangle without its area makes rasterization fail in every chunk
        let mut mesh = MeshData::default();
        mesh.add_liquid(&[[-100.0, 0.0, -100.0], [-100.0, 0.0, -90.0], [-90.0, 0.0, -90.0]], &[[0, 1, 2]], NAV_AREA_WATER);
        mesh.liquid_type.clear();
        let (bmin, bmax) = get_tile_bounds(32, 32, &mesh.all_verts());

        let outcome = tb.build_move_map_tile(&label, &mesh, &bmin, &bmax, true, &mut nav_mesh).unwrap();
        assert_eq!(outcome, TileOutcome::NoChunks);
        assert!(!persistence::tile_file_name(dir.path(), 1, 32, 32).exists());
    }

    const RC_NULL: u16 = mmap_recast::RC_MESH_NULL_IDX;
}
