// terrain.rs - Geometry provider backed by extracted .map and vmap files
//
// Heightmaps come from `maps/MMMYYXX.map`, static models from
// `vmaps/MMM_XX_YY.vmtile` spawns plus their `.vmo` world models.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::defines::*;
use crate::mesh_data::MeshData;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("wrong map version {0:#010x}, please extract new .map files")]
    WrongMapVersion(u32),

    #[error("wrong vmap magic, please extract new vmaps")]
    WrongVmapMagic,

    #[error("missing {0} chunk")]
    MissingChunk(&'static str),

    #[error("model name length {0} too large")]
    NameTooLong(usize),
}

pub type TerrainResult<T> = Result<T, TerrainError>;

// ============================================================================
// GeometryProvider
// ============================================================================

/// Source of input geometry for tile builds. Vertices are in recast axis
/// order (x, height, z) and world units.
pub trait GeometryProvider: Send + Sync {
    /// Heightmap of tile (x, y) plus the edge strips of its four neighbours
    fn load_terrain(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) -> bool;

    /// Static model geometry touching tile (x, y)
    fn load_collision(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) -> bool;

    /// Every static model of a map, used to bound maps without tiles
    fn load_full_map(&self, map_id: u32, mesh: &mut MeshData) -> bool;

    /// Off-mesh links of tile (x, y) read from a connection file
    fn load_off_mesh_connections(&self, map_id: u32, tile_x: u32, tile_y: u32, path: Option<&Path>, mesh: &mut MeshData) {
        if let Some(path) = path {
            load_off_mesh_file(path, map_id, tile_x, tile_y, mesh);
        }
    }

    /// Whether liquid geometry takes part in this build
    fn uses_liquids(&self) -> bool;
}

// ============================================================================
// Spot / Grid
// ============================================================================

/// Part of a .map tile to load. Neighbour tiles only contribute the strip
/// that borders the tile being built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Spot {
    Top,
    Right,
    Left,
    Bottom,
    Entire,
}

#[derive(Clone, Copy)]
enum Grid {
    V8,
    V9,
}

// ============================================================================
// TerrainBuilder
// ============================================================================

pub struct TerrainBuilder {
    maps_dir: PathBuf,
    vmaps_dir: PathBuf,
    skip_liquid: bool,
}

impl TerrainBuilder {
    pub fn new(maps_dir: impl Into<PathBuf>, vmaps_dir: impl Into<PathBuf>, skip_liquid: bool) -> Self {
        Self {
            maps_dir: maps_dir.into(),
            vmaps_dir: vmaps_dir.into(),
            skip_liquid,
        }
    }

    fn load_map_portion(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData, portion: Spot) -> bool {
        let path = self.maps_dir.join(format!("{:03}{:02}{:02}.map", map_id, tile_y, tile_x));
        let Ok(data) = fs::read(&path) else {
            return false;
        };

        match self.read_map_portion(&data, tile_x, tile_y, mesh, portion) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("{}: {}", path.display(), e);
                false
            }
        }
    }

    fn read_map_portion(&self, data: &[u8], tile_x: u32, tile_y: u32, mesh: &mut MeshData, portion: Spot) -> TerrainResult<bool> {
        let mut r = Cursor::new(data);
        let header = MapFileHeader::read_from(&mut r)?;
        if header.version_magic != u32::from_le_bytes(*MAP_VERSION_MAGIC) {
            return Err(TerrainError::WrongMapVersion(header.version_magic));
        }

        r.seek(SeekFrom::Start(header.height_map_offset as u64))?;
        let _fourcc = r.read_u32::<LittleEndian>()?;
        let height_flags = r.read_u32::<LittleEndian>()?;
        let grid_height = r.read_f32::<LittleEndian>()?;
        let grid_max_height = r.read_f32::<LittleEndian>()?;

        let have_terrain = height_flags & MAP_HEIGHT_NO_HEIGHT == 0;
        let have_liquid = header.liquid_map_offset != 0 && !self.skip_liquid;
        if !have_terrain && !have_liquid {
            return Ok(false);
        }

        let xoffset = (tile_x as f32 - 32.0) * GRID_SIZE;
        let yoffset = (tile_y as f32 - 32.0) * GRID_SIZE;
        let (loop_start, loop_end, loop_inc) = get_loop_vars(portion);

        let mut holes = [[0u16; 16]; 16];
        let mut liquid_flags = [[0u8; 16]; 16];
        let mut ttriangles: Vec<i32> = Vec::new();
        let mut ltriangles: Vec<i32> = Vec::new();

        // ---------- Terrain ----------
        if have_terrain {
            let (v9, v8) = read_heights(&mut r, height_flags, grid_height, grid_max_height)?;

            if header.holes_size > 0 {
                r.seek(SeekFrom::Start(header.holes_offset as u64))?;
                for row in holes.iter_mut() {
                    r.read_u16_into::<LittleEndian>(row)?;
                }
            }

            let count = mesh.solid_vert_count() as i32;
            for i in 0..V9_SIZE_SQ {
                let c = get_height_coord(i, Grid::V9, xoffset, yoffset, &v9);
                mesh.solid_verts.extend_from_slice(&[c[0], c[2], c[1]]);
            }
            for i in 0..V8_SIZE_SQ {
                let c = get_height_coord(i, Grid::V8, xoffset, yoffset, &v8);
                mesh.solid_verts.extend_from_slice(&[c[0], c[2], c[1]]);
            }

            let mut i = loop_start;
            while i < loop_end {
                for spot in [Spot::Top, Spot::Right, Spot::Left, Spot::Bottom] {
                    let t = get_height_triangle(i, spot, false);
                    ttriangles.extend_from_slice(&[t[2] + count, t[1] + count, t[0] + count]);
                }
                i += loop_inc;
            }
        }

        // ---------- Liquid ----------
        if have_liquid {
            r.seek(SeekFrom::Start(header.liquid_map_offset as u64))?;
            let lheader = LiquidHeader::read_from(&mut r)?;

            if lheader.flags & MAP_LIQUID_NO_TYPE == 0 {
                // per-cell entries are not needed, only the type flags
                r.seek(SeekFrom::Current((16 * 16 * 2) as i64))?;
                for row in liquid_flags.iter_mut() {
                    r.read_exact(row)?;
                }
            } else {
                liquid_flags = [[lheader.liquid_flags; 16]; 16];
            }

            let liquid_map = if lheader.flags & MAP_LIQUID_NO_HEIGHT == 0 {
                let mut lmap = vec![0.0f32; lheader.width as usize * lheader.height as usize];
                r.read_f32_into::<LittleEndian>(&mut lmap)?;
                Some(lmap)
            } else {
                None
            };

            let count = mesh.liquid_vert_count() as i32;
            let mut j = 0usize;
            for i in 0..V9_SIZE_SQ {
                let row = i / V9_SIZE;
                let col = i % V9_SIZE;
                let dummy = [
                    -(xoffset + col as f32 * GRID_PART_SIZE),
                    -(yoffset + row as f32 * GRID_PART_SIZE),
                ];

                let Some(lmap) = &liquid_map else {
                    mesh.liquid_verts.extend_from_slice(&[dummy[0], lheader.liquid_level, dummy[1]]);
                    continue;
                };

                let (ox, oy) = (lheader.offset_x as usize, lheader.offset_y as usize);
                if row < oy || row >= oy + lheader.height as usize || col < ox || col >= ox + lheader.width as usize {
                    mesh.liquid_verts.extend_from_slice(&[dummy[0], INVALID_MAP_LIQ_HEIGHT, dummy[1]]);
                    continue;
                }

                let c = get_liquid_coord(i, j, xoffset, yoffset, lmap);
                mesh.liquid_verts.extend_from_slice(&[c[0], c[2], c[1]]);
                j += 1;
            }

            let mut i = loop_start;
            while i < loop_end {
                for spot in [Spot::Top, Spot::Bottom] {
                    let t = get_height_triangle(i, spot, true);
                    ltriangles.extend_from_slice(&[t[2] + count, t[1] + count, t[0] + count]);
                }
                i += loop_inc;
            }
        }

        if ltriangles.is_empty() && ttriangles.is_empty() {
            return Ok(false);
        }

        // ---------- Resolve terrain against liquid, per triangle pair ----------
        let solid_before = mesh.solid_tris.len();
        let liquid_before = mesh.liquid_tris.len();
        let lverts_copy = mesh.liquid_verts.clone();

        let mut lt_idx = 0usize;
        let mut tt_idx = 0usize;
        let mut i = loop_start;
        while i < loop_end {
            for _ in 0..2 {
                let mut use_terrain = !ttriangles.is_empty();
                let mut use_liquid = true;
                let mut liquid_area = NAV_AREA_EMPTY;

                if mesh.liquid_verts.is_empty() || ltriangles.is_empty() {
                    use_liquid = false;
                } else {
                    let liquid_type = get_liquid_type(i, &liquid_flags);
                    if liquid_type & MAP_LIQUID_TYPE_DEEP_WATER != 0 {
                        // deep water is swim-only, neither surface is walkable
                        use_terrain = false;
                        use_liquid = false;
                    } else if liquid_type & (MAP_LIQUID_TYPE_WATER | MAP_LIQUID_TYPE_OCEAN) != 0 {
                        liquid_area = NAV_AREA_WATER;
                    } else if liquid_type & (MAP_LIQUID_TYPE_MAGMA | MAP_LIQUID_TYPE_SLIME) != 0 {
                        liquid_area = NAV_AREA_MAGMA_SLIME;
                    } else {
                        use_liquid = false;
                    }
                }

                let ltri = ltriangles.get(lt_idx..lt_idx + 3);
                let ttri = ttriangles.get(tt_idx..tt_idx + 6);

                // Patch missing liquid heights with the average of the valid corners
                if use_liquid && let Some(ltri) = ltri {
                    let valid: Vec<f32> = ltri
                        .iter()
                        .map(|&vi| lverts_copy[vi as usize * 3 + 1])
                        .filter(|&h| h != INVALID_MAP_LIQ_HEIGHT && h < INVALID_MAP_LIQ_HEIGHT_MAX)
                        .collect();

                    if valid.is_empty() {
                        use_liquid = false;
                    } else if valid.len() < 3 {
                        let quad_height = valid.iter().sum::<f32>() / valid.len() as f32;
                        for &vi in ltri {
                            let h = &mut mesh.liquid_verts[vi as usize * 3 + 1];
                            if *h == INVALID_MAP_LIQ_HEIGHT || *h > INVALID_MAP_LIQ_HEIGHT_MAX {
                                *h = quad_height;
                            }
                        }
                    }
                }

                if use_terrain {
                    use_terrain = !is_hole(i, &holes);
                }

                // Only the higher surface stays walkable
                if use_terrain && use_liquid && let (Some(ltri), Some(ttri)) = (ltri, ttri) {
                    let max_l_level = ltri
                        .iter()
                        .map(|&vi| mesh.liquid_verts[vi as usize * 3 + 1])
                        .fold(INVALID_MAP_LIQ_HEIGHT, f32::max);
                    let min_t_level = ttri
                        .iter()
                        .map(|&vi| mesh.solid_verts[vi as usize * 3 + 1])
                        .fold(INVALID_MAP_LIQ_HEIGHT_MAX, f32::min);

                    if min_t_level > max_l_level {
                        use_liquid = false;
                    }
                }

                if use_liquid && let Some(ltri) = ltri {
                    mesh.liquid_tris.extend_from_slice(ltri);
                    mesh.liquid_type.push(liquid_area);
                }
                if use_terrain && let Some(ttri) = ttri {
                    mesh.solid_tris.extend_from_slice(ttri);
                }

                lt_idx += 3;
                tt_idx += 6;
            }
            i += loop_inc;
        }

        Ok(mesh.solid_tris.len() > solid_before || mesh.liquid_tris.len() > liquid_before)
    }

    fn load_tile_spawns(&self, map_id: u32, tile_x: u32, tile_y: u32) -> TerrainResult<Vec<ModelSpawn>> {
        let path = self.vmaps_dir.join(format!("{:03}_{:02}_{:02}.vmtile", map_id, tile_x, tile_y));
        let data = fs::read(path)?;
        let mut r = Cursor::new(data.as_slice());
        read_vmap_magic(&mut r)?;

        let count = r.read_u32::<LittleEndian>()?;
        let mut spawns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let Some(spawn) = ModelSpawn::read_from(&mut r)? else {
                break;
            };
            let _node_index = r.read_u32::<LittleEndian>()?;
            spawns.push(spawn);
        }
        Ok(spawns)
    }

    /// Spawns stored in the map tree itself (maps built from a single global model)
    fn load_global_spawns(&self, map_id: u32) -> TerrainResult<Vec<ModelSpawn>> {
        let path = self.vmaps_dir.join(format!("{:03}.vmtree", map_id));
        let data = fs::read(path)?;
        let mut r = Cursor::new(data.as_slice());
        read_vmap_magic(&mut r)?;

        let _is_tiled = r.read_u8()?;
        read_chunk(&mut r, b"NODE")?;
        skip_bih(&mut r)?;
        read_chunk(&mut r, b"GOBJ")?;

        let mut spawns = Vec::new();
        while let Some(spawn) = ModelSpawn::read_from(&mut r)? {
            let _node_index = r.read_u32::<LittleEndian>()?;
            spawns.push(spawn);
        }
        Ok(spawns)
    }

    /// Add the transformed geometry of every spawn. Returns true if any model loaded.
    fn add_spawns(&self, spawns: &[ModelSpawn], mesh: &mut MeshData) -> bool {
        let mut models: HashMap<&str, Option<WorldModel>> = HashMap::new();
        let mut loaded = false;

        for spawn in spawns {
            let model = models.entry(spawn.name.as_str()).or_insert_with(|| {
                let path = self.vmaps_dir.join(format!("{}.vmo", spawn.name));
                match fs::read(&path).map_err(TerrainError::from).and_then(|d| WorldModel::read_from(&d)) {
                    Ok(model) => Some(model),
                    Err(e) => {
                        debug!("Unable to load model {}: {}", path.display(), e);
                        None
                    }
                }
            });

            if let Some(model) = model {
                add_model_instance(spawn, model, !self.skip_liquid, mesh);
                loaded = true;
            }
        }

        loaded
    }
}

impl GeometryProvider for TerrainBuilder {
    fn load_terrain(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) -> bool {
        if !self.load_map_portion(map_id, tile_x, tile_y, mesh, Spot::Entire) {
            return false;
        }

        self.load_map_portion(map_id, tile_x + 1, tile_y, mesh, Spot::Left);
        if let Some(x) = tile_x.checked_sub(1) {
            self.load_map_portion(map_id, x, tile_y, mesh, Spot::Right);
        }
        self.load_map_portion(map_id, tile_x, tile_y + 1, mesh, Spot::Top);
        if let Some(y) = tile_y.checked_sub(1) {
            self.load_map_portion(map_id, tile_x, y, mesh, Spot::Bottom);
        }
        true
    }

    fn load_collision(&self, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) -> bool {
        match self.load_tile_spawns(map_id, tile_x, tile_y) {
            Ok(spawns) => self.add_spawns(&spawns, mesh),
            Err(TerrainError::Io(e)) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("[Map {:03}] [{:02},{:02}] Failed reading vmtile: {}", map_id, tile_x, tile_y, e);
                false
            }
        }
    }

    fn load_full_map(&self, map_id: u32, mesh: &mut MeshData) -> bool {
        let mut spawns = match self.load_global_spawns(map_id) {
            Ok(spawns) => spawns,
            Err(e) => {
                debug!("[Map {:03}] No map tree: {}", map_id, e);
                return false;
            }
        };

        // A spawn crossing tile borders is listed in every tile it touches
        let mut seen: BTreeSet<u32> = spawns.iter().map(|s| s.id).collect();
        for x in 0..TILES_PER_AXIS {
            for y in 0..TILES_PER_AXIS {
                if let Ok(tile_spawns) = self.load_tile_spawns(map_id, x, y) {
                    spawns.extend(tile_spawns.into_iter().filter(|s| seen.insert(s.id)));
                }
            }
        }

        self.add_spawns(&spawns, mesh)
    }

    fn uses_liquids(&self) -> bool {
        !self.skip_liquid
    }
}

// ============================================================================
// .map records
// ============================================================================

struct MapFileHeader {
    version_magic: u32,
    height_map_offset: u32,
    liquid_map_offset: u32,
    holes_offset: u32,
    holes_size: u32,
}

impl MapFileHeader {
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let _map_magic = r.read_u32::<LittleEndian>()?;
        let version_magic = r.read_u32::<LittleEndian>()?;
        let _area_map_offset = r.read_u32::<LittleEndian>()?;
        let _area_map_size = r.read_u32::<LittleEndian>()?;
        let height_map_offset = r.read_u32::<LittleEndian>()?;
        let _height_map_size = r.read_u32::<LittleEndian>()?;
        let liquid_map_offset = r.read_u32::<LittleEndian>()?;
        let _liquid_map_size = r.read_u32::<LittleEndian>()?;
        let holes_offset = r.read_u32::<LittleEndian>()?;
        let holes_size = r.read_u32::<LittleEndian>()?;
        Ok(MapFileHeader {
            version_magic,
            height_map_offset,
            liquid_map_offset,
            holes_offset,
            holes_size,
        })
    }
}

struct LiquidHeader {
    flags: u8,
    liquid_flags: u8,
    offset_x: u8,
    offset_y: u8,
    width: u8,
    height: u8,
    liquid_level: f32,
}

impl LiquidHeader {
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let _fourcc = r.read_u32::<LittleEndian>()?;
        let flags = r.read_u8()?;
        let liquid_flags = r.read_u8()?;
        let _liquid_type = r.read_u16::<LittleEndian>()?;
        Ok(LiquidHeader {
            flags,
            liquid_flags,
            offset_x: r.read_u8()?,
            offset_y: r.read_u8()?,
            width: r.read_u8()?,
            height: r.read_u8()?,
            liquid_level: r.read_f32::<LittleEndian>()?,
        })
    }
}

/// Decode the V9 and V8 height grids in float, uint16 or uint8 encoding
fn read_heights<R: Read>(r: &mut R, flags: u32, grid_height: f32, grid_max_height: f32) -> io::Result<(Vec<f32>, Vec<f32>)> {
    let mut v9 = vec![0.0f32; V9_SIZE_SQ];
    let mut v8 = vec![0.0f32; V8_SIZE_SQ];

    if flags & MAP_HEIGHT_AS_INT8 != 0 {
        let multiplier = (grid_max_height - grid_height) / 255.0;
        for v in v9.iter_mut().chain(v8.iter_mut()) {
            *v = r.read_u8()? as f32 * multiplier + grid_height;
        }
    } else if flags & MAP_HEIGHT_AS_INT16 != 0 {
        let multiplier = (grid_max_height - grid_height) / 65535.0;
        for v in v9.iter_mut().chain(v8.iter_mut()) {
            *v = r.read_u16::<LittleEndian>()? as f32 * multiplier + grid_height;
        }
    } else {
        r.read_f32_into::<LittleEndian>(&mut v9)?;
        r.read_f32_into::<LittleEndian>(&mut v8)?;
    }

    Ok((v9, v8))
}

// ============================================================================
// Height grid helpers
// ============================================================================

fn get_loop_vars(portion: Spot) -> (usize, usize, usize) {
    match portion {
        Spot::Entire => (0, V8_SIZE_SQ, 1),
        Spot::Top => (0, V8_SIZE, 1),
        Spot::Left => (0, V8_SIZE_SQ - V8_SIZE + 1, V8_SIZE),
        Spot::Right => (V8_SIZE - 1, V8_SIZE_SQ, V8_SIZE),
        Spot::Bottom => (V8_SIZE_SQ - V8_SIZE, V8_SIZE_SQ, 1),
    }
}

fn get_height_coord(index: usize, grid: Grid, x_offset: f32, y_offset: f32, v: &[f32]) -> [f32; 3] {
    match grid {
        Grid::V9 => [
            -(x_offset + (index % V9_SIZE) as f32 * GRID_PART_SIZE),
            -(y_offset + (index / V9_SIZE) as f32 * GRID_PART_SIZE),
            v[index],
        ],
        Grid::V8 => [
            -(x_offset + (index % V8_SIZE) as f32 * GRID_PART_SIZE + GRID_PART_SIZE / 2.0),
            -(y_offset + (index / V8_SIZE) as f32 * GRID_PART_SIZE + GRID_PART_SIZE / 2.0),
            v[index],
        ],
    }
}

fn get_liquid_coord(index: usize, index2: usize, x_offset: f32, y_offset: f32, v: &[f32]) -> [f32; 3] {
    [
        -(x_offset + (index % V9_SIZE) as f32 * GRID_PART_SIZE),
        -(y_offset + (index / V9_SIZE) as f32 * GRID_PART_SIZE),
        v[index2],
    ]
}

/// Vertex indices of one triangle of V8 square `square`. Terrain squares
/// are fanned around their V8 center, liquid squares split in two.
fn get_height_triangle(square: usize, triangle: Spot, liquid: bool) -> [i32; 3] {
    let row_offset = (square / V8_SIZE) as i32;
    let sq = square as i32;
    let v9 = V9_SIZE as i32;
    let center = V9_SIZE_SQ as i32 + sq;

    if !liquid {
        match triangle {
            Spot::Top => [sq + row_offset, sq + 1 + row_offset, center],
            Spot::Left => [sq + row_offset, center, sq + v9 + row_offset],
            Spot::Right => [sq + 1 + row_offset, sq + v9 + 1 + row_offset, center],
            Spot::Bottom => [center, sq + v9 + 1 + row_offset, sq + v9 + row_offset],
            Spot::Entire => [0, 0, 0],
        }
    } else {
        match triangle {
            Spot::Top => [sq + row_offset, sq + 1 + row_offset, sq + v9 + 1 + row_offset],
            Spot::Bottom => [sq + row_offset, sq + v9 + 1 + row_offset, sq + v9 + row_offset],
            _ => [0, 0, 0],
        }
    }
}

fn is_hole(square: usize, holes: &[[u16; 16]; 16]) -> bool {
    let row = square / V8_SIZE;
    let col = square % V8_SIZE;
    let cell_row = row / 8;
    let cell_col = col / 8;
    let hole_row = row % 8 / 2;
    let hole_col = col % 8 / 2;

    let hole = holes[cell_row][cell_col];
    hole & HOLETAB_H[hole_col] & HOLETAB_V[hole_row] != 0
}

fn get_liquid_type(square: usize, liquid_flags: &[[u8; 16]; 16]) -> u8 {
    let row = square / V8_SIZE;
    let col = square % V8_SIZE;
    liquid_flags[row / 8][col / 8]
}

// ============================================================================
// vmap records
// ============================================================================

struct ModelSpawn {
    flags: u32,
    id: u32,
    pos: [f32; 3],
    rot: [f32; 3],
    scale: f32,
    name: String,
}

impl ModelSpawn {
    /// Returns None at a clean end of input
    fn read_from<R: Read>(r: &mut R) -> TerrainResult<Option<Self>> {
        let flags = match r.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let _adt_id = r.read_u16::<LittleEndian>()?;
        let id = r.read_u32::<LittleEndian>()?;
        let pos = read_vec3(r)?;
        let rot = read_vec3(r)?;
        let scale = r.read_f32::<LittleEndian>()?;
        if flags & MOD_HAS_BOUND != 0 {
            let _bound_min = read_vec3(r)?;
            let _bound_max = read_vec3(r)?;
        }

        let name_len = r.read_u32::<LittleEndian>()? as usize;
        if name_len > 500 {
            return Err(TerrainError::NameTooLong(name_len));
        }
        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name)?;

        Ok(Some(ModelSpawn {
            flags,
            id,
            pos,
            rot,
            scale,
            name: String::from_utf8_lossy(&name).trim_end_matches('\0').to_string(),
        }))
    }

    fn is_m2(&self) -> bool {
        self.flags & MOD_M2 != 0 || self.name.contains(".m2") || self.name.contains(".M2")
    }
}

struct WmoLiquid {
    tiles_x: u32,
    tiles_y: u32,
    corner: [f32; 3],
    liquid_type: u32,
    heights: Vec<f32>,
    flags: Vec<u8>,
}

struct GroupModel {
    vertices: Vec<[f32; 3]>,
    triangles: Vec<[u32; 3]>,
    liquid: Option<WmoLiquid>,
}

struct WorldModel {
    groups: Vec<GroupModel>,
}

impl WorldModel {
    fn read_from(data: &[u8]) -> TerrainResult<Self> {
        let mut r = Cursor::new(data);
        read_vmap_magic(&mut r)?;
        read_chunk(&mut r, b"WMOD")?;
        let _chunk_size = r.read_u32::<LittleEndian>()?;
        let _root_wmo_id = r.read_u32::<LittleEndian>()?;

        // models without groups end here
        let mut groups = Vec::new();
        if r.position() as usize >= data.len() {
            return Ok(WorldModel { groups });
        }

        read_chunk(&mut r, b"GMOD")?;
        let count = r.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            groups.push(GroupModel::read_from(&mut r)?);
        }
        Ok(WorldModel { groups })
    }
}

impl GroupModel {
    fn read_from<R: Read + Seek>(r: &mut R) -> TerrainResult<Self> {
        let _bound_min = read_vec3(r)?;
        let _bound_max = read_vec3(r)?;
        let _mogp_flags = r.read_u32::<LittleEndian>()?;
        let _group_wmo_id = r.read_u32::<LittleEndian>()?;

        read_chunk(r, b"VERT")?;
        let _chunk_size = r.read_u32::<LittleEndian>()?;
        let nverts = r.read_u32::<LittleEndian>()?;
        if nverts == 0 {
            return Ok(GroupModel { vertices: Vec::new(), triangles: Vec::new(), liquid: None });
        }
        let vertices = (0..nverts).map(|_| read_vec3(r)).collect::<io::Result<Vec<_>>>()?;

        read_chunk(r, b"TRIM")?;
        let _chunk_size = r.read_u32::<LittleEndian>()?;
        let ntris = r.read_u32::<LittleEndian>()?;
        let mut triangles = Vec::with_capacity(ntris as usize);
        for _ in 0..ntris {
            let mut t = [0u32; 3];
            r.read_u32_into::<LittleEndian>(&mut t)?;
            triangles.push(t);
        }

        read_chunk(r, b"MBIH")?;
        skip_bih(r)?;

        read_chunk(r, b"LIQU")?;
        let liquid_size = r.read_u32::<LittleEndian>()?;
        let liquid = if liquid_size > 0 {
            let tiles_x = r.read_u32::<LittleEndian>()?;
            let tiles_y = r.read_u32::<LittleEndian>()?;
            let corner = read_vec3(r)?;
            let liquid_type = r.read_u32::<LittleEndian>()?;
            let mut heights = vec![0.0f32; ((tiles_x + 1) * (tiles_y + 1)) as usize];
            r.read_f32_into::<LittleEndian>(&mut heights)?;
            let mut flags = vec![0u8; (tiles_x * tiles_y) as usize];
            r.read_exact(&mut flags)?;
            Some(WmoLiquid { tiles_x, tiles_y, corner, liquid_type, heights, flags })
        } else {
            None
        };

        Ok(GroupModel { vertices, triangles, liquid })
    }
}

fn read_vec3<R: Read>(r: &mut R) -> io::Result<[f32; 3]> {
    let mut v = [0.0f32; 3];
    r.read_f32_into::<LittleEndian>(&mut v)?;
    Ok(v)
}

fn read_vmap_magic<R: Read>(r: &mut R) -> TerrainResult<()> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != VMAP_MAGIC {
        return Err(TerrainError::WrongVmapMagic);
    }
    Ok(())
}

fn read_chunk<R: Read>(r: &mut R, expected: &'static [u8; 4]) -> TerrainResult<()> {
    let mut chunk = [0u8; 4];
    r.read_exact(&mut chunk)?;
    if &chunk != expected {
        return Err(TerrainError::MissingChunk(std::str::from_utf8(expected).unwrap_or("????")));
    }
    Ok(())
}

/// Skip a serialized bounding interval hierarchy
fn skip_bih<R: Read + Seek>(r: &mut R) -> io::Result<()> {
    r.seek(SeekFrom::Current(6 * 4))?;
    let tree_size = r.read_u32::<LittleEndian>()?;
    r.seek(SeekFrom::Current(tree_size as i64 * 4))?;
    let object_count = r.read_u32::<LittleEndian>()?;
    r.seek(SeekFrom::Current(object_count as i64 * 4))?;
    Ok(())
}

// ============================================================================
// Model placement
// ============================================================================

fn add_model_instance(spawn: &ModelSpawn, model: &WorldModel, with_liquid: bool, mesh: &mut MeshData) {
    let rotation = matrix3_from_euler_xyz(
        std::f32::consts::PI * spawn.rot[2] / -180.0,
        std::f32::consts::PI * spawn.rot[0] / -180.0,
        std::f32::consts::PI * spawn.rot[1] / -180.0,
    );
    let mut position = spawn.pos;
    position[0] -= 32.0 * GRID_SIZE;
    position[1] -= 32.0 * GRID_SIZE;

    let place = |v: &[f32; 3]| to_recast(transform(v, &rotation, spawn.scale, &position));

    for group in &model.groups {
        let verts: Vec<[f32; 3]> = group.vertices.iter().map(place).collect();
        mesh.add_solid(&verts, &group.triangles, spawn.is_m2());

        let Some(liquid) = group.liquid.as_ref().filter(|_| with_liquid) else {
            continue;
        };

        let area = match liquid.liquid_type & 3 {
            0 | 1 => NAV_AREA_WATER,
            _ => NAV_AREA_MAGMA_SLIME,
        };

        let verts_x = liquid.tiles_x + 1;
        let verts_y = liquid.tiles_y + 1;
        let mut liq_verts = Vec::with_capacity((verts_x * verts_y) as usize);
        for x in 0..verts_x {
            for y in 0..verts_y {
                let v = [
                    liquid.corner[0] + x as f32 * GRID_PART_SIZE,
                    liquid.corner[1] + y as f32 * GRID_PART_SIZE,
                    liquid.heights.get((y * verts_x + x) as usize).copied().unwrap_or(INVALID_MAP_LIQ_HEIGHT),
                ];
                liq_verts.push(place(&v));
            }
        }

        let mut liq_tris = Vec::new();
        for x in 0..liquid.tiles_x {
            for y in 0..liquid.tiles_y {
                let flag = liquid.flags.get((x + y * liquid.tiles_x) as usize).copied().unwrap_or(0x0f);
                if flag & 0x0f == 0x0f {
                    continue;
                }
                let square = (x * liquid.tiles_y + y) as i32;
                let x = x as i32;
                let ty = liquid.tiles_y as i32;
                let idx1 = square + x;
                let idx2 = square + 1 + x;
                let idx3 = square + ty + 2 + x;
                let idx4 = square + ty + 1 + x;
                liq_tris.push([idx2, idx1, idx3]);
                liq_tris.push([idx3, idx1, idx4]);
            }
        }

        mesh.add_liquid(&liq_verts, &liq_tris, area);
    }
}

/// Row vector times matrix, then scale and offset, then mirror x and y
fn transform(v: &[f32; 3], m: &[[f32; 3]; 3], scale: f32, position: &[f32; 3]) -> [f32; 3] {
    let mut out = [0.0f32; 3];
    for (i, o) in out.iter_mut().enumerate() {
        *o = (v[0] * m[0][i] + v[1] * m[1][i] + v[2] * m[2][i]) * scale + position[i];
    }
    out[0] *= -1.0;
    out[1] *= -1.0;
    out
}

/// World (x, y, z) with z up to recast (y, z, x) with y up
fn to_recast(v: [f32; 3]) -> [f32; 3] {
    [v[1], v[2], v[0]]
}

fn matrix3_from_euler_xyz(x: f32, y: f32, z: f32) -> [[f32; 3]; 3] {
    let (sx, cx) = x.sin_cos();
    let (sy, cy) = y.sin_cos();
    let (sz, cz) = z.sin_cos();

    [
        [cy * cz, -cy * sz, sy],
        [cz * sx * sy + cx * sz, cx * cz - sx * sy * sz, -cy * sx],
        [-cx * cz * sy + sx * sz, cz * sx + cx * sy * sz, cx * cy],
    ]
}

// ============================================================================
// Off-mesh connections
// ============================================================================

/// One line of the off-mesh connection file:
/// `mapID tileX,tileY (x y z) (x y z) size`
#[derive(Clone, Debug, PartialEq)]
pub struct OffMeshEntry {
    pub map_id: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    pub from: [f32; 3],
    pub to: [f32; 3],
    pub size: f32,
}

pub fn parse_off_mesh_line(line: &str) -> Option<OffMeshEntry> {
    let clean = line.replace(['(', ')'], " ");
    let mut parts = clean.split_whitespace();

    let map_id = parts.next()?.parse().ok()?;
    let (tx, ty) = parts.next()?.split_once(',')?;
    let tile_x = tx.trim().parse().ok()?;
    let tile_y = ty.trim().parse().ok()?;

    let mut nums = [0.0f32; 7];
    for n in nums.iter_mut() {
        *n = parts.next()?.parse().ok()?;
    }

    Some(OffMeshEntry {
        map_id,
        tile_x,
        tile_y,
        from: [nums[0], nums[1], nums[2]],
        to: [nums[3], nums[4], nums[5]],
        size: nums[6],
    })
}

/// Append the connections of tile (x, y) found in `path`
pub fn load_off_mesh_file(path: &Path, map_id: u32, tile_x: u32, tile_y: u32, mesh: &mut MeshData) {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => {
            debug!("Off-mesh input file {} not found", path.display());
            return;
        }
    };

    for line in BufReader::new(file).lines().map_while(Result::ok) {
        let Some(entry) = parse_off_mesh_line(&line) else {
            continue;
        };
        if entry.map_id != map_id || entry.tile_x != tile_x || entry.tile_y != tile_y {
            continue;
        }

        // (y, z, x) for recast
        let [fx, fy, fz] = entry.from;
        let [tx, ty, tz] = entry.to;
        mesh.off_mesh_connections.extend_from_slice(&[fy, fz, fx, ty, tz, tx]);
        mesh.off_mesh_connection_dirs.push(1);
        mesh.off_mesh_connection_rads.push(entry.size);
        mesh.off_mesh_connections_areas.push(0xFF);
        mesh.off_mesh_connections_flags.push(0xFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    const HEADER_SIZE: u32 = 40;
    const HEIGHT_HEADER_SIZE: u32 = 16;

    struct TestLiquid {
        flags: u8,
        type_flags: u8,
        level: f32,
    }

    /// Flat float heightmap, optionally with global liquid and holes
    fn write_map(path: &Path, height: f32, liquid: Option<TestLiquid>, holes: Option<[[u16; 16]; 16]>) {
        let height_size = HEIGHT_HEADER_SIZE + ((V9_SIZE_SQ + V8_SIZE_SQ) * 4) as u32;
        let liquid_offset = HEADER_SIZE + height_size;
        let liquid_size = if liquid.is_some() { 16 } else { 0 };
        let holes_offset = liquid_offset + liquid_size;

        let mut out = Vec::new();
        out.write_all(b"MAPS").unwrap();
        out.write_all(MAP_VERSION_MAGIC).unwrap();
        for v in [0, 0, HEADER_SIZE, height_size] {
            out.write_u32::<LittleEndian>(v).unwrap();
        }
        out.write_u32::<LittleEndian>(if liquid.is_some() { liquid_offset } else { 0 }).unwrap();
        out.write_u32::<LittleEndian>(liquid_size).unwrap();
        out.write_u32::<LittleEndian>(if holes.is_some() { holes_offset } else { 0 }).unwrap();
        out.write_u32::<LittleEndian>(if holes.is_some() { 512 } else { 0 }).unwrap();

        out.write_all(b"MHGT").unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_f32::<LittleEndian>(height).unwrap();
        out.write_f32::<LittleEndian>(height).unwrap();
        for _ in 0..V9_SIZE_SQ + V8_SIZE_SQ {
            out.write_f32::<LittleEndian>(height).unwrap();
        }

        if let Some(liquid) = liquid {
            out.write_all(b"MLIQ").unwrap();
            out.write_u8(liquid.flags).unwrap();
            out.write_u8(liquid.type_flags).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_all(&[0, 0, 128, 128]).unwrap();
            out.write_f32::<LittleEndian>(liquid.level).unwrap();
        }

        if let Some(holes) = holes {
            for row in holes {
                for h in row {
                    out.write_u16::<LittleEndian>(h).unwrap();
                }
            }
        }

        fs::write(path, out).unwrap();
    }

    fn write_bih(out: &mut Vec<u8>) {
        for _ in 0..6 {
            out.write_f32::<LittleEndian>(0.0).unwrap();
        }
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
    }

    /// World model with one group holding a single triangle
    fn write_model(path: &Path) {
        let mut out = Vec::new();
        out.write_all(VMAP_MAGIC).unwrap();
        out.write_all(b"WMOD").unwrap();
        out.write_u32::<LittleEndian>(8).unwrap();
        out.write_u32::<LittleEndian>(7).unwrap();
        out.write_all(b"GMOD").unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();

        // group bounds, mogp flags, group wmo id
        for _ in 0..6 {
            out.write_f32::<LittleEndian>(0.0).unwrap();
        }
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_all(b"VERT").unwrap();
        out.write_u32::<LittleEndian>(4 + 36).unwrap();
        out.write_u32::<LittleEndian>(3).unwrap();
        for v in [1.0, 2.0, 3.0, 4.0, 2.0, 3.0, 1.0, 5.0, 3.0f32] {
            out.write_f32::<LittleEndian>(v).unwrap();
        }
        out.write_all(b"TRIM").unwrap();
        out.write_u32::<LittleEndian>(4 + 12).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();
        for i in [0u32, 1, 2] {
            out.write_u32::<LittleEndian>(i).unwrap();
        }
        out.write_all(b"MBIH").unwrap();
        write_bih(&mut out);
        out.write_all(b"LIQU").unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_all(b"GBIH").unwrap();
        write_bih(&mut out);

        fs::write(path, out).unwrap();
    }

    fn write_tile_spawns(path: &Path, name: &str, flags: u32) {
        let mut out = Vec::new();
        out.write_all(VMAP_MAGIC).unwrap();
        out.write_u32::<LittleEndian>(1).unwrap();
        out.write_u32::<LittleEndian>(flags).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(42).unwrap();
        for v in [32.0 * GRID_SIZE, 32.0 * GRID_SIZE, 0.0, 0.0, 0.0, 0.0, 1.0] {
            out.write_f32::<LittleEndian>(v).unwrap();
        }
        out.write_u32::<LittleEndian>(name.len() as u32).unwrap();
        out.write_all(name.as_bytes()).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        fs::write(path, out).unwrap();
    }

    fn builder(dir: &Path, skip_liquid: bool) -> TerrainBuilder {
        fs::create_dir_all(dir.join("maps")).unwrap();
        fs::create_dir_all(dir.join("vmaps")).unwrap();
        TerrainBuilder::new(dir.join("maps"), dir.join("vmaps"), skip_liquid)
    }

    #[test]
    fn loads_flat_heightmap() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        write_map(&dir.path().join("maps/0013232.map"), 5.0, None, None);

        let mut mesh = MeshData::default();
        assert!(tb.load_terrain(1, 32, 32, &mut mesh));
        assert_eq!(mesh.solid_tris.len(), V8_SIZE_SQ * 4 * 3);
        assert_eq!(mesh.solid_vert_count(), V9_SIZE_SQ + V8_SIZE_SQ);
        assert!(mesh.liquid_tris.is_empty());

        for v in mesh.solid_verts.chunks_exact(3) {
            assert_eq!(v[1], 5.0);
            assert!(v[0] <= 0.0 && v[0] >= -GRID_SIZE - 0.01);
            assert!(v[2] <= 0.0 && v[2] >= -GRID_SIZE - 0.01);
        }
    }

    #[test]
    fn neighbour_contributes_edge_strip() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        write_map(&dir.path().join("maps/0013232.map"), 5.0, None, None);
        write_map(&dir.path().join("maps/0013233.map"), 5.0, None, None);

        let mut mesh = MeshData::default();
        assert!(tb.load_terrain(1, 32, 32, &mut mesh));
        // one column of V8 squares from the +x neighbour
        assert_eq!(mesh.solid_tris.len(), (V8_SIZE_SQ + V8_SIZE) * 4 * 3);
    }

    #[test]
    fn holes_remove_terrain() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        let mut holes = [[0u16; 16]; 16];
        holes[0][0] = 0xFFFF;
        write_map(&dir.path().join("maps/0013232.map"), 5.0, None, Some(holes));

        let mut mesh = MeshData::default();
        assert!(tb.load_terrain(1, 32, 32, &mut mesh));
        assert_eq!(mesh.solid_tris.len(), (V8_SIZE_SQ - 64) * 4 * 3);
    }

    #[test]
    fn higher_liquid_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        let liquid = TestLiquid { flags: MAP_LIQUID_NO_TYPE | MAP_LIQUID_NO_HEIGHT, type_flags: MAP_LIQUID_TYPE_WATER, level: 10.0 };
        write_map(&dir.path().join("maps/0013232.map"), 5.0, Some(liquid), None);

        let mut mesh = MeshData::default();
        assert!(tb.load_terrain(1, 32, 32, &mut mesh));
        assert_eq!(mesh.liquid_tris.len(), V8_SIZE_SQ * 2 * 3);
        assert!(mesh.liquid_type.iter().all(|&t| t == NAV_AREA_WATER));
        assert_eq!(mesh.solid_tris.len(), V8_SIZE_SQ * 4 * 3);
    }

    #[test]
    fn liquid_below_terrain_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        let liquid = TestLiquid { flags: MAP_LIQUID_NO_TYPE | MAP_LIQUID_NO_HEIGHT, type_flags: MAP_LIQUID_TYPE_MAGMA, level: 2.0 };
        write_map(&dir.path().join("maps/0013232.map"), 5.0, Some(liquid), None);

        let mut mesh = MeshData::default();
        assert!(tb.load_terrain(1, 32, 32, &mut mesh));
        assert!(mesh.liquid_tris.is_empty());
        assert_eq!(mesh.solid_tris.len(), V8_SIZE_SQ * 4 * 3);
    }

    #[test]
    fn deep_water_removes_both_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        let liquid = TestLiquid {
            flags: MAP_LIQUID_NO_TYPE | MAP_LIQUID_NO_HEIGHT,
            type_flags: MAP_LIQUID_TYPE_WATER | MAP_LIQUID_TYPE_DEEP_WATER,
            level: 10.0,
        };
        write_map(&dir.path().join("maps/0013232.map"), 5.0, Some(liquid), None);

        let mut mesh = MeshData::default();
        assert!(!tb.load_terrain(1, 32, 32, &mut mesh));
        assert!(mesh.solid_tris.is_empty());
        assert!(mesh.liquid_tris.is_empty());
    }

    #[test]
    fn skip_liquid_ignores_liquid() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), true);
        let liquid = TestLiquid { flags: MAP_LIQUID_NO_TYPE | MAP_LIQUID_NO_HEIGHT, type_flags: MAP_LIQUID_TYPE_WATER, level: 10.0 };
        write_map(&dir.path().join("maps/0013232.map"), 5.0, Some(liquid), None);

        let mut mesh = MeshData::default();
        assert!(tb.load_terrain(1, 32, 32, &mut mesh));
        assert!(mesh.liquid_verts.is_empty());
        assert!(!tb.uses_liquids());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        let path = dir.path().join("maps/0013232.map");
        write_map(&path, 5.0, None, None);
        let mut data = fs::read(&path).unwrap();
        data[4..8].copy_from_slice(b"s1.3");
        fs::write(&path, data).unwrap();

        let mut mesh = MeshData::default();
        assert!(!tb.load_terrain(1, 32, 32, &mut mesh));
        assert!(!mesh.has_geometry());
    }

    #[test]
    fn loads_model_spawns_of_tile() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        write_model(&dir.path().join("vmaps/box.wmo.vmo"));
        write_tile_spawns(&dir.path().join("vmaps/001_30_31.vmtile"), "box.wmo", 0);

        let mut mesh = MeshData::default();
        assert!(tb.load_collision(1, 30, 31, &mut mesh));
        // identity placement: mirror x and y, then reorder to (y, z, x)
        assert_eq!(&mesh.solid_verts[..3], &[-2.0, 3.0, -1.0]);
        assert_eq!(mesh.solid_tris, vec![0, 1, 2]);

        assert!(!tb.load_collision(1, 31, 30, &mut mesh));
    }

    #[test]
    fn m2_models_flip_winding() {
        let dir = tempfile::tempdir().unwrap();
        let tb = builder(dir.path(), false);
        write_model(&dir.path().join("vmaps/tree.m2.vmo"));
        write_tile_spawns(&dir.path().join("vmaps/001_30_31.vmtile"), "tree.m2", MOD_M2);

        let mut mesh = MeshData::default();
        assert!(tb.load_collision(1, 30, 31, &mut mesh));
        assert_eq!(mesh.solid_tris, vec![2, 1, 0]);
    }

    #[test]
    fn parses_off_mesh_lines() {
        let entry = parse_off_mesh_line("530 31,42 (1.5 2 3) (4 5 6) 2.5").unwrap();
        assert_eq!(entry.map_id, 530);
        assert_eq!((entry.tile_x, entry.tile_y), (31, 42));
        assert_eq!(entry.from, [1.5, 2.0, 3.0]);
        assert_eq!(entry.to, [4.0, 5.0, 6.0]);
        assert_eq!(entry.size, 2.5);

        assert!(parse_off_mesh_line("// comment").is_none());
        assert!(parse_off_mesh_line("530 31 (1 2 3) (4 5 6) 2").is_none());
        assert!(parse_off_mesh_line("530 31,42 (1 2 3) (4 5").is_none());
    }

    #[test]
    fn off_mesh_file_filters_by_tile_and_swaps_axes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offmesh.txt");
        fs::write(&path, "1 31,42 (1 2 3) (4 5 6) 2.5\n1 30,42 (7 8 9) (1 1 1) 1\nbad line\n").unwrap();

        let mut mesh = MeshData::default();
        load_off_mesh_file(&path, 1, 31, 42, &mut mesh);
        assert_eq!(mesh.off_mesh_count(), 1);
        assert_eq!(mesh.off_mesh_connections, vec![2.0, 3.0, 1.0, 5.0, 6.0, 4.0]);
        assert_eq!(mesh.off_mesh_connection_dirs, vec![1]);
        assert_eq!(mesh.off_mesh_connections_areas, vec![0xFF]);
        assert_eq!(mesh.off_mesh_connections_flags, vec![0xFF]);
    }
}
