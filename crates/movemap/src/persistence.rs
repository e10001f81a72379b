// persistence.rs - .mmap parameter files and .mmtile tile files

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use mmap_recast::detour::{DT_NAVMESH_VERSION, NavMeshParams};
use thiserror::Error;

use crate::defines::{MMAP_MAGIC, MMAP_VERSION};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}: header announces {expected} bytes of tile data, found {actual}")]
    SizeMismatch { path: PathBuf, expected: usize, actual: usize },
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistenceError::Io { path: path.to_path_buf(), source }
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

// ============================================================================
// Tile header
// ============================================================================

/// Header in front of every tile blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileFileHeader {
    pub mmap_magic: u32,
    pub dt_version: u32,
    pub mmap_version: u32,
    /// Length of the tile blob that follows
    pub size: u32,
    pub uses_liquids: u32,
}

impl TileFileHeader {
    pub const SIZE: usize = 20;

    pub fn new(size: u32, uses_liquids: bool) -> Self {
        TileFileHeader {
            mmap_magic: MMAP_MAGIC,
            dt_version: DT_NAVMESH_VERSION as u32,
            mmap_version: MMAP_VERSION,
            size,
            uses_liquids: uses_liquids as u32,
        }
    }

    /// Written by this build of the generator
    pub fn is_current(&self) -> bool {
        self.mmap_magic == MMAP_MAGIC && self.dt_version == DT_NAVMESH_VERSION as u32 && self.mmap_version == MMAP_VERSION
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for v in [self.mmap_magic, self.dt_version, self.mmap_version, self.size, self.uses_liquids] {
            w.write_u32::<LittleEndian>(v)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(TileFileHeader {
            mmap_magic: r.read_u32::<LittleEndian>()?,
            dt_version: r.read_u32::<LittleEndian>()?,
            mmap_version: r.read_u32::<LittleEndian>()?,
            size: r.read_u32::<LittleEndian>()?,
            uses_liquids: r.read_u32::<LittleEndian>()?,
        })
    }
}

// ============================================================================
// File names
// ============================================================================

pub fn map_params_file_name(mmaps_dir: &Path, map_id: u32) -> PathBuf {
    mmaps_dir.join(format!("{:03}.mmap", map_id))
}

pub fn tile_file_name(mmaps_dir: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> PathBuf {
    mmaps_dir.join(format!("{:03}{:02}{:02}.mmtile", map_id, tile_y, tile_x))
}

// ============================================================================
// Reading and writing
// ============================================================================

pub fn write_map_params(mmaps_dir: &Path, map_id: u32, params: &NavMeshParams) -> PersistenceResult<PathBuf> {
    let path = map_params_file_name(mmaps_dir, map_id);
    let file = File::create(&path).map_err(|e| PersistenceError::io(&path, e))?;
    let mut w = BufWriter::new(file);
    params
        .write_to(&mut w)
        .and_then(|_| w.flush())
        .map_err(|e| PersistenceError::io(&path, e))?;
    Ok(path)
}

pub fn read_map_params(mmaps_dir: &Path, map_id: u32) -> PersistenceResult<NavMeshParams> {
    let path = map_params_file_name(mmaps_dir, map_id);
    let file = File::open(&path).map_err(|e| PersistenceError::io(&path, e))?;
    NavMeshParams::read_from(&mut BufReader::new(file)).map_err(|e| PersistenceError::io(&path, e))
}

/// Write header plus blob. Returns the file path and the bytes written.
pub fn write_tile(
    mmaps_dir: &Path,
    map_id: u32,
    tile_x: u32,
    tile_y: u32,
    data: &[u8],
    uses_liquids: bool,
) -> PersistenceResult<(PathBuf, usize)> {
    let path = tile_file_name(mmaps_dir, map_id, tile_x, tile_y);
    let header = TileFileHeader::new(data.len() as u32, uses_liquids);

    let file = File::create(&path).map_err(|e| PersistenceError::io(&path, e))?;
    let mut w = BufWriter::new(file);
    header
        .write_to(&mut w)
        .and_then(|_| w.write_all(data))
        .and_then(|_| w.flush())
        .map_err(|e| PersistenceError::io(&path, e))?;

    Ok((path, TileFileHeader::SIZE + data.len()))
}

pub fn read_tile_header(path: &Path) -> PersistenceResult<TileFileHeader> {
    let mut file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
    TileFileHeader::read_from(&mut file).map_err(|e| PersistenceError::io(path, e))
}

/// True only if the tile file exists and was written by this version.
/// Unreadable or foreign files are rebuilt.
pub fn should_skip_tile(mmaps_dir: &Path, map_id: u32, tile_x: u32, tile_y: u32) -> bool {
    read_tile_header(&tile_file_name(mmaps_dir, map_id, tile_x, tile_y))
        .map(|header| header.is_current())
        .unwrap_or(false)
}

/// Header and blob of a tile file
pub fn read_tile(path: &Path) -> PersistenceResult<(TileFileHeader, Vec<u8>)> {
    let data = fs::read(path).map_err(|e| PersistenceError::io(path, e))?;
    let header = TileFileHeader::read_from(&mut data.as_slice()).map_err(|e| PersistenceError::io(path, e))?;

    let blob = data[TileFileHeader::SIZE..].to_vec();
    if blob.len() != header.size as usize {
        return Err(PersistenceError::SizeMismatch {
            path: path.to_path_buf(),
            expected: header.size as usize,
            actual: blob.len(),
        });
    }
    Ok((header, blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_twenty_bytes() {
        let mut buf = Vec::new();
        TileFileHeader::new(1234, true).write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), TileFileHeader::SIZE);
        assert_eq!(&buf[..4], &MMAP_MAGIC.to_le_bytes());
        assert_eq!(u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]), 1);
    }

    #[test]
    fn file_names_put_y_before_x() {
        let dir = Path::new("mmaps");
        assert_eq!(tile_file_name(dir, 1, 42, 31), dir.join("0013142.mmtile"));
        assert_eq!(map_params_file_name(dir, 530), dir.join("530.mmap"));
    }

    #[test]
    fn tile_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let (path, written) = write_tile(dir.path(), 1, 3, 4, &[1, 2, 3, 4], false).unwrap();
        assert_eq!(written, 24);

        let (header, blob) = read_tile(&path).unwrap();
        assert_eq!(header, TileFileHeader::new(4, false));
        assert_eq!(blob, vec![1, 2, 3, 4]);
        assert!(should_skip_tile(dir.path(), 1, 3, 4));
    }

    #[test]
    fn truncated_blob_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_tile(dir.path(), 1, 3, 4, &[1, 2, 3, 4], false).unwrap();
        let mut data = fs::read(&path).unwrap();
        data.pop();
        fs::write(&path, data).unwrap();

        assert!(matches!(read_tile(&path), Err(PersistenceError::SizeMismatch { expected: 4, actual: 3, .. })));
    }

    #[test]
    fn map_params_are_28_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let params = NavMeshParams { orig: [1.0, 2.0, 3.0], tile_width: 4.0, tile_height: 4.0, max_tiles: 9, max_polys: 1 << 20 };
        let path = write_map_params(dir.path(), 33, &params).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), NavMeshParams::SIZE as u64);
        assert_eq!(read_map_params(dir.path(), 33).unwrap(), params);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        assert!(matches!(write_tile(&missing, 1, 0, 0, &[0], false), Err(PersistenceError::Io { .. })));
    }
}
