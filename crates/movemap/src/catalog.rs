// catalog.rs - Discovery of maps and tiles present on disk

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tracing::info;

use crate::defines::pack_tile_id;

/// Packed tile ids of one map, in ascending order
pub type TileIndex = BTreeSet<u32>;

#[derive(Clone, Debug, Default)]
pub struct TileCatalog {
    maps: BTreeMap<u32, TileIndex>,
}

impl TileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the extracted maps/ and vmaps/ directories. Unreadable
    /// directories contribute nothing.
    pub fn discover(maps_dir: &Path, vmaps_dir: &Path) -> Self {
        let mut catalog = TileCatalog::new();
        info!("Discovering maps...");

        let map_files = file_names(maps_dir);
        let vmap_files = file_names(vmaps_dir);

        // MMMYYXX.map
        for name in map_files.iter().filter(|n| n.ends_with(".map")) {
            let Some(map_id) = parse_field(name, 0..3) else {
                continue;
            };
            let index = catalog.get_or_create(map_id);
            if let (Some(y), Some(x)) = (parse_field(name, 3..5), parse_field(name, 5..7)) {
                index.insert(pack_tile_id(x, y));
            }
        }

        for name in &vmap_files {
            if name.ends_with(".vmtree") {
                // MMM.vmtree
                if let Some(map_id) = parse_field(name, 0..3) {
                    catalog.get_or_create(map_id);
                }
            } else if name.ends_with(".vmtile") {
                // MMM_XX_YY.vmtile
                let Some(map_id) = parse_field(name, 0..3) else {
                    continue;
                };
                let index = catalog.get_or_create(map_id);
                if let (Some(a), Some(b)) = (parse_field(name, 4..6), parse_field(name, 7..9)) {
                    index.insert(pack_tile_id(a, b));
                }
            }
        }

        let tile_count: usize = catalog.maps.values().map(BTreeSet::len).sum();
        info!("Found {} maps with {} tiles.", catalog.maps.len(), tile_count);
        catalog
    }

    pub fn map_ids(&self) -> Vec<u32> {
        self.maps.keys().copied().collect()
    }

    pub fn contains_map(&self, map_id: u32) -> bool {
        self.maps.contains_key(&map_id)
    }

    pub fn tiles(&self, map_id: u32) -> Option<&TileIndex> {
        self.maps.get(&map_id)
    }

    pub fn get_or_create(&mut self, map_id: u32) -> &mut TileIndex {
        self.maps.entry(map_id).or_default()
    }

    /// Register one tile. Returns false if it was already known.
    pub fn insert(&mut self, map_id: u32, tile_x: u32, tile_y: u32) -> bool {
        self.get_or_create(map_id).insert(pack_tile_id(tile_x, tile_y))
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

fn parse_field(name: &str, range: std::ops::Range<usize>) -> Option<u32> {
    let field = name.get(range)?;
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defines::unpack_tile_id;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn discovers_map_and_vmap_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let maps = dir.path().join("maps");
        let vmaps = dir.path().join("vmaps");
        fs::create_dir_all(&maps).unwrap();
        fs::create_dir_all(&vmaps).unwrap();

        // tile x=42, y=31
        touch(&maps.join("0013142.map"));
        touch(&vmaps.join("001_30_29.vmtile"));
        touch(&vmaps.join("001_42_31.vmtile"));
        touch(&vmaps.join("033.vmtree"));
        touch(&vmaps.join("garbage.vmtile"));
        touch(&maps.join("readme.txt"));

        let catalog = TileCatalog::discover(&maps, &vmaps);
        assert_eq!(catalog.map_ids(), vec![1, 33]);

        let tiles: Vec<_> = catalog.tiles(1).unwrap().iter().map(|&t| unpack_tile_id(t)).collect();
        assert_eq!(tiles, vec![(30, 29), (42, 31)]);
        assert!(catalog.tiles(33).unwrap().is_empty());
    }

    #[test]
    fn missing_directories_yield_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TileCatalog::discover(&dir.path().join("nope"), &dir.path().join("nada"));
        assert!(catalog.map_ids().is_empty());
    }

    #[test]
    fn get_or_create_registers_once() {
        let mut catalog = TileCatalog::new();
        assert!(catalog.get_or_create(5).is_empty());
        assert!(catalog.insert(5, 1, 2));
        assert!(!catalog.insert(5, 1, 2));
        assert_eq!(catalog.get_or_create(5).len(), 1);
        assert!(catalog.contains_map(5));
    }
}
