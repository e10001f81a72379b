// config.rs - Build tuning, per-map overrides and tool settings

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use mmap_recast::{DT_VERTS_PER_POLYGON, RcConfig};
use mmap_shared::config::Config;
use serde::Deserialize;

use crate::defines::UnitProfile;

/// Environment prefix of tool settings, e.g. `MoveMapGen_Threads=4`
pub const ENV_PREFIX: &str = "MoveMapGen_";

// ============================================================================
// MmapConfig
// ============================================================================

/// Recast tuning of one map, in voxel units unless noted
#[derive(Clone, Debug, PartialEq)]
pub struct MmapConfig {
    pub border_size: i32,
    /// Degrees
    pub walkable_slope_angle: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub walkable_radius: i32,
    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    /// Side of the square area, squared when handed to recast
    pub min_region_area: i32,
    pub merge_region_area: i32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
    /// Span merge threshold used when rasterizing liquid
    pub liquid_flag_merge_threshold: i32,
}

impl MmapConfig {
    pub fn for_profile(profile: UnitProfile, max_walkable_angle: f32) -> Self {
        let base = profile.base_unit_dim();
        let walkable_radius = profile.walkable_radius();

        MmapConfig {
            border_size: walkable_radius + 3,
            walkable_slope_angle: max_walkable_angle,
            walkable_height: profile.walkable_height(),
            walkable_climb: profile.walkable_climb(),
            walkable_radius,
            max_edge_len: profile.vertex_per_chunk() + 1,
            max_simplification_error: 2.0,
            min_region_area: 60,
            merge_region_area: 50,
            detail_sample_dist: base * 64.0,
            detail_sample_max_error: base * 2.0,
            liquid_flag_merge_threshold: 0,
        }
    }

    /// Chunk-level recast parameters. Bounds are filled in per chunk.
    pub fn to_rc_config(&self, profile: UnitProfile) -> RcConfig {
        let tile_size = profile.vertex_per_chunk();
        RcConfig {
            width: tile_size + self.border_size * 2,
            height: tile_size + self.border_size * 2,
            tile_size,
            border_size: self.border_size,
            cs: profile.base_unit_dim(),
            ch: profile.base_unit_dim(),
            walkable_slope_angle: self.walkable_slope_angle,
            walkable_height: self.walkable_height,
            walkable_climb: self.walkable_climb,
            walkable_radius: self.walkable_radius,
            max_edge_len: self.max_edge_len,
            max_simplification_error: self.max_simplification_error,
            min_region_area: self.min_region_area * self.min_region_area,
            merge_region_area: self.merge_region_area * self.merge_region_area,
            max_verts_per_poly: DT_VERTS_PER_POLYGON as i32,
            detail_sample_dist: self.detail_sample_dist,
            detail_sample_max_error: self.detail_sample_max_error,
            ..Default::default()
        }
    }
}

/// Per-map entry of the tuning JSON. Missing keys keep the profile default.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MmapConfigOverride {
    pub border_size: Option<i32>,
    pub walkable_slope_angle: Option<f32>,
    pub walkable_height: Option<i32>,
    pub walkable_climb: Option<i32>,
    pub walkable_radius: Option<i32>,
    pub max_edge_len: Option<i32>,
    pub max_simplification_error: Option<f32>,
    pub min_region_area: Option<i32>,
    pub merge_region_area: Option<i32>,
    pub detail_sample_dist: Option<f32>,
    pub detail_sample_max_error: Option<f32>,
    pub liquid_flag_merge_threshold: Option<i32>,
}

impl MmapConfigOverride {
    pub fn apply(&self, config: &mut MmapConfig) {
        macro_rules! take {
            ($src:ident, $dst:ident; $($field:ident),*) => {
                $(if let Some(v) = $src.$field { $dst.$field = v; })*
            };
        }
        let overrides = self;
        take!(
            overrides, config;
            border_size,
            walkable_slope_angle,
            walkable_height,
            walkable_climb,
            walkable_radius,
            max_edge_len,
            max_simplification_error,
            min_region_area,
            merge_region_area,
            detail_sample_dist,
            detail_sample_max_error,
            liquid_flag_merge_threshold
        );
    }
}

/// Tuning overrides keyed by map id
#[derive(Clone, Debug, Default)]
pub struct MapConfigs(HashMap<u32, MmapConfigOverride>);

impl MapConfigs {
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let raw: HashMap<String, MmapConfigOverride> =
            serde_json::from_str(content).context("invalid map config JSON")?;

        let mut maps = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let map_id = key
                .trim()
                .parse::<u32>()
                .with_context(|| format!("map config key '{}' is not a map id", key))?;
            maps.insert(map_id, value);
        }
        Ok(MapConfigs(maps))
    }

    /// A missing file is not an error, there are simply no overrides
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(MapConfigs::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn config_for(&self, map_id: u32, profile: UnitProfile, max_walkable_angle: f32) -> MmapConfig {
        let mut config = MmapConfig::for_profile(profile, max_walkable_angle);
        if let Some(o) = self.0.get(&map_id) {
            o.apply(&mut config);
        }
        config
    }
}

// ============================================================================
// Skip lists
// ============================================================================

/// Which map groups a build leaves out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipFlags {
    pub continents: bool,
    pub junk_maps: bool,
    pub battlegrounds: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkipLists {
    pub continents: BTreeSet<u32>,
    pub junk: BTreeSet<u32>,
    /// Skipped together with junk maps
    pub transports: BTreeSet<u32>,
    pub battlegrounds: BTreeSet<u32>,
}

impl Default for SkipLists {
    fn default() -> Self {
        SkipLists {
            continents: BTreeSet::from([0, 1, 530, 571]),
            junk: BTreeSet::from([13, 25, 29, 42, 169, 451, 573, 597, 605, 606]),
            transports: [582, 584]
                .into_iter()
                .chain(586..=594)
                .chain([596, 610, 612, 613, 614])
                .chain(620..=623)
                .chain([641, 642, 647, 672, 673, 712, 713, 718])
                .collect(),
            battlegrounds: BTreeSet::from([30, 37, 489, 529, 566, 607, 628]),
        }
    }
}

impl SkipLists {
    /// Defaults with any `Skip*Ids` list from the settings replacing its group
    pub fn from_config(config: &Config) -> Self {
        let mut lists = SkipLists::default();
        let replace = |key: &str, set: &mut BTreeSet<u32>| {
            if let Some(ids) = config.get_list::<u32>(key) {
                *set = ids.into_iter().collect();
            }
        };
        replace("SkipContinentIds", &mut lists.continents);
        replace("SkipJunkIds", &mut lists.junk);
        replace("SkipTransportIds", &mut lists.transports);
        replace("SkipBattlegroundIds", &mut lists.battlegrounds);
        lists
    }

    pub fn should_skip_map(&self, map_id: u32, flags: SkipFlags) -> bool {
        (flags.continents && self.continents.contains(&map_id))
            || (flags.junk_maps && (self.junk.contains(&map_id) || self.transports.contains(&map_id)))
            || (flags.battlegrounds && self.battlegrounds.contains(&map_id))
    }
}

// ============================================================================
// Tool settings
// ============================================================================

/// Values read from the settings file. Unset keys stay None so command
/// line flags and built-in defaults can fill them.
#[derive(Clone, Debug, Default)]
pub struct ToolSettings {
    pub maps_dir: Option<PathBuf>,
    pub vmaps_dir: Option<PathBuf>,
    pub mmaps_dir: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,
    pub log_level: Option<i32>,
    pub threads: Option<usize>,
    pub skip_lists: SkipLists,
}

impl ToolSettings {
    pub fn from_config(config: &Config) -> Self {
        let path = |key: &str| -> Option<PathBuf> {
            let value = config.get_string(key);
            (!value.is_empty()).then(|| PathBuf::from(value))
        };
        let int = |key: &str| -> Option<i32> { config.is_set(key).then(|| config.get_int_default(key, 0)) };

        ToolSettings {
            maps_dir: path("MapsDir"),
            vmaps_dir: path("VmapsDir"),
            mmaps_dir: path("MmapsDir"),
            logs_dir: path("LogsDir"),
            log_level: int("LogLevel"),
            threads: int("Threads").map(|t| t.max(1) as usize),
            skip_lists: SkipLists::from_config(config),
        }
    }

    /// Read the settings file if present, defaults otherwise
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = Config::new();
        if path.exists() {
            config
                .set_source(path, ENV_PREFIX)
                .with_context(|| format!("failed to load settings {}", path.display()))?;
        } else {
            config.load_str("", ENV_PREFIX)?;
        }
        Ok(Self::from_config(&config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_defaults() {
        let normal = MmapConfig::for_profile(UnitProfile::Normal, 60.0);
        assert_eq!(normal.border_size, 5);
        assert_eq!(normal.max_edge_len, 81);
        assert_eq!((normal.walkable_height, normal.walkable_climb, normal.walkable_radius), (6, 4, 2));

        let big = MmapConfig::for_profile(UnitProfile::Big, 45.0);
        assert_eq!(big.border_size, 4);
        assert_eq!(big.max_edge_len, 41);
        assert_eq!(big.walkable_slope_angle, 45.0);

        let rc = normal.to_rc_config(UnitProfile::Normal);
        assert_eq!(rc.min_region_area, 3600);
        assert_eq!(rc.merge_region_area, 2500);
        assert_eq!(rc.width, 90);
        assert_eq!(rc.max_verts_per_poly, 6);
    }

    #[test]
    fn json_overrides_merge_with_defaults() {
        let configs = MapConfigs::from_json(r#"{ "530": { "walkableClimb": 3, "maxSimplificationError": 1.5 } }"#).unwrap();

        let tuned = configs.config_for(530, UnitProfile::Normal, 60.0);
        assert_eq!(tuned.walkable_climb, 3);
        assert_eq!(tuned.max_simplification_error, 1.5);
        assert_eq!(tuned.walkable_height, 6);

        let untouched = configs.config_for(0, UnitProfile::Normal, 60.0);
        assert_eq!(untouched, MmapConfig::for_profile(UnitProfile::Normal, 60.0));

        assert!(MapConfigs::from_json(r#"{ "abc": {} }"#).is_err());
    }

    #[test]
    fn missing_json_file_means_no_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let configs = MapConfigs::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(configs.config_for(1, UnitProfile::Big, 60.0), MmapConfig::for_profile(UnitProfile::Big, 60.0));
    }

    #[test]
    fn skip_flags_toggle_membership() {
        let lists = SkipLists::default();
        let none = SkipFlags::default();

        assert!(!lists.should_skip_map(0, none));
        assert!(lists.should_skip_map(0, SkipFlags { continents: true, ..none }));
        assert!(lists.should_skip_map(590, SkipFlags { junk_maps: true, ..none }));
        assert!(!lists.should_skip_map(590, SkipFlags { continents: true, ..none }));
        assert!(lists.should_skip_map(628, SkipFlags { battlegrounds: true, ..none }));
        assert!(!lists.should_skip_map(33, SkipFlags { continents: true, junk_maps: true, battlegrounds: true }));
        assert!(lists.transports.contains(&621));
        assert!(!lists.transports.contains(&595));
    }

    #[test]
    fn settings_from_ini() {
        let mut config = Config::new();
        config
            .load_str("MapsDir = /data/maps\nThreads = 0\nLogLevel = 3\nSkipContinentIds = 1, 2\n", "")
            .unwrap();

        let settings = ToolSettings::from_config(&config);
        assert_eq!(settings.maps_dir, Some(PathBuf::from("/data/maps")));
        assert_eq!(settings.vmaps_dir, None);
        assert_eq!(settings.threads, Some(1));
        assert_eq!(settings.log_level, Some(3));
        assert_eq!(settings.skip_lists.continents, BTreeSet::from([1, 2]));
        assert_eq!(settings.skip_lists.junk, SkipLists::default().junk);
    }
}
