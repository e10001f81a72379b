// main.rs - MoveMapGen command line entry point
//
// Settings precedence: command line, then the settings file, then built-in
// defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use clap::Parser;
use mmap_shared::log::{initialize_logging, map_log_level};
use tracing::{info, warn};

use movemap::config::{MapConfigs, SkipFlags, ToolSettings};
use movemap::{BuildOptions, MapBuilder, TerrainBuilder, TileCatalog, UnitProfile};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Tile {
    x: u32,
    y: u32,
}

fn parse_tile(input: &str) -> Result<Tile, String> {
    let mut parts = input.split(',');
    let mut coord = |name: &str| -> Result<u32, String> {
        let value = parts
            .next()
            .ok_or_else(|| format!("Missing tile {}", name))?
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid tile {}", name))?;
        if value >= 64 {
            return Err(format!("Tile {} must be below 64", name));
        }
        Ok(value)
    };
    let x = coord("X")?;
    let y = coord("Y")?;
    Ok(Tile { x, y })
}

#[derive(Parser, Debug)]
#[command(name = "movemap-gen")]
#[command(about = "Builds navigation mesh tiles from extracted maps and vmaps")]
#[command(version)]
struct Cli {
    /// Map IDs to build (space-separated), all maps when empty
    map_ids: Vec<u32>,

    /// Build the specified tile only (format: X,Y)
    #[arg(long = "tile", value_parser = parse_tile)]
    tile: Option<Tile>,

    /// Maximum walkable slope in degrees
    #[arg(long = "maxAngle", default_value_t = 60.0)]
    max_angle: f32,

    /// Skip liquid data
    #[arg(long = "skipLiquid")]
    skip_liquid: bool,

    /// Skip continents
    #[arg(long = "skipContinents")]
    skip_continents: bool,

    /// Skip junk maps and transports
    #[arg(long = "skipJunkMaps")]
    skip_junk_maps: bool,

    /// Skip battlegrounds
    #[arg(long = "skipBattlegrounds")]
    skip_battlegrounds: bool,

    /// Write input geometry and built meshes to meshes/
    #[arg(long = "debug")]
    debug_output: bool,

    /// Use the coarse voxel profile
    #[arg(long = "bigBaseUnit")]
    big_base_unit: bool,

    /// Off-mesh connection input file
    #[arg(long = "offMeshInput")]
    off_mesh_input: Option<PathBuf>,

    /// Per-map tuning JSON file
    #[arg(long = "configInputPath", default_value = "config.json")]
    config_input: PathBuf,

    /// Tool settings file
    #[arg(long = "conf", default_value = "movemapgen.conf")]
    conf: PathBuf,

    /// Number of threads to use
    #[arg(long = "threads")]
    threads: Option<usize>,

    /// Base work directory (fallback for maps/vmaps/mmaps if not specified individually)
    #[arg(long = "workdir", default_value = "./")]
    workdir: PathBuf,

    /// Custom path to maps directory (overrides workdir/maps)
    #[arg(long = "mapsDir")]
    maps_dir: Option<PathBuf>,

    /// Custom path to vmaps directory (overrides workdir/vmaps)
    #[arg(long = "vmapsDir")]
    vmaps_dir: Option<PathBuf>,

    /// Custom path to mmaps output directory (overrides workdir/mmaps)
    #[arg(long = "mmapsDir")]
    mmaps_dir: Option<PathBuf>,

    /// Console log level (0=Errors, 1=Warnings, 2=Info, 3=Debug, 4=Trace)
    #[arg(long = "logLevel", value_name = "LEVEL")]
    log_level: Option<i32>,
}

fn resolve_dir(cli: Option<PathBuf>, settings: Option<PathBuf>, workdir: &Path, name: &str) -> PathBuf {
    cli.or(settings).unwrap_or_else(|| workdir.join(name))
}

fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = ToolSettings::load(&cli.conf)?;

    let logs_dir = settings.logs_dir.as_deref().and_then(Path::to_str);
    let log_level = cli.log_level.or(settings.log_level).unwrap_or(2);
    initialize_logging(logs_dir, map_log_level(log_level)).context("failed to initialize logging")?;

    if cli.tile.is_some() && cli.map_ids.len() != 1 {
        bail!("--tile requires exactly one map id");
    }

    let maps_dir = resolve_dir(cli.maps_dir, settings.maps_dir, &cli.workdir, "maps");
    let vmaps_dir = resolve_dir(cli.vmaps_dir, settings.vmaps_dir, &cli.workdir, "vmaps");
    let mmaps_dir = resolve_dir(cli.mmaps_dir, settings.mmaps_dir, &cli.workdir, "mmaps");
    ensure_dir(&mmaps_dir)?;

    let debug_dir = if cli.debug_output {
        let dir = cli.workdir.join("meshes");
        ensure_dir(&dir)?;
        Some(dir)
    } else {
        None
    };

    let threads = cli.threads.or(settings.threads).unwrap_or(1).max(1);
    let map_configs = MapConfigs::load(&cli.config_input)?;

    info!(
        "MoveMapGen: maps='{}' vmaps='{}' mmaps='{}' tile={:?} maps={:?} threads={}",
        maps_dir.display(),
        vmaps_dir.display(),
        mmaps_dir.display(),
        cli.tile,
        cli.map_ids,
        threads
    );

    let options = BuildOptions {
        profile: UnitProfile::from_big_base_unit(cli.big_base_unit),
        max_walkable_angle: cli.max_angle,
        skip: SkipFlags {
            continents: cli.skip_continents,
            junk_maps: cli.skip_junk_maps,
            battlegrounds: cli.skip_battlegrounds,
        },
        skip_lists: settings.skip_lists,
        mmaps_dir,
        debug_dir,
        off_mesh_path: cli.off_mesh_input,
        threads,
        map_configs,
    };

    info!("Discovering maps and tiles...");
    let catalog = TileCatalog::discover(&maps_dir, &vmaps_dir);
    info!("Found {} maps.", catalog.map_ids().len());

    let provider = TerrainBuilder::new(maps_dir, vmaps_dir, cli.skip_liquid);
    let mut builder = MapBuilder::new(provider, catalog, options);

    let stop = builder.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl-C handler")?;

    let summary = match (cli.tile, cli.map_ids.as_slice()) {
        (Some(tile), &[map_id]) => builder.build_single_tile(map_id, tile.x, tile.y),
        (_, []) => builder.build_all(),
        (_, ids) => builder.build_maps(ids),
    };

    if builder.stop_flag().load(Ordering::Relaxed) {
        warn!("Build interrupted");
    }
    info!(
        "Finished: {} map(s), {} tile(s) written, {} current, {} empty, {} failed",
        summary.maps, summary.written, summary.skipped, summary.empty, summary.failed
    );
    Ok(())
}
