// lib.rs - MoveMapGen navigation mesh builder
//
// Turns extracted terrain heightmaps and static model geometry into
// per-tile navmesh files (.mmap/.mmtile) for the pathfinding runtime.

pub mod bounds;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod debug;
pub mod defines;
pub mod mesh_data;
pub mod persistence;
pub mod terrain;
pub mod tile_builder;

pub use builder::{BuildOptions, BuildSummary, MapBuilder};
pub use catalog::{TileCatalog, TileIndex};
pub use config::{MapConfigs, MmapConfig, SkipFlags, SkipLists, ToolSettings};
pub use defines::{UnitProfile, pack_tile_id, unpack_tile_id};
pub use mesh_data::MeshData;
pub use terrain::{GeometryProvider, TerrainBuilder};
pub use tile_builder::{TileBuildError, TileBuilder, TileLabel, TileOutcome};
