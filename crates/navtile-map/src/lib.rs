//! Live side of the dynamic navigation mesh.
//!
//! This crate turns the voxel pipeline of `navtile-build` into a running
//! system: tiles own their persistent heightfields, obstacles are ingested at
//! the map level and fanned out to the tiles they overlap, each affected tile
//! is rebuilt through the pipeline, and finished payloads are swapped
//! atomically into a registry that concurrent path queries read from.

mod map;
mod model;
mod payload;
mod rebuild;
mod registry;
mod tile;

pub use map::{Map, Orientation};
pub use model::{DoodadModel, ModelKind, ModelLoader, ModelSource, ModelStore, ObstacleInstance};
pub use payload::{
    create_tile_data, TileBuildParams, TileHeader, TilePayload, TILE_MAGIC, TILE_VERSION,
};
pub use rebuild::{payload_from_contours, rebuild_tile};
pub use registry::{NavMeshRegistry, RegistryStatistics, TileRef};
pub use tile::Tile;

#[cfg(test)]
mod rebuild_pipeline_tests;
