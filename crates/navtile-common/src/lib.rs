//! Common utilities and data structures shared by the navtile build and map crates

mod area;
mod geometry;
mod transform;

pub use area::*;
pub use geometry::*;
pub use transform::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the workspace
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("game object {0} already exists")]
    DuplicateGuid(u64),

    #[error("unsupported obstacle kind: {0}")]
    UnsupportedObstacleKind(String),

    #[error("no model registered for display id {0}")]
    ModelNotFound(u32),

    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("mesh build stage failed: {0}")]
    BuildStage(String),

    #[error("too many mesh vertices produced for tile ({tile_x}, {tile_y})")]
    TooManyVertices { tile_x: i32, tile_y: i32 },

    #[error("failed to remove tile ({tile_x}, {tile_y}) from the nav mesh registry")]
    RegistryRemoveFailed { tile_x: i32, tile_y: i32 },

    #[error("failed to insert tile ({tile_x}, {tile_y}) into the nav mesh registry")]
    RegistryInsertFailed { tile_x: i32, tile_y: i32 },

    #[error("tile rebuild failed for {} tile(s)", .failures.len())]
    TileRebuild { failures: Vec<((i32, i32), Box<Error>)> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Registry failures indicate a breached data-structure invariant and
    /// must never be folded into a per-tile failure list.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RegistryRemoveFailed { .. } | Error::RegistryInsertFailed { .. }
        )
    }
}

/// Result type for workspace operations
pub type Result<T> = std::result::Result<T, Error>;
