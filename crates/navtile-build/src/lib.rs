//! Voxel pipeline for rebuilding navigation-mesh tiles.
//!
//! The pipeline mirrors the classic Recast shape: triangles are rasterized
//! into a sparse span heightfield, filtered for walkability, compacted into a
//! connectivity-aware form, partitioned into regions along a distance field,
//! traced into contours and finally turned into a convex polygon mesh with a
//! sampled detail overlay.
//!
//! The one structural departure from the stock pipeline is the split climb
//! rule for mixed terrain: compaction runs with an effectively infinite climb
//! and [`CompactHeightfield::enforce_walkable_climb`] prunes the links
//! afterwards, leaving terrain-to-terrain steps intact.

mod compact_heightfield;
mod config;
mod contour;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod polymesh;
mod rasterization;
mod regions;

pub use compact_heightfield::{
    CompactCell, CompactHeightfield, CompactSpan, BORDER_REGION, NOT_CONNECTED,
};
pub use config::MeshSettings;
pub use contour::{Contour, ContourSet, AREA_BORDER, BORDER_VERTEX, CONTOUR_REG_MASK};
pub use detail_mesh::PolyMeshDetail;
pub use heightfield::{Heightfield, Span, SpanKey, MAX_SPAN_HEIGHT};
pub use polymesh::{PolyMesh, EXTERNAL_EDGE, MESH_NULL_IDX};
pub use rasterization::{clear_unwalkable_triangles, rasterize_triangles};

/// Offset in x for the four cardinal directions (W, N, E, S)
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
/// Offset in z for the four cardinal directions (W, N, E, S)
pub const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];
