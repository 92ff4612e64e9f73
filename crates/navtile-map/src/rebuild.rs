//! Per-tile rebuild pipeline.
//!
//! The climb rule here is split: compaction runs with an effectively
//! infinite climb so terrain of any slope stays connected, then the real
//! climb limit is enforced per neighbor pair, exempting terrain-to-terrain
//! links. A tile whose contour set comes out empty is a valid no-op, not an
//! error; the live tile, if any, stays in place.

use navtile_build::{CompactHeightfield, ContourSet, Heightfield, MeshSettings, PolyMesh, PolyMeshDetail};
use navtile_common::{Error, Result};

use crate::payload::{create_tile_data, TileBuildParams, TilePayload};

/// Rebuilds one tile's navigation data from its voxel heightfield.
///
/// Returns `Ok(None)` when the tile holds no navigable geometry.
pub fn rebuild_tile(
    settings: &MeshSettings,
    tile_x: i32,
    tile_y: i32,
    heightfield: &Heightfield,
) -> Result<Option<TilePayload>> {
    settings.validate()?;

    // Compact with an unbounded climb, then prune selectively
    let mut chf = CompactHeightfield::build(heightfield, settings.voxel_walkable_height, i32::MAX)?;
    chf.enforce_walkable_climb(settings.voxel_walkable_climb);

    chf.build_distance_field();
    chf.build_regions(
        settings.border_size(),
        settings.min_region_size,
        settings.merge_region_size,
    )?;

    let cset = ContourSet::build(
        &chf,
        settings.max_simplification_error,
        settings.max_edge_len(),
    )?;

    payload_from_contours(settings, tile_x, tile_y, &chf, &cset)
}

/// Finishes a rebuild from the contour stage: polygon mesh, detail mesh,
/// vertex budget, serialization.
pub fn payload_from_contours(
    settings: &MeshSettings,
    tile_x: i32,
    tile_y: i32,
    chf: &CompactHeightfield,
    cset: &ContourSet,
) -> Result<Option<TilePayload>> {
    if cset.contours.is_empty() {
        // No navigable geometry in this tile; succeed by doing nothing
        log::debug!("tile ({tile_x}, {tile_y}) has no contours, skipping payload");
        return Ok(None);
    }

    // The polygon mesh indexes vertices with u16; refuse contour sets that
    // cannot fit before doing the work
    let raw_vertex_bound: usize = cset.contours.iter().map(|c| c.verts.len()).sum();
    if raw_vertex_bound >= 0xffff {
        return Err(Error::TooManyVertices { tile_x, tile_y });
    }

    let mut pmesh = PolyMesh::build(cset, settings.vertices_per_polygon as usize)?;
    let dmesh = PolyMeshDetail::build(
        &pmesh,
        chf,
        settings.detail_sample_distance,
        settings.detail_sample_max_error,
    )?;

    if pmesh.nverts >= 0xffff {
        return Err(Error::TooManyVertices { tile_x, tile_y });
    }

    pmesh.update_walkable_flags();

    let payload = create_tile_data(&TileBuildParams {
        tile_x,
        tile_y,
        poly_mesh: &pmesh,
        detail_mesh: &dmesh,
        settings,
    })?;

    Ok(Some(payload))
}
