//! Build settings for the voxel pipeline.

use serde::{Deserialize, Serialize};

/// Fixed per-map parameters for tile mesh generation.
///
/// Voxel-unit values are suffixed `voxel_`; the derived world-unit values the
/// tile payload carries are exposed through methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSettings {
    /// World units per voxel in the ground plane
    pub cell_size: f32,
    /// World units per voxel vertically
    pub cell_height: f32,

    /// Maximum walkable triangle slope in degrees
    pub walkable_slope: f32,
    /// Maximum neighbor step for non-terrain connectivity, in voxels
    pub voxel_walkable_climb: i32,
    /// Minimum free voxels above a floor for it to be walkable
    pub voxel_walkable_height: i32,
    /// Agent radius in voxels, used for the tile border
    pub voxel_walkable_radius: i32,

    /// Perpendicular distance threshold for contour simplification
    pub max_simplification_error: f32,
    /// Regions smaller than this many voxel cells are pruned
    pub min_region_size: i32,
    /// Region pairs with combined area below this may be merged
    pub merge_region_size: i32,

    /// Upper bound on vertices per polygon
    pub vertices_per_polygon: i32,
    /// Square tile width in voxels, excluding the border
    pub tile_voxel_size: i32,

    /// Detail mesh sampling distance in world units
    pub detail_sample_distance: f32,
    /// Maximum detail surface deviation in world units
    pub detail_sample_max_error: f32,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            walkable_slope: 50.0,
            voxel_walkable_climb: 4,
            voxel_walkable_height: 8,
            voxel_walkable_radius: 2,
            max_simplification_error: 1.3,
            min_region_size: 8,
            merge_region_size: 20,
            vertices_per_polygon: 6,
            tile_voxel_size: 64,
            detail_sample_distance: 1.8,
            detail_sample_max_error: 0.2,
        }
    }
}

impl MeshSettings {
    /// Border width in voxels around the tile proper.
    pub fn border_size(&self) -> i32 {
        self.voxel_walkable_radius + 3
    }

    /// Heightfield width/depth in voxels, border included.
    pub fn field_size(&self) -> i32 {
        self.tile_voxel_size + self.border_size() * 2
    }

    /// Maximum contour edge length in voxels before splitting.
    pub fn max_edge_len(&self) -> i32 {
        self.voxel_walkable_radius * 4
    }

    /// Tile edge length in world units, border excluded.
    pub fn tile_world_size(&self) -> f32 {
        self.tile_voxel_size as f32 * self.cell_size
    }

    pub fn walkable_height_world(&self) -> f32 {
        self.voxel_walkable_height as f32 * self.cell_height
    }

    pub fn walkable_climb_world(&self) -> f32 {
        self.voxel_walkable_climb as f32 * self.cell_height
    }

    pub fn walkable_radius_world(&self) -> f32 {
        self.voxel_walkable_radius as f32 * self.cell_size
    }

    pub fn validate(&self) -> navtile_common::Result<()> {
        use navtile_common::Error;

        if self.cell_size <= 0.0 || self.cell_height <= 0.0 {
            return Err(Error::InvalidMesh("invalid cell size or height".to_string()));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope) {
            return Err(Error::InvalidMesh("invalid walkable slope angle".to_string()));
        }
        if self.vertices_per_polygon < 3 {
            return Err(Error::InvalidMesh("too few vertices per polygon".to_string()));
        }
        if self.tile_voxel_size <= 0 {
            return Err(Error::InvalidMesh("invalid tile size".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_values() {
        let settings = MeshSettings::default();
        assert_eq!(settings.border_size(), 5);
        assert_eq!(settings.field_size(), 74);
        assert_eq!(settings.max_edge_len(), 8);
        assert!((settings.walkable_height_world() - 1.6).abs() < 1e-6);
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut settings = MeshSettings::default();
        settings.vertices_per_polygon = 2;
        assert!(settings.validate().is_err());

        let mut settings = MeshSettings::default();
        settings.cell_size = 0.0;
        assert!(settings.validate().is_err());
    }
}
