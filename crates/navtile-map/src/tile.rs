//! A live tile: its persistent voxel heightfield, the obstacles applied to
//! it, and its slot in the nav-mesh registry.

use std::collections::HashMap;
use std::sync::Arc;

use navtile_build::{clear_unwalkable_triangles, rasterize_triangles, Heightfield, MeshSettings};
use navtile_common::{vertices_to_mesh, Aabb, Error, Result, AREA_DOODAD, AREA_TERRAIN};

use crate::model::ObstacleInstance;
use crate::rebuild::rebuild_tile;
use crate::registry::{NavMeshRegistry, TileRef};

/// One rebuildable tile of the world
pub struct Tile {
    x: i32,
    y: i32,
    /// World-space bounds used for obstacle overlap tests
    bounds: Aabb,
    /// Mesh-space voxel heightfield, owned exclusively by this tile
    heightfield: Heightfield,
    /// Live registry slot, if the tile currently has navigable geometry
    tile_ref: Option<TileRef>,
    /// Obstacles rasterized into the heightfield so far
    obstacles: HashMap<u64, Arc<ObstacleInstance>>,
}

impl Tile {
    pub fn new(x: i32, y: i32, bounds: Aabb, heightfield: Heightfield) -> Self {
        Self {
            x,
            y,
            bounds,
            heightfield,
            tile_ref: None,
            obstacles: HashMap::new(),
        }
    }

    pub fn tile_x(&self) -> i32 {
        self.x
    }

    pub fn tile_y(&self) -> i32 {
        self.y
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn tile_ref(&self) -> Option<TileRef> {
        self.tile_ref
    }

    pub fn heightfield(&self) -> &Heightfield {
        &self.heightfield
    }

    /// Deep copy of the heightfield; the snapshot callers take before an
    /// apply when they need rollback.
    pub fn snapshot_heightfield(&self) -> Heightfield {
        self.heightfield.clone()
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    /// Builds the tile's initial navigation data and claims its registry
    /// slot; part of world load.
    pub fn activate(
        &mut self,
        settings: &MeshSettings,
        registry: &NavMeshRegistry,
    ) -> Result<()> {
        debug_assert!(self.tile_ref.is_none());
        if let Some(payload) = rebuild_tile(settings, self.x, self.y, &self.heightfield)? {
            self.tile_ref = Some(registry.insert(payload)?);
        }
        Ok(())
    }

    /// Rasterizes an obstacle into this tile, refilters the heightfield,
    /// rebuilds the navigation data and swaps the registry slot.
    ///
    /// A failure after rasterization leaves the heightfield mutated; there is
    /// no automatic rollback (see [`Tile::snapshot_heightfield`]).
    pub fn apply_obstacle(
        &mut self,
        settings: &MeshSettings,
        guid: u64,
        instance: Arc<ObstacleInstance>,
        registry: &NavMeshRegistry,
    ) -> Result<()> {
        let model = instance.model.upgrade().ok_or_else(|| {
            Error::InvalidMesh(format!("model for obstacle {guid:#x} is no longer loaded"))
        })?;

        let mesh_verts = vertices_to_mesh(&instance.world_vertices);
        let mut areas = vec![AREA_DOODAD; model.triangle_count()];

        clear_unwalkable_triangles(
            settings.walkable_slope,
            &mesh_verts,
            &model.indices,
            &mut areas,
        );
        // The merge tolerance is one voxel; the walkable climb plays no part
        // in rasterization
        rasterize_triangles(
            &mesh_verts,
            &model.indices,
            &areas,
            &mut self.heightfield,
            1,
        )?;
        self.obstacles.insert(guid, instance);

        // Terrain spans must survive ledge filtering: snapshot, filter,
        // reassert. NPCs traverse terrain of any slope out-of-band.
        let terrain = self.heightfield.spans_with_area(AREA_TERRAIN);
        self.heightfield
            .filter_ledge_spans(settings.voxel_walkable_height, settings.voxel_walkable_climb);
        for &key in &terrain {
            self.heightfield.span_mut(key).area |= AREA_TERRAIN;
        }

        self.heightfield
            .filter_walkable_low_height_spans(settings.voxel_walkable_height);
        self.heightfield
            .filter_low_hanging_walkable_obstacles(settings.voxel_walkable_climb);

        let Some(payload) = rebuild_tile(settings, self.x, self.y, &self.heightfield)? else {
            // Nothing navigable; whatever tile is live stays in place
            return Ok(());
        };

        if let Some(tile_ref) = self.tile_ref.take() {
            registry.remove(tile_ref)?;
        }
        self.tile_ref = Some(registry.insert(payload)?);

        log::info!(
            "tile ({}, {}) rebuilt with obstacle {guid:#x} ({} applied)",
            self.x,
            self.y,
            self.obstacles.len()
        );
        Ok(())
    }
}
