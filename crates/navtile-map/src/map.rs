//! Map-level obstacle ingestion.
//!
//! `Map` owns the tile set and fans an obstacle addition out to every tile
//! whose bounds the obstacle overlaps in the ground plane. Tiles carry their
//! own locks so distinct tiles may rebuild concurrently; the registry and the
//! model store are shared and internally synchronized.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::Quat;
use navtile_build::MeshSettings;
use navtile_common::{Error, Result, RigidTransform, Vec3};
use parking_lot::Mutex;

use crate::model::{ModelKind, ModelStore, ObstacleInstance};
use crate::registry::NavMeshRegistry;
use crate::tile::Tile;

/// Placement rotation for an obstacle: the two wire forms must agree on the
/// resulting matrix for equivalent inputs.
#[derive(Debug, Clone, Copy)]
pub enum Orientation {
    /// Rotation about the world up axis, in radians
    RotationZ(f32),
    /// Full quaternion rotation
    Quaternion(Quat),
}

/// The world's tile set plus its live obstacle registry
pub struct Map {
    settings: MeshSettings,
    models: Arc<ModelStore>,
    registry: Arc<NavMeshRegistry>,
    tiles: BTreeMap<(i32, i32), Mutex<Tile>>,
    obstacles: Mutex<HashMap<u64, Arc<ObstacleInstance>>>,
}

impl Map {
    pub fn new(
        settings: MeshSettings,
        models: Arc<ModelStore>,
        registry: Arc<NavMeshRegistry>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            models,
            registry,
            tiles: BTreeMap::new(),
            obstacles: Mutex::new(HashMap::new()),
        })
    }

    /// Adds a loaded tile to the map; part of world load, not of the dynamic
    /// path.
    pub fn insert_tile(&mut self, tile: Tile) {
        self.tiles.insert((tile.tile_x(), tile.tile_y()), Mutex::new(tile));
    }

    pub fn settings(&self) -> &MeshSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<NavMeshRegistry> {
        &self.registry
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles.lock().len()
    }

    /// Runs a closure against one tile under its lock; test and tooling
    /// support.
    pub fn with_tile<R>(&self, x: i32, y: i32, f: impl FnOnce(&Tile) -> R) -> Option<R> {
        self.tiles.get(&(x, y)).map(|tile| f(&tile.lock()))
    }

    /// Adds a dynamic obstacle and rebuilds every overlapping tile.
    ///
    /// Per-tile rebuild failures are collected and returned together with
    /// their tile coordinates; registry failures abort immediately.
    pub fn add_game_object(
        &self,
        guid: u64,
        display_id: u32,
        position: Vec3,
        orientation: Orientation,
        _doodad_set: i32,
    ) -> Result<()> {
        if self.obstacles.lock().contains_key(&guid) {
            return Err(Error::DuplicateGuid(guid));
        }

        let source = self.models.source(display_id)?;
        if source.kind == ModelKind::WorldObject {
            return Err(Error::UnsupportedObstacleKind(
                "world structure obstacles cannot be applied dynamically".to_string(),
            ));
        }

        let model = self.models.load_doodad(&source.path)?;
        let transform = match orientation {
            Orientation::RotationZ(angle) => {
                RigidTransform::from_position_rotation_z(position, angle)
            }
            Orientation::Quaternion(rotation) => {
                RigidTransform::from_position_quat(position, rotation)
            }
        };
        let instance = Arc::new(ObstacleInstance::new(guid, &model, transform)?);

        {
            let mut obstacles = self.obstacles.lock();
            if obstacles.contains_key(&guid) {
                return Err(Error::DuplicateGuid(guid));
            }
            obstacles.insert(guid, instance.clone());
        }

        let mut failures: Vec<((i32, i32), Box<Error>)> = Vec::new();
        for (&(x, y), tile) in &self.tiles {
            let mut tile = tile.lock();
            if !tile.bounds().intersects_2d(&instance.bounds) {
                continue;
            }
            match tile.apply_obstacle(&self.settings, guid, instance.clone(), &self.registry) {
                Ok(()) => {}
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    log::error!("rebuild of tile ({x}, {y}) for obstacle {guid:#x} failed: {error}");
                    failures.push(((x, y), Box::new(error)));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::TileRebuild { failures })
        }
    }
}
