//! Obstacle models and placed instances.
//!
//! Models are shared: the store keeps the owning `Arc` per model path, and
//! every placed instance holds a weak handle plus its own world-space copy of
//! the vertices.

use navtile_common::{Aabb, Error, Result, RigidTransform, Vec3};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Triangle soup of an obstacle model, in model space
#[derive(Debug, Clone)]
pub struct DoodadModel {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<i32>,
}

impl DoodadModel {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<i32>) -> Result<Self> {
        let model = Self { vertices, indices };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() {
            return Err(Error::InvalidMesh("model has no vertices".to_string()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(
                "model index count is not a multiple of 3".to_string(),
            ));
        }
        let vert_count = self.vertices.len() as i32;
        if let Some(&bad) = self.indices.iter().find(|&&i| i < 0 || i >= vert_count) {
            return Err(Error::InvalidMesh(format!(
                "model index {bad} out of range (vertices: {vert_count})"
            )));
        }
        Ok(())
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// The kind of model a display id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Small placed obstacle; the supported dynamic kind
    Doodad,
    /// Large world structure; never applied dynamically
    WorldObject,
}

/// Entry of the display-id table
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub kind: ModelKind,
    pub path: String,
}

/// Resolves a model path to its triangle soup; asset formats live behind this
/// seam.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<DoodadModel>;
}

/// Shared, internally synchronized model cache
pub struct ModelStore {
    loader: Box<dyn ModelLoader>,
    sources: HashMap<u32, ModelSource>,
    cache: Mutex<HashMap<String, Arc<DoodadModel>>>,
}

impl ModelStore {
    pub fn new(loader: Box<dyn ModelLoader>, sources: HashMap<u32, ModelSource>) -> Self {
        Self {
            loader,
            sources,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up the display-id table entry.
    pub fn source(&self, display_id: u32) -> Result<ModelSource> {
        self.sources
            .get(&display_id)
            .cloned()
            .ok_or(Error::ModelNotFound(display_id))
    }

    /// Loads a doodad model, hitting the cache by path.
    pub fn load_doodad(&self, path: &str) -> Result<Arc<DoodadModel>> {
        if let Some(model) = self.cache.lock().get(path) {
            return Ok(model.clone());
        }

        let model = self.loader.load(path)?;
        model.validate()?;
        let model = Arc::new(model);

        let mut cache = self.cache.lock();
        // Keep the first copy if another thread raced the load
        Ok(cache.entry(path.to_string()).or_insert(model).clone())
    }

    pub fn cached_model_count(&self) -> usize {
        self.cache.lock().len()
    }
}

/// A placed obstacle, immutable once created
pub struct ObstacleInstance {
    pub guid: u64,
    pub model: Weak<DoodadModel>,
    pub transform: RigidTransform,
    /// Model vertices transformed into world space
    pub world_vertices: Vec<Vec3>,
    pub bounds: Aabb,
}

impl ObstacleInstance {
    pub fn new(guid: u64, model: &Arc<DoodadModel>, transform: RigidTransform) -> Result<Self> {
        let world_vertices: Vec<Vec3> = model
            .vertices
            .iter()
            .map(|&v| transform.apply(v))
            .collect();
        let bounds = Aabb::from_points(&world_vertices)
            .ok_or_else(|| Error::InvalidMesh("obstacle model has no vertices".to_string()))?;

        Ok(Self {
            guid,
            model: Arc::downgrade(model),
            transform,
            world_vertices,
            bounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a unit quad for any path, counting loads.
    pub(crate) struct QuadLoader {
        pub loads: AtomicUsize,
    }

    impl QuadLoader {
        pub fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl ModelLoader for QuadLoader {
        fn load(&self, _path: &str) -> Result<DoodadModel> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            DoodadModel::new(
                vec![
                    Vec3::new(-0.5, -0.5, 0.0),
                    Vec3::new(0.5, -0.5, 0.0),
                    Vec3::new(0.5, 0.5, 0.0),
                    Vec3::new(-0.5, 0.5, 0.0),
                ],
                vec![0, 1, 2, 0, 2, 3],
            )
        }
    }

    fn store_with(sources: &[(u32, ModelKind, &str)]) -> ModelStore {
        let sources = sources
            .iter()
            .map(|(id, kind, path)| {
                (
                    *id,
                    ModelSource {
                        kind: *kind,
                        path: path.to_string(),
                    },
                )
            })
            .collect();
        ModelStore::new(Box::new(QuadLoader::new()), sources)
    }

    #[test]
    fn missing_display_id_is_an_error() {
        let store = store_with(&[(10, ModelKind::Doodad, "doodad/barrel.mdl")]);
        assert!(store.source(10).is_ok());
        assert!(matches!(store.source(11), Err(Error::ModelNotFound(11))));
    }

    #[test]
    fn models_are_cached_by_path() {
        let loader = Box::new(QuadLoader::new());
        let store = ModelStore::new(loader, HashMap::new());

        let a = store.load_doodad("doodad/barrel.mdl").unwrap();
        let b = store.load_doodad("doodad/barrel.mdl").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.cached_model_count(), 1);
    }

    #[test]
    fn invalid_models_are_rejected() {
        assert!(DoodadModel::new(vec![], vec![]).is_err());
        assert!(DoodadModel::new(vec![Vec3::ZERO], vec![0, 0]).is_err());
        assert!(DoodadModel::new(vec![Vec3::ZERO], vec![0, 0, 7]).is_err());
    }

    #[test]
    fn instance_transforms_vertices_and_bounds() {
        let model = Arc::new(
            DoodadModel::new(
                vec![Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 2.0), Vec3::ZERO],
                vec![0, 1, 2],
            )
            .unwrap(),
        );
        let transform =
            RigidTransform::from_position_rotation_z(Vec3::new(10.0, 20.0, 30.0), 0.0);
        let instance = ObstacleInstance::new(1, &model, transform).unwrap();

        assert_eq!(instance.world_vertices.len(), 3);
        assert!(instance.bounds.min.x >= 9.0 && instance.bounds.max.x <= 11.0);
        assert!(instance.bounds.min.z >= 30.0 - 1e-5);
        assert!(instance.model.upgrade().is_some());

        drop(model);
        assert!(instance.model.upgrade().is_none());
    }
}
