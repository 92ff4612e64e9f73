//! Live registry of navigation-mesh tile payloads.
//!
//! Writers replace whole tiles under the write lock; readers snapshot the
//! payload `Arc` under the read lock, so a concurrent lookup observes either
//! the complete old payload or the complete new one, never a partial state.
//! Tile handles carry a generation so a stale handle can never remove a
//! newer payload.

use navtile_common::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::payload::TilePayload;

/// Opaque handle to an inserted tile, required to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRef {
    x: i32,
    y: i32,
    generation: u64,
}

impl TileRef {
    pub fn tile_x(&self) -> i32 {
        self.x
    }

    pub fn tile_y(&self) -> i32 {
        self.y
    }
}

struct Entry {
    payload: Arc<[u8]>,
    generation: u64,
}

/// Registry of live tiles keyed by tile coordinates
pub struct NavMeshRegistry {
    tiles: RwLock<HashMap<(i32, i32), Entry>>,
    next_generation: AtomicU64,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatistics {
    pub tile_count: usize,
    pub total_payload_bytes: usize,
}

impl NavMeshRegistry {
    pub fn new() -> Self {
        Self {
            tiles: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Inserts a payload under the coordinates in its header.
    ///
    /// Fails if the slot is already occupied; replacement is remove followed
    /// by insert, holding the caller's tile exclusively.
    pub fn insert(&self, payload: TilePayload) -> Result<TileRef> {
        let header = payload.header()?;
        let key = (header.tile_x, header.tile_y);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut tiles = self.tiles.write();
        if tiles.contains_key(&key) {
            return Err(Error::RegistryInsertFailed {
                tile_x: key.0,
                tile_y: key.1,
            });
        }
        tiles.insert(
            key,
            Entry {
                payload: payload.into_bytes().into(),
                generation,
            },
        );

        Ok(TileRef {
            x: key.0,
            y: key.1,
            generation,
        })
    }

    /// Removes the tile a handle refers to.
    ///
    /// A handle whose generation no longer matches the live entry is stale
    /// and the call fails; the live payload is left untouched.
    pub fn remove(&self, tile_ref: TileRef) -> Result<()> {
        let mut tiles = self.tiles.write();
        let key = (tile_ref.x, tile_ref.y);

        match tiles.get(&key) {
            Some(entry) if entry.generation == tile_ref.generation => {
                tiles.remove(&key);
                Ok(())
            }
            _ => Err(Error::RegistryRemoveFailed {
                tile_x: tile_ref.x,
                tile_y: tile_ref.y,
            }),
        }
    }

    /// Snapshot of the payload currently live at the given coordinates.
    pub fn lookup(&self, tile_x: i32, tile_y: i32) -> Option<Arc<[u8]>> {
        self.tiles
            .read()
            .get(&(tile_x, tile_y))
            .map(|entry| entry.payload.clone())
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let tiles = self.tiles.read();
        RegistryStatistics {
            tile_count: tiles.len(),
            total_payload_bytes: tiles.values().map(|e| e.payload.len()).sum(),
        }
    }
}

impl Default for NavMeshRegistry {
    fn default() -> Self {
        Self::new()
    }
}
