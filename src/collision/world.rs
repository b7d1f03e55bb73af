//! Registry of collision bodies shared between the streaming loop and queries
//!
//! The chunk manager and collision manager hold the same `Arc<PhysicsWorld>`.
//! Bodies are inserted complete under the write lock, so a query from another
//! thread sees a chunk's collision either whole or not at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::collision::heightfield::HeightfieldShape;
use crate::terrain::ChunkCoord;

/// Handle to one chunk's physical body
#[derive(Clone, Debug)]
pub struct CollisionBody {
    pub id: u64,
    pub coord: ChunkCoord,
    pub shape: Arc<HeightfieldShape>,
}

impl CollisionBody {
    pub fn memory_bytes(&self) -> usize {
        self.shape.memory_bytes()
    }
}

#[derive(Debug, Default)]
pub struct PhysicsWorld {
    bodies: RwLock<HashMap<ChunkCoord, CollisionBody>>,
    next_id: AtomicU64,
}

pub type SharedPhysics = Arc<PhysicsWorld>;

impl PhysicsWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedPhysics {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ChunkCoord, CollisionBody>> {
        self.bodies.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ChunkCoord, CollisionBody>> {
        self.bodies.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a shape for `coord`, replacing any previous body
    pub fn insert(&self, coord: ChunkCoord, shape: HeightfieldShape) -> CollisionBody {
        let body = CollisionBody {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            coord,
            shape: Arc::new(shape),
        };
        self.write().insert(coord, body.clone());
        body
    }

    /// Remove the body of `coord`. Returns whether one existed.
    pub fn remove(&self, coord: ChunkCoord) -> bool {
        self.write().remove(&coord).is_some()
    }

    pub fn get(&self, coord: ChunkCoord) -> Option<CollisionBody> {
        self.read().get(&coord).cloned()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.read().contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Sorted coordinates of every body
    pub fn coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self.read().keys().copied().collect();
        coords.sort();
        coords
    }

    pub fn memory_bytes(&self) -> usize {
        self.read().values().map(CollisionBody::memory_bytes).sum()
    }
}
