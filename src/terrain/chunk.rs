//! Chunk grid coordinates and the resident chunk entity

use std::fmt;

use crate::collision::CollisionBody;
use crate::core::types::{Vec2, Vec3};
use crate::math::Aabb;
use crate::render::{ChunkMesh, TerrainMaterial};
use crate::terrain::biome::BiomeMap;
use crate::terrain::heightmap::{Heightmap, NormalMap};

/// Integer coordinate identifying a chunk in the horizontal world grid.
///
/// Ordered by `x` then `z`, which is the deterministic tie-break wherever
/// two chunks otherwise compare equal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing a world position: `floor(pos.xz / chunk_size)`
    pub fn from_world(pos: Vec3, chunk_size: f32) -> Self {
        Self {
            x: (pos.x / chunk_size).floor() as i32,
            z: (pos.z / chunk_size).floor() as i32,
        }
    }

    /// Minimum (x, z) corner in world space
    pub fn origin(&self, chunk_size: f32) -> Vec2 {
        Vec2::new(self.x as f32 * chunk_size, self.z as f32 * chunk_size)
    }

    /// Cell centre at `y = 0`: `(coord + 0.5) * chunk_size`
    pub fn center(&self, chunk_size: f32) -> Vec3 {
        Vec3::new(
            (self.x as f32 + 0.5) * chunk_size,
            0.0,
            (self.z as f32 + 0.5) * chunk_size,
        )
    }

    /// Footprint box spanning the given vertical range
    pub fn bounds(&self, chunk_size: f32, min_y: f32, max_y: f32) -> Aabb {
        let min = self.origin(chunk_size);
        Aabb::from_footprint(min, min + Vec2::splat(chunk_size), min_y, max_y)
    }

    pub fn offset(&self, dx: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.z + dz)
    }

    /// Chebyshev distance in chunks
    pub fn grid_distance(&self, other: ChunkCoord) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Lifecycle of a chunk request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// Immutable terrain data built for one chunk.
///
/// Built off the resident map (possibly on a worker thread) and handed to the
/// chunk manager complete, so readers never observe a partially filled chunk.
#[derive(Clone, Debug)]
pub struct ChunkData {
    pub coord: ChunkCoord,
    /// Raw provider samples, no micro-relief
    pub base_heightmap: Heightmap,
    /// Base plus procedural detail; meshes and collision use this
    pub heightmap: Heightmap,
    /// `heightmap` with a one-sample apron from the neighbouring chunks
    pub padded_heightmap: Heightmap,
    pub biome_map: BiomeMap,
    pub bump_map: NormalMap,
    /// Base heightmap was classified flat and received boosted detail
    pub flat: bool,
    /// Sea level the biome map was classified against
    pub sea_level_meters: f32,
}

impl ChunkData {
    pub fn memory_bytes(&self) -> usize {
        self.base_heightmap.memory_bytes()
            + self.heightmap.memory_bytes()
            + self.padded_heightmap.memory_bytes()
            + self.biome_map.memory_bytes()
            + self.bump_map.memory_bytes()
    }
}

/// A resident chunk, owned by the chunk manager.
#[derive(Debug)]
pub struct TerrainChunk {
    pub coord: ChunkCoord,
    pub state: ChunkState,
    pub data: ChunkData,
    /// Index = LOD level; meshes are built lazily on first need
    pub lod_meshes: Vec<Option<ChunkMesh>>,
    pub current_lod: u32,
    pub material: TerrainMaterial,
    /// Present only while the collision manager has a body for this chunk
    pub collision: Option<CollisionBody>,
    /// Logical tick of the last access, for LRU eviction
    pub last_access: u64,
}

impl TerrainChunk {
    pub fn new(data: ChunkData, material: TerrainMaterial, lod_levels: u32, tick: u64) -> Self {
        Self {
            coord: data.coord,
            state: ChunkState::Loaded,
            data,
            lod_meshes: (0..lod_levels).map(|_| None).collect(),
            current_lod: 0,
            material,
            collision: None,
            last_access: tick,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ChunkState::Loaded
    }

    pub fn has_collision(&self) -> bool {
        self.collision.is_some()
    }

    pub fn touch(&mut self, tick: u64) {
        self.last_access = tick;
    }

    /// Mesh for the current LOD, if built
    pub fn current_mesh(&self) -> Option<&ChunkMesh> {
        self.lod_meshes.get(self.current_lod as usize).and_then(Option::as_ref)
    }

    pub fn mesh(&self, lod: u32) -> Option<&ChunkMesh> {
        self.lod_meshes.get(lod as usize).and_then(Option::as_ref)
    }

    /// Resource cost of everything this chunk holds
    pub fn memory_bytes(&self) -> usize {
        let meshes: usize = self.lod_meshes.iter().flatten().map(ChunkMesh::memory_bytes).sum();
        let collision = self.collision.as_ref().map_or(0, CollisionBody::memory_bytes);
        self.data.memory_bytes() + meshes + self.material.memory_bytes() + collision
    }
}
