//! Terrain chunk data: heightmaps, biomes and procedural detail

pub mod biome;
pub mod builder;
pub mod chunk;
pub mod detail;
pub mod heightmap;

pub use biome::{Biome, BiomeDetector, BiomeMap};
pub use builder::{ChunkBuilder, ChunkSource};
pub use chunk::{ChunkCoord, ChunkData, ChunkState, TerrainChunk};
pub use detail::{DetailParams, ProceduralDetailGenerator};
pub use heightmap::{Heightmap, NormalMap};
