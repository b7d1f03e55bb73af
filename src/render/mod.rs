//! Renderer-facing chunk output: LOD selection, meshes and materials
//!
//! Nothing here talks to a GPU. Meshes and material uniforms are `Pod` so a
//! renderer can upload them as they are.

pub mod lod;
pub mod material;
pub mod mesh;
pub mod renderer;

pub use lod::LodSettings;
pub use material::{TerrainMaterial, TerrainMaterialUniforms, TextureData};
pub use mesh::{ChunkMesh, MeshBuilder, NeighborEdge, Neighbors, Side, TerrainVertex};
pub use renderer::ChunkRenderer;
