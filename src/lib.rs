//! Bathy - terrain streaming, LOD and collision for open-world submarine simulation

pub mod core;
pub mod math;
pub mod elevation;
pub mod terrain;
pub mod render;
pub mod streaming;
pub mod collision;
pub mod world;

pub use crate::core::{Error, Result, SeaLevelState, TerrainConfig};
pub use crate::streaming::LoadMode;
pub use crate::world::TerrainSystem;
