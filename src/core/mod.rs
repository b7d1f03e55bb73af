//! Core engine types and utilities

pub mod types;
pub mod error;
pub mod logging;
pub mod config;
pub mod sea_level;

pub use types::*;
pub use error::Error;
pub use config::{BiomeThresholds, ElevationRange, TerrainConfig};
pub use sea_level::{SeaLevel, SeaLevelState, SeaLevelWatcher};
