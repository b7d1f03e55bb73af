//! Elevation data: tilesets, source images and the procedural fallback

pub mod cache;
pub mod procedural;
pub mod provider;
pub mod source;
pub mod source_image;
pub mod tiled;
pub mod tileset;

pub use cache::{CacheStats, TileCache, TileKey};
pub use procedural::{ProceduralElevation, ProceduralParams};
pub use provider::{ElevationDataProvider, SharedElevation, WorldRect};
pub use source::ElevationSource;
pub use source_image::SourceImageElevation;
pub use tiled::TiledElevationProvider;
pub use tileset::{ElevationTile, Raster, TileEntry, TilesetIndex, TilesetWriter};
