//! Error types for the terrain engine

use thiserror::Error;

use crate::terrain::ChunkCoord;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    /// No backing elevation data for the request (missing tile, file or raster).
    #[error("Elevation data unavailable: {0}")]
    DataUnavailable(String),

    /// A single chunk could not be built. Never aborts the streaming loop.
    #[error("Failed to load chunk ({}, {}): {reason}", coord.x, coord.z)]
    LoadFailure { coord: ChunkCoord, reason: String },

    /// Configuration rejected at construction time.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Wrap any error as a load failure for `coord`.
    pub fn load_failure(coord: ChunkCoord, reason: impl ToString) -> Self {
        Self::LoadFailure {
            coord,
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from a bad configuration rather than data.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}
