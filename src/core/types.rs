//! Core type aliases and re-exports

pub use glam::{
    Vec2, Vec3,
    DVec2,
    IVec2,
};

/// Standard Result type for the engine
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Convert a byte count to mebibytes.
pub fn bytes_to_mb(bytes: usize) -> f32 {
    bytes as f32 / (1024.0 * 1024.0)
}
