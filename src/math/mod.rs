//! Geometric primitives for terrain queries

pub mod aabb;
pub mod ray;

pub use aabb::Aabb;
pub use ray::{Ray, TriangleHit};
