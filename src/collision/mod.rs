//! Heightfield collision and terrain queries

pub mod heightfield;
pub mod manager;
pub mod sonar;
pub mod world;

pub use heightfield::HeightfieldShape;
pub use manager::{CollisionManager, HeightQuery, RaycastHit};
pub use sonar::{
    get_surface_normal_for_sonar, get_terrain_geometry_for_sonar, query_terrain_for_sonar_beam, SonarSample,
};
pub use world::{CollisionBody, PhysicsWorld, SharedPhysics};
