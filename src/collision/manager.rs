//! Collision lifecycle and terrain queries against resident chunks
//!
//! Queries only read the shared [`PhysicsWorld`], so physics and sonar code
//! may call them from any thread mid-tick.

use crate::collision::heightfield::HeightfieldShape;
use crate::collision::world::SharedPhysics;
use crate::core::config::{ElevationRange, TerrainConfig};
use crate::core::sea_level::SeaLevelState;
use crate::core::types::{Result, Vec2, Vec3};
use crate::elevation::SharedElevation;
use crate::math::Ray;
use crate::terrain::{ChunkCoord, TerrainChunk};

/// Outcome of a terrain height query
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HeightQuery {
    /// Height of resident collision geometry (meters)
    Found(f32),
    /// No chunk resident; height from the elevation provider (meters)
    Fallback(f32),
    /// No chunk resident and provider fallback disabled
    NoData,
}

impl HeightQuery {
    /// Height in meters if any source answered
    pub fn height(self) -> Option<f32> {
        match self {
            HeightQuery::Found(h) | HeightQuery::Fallback(h) => Some(h),
            HeightQuery::NoData => None,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, HeightQuery::Found(_))
    }
}

/// Result of a terrain raycast
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit {
    pub hit: bool,
    pub position: Vec3,
    pub normal: Vec3,
    /// Distance from the ray origin along its direction
    pub distance: f32,
}

impl RaycastHit {
    pub const MISS: Self = Self {
        hit: false,
        position: Vec3::ZERO,
        normal: Vec3::ZERO,
        distance: 0.0,
    };
}

/// Golden angle, spacing for the spawn search spiral
const GOLDEN_ANGLE: f32 = 2.399_963;

#[derive(Clone)]
pub struct CollisionManager {
    physics: SharedPhysics,
    sea_level: SeaLevelState,
    elevation: SharedElevation,
    range: ElevationRange,
    chunk_size: f32,
    resolution: usize,
    fallback_to_provider: bool,
    max_spawn_attempts: usize,
}

impl CollisionManager {
    pub fn new(
        config: &TerrainConfig,
        physics: SharedPhysics,
        sea_level: SeaLevelState,
        elevation: SharedElevation,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            physics,
            sea_level,
            elevation,
            range: config.elevation_range(),
            chunk_size: config.chunk_size,
            resolution: config.collision_resolution as usize,
            fallback_to_provider: config.fallback_to_provider,
            max_spawn_attempts: config.max_spawn_attempts.max(1) as usize,
        })
    }

    pub fn physics(&self) -> &SharedPhysics {
        &self.physics
    }

    /// Build the chunk's heightfield body. Returns whether a body was created.
    ///
    /// Only loaded chunks get collision; a chunk that already has its body
    /// is left alone.
    pub fn create_collision(&self, chunk: &mut TerrainChunk) -> bool {
        if !chunk.is_loaded() {
            return false;
        }
        if chunk.collision.is_some() && self.physics.contains(chunk.coord) {
            return false;
        }

        let shape = HeightfieldShape::from_heightmap(
            &chunk.data.heightmap,
            self.range,
            chunk.coord.origin(self.chunk_size),
            self.chunk_size,
            self.resolution,
        );
        chunk.collision = Some(self.physics.insert(chunk.coord, shape));
        log::trace!("Collision created for chunk {}", chunk.coord);
        true
    }

    /// Free the chunk's body. Safe on a chunk without one.
    pub fn remove_collision(&self, chunk: &mut TerrainChunk) -> bool {
        let had_body = chunk.collision.take().is_some();
        self.physics.remove(chunk.coord) || had_body
    }

    fn chunk_at(&self, x: f32, z: f32) -> ChunkCoord {
        ChunkCoord::from_world(Vec3::new(x, 0.0, z), self.chunk_size)
    }

    /// Terrain height at a world position
    ///
    /// Resident collision geometry answers first. Without it the elevation
    /// provider answers (without procedural detail) when fallback is enabled.
    ///
    /// # Arguments
    /// * `x`, `z` - World position in meters
    ///
    /// # Returns
    /// `Found` from collision, `Fallback` from the provider, or `NoData`
    pub fn get_height_at(&self, x: f32, z: f32) -> HeightQuery {
        if let Some(body) = self.physics.get(self.chunk_at(x, z)) {
            return HeightQuery::Found(body.shape.height_at(x, z));
        }
        if !self.fallback_to_provider {
            return HeightQuery::NoData;
        }
        match self.elevation.lock() {
            Ok(mut provider) => HeightQuery::Fallback(self.range.to_meters(provider.get_elevation(x as f64, z as f64))),
            Err(_) => HeightQuery::NoData,
        }
    }

    /// Whether `pos` is below the live sea level and at least `clearance`
    /// above the terrain. Unknown terrain is never safe.
    pub fn is_underwater_safe(&self, pos: Vec3, clearance: f32) -> bool {
        if pos.y >= self.sea_level.get_sea_level_meters() {
            return false;
        }
        match self.get_height_at(pos.x, pos.z).height() {
            Some(ground) => pos.y > ground + clearance,
            None => false,
        }
    }

    /// First terrain hit within `max_distance`
    ///
    /// Walks the chunk grid under the ray and tests each resident heightfield
    /// for the part of the ray above its footprint. Non-resident chunks are
    /// transparent.
    ///
    /// # Arguments
    /// * `origin` - Ray start in world space
    /// * `direction` - Ray direction; need not be normalized
    /// * `max_distance` - Furthest hit accepted, in meters
    ///
    /// # Returns
    /// The nearest hit, or [`RaycastHit::MISS`]
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RaycastHit {
        let Some(ray) = Ray::new(origin, direction) else {
            return RaycastHit::MISS;
        };
        if !(max_distance > 0.0) {
            return RaycastHit::MISS;
        }

        let cs = self.chunk_size;
        let start = self.chunk_at(origin.x, origin.z);
        let (mut cx, mut cz) = (start.x, start.z);
        let dir = ray.direction;
        let step_x = if dir.x >= 0.0 { 1 } else { -1 };
        let step_z = if dir.z >= 0.0 { 1 } else { -1 };

        let boundary_t = |cell: i32, step: i32, o: f32, d: f32| {
            if d == 0.0 {
                return f32::INFINITY;
            }
            let edge = (if step > 0 { cell + 1 } else { cell }) as f32 * cs;
            ((edge - o) / d).max(0.0)
        };
        let mut t_max_x = boundary_t(cx, step_x, origin.x, dir.x);
        let mut t_max_z = boundary_t(cz, step_z, origin.z, dir.z);
        let t_delta_x = if dir.x == 0.0 { f32::INFINITY } else { cs / dir.x.abs() };
        let t_delta_z = if dir.z == 0.0 { f32::INFINITY } else { cs / dir.z.abs() };

        let eps = 1e-4 * cs;
        let mut t = 0.0f32;
        while t <= max_distance {
            let next_t = t_max_x.min(t_max_z).min(max_distance);
            if let Some(body) = self.physics.get(ChunkCoord::new(cx, cz)) {
                let from = (t - eps).max(0.0);
                if let Some(hit) = body.shape.raycast(&ray, from, next_t + eps) {
                    if hit.t <= max_distance {
                        return RaycastHit {
                            hit: true,
                            position: ray.at(hit.t),
                            normal: hit.normal,
                            distance: hit.t,
                        };
                    }
                }
            }

            if next_t >= max_distance {
                break;
            }
            if t_max_x < t_max_z {
                cx += step_x;
                t = t_max_x;
                t_max_x += t_delta_x;
            } else {
                cz += step_z;
                t = t_max_z;
                t_max_z += t_delta_z;
            }
        }
        RaycastHit::MISS
    }

    /// A position near `center` at least `min_depth` below sea level and
    /// `clearance` above terrain.
    ///
    /// Tries up to `max_spawn_attempts` candidates on a spiral out to
    /// `search_radius`, starting at `center`.
    ///
    /// # Arguments
    /// * `center` - Preferred spawn point; only x and z are used
    /// * `search_radius` - Horizontal search radius in meters
    /// * `min_depth` - Depth below sea level for every candidate
    /// * `clearance` - Required gap above the terrain
    ///
    /// # Returns
    /// The first safe candidate, or `center` at `min_depth` below the
    /// surface (with a warning) when none is safe
    pub fn find_safe_spawn_position(&self, center: Vec3, search_radius: f32, min_depth: f32, clearance: f32) -> Vec3 {
        let depth = min_depth.max(0.0);
        let attempts = self.max_spawn_attempts;
        let sea = self.sea_level.get_sea_level_meters();
        let target_y = sea - depth;

        for i in 0..attempts {
            let r = search_radius.max(0.0) * (i as f32 / attempts as f32).sqrt();
            let angle = i as f32 * GOLDEN_ANGLE;
            let xz = Vec2::new(center.x, center.z) + Vec2::from_angle(angle) * r;
            let candidate = Vec3::new(xz.x, target_y, xz.y);
            if self.is_underwater_safe(candidate, clearance) {
                log::debug!("Spawn position found after {} attempts: {}", i + 1, candidate);
                return candidate;
            }
        }

        let fallback = Vec3::new(center.x, target_y, center.z);
        log::warn!(
            "No safe spawn within {:.0} m of {} after {} attempts, using {}",
            search_radius,
            center,
            attempts,
            fallback
        );
        fallback
    }
}
