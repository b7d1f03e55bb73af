//! Read-only terrain samples for sonar
//!
//! Every function here projects data already held by resident chunks and
//! never requests a load. Simplification level `k` keeps every `2^k`-th
//! heightmap sample.

use crate::collision::world::PhysicsWorld;
use crate::core::config::ElevationRange;
use crate::core::types::Vec3;
use crate::render::lod::sample_step;
use crate::streaming::ChunkManager;
use crate::terrain::{ChunkCoord, TerrainChunk};

/// One terrain point seen by sonar
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SonarSample {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Decimated samples of one chunk.
///
/// The last row and column are skipped because the next chunk reports them
/// as its first.
fn chunk_samples(
    chunk: &TerrainChunk,
    chunk_size: f32,
    range: ElevationRange,
    level: u32,
) -> impl Iterator<Item = SonarSample> + '_ {
    let heightmap = &chunk.data.heightmap;
    let normals = &chunk.data.bump_map;
    let res = heightmap.width();
    let spacing = chunk_size / (res - 1) as f32;
    let origin = chunk.coord.origin(chunk_size);
    let step = sample_step(level).min(res - 1).max(1);

    (0..res - 1).step_by(step).flat_map(move |j| {
        (0..res - 1).step_by(step).map(move |i| SonarSample {
            position: Vec3::new(
                origin.x + i as f32 * spacing,
                range.to_meters(heightmap.get(i, j)),
                origin.y + j as f32 * spacing,
            ),
            normal: normals.get(i, j),
        })
    })
}

/// Resident chunks whose footprint comes within `radius` of `center`
fn chunks_near<'a>(
    chunks: &'a ChunkManager,
    range: ElevationRange,
    center: Vec3,
    radius: f32,
) -> impl Iterator<Item = &'a TerrainChunk> + 'a {
    let size = chunks.chunk_size();
    chunks.chunks().filter(move |chunk| {
        chunk.is_loaded() && chunk.coord.bounds(size, range.min, range.max).distance_squared(center) <= radius * radius
    })
}

/// Terrain points within `radius` of `center`, sorted by distance
pub fn get_terrain_geometry_for_sonar(
    chunks: &ChunkManager,
    range: ElevationRange,
    center: Vec3,
    radius: f32,
    level: u32,
) -> Vec<SonarSample> {
    let size = chunks.chunk_size();
    let mut samples: Vec<SonarSample> = chunks_near(chunks, range, center, radius)
        .flat_map(|chunk| chunk_samples(chunk, size, range, level))
        .filter(|s| s.position.distance_squared(center) <= radius * radius)
        .collect();
    samples.sort_by(|a, b| {
        a.position
            .distance_squared(center)
            .total_cmp(&b.position.distance_squared(center))
    });
    samples
}

/// Terrain points inside a beam cone, sorted by range from `origin`.
///
/// `half_angle` is in radians between the beam axis and its edge.
pub fn query_terrain_for_sonar_beam(
    chunks: &ChunkManager,
    range: ElevationRange,
    origin: Vec3,
    direction: Vec3,
    max_range: f32,
    half_angle: f32,
    level: u32,
) -> Vec<SonarSample> {
    let Some(axis) = direction.try_normalize() else {
        return Vec::new();
    };
    let cos_limit = half_angle.clamp(0.0, std::f32::consts::PI).cos();

    let mut hits: Vec<(f32, SonarSample)> = get_terrain_geometry_for_sonar(chunks, range, origin, max_range, level)
        .into_iter()
        .filter_map(|sample| {
            let to = sample.position - origin;
            let dist = to.length();
            if dist == 0.0 || to.dot(axis) / dist >= cos_limit {
                Some((dist, sample))
            } else {
                None
            }
        })
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0));
    hits.into_iter().map(|(_, s)| s).collect()
}

/// Upward surface normal at a world (x, z), if collision is resident there
pub fn get_surface_normal_for_sonar(physics: &PhysicsWorld, chunk_size: f32, x: f32, z: f32) -> Option<Vec3> {
    let coord = ChunkCoord::from_world(Vec3::new(x, 0.0, z), chunk_size);
    let body = physics.get(coord)?;
    body.shape.contains(x, z).then(|| body.shape.normal_at(x, z))
}
