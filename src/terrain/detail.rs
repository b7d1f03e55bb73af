//! Procedural micro-relief layered onto coarse elevation samples
//!
//! Noise is sampled in world space at positions derived from global sample
//! indices, so two chunks sharing an edge compute the same noise there
//! bit for bit.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::core::config::{ElevationRange, TerrainConfig};
use crate::core::types::Vec3;
use crate::terrain::chunk::ChunkCoord;
use crate::terrain::heightmap::{Heightmap, NormalMap};

/// Parameters controlling detail synthesis
#[derive(Clone, Debug, PartialEq)]
pub struct DetailParams {
    pub seed: u32,
    /// Noise frequency in cycles per meter
    pub scale: f32,
    pub contribution: f32,
    /// Amplitude at zero distance (normalized elevation)
    pub max_amplitude: f32,
    /// `1/e` decay distance for [`ProceduralDetailGenerator::calculate_amplitude`]
    pub falloff_distance: f32,
    /// Relief below this (normalized) counts as flat
    pub flat_threshold: f32,
    pub flat_amplitude: f32,
    pub octaves: usize,
}

impl DetailParams {
    pub fn from_config(config: &TerrainConfig) -> Self {
        Self {
            seed: config.seed,
            scale: config.detail_scale,
            contribution: config.detail_contribution,
            max_amplitude: config.detail_max_amplitude,
            falloff_distance: config.detail_falloff_distance,
            flat_threshold: config.flat_terrain_threshold,
            flat_amplitude: config.flat_terrain_amplitude,
            octaves: 3,
        }
    }
}

/// Deterministic micro-relief and bump map generator
#[derive(Clone, Debug)]
pub struct ProceduralDetailGenerator {
    params: DetailParams,
    range: ElevationRange,
    noise: Fbm<Perlin>,
}

impl ProceduralDetailGenerator {
    pub fn new(params: DetailParams, range: ElevationRange) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves)
            .set_persistence(0.5)
            .set_lacunarity(2.0);
        Self { params, range, noise }
    }

    pub fn params(&self) -> &DetailParams {
        &self.params
    }

    /// Detail amplitude at a distance from the observer.
    ///
    /// Equals `max_amplitude` at 0 and decays exponentially toward 0.
    pub fn calculate_amplitude(&self, distance: f32) -> f32 {
        let d = distance.max(0.0);
        self.params.max_amplitude * (-d / self.params.falloff_distance).exp()
    }

    /// Noise in `[-1, 1]` at a world position
    pub fn noise_at(&self, x: f64, z: f64) -> f32 {
        let s = self.params.scale as f64;
        (self.noise.get([x * s, z * s]) as f32).clamp(-1.0, 1.0)
    }

    /// True when the heightmap's relief is below the flat threshold
    pub fn is_flat_terrain(&self, heightmap: &Heightmap) -> bool {
        heightmap.relief() < self.params.flat_threshold
    }

    /// Add micro-relief to a chunk heightmap covering `coord` exactly
    pub fn generate_detail(&self, base: &Heightmap, coord: ChunkCoord, chunk_size: f32) -> Heightmap {
        self.generate_detail_padded(base, coord, chunk_size, 0).0
    }

    /// Add micro-relief to a heightmap that extends `apron` samples past each
    /// chunk edge. Returns the detailed map and whether the chunk was flat.
    pub fn generate_detail_padded(
        &self,
        base: &Heightmap,
        coord: ChunkCoord,
        chunk_size: f32,
        apron: usize,
    ) -> (Heightmap, bool) {
        let quads = base.width().saturating_sub(1 + 2 * apron).max(1);
        let interior = base.crop(apron, apron, quads + 1, quads + 1);
        let flat = self.is_flat_terrain(&interior);

        let spacing = chunk_size as f64 / quads as f64;
        let first_x = coord.x as i64 * quads as i64 - apron as i64;
        let first_z = coord.z as i64 * quads as i64 - apron as i64;
        let base_amplitude = self.params.max_amplitude;
        let band = (quads as f32 / 4.0).max(1.0);
        // Samples this close to an edge can sit in a neighbour's apron, and
        // the neighbour cannot know whether this chunk is flat
        let margin = apron.max(1) as isize;

        let detailed = Heightmap::from_fn(base.width(), base.height(), base.spacing(), |i, j| {
            let amplitude = if flat {
                let li = i as isize - apron as isize;
                let lj = j as isize - apron as isize;
                let q = quads as isize;
                let edge = (li.min(q - li).min(lj).min(q - lj) - margin).max(0) as f32;
                let t = (edge / band).min(1.0);
                let fade = t * t * (3.0 - 2.0 * t);
                base_amplitude + (self.params.flat_amplitude - base_amplitude) * fade
            } else {
                base_amplitude
            };

            let x = (first_x + i as i64) as f64 * spacing;
            let z = (first_z + j as i64) as f64 * spacing;
            base.get(i, j) + self.noise_at(x, z) * amplitude * self.params.contribution
        });

        if flat {
            log::trace!("Chunk {} is flat, boosted detail", coord);
        }
        (detailed, flat)
    }

    /// Per-sample unit normals from central differences (one-sided at borders)
    pub fn generate_bump_map(&self, heightmap: &Heightmap) -> NormalMap {
        let (w, h) = (heightmap.width(), heightmap.height());
        let spacing = heightmap.spacing().max(f32::EPSILON);
        let span = self.range.span();

        NormalMap::from_fn(w, h, |x, z| {
            let x0 = x.saturating_sub(1);
            let x1 = (x + 1).min(w - 1);
            let z0 = z.saturating_sub(1);
            let z1 = (z + 1).min(h - 1);

            let dx = if x1 > x0 {
                (heightmap.get(x1, z) - heightmap.get(x0, z)) * span / ((x1 - x0) as f32 * spacing)
            } else {
                0.0
            };
            let dz = if z1 > z0 {
                (heightmap.get(x, z1) - heightmap.get(x, z0)) * span / ((z1 - z0) as f32 * spacing)
            } else {
                0.0
            };
            Vec3::new(-dx, 1.0, -dz).normalize()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> ProceduralDetailGenerator {
        ProceduralDetailGenerator::new(
            DetailParams::from_config(&TerrainConfig::default()),
            ElevationRange::planetary(),
        )
    }

    fn hilly(res: usize, spacing: f32) -> Heightmap {
        Heightmap::from_fn(res, res, spacing, |x, z| 0.5 + (x as f32 * 0.3).sin() * 0.01 + z as f32 * 0.001)
    }

    #[test]
    fn test_amplitude_decreases_with_distance() {
        let g = generator();
        assert_eq!(g.calculate_amplitude(0.0), g.params().max_amplitude);
        let mut last = g.calculate_amplitude(0.0);
        for d in [10.0, 100.0, 1000.0, 10_000.0] {
            let a = g.calculate_amplitude(d);
            assert!(a < last);
            last = a;
        }
        assert!(g.calculate_amplitude(1.0e7) < 1.0e-12);
    }

    #[test]
    fn test_detail_is_deterministic() {
        let g = generator();
        let base = hilly(17, 32.0);
        let a = g.generate_detail(&base, ChunkCoord::new(3, -2), 512.0);
        let b = g.generate_detail(&base, ChunkCoord::new(3, -2), 512.0);
        assert_eq!(a, b);
        assert_ne!(a, base);
    }

    #[test]
    fn test_shared_edge_matches() {
        let g = generator();
        let res = 17;
        // Different bases on each side; only the noise term has to agree
        let base = Heightmap::from_fn(res, res, 32.0, |_, _| 0.4);
        let left = g.generate_detail(&hilly(res, 32.0), ChunkCoord::new(0, 0), 512.0);
        let right = g.generate_detail(&base, ChunkCoord::new(1, 0), 512.0);

        let left_base = hilly(res, 32.0);
        for z in 0..res {
            let left_noise = left.get(res - 1, z) - left_base.get(res - 1, z);
            let right_noise = right.get(0, z) - base.get(0, z);
            assert!((left_noise - right_noise).abs() < 1e-6, "row {z}");
        }
    }

    #[test]
    fn test_flat_detection() {
        let g = generator();
        let flat = Heightmap::from_fn(9, 9, 64.0, |_, _| 0.3);
        assert!(g.is_flat_terrain(&flat));
        assert!(!g.is_flat_terrain(&hilly(9, 64.0)));
    }

    #[test]
    fn test_flat_terrain_gets_boost_inside_only() {
        let g = generator();
        let res = 33;
        let flat = Heightmap::from_fn(res, res, 16.0, |_, _| 0.3);
        let (detailed, was_flat) = g.generate_detail_padded(&flat, ChunkCoord::new(0, 0), 512.0, 0);
        assert!(was_flat);

        let relief = detailed.relief();
        assert!(relief > 0.0);
        assert!(relief <= 2.0 * g.params().flat_amplitude + 1e-6);

        // Border samples only carry the normal amplitude
        for i in 0..res {
            let delta = (detailed.get(i, 0) - 0.3).abs();
            assert!(delta <= g.params().max_amplitude + 1e-6);
        }
    }

    #[test]
    fn test_flat_apron_matches_neighbour_interior() {
        let g = generator();
        let quads = 16;
        let flat = Heightmap::from_fn(quads + 3, quads + 3, 32.0, |_, _| 0.3);
        let (west, west_flat) = g.generate_detail_padded(&flat, ChunkCoord::new(0, 0), 512.0, 1);
        let (east, east_flat) = g.generate_detail_padded(&flat, ChunkCoord::new(1, 0), 512.0, 1);
        assert!(west_flat && east_flat);

        // West columns 16..=18 and east columns 0..=2 are global columns 15..=17
        for z in 0..quads + 3 {
            for k in 0..3 {
                assert_eq!(west.get(quads + k, z), east.get(k, z), "column {} row {}", k, z);
            }
        }
    }

    #[test]
    fn test_flat_boost_ignores_apron() {
        let g = generator();
        let res = 17;
        let padded = Heightmap::from_fn(res + 2, res + 2, 32.0, |_, _| 0.3);
        let (from_padded, _) = g.generate_detail_padded(&padded, ChunkCoord::new(-4, 1), 512.0, 1);
        let direct = g.generate_detail(&padded.crop(1, 1, res, res), ChunkCoord::new(-4, 1), 512.0);
        assert_eq!(from_padded.crop(1, 1, res, res), direct);
    }

    #[test]
    fn test_padded_interior_matches_unpadded() {
        let g = generator();
        let res = 17;
        let padded = Heightmap::from_fn(res + 2, res + 2, 32.0, |x, z| 0.5 + x as f32 * 0.002 + z as f32 * 0.001);
        let interior = padded.crop(1, 1, res, res);

        let (from_padded, _) = g.generate_detail_padded(&padded, ChunkCoord::new(2, 5), 512.0, 1);
        let direct = g.generate_detail(&interior, ChunkCoord::new(2, 5), 512.0);
        assert_eq!(from_padded.crop(1, 1, res, res), direct);
    }

    #[test]
    fn test_bump_map_flat_points_up() {
        let g = generator();
        let bump = g.generate_bump_map(&Heightmap::from_fn(5, 5, 10.0, |_, _| 0.5));
        for n in bump.normals() {
            assert_eq!(*n, Vec3::Y);
        }
    }

    #[test]
    fn test_bump_map_tilts_against_slope() {
        let g = generator();
        let map = hilly(9, 16.0);
        let bump = g.generate_bump_map(&map);
        assert_eq!(bump, g.generate_bump_map(&map));
        // Height grows along +z, so the normal leans toward -z
        assert!(bump.get(4, 4).z < 0.0);
        assert!((bump.get(4, 4).length() - 1.0).abs() < 1e-5);
    }
}
