//! Procedural elevation, the last link of the fallback chain

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::core::config::TerrainConfig;

/// Parameters controlling procedural elevation
#[derive(Clone, Debug, PartialEq)]
pub struct ProceduralParams {
    pub seed: u32,
    /// Horizontal feature size in meters (larger = smoother)
    pub scale: f32,
    /// Normalized elevation the noise oscillates around
    pub base_level: f32,
    /// Normalized half-range of the noise
    pub amplitude: f32,
    pub octaves: u32,
    pub persistence: f32,
    pub lacunarity: f32,
}

impl ProceduralParams {
    /// Ocean floor around -3500 m with +-3000 m of relief
    pub fn from_config(config: &TerrainConfig) -> Self {
        let range = config.elevation_range();
        Self {
            seed: config.seed,
            scale: 40_000.0,
            base_level: range.to_normalized(-3500.0).clamp(0.0, 1.0),
            amplitude: (3000.0 / range.span()).min(0.5),
            octaves: 5,
            persistence: 0.5,
            lacunarity: 2.0,
        }
    }
}

/// Deterministic fractal Brownian motion heights; never fails
#[derive(Clone, Debug)]
pub struct ProceduralElevation {
    params: ProceduralParams,
    noise: Fbm<Perlin>,
}

impl ProceduralElevation {
    pub fn new(params: ProceduralParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves as usize)
            .set_persistence(params.persistence as f64)
            .set_lacunarity(params.lacunarity as f64);
        Self { params, noise }
    }

    pub fn params(&self) -> &ProceduralParams {
        &self.params
    }

    /// Normalized height in `[0, 1]` at world position `(x, z)`
    pub fn height_at(&self, x: f64, z: f64) -> f32 {
        let scale = self.params.scale as f64;
        let n = self.noise.get([x / scale, z / scale]) as f32;
        (self.params.base_level + n.clamp(-1.0, 1.0) * self.params.amplitude).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procedural(seed: u32) -> ProceduralElevation {
        ProceduralElevation::new(ProceduralParams {
            seed,
            ..ProceduralParams::from_config(&TerrainConfig::default())
        })
    }

    #[test]
    fn test_height_in_range_and_deterministic() {
        let p = procedural(12345);
        for (x, z) in [(0.0, 0.0), (1.0e5, -3.0e4), (-7.5e6, 2.0e6)] {
            let h = p.height_at(x, z);
            assert!((0.0..=1.0).contains(&h));
            assert_eq!(h, p.height_at(x, z));
        }
    }

    #[test]
    fn test_default_is_below_datum() {
        let config = TerrainConfig::default();
        let p = procedural(config.seed);
        let datum = config.elevation_range().to_normalized(0.0);
        assert!(p.params().base_level < datum);
        assert!(p.params().base_level + p.params().amplitude < datum);
    }

    #[test]
    fn test_seeds_differ() {
        let a = procedural(1);
        let b = procedural(2);
        assert_ne!(a.height_at(12_345.0, 6_789.0), b.height_at(12_345.0, 6_789.0));
    }
}
