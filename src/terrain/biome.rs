//! Biome classification from elevation and slope relative to sea level

use crate::core::config::{BiomeThresholds, ElevationRange};
use crate::terrain::heightmap::Heightmap;

/// Surface classification of one heightmap sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Biome {
    DeepWater = 0,
    ShallowWater = 1,
    Beach = 2,
    Cliff = 3,
    Grass = 4,
    Rock = 5,
    Snow = 6,
}

impl Biome {
    pub const ALL: [Biome; 7] = [
        Biome::DeepWater,
        Biome::ShallowWater,
        Biome::Beach,
        Biome::Cliff,
        Biome::Grass,
        Biome::Rock,
        Biome::Snow,
    ];

    /// Numeric id stored in biome textures and vertex attributes
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Convert a numeric id back; unknown ids map to deep water
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Biome::ShallowWater,
            2 => Biome::Beach,
            3 => Biome::Cliff,
            4 => Biome::Grass,
            5 => Biome::Rock,
            6 => Biome::Snow,
            _ => Biome::DeepWater,
        }
    }

    pub fn is_water(self) -> bool {
        matches!(self, Biome::DeepWater | Biome::ShallowWater)
    }

    /// Base albedo used by map colorization and the biome texture
    pub fn color(self) -> [u8; 4] {
        match self {
            Biome::DeepWater => [16, 42, 92, 255],
            Biome::ShallowWater => [40, 110, 160, 255],
            Biome::Beach => [222, 204, 160, 255],
            Biome::Cliff => [110, 100, 92, 255],
            Biome::Grass => [86, 142, 64, 255],
            Biome::Rock => [128, 124, 120, 255],
            Biome::Snow => [240, 244, 250, 255],
        }
    }
}

/// Per-sample biome grid with the footprint of its heightmap
#[derive(Clone, Debug, PartialEq)]
pub struct BiomeMap {
    width: usize,
    height: usize,
    biomes: Vec<Biome>,
}

impl BiomeMap {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn biomes(&self) -> &[Biome] {
        &self.biomes
    }

    pub fn get(&self, x: usize, z: usize) -> Biome {
        self.biomes[z * self.width + x]
    }

    pub fn crop(&self, x0: usize, z0: usize, width: usize, height: usize) -> BiomeMap {
        let mut biomes = Vec::with_capacity(width * height);
        for z in 0..height {
            for x in 0..width {
                biomes.push(self.get(x0 + x, z0 + z));
            }
        }
        BiomeMap {
            width,
            height,
            biomes,
        }
    }

    /// Number of samples of the given biome
    pub fn count(&self, biome: Biome) -> usize {
        self.biomes.iter().filter(|&&b| b == biome).count()
    }

    pub fn memory_bytes(&self) -> usize {
        self.biomes.len()
    }
}

/// Classifies heightmap samples into biomes.
///
/// Pure: the same heightmap and sea level always give the same map.
#[derive(Clone, Debug)]
pub struct BiomeDetector {
    thresholds: BiomeThresholds,
    range: ElevationRange,
}

impl BiomeDetector {
    pub fn new(thresholds: BiomeThresholds, range: ElevationRange) -> Self {
        Self { thresholds, range }
    }

    pub fn thresholds(&self) -> &BiomeThresholds {
        &self.thresholds
    }

    /// Classify every sample of `heightmap` against `sea_level_meters`
    pub fn detect_biomes(&self, heightmap: &Heightmap, sea_level_meters: f32) -> BiomeMap {
        let (w, h) = (heightmap.width(), heightmap.height());
        let mut biomes = Vec::with_capacity(w * h);
        for z in 0..h {
            for x in 0..w {
                let elevation = self.range.to_meters(heightmap.get(x, z));
                let slope = self.slope_at(heightmap, x, z);
                biomes.push(self.classify(elevation, slope, sea_level_meters));
            }
        }
        BiomeMap {
            width: w,
            height: h,
            biomes,
        }
    }

    /// Classify a single sample from its elevation and slope (rise over run)
    pub fn classify(&self, elevation: f32, slope: f32, sea_level: f32) -> Biome {
        let t = &self.thresholds;
        if elevation < sea_level - t.deep_water_depth {
            return Biome::DeepWater;
        }
        if elevation < sea_level {
            return Biome::ShallowWater;
        }
        if elevation < sea_level + t.beach_height {
            return Biome::Beach;
        }
        if slope > t.cliff_slope {
            return Biome::Cliff;
        }

        let above = elevation - sea_level;
        if above >= t.snow_height {
            Biome::Snow
        } else if above >= t.rock_height {
            Biome::Rock
        } else {
            Biome::Grass
        }
    }

    /// Slope magnitude from central differences over the 4-neighbourhood,
    /// one-sided at the borders.
    fn slope_at(&self, heightmap: &Heightmap, x: usize, z: usize) -> f32 {
        let spacing = heightmap.spacing();
        if spacing <= 0.0 {
            return 0.0;
        }
        let span = self.range.span();

        let x0 = x.saturating_sub(1);
        let x1 = (x + 1).min(heightmap.width() - 1);
        let z0 = z.saturating_sub(1);
        let z1 = (z + 1).min(heightmap.height() - 1);

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
        (dx * dx + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> BiomeDetector {
        BiomeDetector::new(BiomeThresholds::default(), ElevationRange::new(-1000.0, 3000.0))
    }

    fn flat(range: &ElevationRange, meters: f32) -> Heightmap {
        let n = range.to_normalized(meters);
        Heightmap::from_fn(4, 4, 10.0, |_, _| n)
    }

    #[test]
    fn test_id_round_trip() {
        for biome in Biome::ALL {
            assert_eq!(Biome::from_id(biome.id()), biome);
        }
        assert_eq!(Biome::from_id(200), Biome::DeepWater);
    }

    #[test]
    fn test_water_bands() {
        let d = detector();
        assert_eq!(d.classify(-500.0, 0.0, 0.0), Biome::DeepWater);
        assert_eq!(d.classify(-100.0, 0.0, 0.0), Biome::ShallowWater);
        assert_eq!(d.classify(-0.1, 0.0, 0.0), Biome::ShallowWater);
        assert_eq!(d.classify(0.0, 0.0, 0.0), Biome::Beach);
        assert_eq!(d.classify(5.0, 5.0, 0.0), Biome::Beach);
    }

    #[test]
    fn test_land_bands() {
        let d = detector();
        assert_eq!(d.classify(100.0, 0.1, 0.0), Biome::Grass);
        assert_eq!(d.classify(100.0, 2.0, 0.0), Biome::Cliff);
        assert_eq!(d.classify(1500.0, 0.1, 0.0), Biome::Rock);
        assert_eq!(d.classify(2600.0, 0.1, 0.0), Biome::Snow);
    }

    #[test]
    fn test_sea_level_shifts_classification() {
        let d = detector();
        let range = ElevationRange::new(-1000.0, 3000.0);
        let map = flat(&range, 50.0);

        let dry = d.detect_biomes(&map, 0.0);
        assert_eq!(dry.count(Biome::Grass), 16);

        let flooded = d.detect_biomes(&map, 100.0);
        assert_eq!(flooded.count(Biome::ShallowWater), 16);
    }

    #[test]
    fn test_steep_ramp_is_cliff() {
        let d = detector();
        let range = ElevationRange::new(-1000.0, 3000.0);
        // 100 m rise per 10 m sample, well above sea level
        let map = Heightmap::from_fn(5, 5, 10.0, |x, _| range.to_normalized(500.0 + x as f32 * 100.0));
        let biomes = d.detect_biomes(&map, 0.0);
        assert_eq!(biomes.get(2, 2), Biome::Cliff);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let d = detector();
        let map = Heightmap::from_fn(9, 9, 4.0, |x, z| ((x * 31 + z * 17) % 23) as f32 / 23.0);
        assert_eq!(d.detect_biomes(&map, 12.5), d.detect_biomes(&map, 12.5));
    }

    #[test]
    fn test_crop() {
        let d = detector();
        let range = ElevationRange::new(-1000.0, 3000.0);
        let map = Heightmap::from_fn(4, 4, 10.0, |x, _| range.to_normalized(if x == 0 { -500.0 } else { 100.0 }));
        let cropped = d.detect_biomes(&map, 0.0).crop(1, 1, 2, 2);
        assert_eq!(cropped.width(), 2);
        assert_eq!(cropped.count(Biome::DeepWater), 0);
    }
}
