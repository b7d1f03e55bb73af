//! Distance-based level of detail for chunk meshes
//!
//! LOD `k` covers distances below `base_lod_distance * lod_distance_multiplier^k`;
//! the last level covers everything beyond. Each level takes every `2^k`-th
//! heightmap sample, halving mesh resolution per step.

use crate::core::config::TerrainConfig;

/// Thresholds for LOD selection
#[derive(Clone, Debug, PartialEq)]
pub struct LodSettings {
    /// Upper distance bound of each level except the last
    thresholds: Vec<f32>,
    levels: u32,
}

impl LodSettings {
    pub fn new(levels: u32, base_distance: f32, multiplier: f32) -> Self {
        let levels = levels.max(1);
        let thresholds = (0..levels - 1)
            .map(|k| base_distance * multiplier.powi(k as i32))
            .collect();
        Self { thresholds, levels }
    }

    pub fn from_config(config: &TerrainConfig) -> Self {
        Self::new(config.lod_levels, config.base_lod_distance, config.lod_distance_multiplier)
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn max_lod(&self) -> u32 {
        self.levels - 1
    }

    /// Distance where `lod` ends (`f32::MAX` for the last level)
    pub fn threshold(&self, lod: u32) -> f32 {
        self.thresholds.get(lod as usize).copied().unwrap_or(f32::MAX)
    }

    /// LOD for a distance. Non-decreasing in distance.
    pub fn lod_from_distance(&self, distance: f32) -> u32 {
        self.thresholds
            .iter()
            .position(|&max_dist| distance < max_dist)
            .map_or(self.max_lod(), |level| level as u32)
    }
}

/// Heightmap sample stride at `lod`
pub fn sample_step(lod: u32) -> usize {
    1 << lod
}

/// Vertices per edge of an LOD mesh over a `resolution`-sample heightmap
pub fn mesh_resolution(resolution: usize, lod: u32) -> usize {
    (resolution - 1) / sample_step(lod) + 1
}
