//! Per-chunk terrain material: biome and bump textures plus shader uniforms

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;

use crate::core::config::ElevationRange;
use crate::terrain::{BiomeMap, NormalMap};

/// Terrain shading parameters
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TerrainMaterialUniforms {
    /// Sea level in world space (meters)
    pub sea_level_meters: f32,
    /// Vertical range the mesh heights were scaled into
    pub min_elevation: f32,
    pub max_elevation: f32,
    /// Micro-relief strength at the chunk's current distance
    pub detail_strength: f32,
}

/// Row-major RGBA8 texture
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.len()
    }

    /// Copy into an `image` buffer, e.g. to dump a chunk for inspection
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

/// Biome colour in RGB, biome id in alpha
fn biome_texture(biomes: &BiomeMap) -> TextureData {
    let mut pixels = Vec::with_capacity(biomes.biomes().len() * 4);
    for biome in biomes.biomes() {
        let [r, g, b, _] = biome.color();
        pixels.extend_from_slice(&[r, g, b, biome.id()]);
    }
    TextureData {
        width: biomes.width() as u32,
        height: biomes.height() as u32,
        pixels,
    }
}

/// Normals packed as `n * 0.5 + 0.5`
fn bump_texture(bump: &NormalMap) -> TextureData {
    let pack = |v: f32| ((v * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut pixels = Vec::with_capacity(bump.normals().len() * 4);
    for n in bump.normals() {
        pixels.extend_from_slice(&[pack(n.x), pack(n.y), pack(n.z), 255]);
    }
    TextureData {
        width: bump.width() as u32,
        height: bump.height() as u32,
        pixels,
    }
}

/// Material of one chunk
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainMaterial {
    pub biome_texture: TextureData,
    pub bump_texture: TextureData,
    pub uniforms: TerrainMaterialUniforms,
}

impl TerrainMaterial {
    pub fn new(
        biomes: &BiomeMap,
        bump: &NormalMap,
        range: ElevationRange,
        sea_level_meters: f32,
        detail_strength: f32,
    ) -> Self {
        Self {
            biome_texture: biome_texture(biomes),
            bump_texture: bump_texture(bump),
            uniforms: TerrainMaterialUniforms {
                sea_level_meters,
                min_elevation: range.min,
                max_elevation: range.max,
                detail_strength,
            },
        }
    }

    pub fn sea_level_meters(&self) -> f32 {
        self.uniforms.sea_level_meters
    }

    pub fn set_sea_level(&mut self, meters: f32) {
        self.uniforms.sea_level_meters = meters;
    }

    pub fn set_detail_strength(&mut self, strength: f32) {
        self.uniforms.detail_strength = strength;
    }

    /// Replace the biome texture after reclassification
    pub fn update_biomes(&mut self, biomes: &BiomeMap) {
        self.biome_texture = biome_texture(biomes);
    }

    pub fn uniform_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.uniforms)
    }

    pub fn memory_bytes(&self) -> usize {
        self.biome_texture.memory_bytes()
            + self.bump_texture.memory_bytes()
            + std::mem::size_of::<TerrainMaterialUniforms>()
    }
}
