//! Mesh and material construction for resident chunks

use crate::core::config::{ElevationRange, TerrainConfig};
use crate::core::sea_level::SeaLevelState;
use crate::core::types::Result;
use crate::render::lod::LodSettings;
use crate::render::material::TerrainMaterial;
use crate::render::mesh::{ChunkMesh, MeshBuilder, Neighbors};
use crate::terrain::{BiomeMap, ChunkData, NormalMap, ProceduralDetailGenerator, TerrainChunk};

/// Builds chunk geometry and materials, and picks each chunk's LOD
#[derive(Clone, Debug)]
pub struct ChunkRenderer {
    mesher: MeshBuilder,
    lod: LodSettings,
    detail: ProceduralDetailGenerator,
    range: ElevationRange,
    sea_level: SeaLevelState,
}

impl ChunkRenderer {
    pub fn new(config: &TerrainConfig, detail: ProceduralDetailGenerator, sea_level: SeaLevelState) -> Result<Self> {
        config.validate()?;
        let range = config.elevation_range();
        Ok(Self {
            mesher: MeshBuilder::new(config.chunk_size, range, config.skirt_depth),
            lod: LodSettings::from_config(config),
            detail,
            range,
            sea_level,
        })
    }

    pub fn lod_settings(&self) -> &LodSettings {
        &self.lod
    }

    /// Mesh of `data` at `lod`, stitched against `neighbors`
    pub fn create_chunk_mesh(&self, data: &ChunkData, lod: u32, neighbors: &Neighbors<'_>) -> ChunkMesh {
        let lod = lod.min(self.lod.max_lod());
        self.mesher
            .build(&data.heightmap, &data.biome_map, &data.bump_map, data.coord, lod, neighbors)
    }

    /// Material at the current sea level.
    ///
    /// Reads the sea level when called, so chunks built after a change pick
    /// up the new value.
    pub fn create_chunk_material(&self, biome_map: &BiomeMap, bump_map: &NormalMap) -> TerrainMaterial {
        TerrainMaterial::new(
            biome_map,
            bump_map,
            self.range,
            self.sea_level.get_sea_level_meters(),
            self.detail.calculate_amplitude(0.0),
        )
    }

    /// Select the chunk's LOD for `distance` and make sure its mesh exists.
    ///
    /// Missing meshes are built without neighbour stitching; [`Self::restitch`]
    /// fixes their edges once every chunk has its LOD. Returns whether the
    /// LOD changed.
    pub fn update_chunk_lod(&self, chunk: &mut TerrainChunk, distance: f32) -> bool {
        let max_lod = (chunk.lod_meshes.len() as u32).saturating_sub(1).min(self.lod.max_lod());
        let lod = self.lod.lod_from_distance(distance).min(max_lod);
        let changed = lod != chunk.current_lod;
        chunk.current_lod = lod;
        chunk
            .material
            .set_detail_strength(self.detail.calculate_amplitude(distance));

        if chunk.mesh(lod).is_none() {
            let mesh = self.create_chunk_mesh(&chunk.data, lod, &Neighbors::default());
            if let Some(slot) = chunk.lod_meshes.get_mut(lod as usize) {
                *slot = Some(mesh);
            }
        }
        // Only the current level stays resident
        for (level, slot) in chunk.lod_meshes.iter_mut().enumerate() {
            if level != lod as usize {
                *slot = None;
            }
        }
        changed
    }

    /// Rebuilt current mesh when its edges were stitched against different
    /// neighbour LODs than `neighbors` now has
    pub fn restitch(&self, chunk: &TerrainChunk, neighbors: &Neighbors<'_>) -> Option<ChunkMesh> {
        let lod = chunk.current_lod;
        let wanted = neighbors.welds(lod);
        match chunk.mesh(lod) {
            Some(mesh) if mesh.welds == wanted => None,
            _ => Some(self.create_chunk_mesh(&chunk.data, lod, neighbors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::ElevationDataProvider;
    use crate::render::mesh::NeighborEdge;
    use crate::terrain::{ChunkBuilder, ChunkCoord};

    fn setup() -> (TerrainConfig, ChunkBuilder, ChunkRenderer, SeaLevelState) {
        let config = TerrainConfig {
            heightmap_resolution: 17,
            lod_levels: 3,
            ..Default::default()
        };
        let provider = ElevationDataProvider::procedural_only(&config).unwrap().into_shared();
        let builder = ChunkBuilder::new(&config, provider).unwrap();
        let sea = SeaLevelState::at_datum(config.elevation_range());
        let renderer = ChunkRenderer::new(&config, builder.detail().clone(), sea.clone()).unwrap();
        (config, builder, renderer, sea)
    }

    fn chunk(builder: &ChunkBuilder, renderer: &ChunkRenderer, coord: ChunkCoord) -> TerrainChunk {
        let data = builder.build(coord, 0.0).unwrap();
        let material = renderer.create_chunk_material(&data.biome_map, &data.bump_map);
        TerrainChunk::new(data, material, 3, 0)
    }

    #[test]
    fn test_update_lod_builds_lazily() {
        let (_, builder, renderer, _) = setup();
        let mut c = chunk(&builder, &renderer, ChunkCoord::new(0, 0));
        assert!(c.lod_meshes.iter().all(Option::is_none));

        assert!(!renderer.update_chunk_lod(&mut c, 10.0));
        assert!(c.mesh(0).is_some());
        assert!(c.mesh(1).is_none());

        assert!(renderer.update_chunk_lod(&mut c, 700.0));
        assert_eq!(c.current_lod, 1);
        assert_eq!(c.current_mesh().unwrap().grid_size, 9);

        // Beyond the ladder: clamped to the last level
        renderer.update_chunk_lod(&mut c, 1.0e7);
        assert_eq!(c.current_lod, 2);
    }

    #[test]
    fn test_update_lod_frees_other_levels() {
        let (_, builder, renderer, _) = setup();
        let mut c = chunk(&builder, &renderer, ChunkCoord::new(0, 0));

        renderer.update_chunk_lod(&mut c, 10.0);
        let fine = c.memory_bytes();
        renderer.update_chunk_lod(&mut c, 1.0e7);
        assert!(c.mesh(0).is_none());
        assert!(c.mesh(2).is_some());
        assert!(c.memory_bytes() < fine);

        // Coming back rebuilds the fine mesh and drops the coarse one
        renderer.update_chunk_lod(&mut c, 10.0);
        assert_eq!(c.lod_meshes.iter().filter(|m| m.is_some()).count(), 1);
        assert_eq!(c.memory_bytes(), fine);
    }

    #[test]
    fn test_lod_monotonic_over_distance() {
        let (_, builder, renderer, _) = setup();
        let mut c = chunk(&builder, &renderer, ChunkCoord::new(0, 0));
        let mut last = 0;
        for d in (0..5000).step_by(37) {
            renderer.update_chunk_lod(&mut c, d as f32);
            assert!(c.current_lod >= last);
            last = c.current_lod;
        }
    }

    #[test]
    fn test_detail_strength_fades_with_distance() {
        let (_, builder, renderer, _) = setup();
        let mut c = chunk(&builder, &renderer, ChunkCoord::new(0, 0));
        renderer.update_chunk_lod(&mut c, 0.0);
        let near = c.material.uniforms.detail_strength;
        renderer.update_chunk_lod(&mut c, 4000.0);
        assert!(c.material.uniforms.detail_strength < near);
    }

    #[test]
    fn test_material_reads_current_sea_level() {
        let (_, builder, renderer, sea) = setup();
        let data = builder.build(ChunkCoord::new(0, 0), 0.0).unwrap();
        sea.set_sea_level_meters(-250.0);
        let material = renderer.create_chunk_material(&data.biome_map, &data.bump_map);
        assert!((material.sea_level_meters() + 250.0).abs() < 1e-2);
    }

    #[test]
    fn test_restitch_only_when_neighbours_change() {
        let (_, builder, renderer, _) = setup();
        let mut here = chunk(&builder, &renderer, ChunkCoord::new(0, 0));
        let west = chunk(&builder, &renderer, ChunkCoord::new(-1, 0));
        renderer.update_chunk_lod(&mut here, 0.0);

        assert!(renderer.restitch(&here, &Neighbors::default()).is_none());

        let neighbors = Neighbors {
            west: Some(NeighborEdge {
                heightmap: &west.data.heightmap,
                lod: 2,
            }),
            ..Default::default()
        };
        let mesh = renderer.restitch(&here, &neighbors).unwrap();
        assert_eq!(mesh.welds, [2, 0, 0, 0]);
        here.lod_meshes[0] = Some(mesh);
        assert!(renderer.restitch(&here, &neighbors).is_none());
    }
}
