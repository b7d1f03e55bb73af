//! Composition root wiring every terrain subsystem together
//!
//! [`TerrainSystem`] constructs the provider, chunk builder, renderer,
//! physics world, chunk manager, collision manager and streaming loop once,
//! with explicit references between them, and forwards the queries a
//! simulation needs.

use std::path::Path;

use crate::collision::{
    self, CollisionManager, HeightQuery, PhysicsWorld, RaycastHit, SharedPhysics, SonarSample,
};
use crate::core::config::TerrainConfig;
use crate::core::sea_level::SeaLevelState;
use crate::core::types::{Result, Vec3};
use crate::elevation::{ElevationDataProvider, SharedElevation, TilesetIndex};
use crate::render::{ChunkMesh, ChunkRenderer, TerrainMaterial};
use crate::streaming::{ChunkManager, LoadMode, StreamingManager, StreamingStats};
use crate::terrain::{ChunkBuilder, ChunkCoord};

pub struct TerrainSystem {
    config: TerrainConfig,
    sea_level: SeaLevelState,
    elevation: SharedElevation,
    physics: SharedPhysics,
    streaming: StreamingManager,
}

impl TerrainSystem {
    /// Procedural terrain with budgeted loading
    pub fn new(config: TerrainConfig, sea_level: SeaLevelState) -> Result<Self> {
        let provider = ElevationDataProvider::procedural_only(&config)?;
        Self::with_provider(config, sea_level, provider, LoadMode::default())
    }

    /// Terrain over a tileset and/or source image, falling back to procedural
    pub fn open(
        config: TerrainConfig,
        sea_level: SeaLevelState,
        tileset_dir: Option<&Path>,
        source_image: Option<&Path>,
        mode: LoadMode,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = tileset_dir {
            if let Ok(index) = TilesetIndex::load(dir) {
                let tiles = index.elevation_range();
                if tiles != config.elevation_range() {
                    log::warn!(
                        "Tileset {} is normalized to [{}, {}] m but terrain scales to [{}, {}] m",
                        dir.display(),
                        tiles.min,
                        tiles.max,
                        config.min_elevation,
                        config.max_elevation
                    );
                }
            }
        }
        let provider = ElevationDataProvider::open(&config, tileset_dir, source_image)?;
        Self::with_provider(config, sea_level, provider, mode)
    }

    /// Wire every subsystem around an existing provider
    pub fn with_provider(
        config: TerrainConfig,
        sea_level: SeaLevelState,
        provider: ElevationDataProvider,
        mode: LoadMode,
    ) -> Result<Self> {
        config.validate()?;
        let elevation = provider.into_shared();
        let physics = PhysicsWorld::shared();

        let builder = ChunkBuilder::new(&config, elevation.clone())?;
        let renderer = ChunkRenderer::new(&config, builder.detail().clone(), sea_level.clone())?;
        let chunks = ChunkManager::new(&config, builder, renderer, physics.clone(), sea_level.clone())?;
        let collision = CollisionManager::new(&config, physics.clone(), sea_level.clone(), elevation.clone())?;
        let streaming = StreamingManager::new(&config, chunks, collision, sea_level.clone(), mode)?;

        log::info!(
            "Terrain system ready: {} m chunks, load {} m / unload {} m, {} LOD levels, {:?} loading",
            config.chunk_size,
            config.load_distance,
            config.unload_distance,
            config.lod_levels,
            mode
        );

        Ok(Self {
            config,
            sea_level,
            elevation,
            physics,
            streaming,
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn sea_level(&self) -> &SeaLevelState {
        &self.sea_level
    }

    pub fn elevation(&self) -> &SharedElevation {
        &self.elevation
    }

    pub fn physics(&self) -> &SharedPhysics {
        &self.physics
    }

    pub fn streaming(&self) -> &StreamingManager {
        &self.streaming
    }

    pub fn streaming_mut(&mut self) -> &mut StreamingManager {
        &mut self.streaming
    }

    pub fn chunks(&self) -> &ChunkManager {
        self.streaming.chunks()
    }

    pub fn collision(&self) -> &CollisionManager {
        self.streaming.collision()
    }

    pub fn set_load_mode(&mut self, mode: LoadMode) -> Result<()> {
        self.streaming.set_load_mode(mode)
    }

    /// Advance streaming by one tick
    pub fn update(&mut self, observer: Vec3) -> StreamingStats {
        self.streaming.update(observer);
        self.streaming.stats()
    }

    pub fn get_loading_progress(&self) -> f32 {
        self.streaming.get_loading_progress()
    }

    pub fn get_loaded_chunks(&self) -> Vec<ChunkCoord> {
        self.chunks().get_loaded_chunks()
    }

    pub fn get_memory_usage_mb(&self) -> f32 {
        self.chunks().get_memory_usage_mb()
    }

    /// Overview level for a display density
    pub fn get_lod_for_zoom(&self, meters_per_pixel: f32) -> u32 {
        match self.elevation.lock() {
            Ok(provider) => provider.get_lod_for_zoom(meters_per_pixel),
            Err(poisoned) => poisoned.into_inner().get_lod_for_zoom(meters_per_pixel),
        }
    }

    pub fn get_height_at(&self, x: f32, z: f32) -> HeightQuery {
        self.collision().get_height_at(x, z)
    }

    pub fn is_underwater_safe(&self, pos: Vec3, clearance: f32) -> bool {
        self.collision().is_underwater_safe(pos, clearance)
    }

    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RaycastHit {
        self.collision().raycast(origin, direction, max_distance)
    }

    pub fn find_safe_spawn_position(&self, center: Vec3, search_radius: f32, min_depth: f32, clearance: f32) -> Vec3 {
        self.collision()
            .find_safe_spawn_position(center, search_radius, min_depth, clearance)
    }

    pub fn get_terrain_geometry_for_sonar(&self, center: Vec3, radius: f32, level: u32) -> Vec<SonarSample> {
        collision::get_terrain_geometry_for_sonar(self.chunks(), self.config.elevation_range(), center, radius, level)
    }

    pub fn query_terrain_for_sonar_beam(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_range: f32,
        half_angle: f32,
        level: u32,
    ) -> Vec<SonarSample> {
        collision::query_terrain_for_sonar_beam(
            self.chunks(),
            self.config.elevation_range(),
            origin,
            direction,
            max_range,
            half_angle,
            level,
        )
    }

    pub fn get_surface_normal_for_sonar(&self, x: f32, z: f32) -> Option<Vec3> {
        collision::get_surface_normal_for_sonar(&self.physics, self.config.chunk_size, x, z)
    }

    /// Mesh a renderer should draw for `coord`
    pub fn get_chunk_mesh(&self, coord: ChunkCoord) -> Option<&ChunkMesh> {
        self.chunks().get_chunk(coord)?.current_mesh()
    }

    pub fn get_chunk_material(&self, coord: ChunkCoord) -> Option<&TerrainMaterial> {
        self.chunks().get_chunk(coord).map(|chunk| &chunk.material)
    }
}
