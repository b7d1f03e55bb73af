//! Resident chunk map: residency, coordinate transforms and the memory budget
//!
//! The map has a single writer (the streaming loop). Chunks enter it fully
//! built, so every chunk a reader can see is `Loaded`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::collision::SharedPhysics;
use crate::core::config::TerrainConfig;
use crate::core::error::Error;
use crate::core::sea_level::SeaLevelState;
use crate::core::types::{bytes_to_mb, Result, Vec2, Vec3};
use crate::render::{ChunkMesh, ChunkRenderer, NeighborEdge, Neighbors, Side};
use crate::streaming::budget::MemoryBudget;
use crate::terrain::{ChunkBuilder, ChunkCoord, ChunkData, ChunkSource, ChunkState, TerrainChunk};

pub struct ChunkManager {
    chunks: HashMap<ChunkCoord, TerrainChunk>,
    builder: ChunkBuilder,
    source: Arc<dyn ChunkSource>,
    renderer: ChunkRenderer,
    physics: SharedPhysics,
    sea_level: SeaLevelState,
    budget: MemoryBudget,
    chunk_size: f32,
    load_distance: f32,
    lod_levels: u32,
    /// Logical clock for LRU; advanced on every access
    tick: u64,
    observer: Option<Vec3>,
    evicted_total: u64,
}

impl ChunkManager {
    pub fn new(
        config: &TerrainConfig,
        builder: ChunkBuilder,
        renderer: ChunkRenderer,
        physics: SharedPhysics,
        sea_level: SeaLevelState,
    ) -> Result<Self> {
        config.validate()?;
        let source: Arc<dyn ChunkSource> = Arc::new(builder.clone());
        Ok(Self {
            chunks: HashMap::new(),
            builder,
            source,
            renderer,
            physics,
            sea_level,
            budget: MemoryBudget::new(config.max_cache_memory_mb),
            chunk_size: config.chunk_size,
            load_distance: config.load_distance,
            lod_levels: config.lod_levels,
            tick: 0,
            observer: None,
            evicted_total: 0,
        })
    }

    /// Build chunk data through `source` instead of the elevation builder
    pub fn with_source(mut self, source: Arc<dyn ChunkSource>) -> Self {
        self.source = source;
        self
    }

    pub fn source(&self) -> Arc<dyn ChunkSource> {
        self.source.clone()
    }

    pub fn renderer(&self) -> &ChunkRenderer {
        &self.renderer
    }

    pub fn chunk_size(&self) -> f32 {
        self.chunk_size
    }

    /// `floor(pos.xz / chunk_size)`
    pub fn world_to_chunk(&self, pos: Vec3) -> ChunkCoord {
        ChunkCoord::from_world(pos, self.chunk_size)
    }

    /// Cell centre of `coord` at `y = 0`
    pub fn chunk_to_world(&self, coord: ChunkCoord) -> Vec3 {
        coord.center(self.chunk_size)
    }

    /// Horizontal distance from `observer` to the centre of `coord`.
    ///
    /// Observer depth is ignored, so a submarine deep below the datum streams
    /// the same chunks as one at the surface.
    pub fn get_distance_to_chunk(&self, observer: Vec3, coord: ChunkCoord) -> f32 {
        let center = self.chunk_to_world(coord);
        Vec2::new(observer.x, observer.z).distance(Vec2::new(center.x, center.z))
    }

    /// Position protected from eviction along with everything within `load_distance`
    pub fn set_observer(&mut self, observer: Vec3) {
        self.observer = Some(observer);
    }

    pub fn observer(&self) -> Option<Vec3> {
        self.observer
    }

    /// Return the resident chunk, building it first if needed
    ///
    /// Idempotent: a resident chunk is returned as is, with its LRU stamp
    /// refreshed. A fresh load may evict other chunks, never this one.
    ///
    /// # Arguments
    /// * `coord` - Chunk to make resident
    ///
    /// # Returns
    /// The loaded chunk, or the chunk source's error
    pub fn load_chunk(&mut self, coord: ChunkCoord) -> Result<&TerrainChunk> {
        if !self.chunks.contains_key(&coord) {
            let data = self.source.build_chunk(coord, self.sea_level.get_sea_level_meters())?;
            self.insert_built(data);
        }
        self.tick += 1;
        let tick = self.tick;
        let chunk = self
            .chunks
            .get_mut(&coord)
            .ok_or_else(|| Error::load_failure(coord, "chunk missing after load"))?;
        chunk.touch(tick);
        Ok(&*chunk)
    }

    /// Insert data built elsewhere (e.g. on a loader thread).
    ///
    /// Data classified against an older sea level is reclassified first.
    /// Returns `false` if the chunk was already resident.
    pub fn insert_built(&mut self, mut data: ChunkData) -> bool {
        let coord = data.coord;
        if self.chunks.contains_key(&coord) {
            return false;
        }

        let sea = self.sea_level.get_sea_level_meters();
        if data.sea_level_meters != sea {
            self.builder.reclassify(&mut data, sea);
        }

        self.tick += 1;
        let material = self.renderer.create_chunk_material(&data.biome_map, &data.bump_map);
        let chunk = TerrainChunk::new(data, material, self.lod_levels, self.tick);
        self.chunks.insert(coord, chunk);
        log::trace!("Chunk {} resident ({} total)", coord, self.chunks.len());

        self.enforce_budget(Some(coord));
        true
    }

    /// Drop a resident chunk and its collision body. No-op when absent.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> bool {
        let Some(mut chunk) = self.chunks.remove(&coord) else {
            return false;
        };
        chunk.state = ChunkState::Unloading;
        if chunk.collision.take().is_some() || self.physics.contains(coord) {
            self.physics.remove(coord);
        }
        chunk.state = ChunkState::Unloaded;
        log::trace!("Chunk {} unloaded", coord);
        true
    }

    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks.get(&coord).is_some_and(TerrainChunk::is_loaded)
    }

    pub fn get_chunk(&self, coord: ChunkCoord) -> Option<&TerrainChunk> {
        self.chunks.get(&coord)
    }

    pub fn get_chunk_mut(&mut self, coord: ChunkCoord) -> Option<&mut TerrainChunk> {
        self.chunks.get_mut(&coord)
    }

    /// Resident coordinates, sorted
    pub fn get_loaded_chunks(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self.chunks.keys().copied().collect();
        coords.sort();
        coords
    }

    pub fn chunks(&self) -> impl Iterator<Item = &TerrainChunk> {
        self.chunks.values()
    }

    pub fn chunks_mut(&mut self) -> impl Iterator<Item = &mut TerrainChunk> {
        self.chunks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn memory_bytes(&self) -> usize {
        self.chunks.values().map(TerrainChunk::memory_bytes).sum()
    }

    pub fn get_memory_usage_mb(&self) -> f32 {
        bytes_to_mb(self.memory_bytes())
    }

    pub fn memory_budget(&self) -> MemoryBudget {
        self.budget
    }

    /// Chunks evicted for memory since construction
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    fn is_protected(&self, coord: ChunkCoord, keep: Option<ChunkCoord>) -> bool {
        if keep == Some(coord) {
            return true;
        }
        match self.observer {
            Some(observer) => {
                self.world_to_chunk(observer) == coord
                    || self.get_distance_to_chunk(observer, coord) <= self.load_distance
            }
            None => false,
        }
    }

    /// Evict least-recently-used chunks until usage fits the budget
    ///
    /// `keep`, the observer's chunk and chunks within `load_distance` of the
    /// observer are never evicted; if only those remain the budget stays
    /// exceeded until the observer moves.
    ///
    /// # Arguments
    /// * `keep` - Extra chunk to protect, usually the one just loaded
    ///
    /// # Returns
    /// Evicted coordinates, oldest access first
    pub fn enforce_budget(&mut self, keep: Option<ChunkCoord>) -> Vec<ChunkCoord> {
        self.budget.set_used(self.memory_bytes());
        if !self.budget.is_over() {
            return Vec::new();
        }

        let mut candidates: Vec<(u64, ChunkCoord)> = self
            .chunks
            .values()
            .filter(|c| !self.is_protected(c.coord, keep))
            .map(|c| (c.last_access, c.coord))
            .collect();
        candidates.sort();

        let mut evicted = Vec::new();
        for (_, coord) in candidates {
            if !self.budget.is_over() {
                break;
            }
            let bytes = self.chunks.get(&coord).map_or(0, TerrainChunk::memory_bytes);
            if self.unload_chunk(coord) {
                self.budget.remove(bytes);
                evicted.push(coord);
            }
        }
        self.evicted_total += evicted.len() as u64;

        if !evicted.is_empty() {
            log::debug!(
                "Evicted {} chunks to enforce budget ({:.1} MB used of {:.1} MB)",
                evicted.len(),
                self.budget.used_mb(),
                bytes_to_mb(self.budget.budget())
            );
        }
        if self.budget.is_over() {
            log::debug!(
                "Memory budget exceeded by required chunks ({:.1} MB of {:.1} MB)",
                self.budget.used_mb(),
                bytes_to_mb(self.budget.budget())
            );
        }
        evicted
    }

    /// Pick every chunk's LOD for `observer`, build missing meshes and
    /// re-stitch edges whose neighbour LODs changed
    pub fn refresh_lods(&mut self, observer: Vec3) -> usize {
        let chunk_size = self.chunk_size;
        let center_distance = |coord: ChunkCoord| {
            let c = coord.center(chunk_size);
            Vec2::new(observer.x, observer.z).distance(Vec2::new(c.x, c.z))
        };

        let mut changed = 0;
        for chunk in self.chunks.values_mut() {
            if self.renderer.update_chunk_lod(chunk, center_distance(chunk.coord)) {
                changed += 1;
            }
        }

        let rebuilt: Vec<(ChunkCoord, ChunkMesh)> = self
            .chunks
            .values()
            .filter_map(|chunk| {
                let mut neighbors = Neighbors::default();
                for side in Side::ALL {
                    let (dx, dz) = side.offset();
                    let edge = self.chunks.get(&chunk.coord.offset(dx, dz)).map(|n| NeighborEdge {
                        heightmap: &n.data.heightmap,
                        lod: n.current_lod,
                    });
                    neighbors.set(side, edge);
                }
                self.renderer.restitch(chunk, &neighbors).map(|mesh| (chunk.coord, mesh))
            })
            .collect();

        for (coord, mesh) in rebuilt {
            if let Some(chunk) = self.chunks.get_mut(&coord) {
                let lod = mesh.lod as usize;
                if let Some(slot) = chunk.lod_meshes.get_mut(lod) {
                    *slot = Some(mesh);
                }
            }
        }
        changed
    }

    /// Reclassify every resident chunk for a new sea level.
    ///
    /// Meshes carry biome ids per vertex, so they are dropped and rebuilt on
    /// the next LOD refresh.
    pub fn apply_sea_level(&mut self, meters: f32) {
        for chunk in self.chunks.values_mut() {
            self.builder.reclassify(&mut chunk.data, meters);
            chunk.material.update_biomes(&chunk.data.biome_map);
            chunk.material.set_sea_level(meters);
            for mesh in chunk.lod_meshes.iter_mut() {
                *mesh = None;
            }
        }
        log::debug!("Reclassified {} chunks for sea level {:.1} m", self.chunks.len(), meters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::PhysicsWorld;
    use crate::elevation::ElevationDataProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> TerrainConfig {
        TerrainConfig {
            heightmap_resolution: 17,
            lod_levels: 3,
            ..Default::default()
        }
    }

    fn manager(config: &TerrainConfig) -> ChunkManager {
        let provider = ElevationDataProvider::procedural_only(config).unwrap().into_shared();
        let builder = ChunkBuilder::new(config, provider).unwrap();
        let sea = SeaLevelState::at_datum(config.elevation_range());
        let renderer = ChunkRenderer::new(config, builder.detail().clone(), sea.clone()).unwrap();
        ChunkManager::new(config, builder, renderer, PhysicsWorld::shared(), sea).unwrap()
    }

    struct CountingSource {
        inner: ChunkBuilder,
        builds: AtomicUsize,
    }

    impl ChunkSource for CountingSource {
        fn build_chunk(&self, coord: ChunkCoord, sea_level_meters: f32) -> Result<ChunkData> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.inner.build(coord, sea_level_meters)
        }
    }

    #[test]
    fn test_coordinate_round_trip() {
        let m = manager(&config());
        for p in [
            Vec3::new(256.0, 0.0, 256.0),
            Vec3::new(-0.001, 5.0, 1e5),
            Vec3::new(-7777.7, 0.0, 3.3),
        ] {
            let c = m.world_to_chunk(p);
            assert_eq!(m.world_to_chunk(m.chunk_to_world(c)), c);
        }
    }

    #[test]
    fn test_distance_to_chunk_center() {
        let m = manager(&config());
        let d = m.get_distance_to_chunk(Vec3::new(256.0, 0.0, 256.0), ChunkCoord::new(0, 0));
        assert!(d.abs() < 1e-4);
        let d = m.get_distance_to_chunk(Vec3::new(0.0, -3000.0, 256.0), ChunkCoord::new(1, 0));
        assert!((d - 768.0).abs() < 1e-3);
    }

    #[test]
    fn test_load_is_idempotent() {
        let config = config();
        let m = manager(&config);
        let counting = Arc::new(CountingSource {
            inner: ChunkBuilder::new(&config, ElevationDataProvider::procedural_only(&config).unwrap().into_shared())
                .unwrap(),
            builds: AtomicUsize::new(0),
        });
        let mut m = m.with_source(counting.clone());

        let c = ChunkCoord::new(3, -2);
        let first_access = m.load_chunk(c).unwrap().last_access;
        let bytes = m.memory_bytes();
        let second = m.load_chunk(c).unwrap();
        assert_eq!(second.coord, c);
        assert!(second.last_access > first_access);
        assert_eq!(counting.builds.load(Ordering::SeqCst), 1);
        assert_eq!(m.memory_bytes(), bytes);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_unload_twice_is_noop() {
        let mut m = manager(&config());
        let c = ChunkCoord::new(0, 0);
        m.load_chunk(c).unwrap();
        assert!(m.unload_chunk(c));
        assert!(!m.unload_chunk(c));
        assert!(!m.unload_chunk(ChunkCoord::new(99, 99)));
        assert!(m.is_empty());
        assert_eq!(m.memory_bytes(), 0);
    }

    #[test]
    fn test_budget_evicts_lru_but_keeps_observer_chunk() {
        let mut config = config();
        config.max_cache_memory_mb = 0.05;
        let mut m = manager(&config);
        m.set_observer(Vec3::new(-10_000.0, 0.0, -10_000.0));
        let observer_chunk = m.world_to_chunk(Vec3::new(-10_000.0, 0.0, -10_000.0));
        m.load_chunk(observer_chunk).unwrap();

        for x in 0..20 {
            m.load_chunk(ChunkCoord::new(x, 0)).unwrap();
            assert!(m.get_memory_usage_mb() <= 0.05);
        }
        assert!(m.len() < 21);
        assert!(m.evicted_total() > 0);
        assert!(m.is_loaded(observer_chunk));
        // Oldest far chunk went first
        assert!(!m.is_loaded(ChunkCoord::new(0, 0)));
        assert!(m.is_loaded(ChunkCoord::new(19, 0)));
    }

    #[test]
    fn test_refresh_lods_builds_and_stitches() {
        let mut m = manager(&config());
        for x in 0..4 {
            m.load_chunk(ChunkCoord::new(x, 0)).unwrap();
        }
        let observer = Vec3::new(256.0, 0.0, 256.0);
        m.refresh_lods(observer);
        let near = m.get_chunk(ChunkCoord::new(0, 0)).unwrap();
        let far = m.get_chunk(ChunkCoord::new(3, 0)).unwrap();
        assert_eq!(near.current_lod, 0);
        assert_eq!(far.current_lod, 2);
        assert!(near.current_mesh().is_some());
        assert!(far.current_mesh().is_some());

        // Chunk (2, 0) at LOD 2 sits next to (1, 0) at LOD 1: (1, 0) welds its east edge
        let middle = m.get_chunk(ChunkCoord::new(1, 0)).unwrap();
        assert_eq!(middle.current_lod, 1);
        assert_eq!(middle.current_mesh().unwrap().welds[1], 2);

        // Nothing changes on a second pass
        assert_eq!(m.refresh_lods(observer), 0);
    }

    #[test]
    fn test_refresh_lods_welds_fine_edge_to_coarse_neighbour() {
        let config = TerrainConfig {
            base_lod_distance: 200.0,
            ..config()
        };
        let mut m = manager(&config);
        m.load_chunk(ChunkCoord::new(0, 0)).unwrap();
        m.load_chunk(ChunkCoord::new(1, 0)).unwrap();
        m.refresh_lods(Vec3::new(256.0, 0.0, 256.0));

        let fine = m.get_chunk(ChunkCoord::new(0, 0)).unwrap().current_mesh().unwrap();
        let coarse = m.get_chunk(ChunkCoord::new(1, 0)).unwrap().current_mesh().unwrap();
        assert_eq!((fine.lod, coarse.lod), (0, 2));
        assert_eq!(fine.welds, [0, 2, 0, 0]);

        let n = fine.grid_size;
        let ratio = (n - 1) / (coarse.grid_size - 1);
        assert_eq!(ratio, 4);
        for k in 0..n {
            let v = fine.world_position(fine.grid_vertex(n - 1, k).unwrap());
            let k0 = k / ratio;
            let k1 = (k0 + 1).min(coarse.grid_size - 1);
            let a = coarse.world_position(coarse.grid_vertex(0, k0).unwrap());
            let b = coarse.world_position(coarse.grid_vertex(0, k1).unwrap());
            let t = if k0 == k1 { 0.0 } else { (v.z - a.z) / (b.z - a.z) };
            let line = a.y + (b.y - a.y) * t;
            assert!((v.x - a.x).abs() < 1e-3);
            assert!((v.y - line).abs() < 1e-2, "edge vertex {} at {} off coarse line {}", k, v.y, line);

            // East skirt of the fine mesh hangs below the shared edge
            let skirt = fine.world_position(&fine.vertices[n * n + n + k]);
            assert!((skirt.x - v.x).abs() < 1e-3 && (skirt.z - v.z).abs() < 1e-3);
            assert!((v.y - skirt.y - config.skirt_depth).abs() < 1e-2);
            assert!(skirt.y < line);
        }

        // West skirt of the coarse mesh covers the same edge from the other side
        let c = coarse.grid_size;
        for k in 0..c {
            let top = coarse.world_position(coarse.grid_vertex(0, k).unwrap());
            let skirt = coarse.world_position(&coarse.vertices[c * c + k]);
            assert!((top.y - skirt.y - config.skirt_depth).abs() < 1e-2);
        }
    }

    #[test]
    fn test_apply_sea_level_updates_materials() {
        let mut m = manager(&config());
        m.load_chunk(ChunkCoord::new(0, 0)).unwrap();
        m.refresh_lods(Vec3::ZERO);
        m.apply_sea_level(-20_000.0);
        let chunk = m.get_chunk(ChunkCoord::new(0, 0)).unwrap();
        assert_eq!(chunk.material.sea_level_meters(), -20_000.0);
        assert_eq!(chunk.data.sea_level_meters, -20_000.0);
        assert!(chunk.current_mesh().is_none());
    }

    #[test]
    fn test_insert_built_reclassifies_stale_sea_level() {
        let config = config();
        let mut m = manager(&config);
        let builder = ChunkBuilder::new(&config, ElevationDataProvider::procedural_only(&config).unwrap().into_shared())
            .unwrap();
        let data = builder.build(ChunkCoord::new(0, 0), 500.0).unwrap();
        assert!(m.insert_built(data.clone()));
        assert!(!m.insert_built(data));
        let chunk = m.get_chunk(ChunkCoord::new(0, 0)).unwrap();
        assert_eq!(chunk.data.sea_level_meters, 0.0);
    }
}
