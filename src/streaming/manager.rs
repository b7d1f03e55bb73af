//! Per-tick streaming loop tying chunk residency to a moving observer
//!
//! Each [`StreamingManager::update`] runs, in order: pending sea-level change,
//! unloads beyond `unload_distance`, cancellation of stale requests,
//! enqueueing of missing chunks within `load_distance`, nearest-first loads
//! under the frame budget, LOD refresh and collision sync.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use crate::collision::CollisionManager;
use crate::core::config::TerrainConfig;
use crate::core::error::Error;
use crate::core::sea_level::{SeaLevelState, SeaLevelWatcher};
use crate::core::types::{Result, Vec3};
use crate::streaming::budget::FrameBudget;
use crate::streaming::chunk_loader::{ChunkLoader, LoadResult};
use crate::streaming::chunk_manager::ChunkManager;
use crate::streaming::priority::{ChunkPriority, ChunkPriorityQueue};
use crate::terrain::{ChunkCoord, ChunkData};

/// How chunk loads are executed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Every wanted chunk loads inside `update`. Deterministic.
    Synchronous,
    /// Loads run on the calling thread within the per-tick item and time budget
    #[default]
    Budgeted,
    /// Loads build on a background pool; results merge within the item budget
    Background,
}

/// What the last tick did
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StreamingStats {
    pub loaded: usize,
    pub unloaded: usize,
    pub evicted: usize,
    pub failed: usize,
    /// Wanted but left for a later tick
    pub deferred: usize,
    pub cancelled: usize,
    /// Queued, waiting or building
    pub pending: usize,
    /// Building on the background pool
    pub in_flight: usize,
    pub resident: usize,
    pub memory_mb: f32,
}

#[derive(Clone, Copy, Debug)]
struct FailureRecord {
    attempts: u32,
    retry_at: u64,
}

pub struct StreamingManager {
    chunks: ChunkManager,
    collision: CollisionManager,
    mode: LoadMode,
    loader: Option<ChunkLoader>,
    /// Background results waiting for budget
    ready: VecDeque<ChunkData>,
    budget: FrameBudget,
    sea_level: SeaLevelState,
    sea_watcher: SeaLevelWatcher,
    load_distance: f32,
    unload_distance: f32,
    max_concurrent: usize,
    max_load_attempts: u32,
    retry_delay_ticks: u64,
    failures: HashMap<ChunkCoord, FailureRecord>,
    permanently_failed: HashSet<ChunkCoord>,
    /// Chunks within `load_distance` at the last tick, nearest first
    desired: Vec<ChunkCoord>,
    tick: u64,
    stats: StreamingStats,
}

impl StreamingManager {
    pub fn new(
        config: &TerrainConfig,
        chunks: ChunkManager,
        collision: CollisionManager,
        sea_level: SeaLevelState,
        mode: LoadMode,
    ) -> Result<Self> {
        config.validate()?;
        let mut manager = Self {
            chunks,
            collision,
            mode: LoadMode::Synchronous,
            loader: None,
            ready: VecDeque::new(),
            budget: FrameBudget::new(config.max_chunks_per_frame, config.max_load_time_ms),
            sea_watcher: sea_level.subscribe(),
            sea_level,
            load_distance: config.load_distance,
            unload_distance: config.unload_distance,
            max_concurrent: config.max_concurrent_loads.max(1),
            max_load_attempts: config.max_load_attempts.max(1),
            retry_delay_ticks: config.retry_delay_ticks,
            failures: HashMap::new(),
            permanently_failed: HashSet::new(),
            desired: Vec::new(),
            tick: 0,
            stats: StreamingStats::default(),
        };
        manager.set_load_mode(mode)?;
        Ok(manager)
    }

    pub fn load_mode(&self) -> LoadMode {
        self.mode
    }

    /// Switch load execution. Leaving background mode drops in-flight builds.
    pub fn set_load_mode(&mut self, mode: LoadMode) -> Result<()> {
        if mode == LoadMode::Background && self.loader.is_none() {
            self.loader = Some(ChunkLoader::new(self.chunks.source(), self.max_concurrent)?);
        }
        if mode != LoadMode::Background {
            self.loader = None;
            self.ready.clear();
        }
        if mode != self.mode {
            log::info!("Streaming load mode: {:?}", mode);
        }
        self.mode = mode;
        Ok(())
    }

    pub fn chunks(&self) -> &ChunkManager {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut ChunkManager {
        &mut self.chunks
    }

    pub fn collision(&self) -> &CollisionManager {
        &self.collision
    }

    pub fn stats(&self) -> StreamingStats {
        self.stats
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Chunks within `load_distance` at the last update, nearest first
    pub fn desired_chunks(&self) -> &[ChunkCoord] {
        &self.desired
    }

    /// Chunks skipped after `max_load_attempts` failures, sorted
    pub fn permanently_failed(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<ChunkCoord> = self.permanently_failed.iter().copied().collect();
        coords.sort();
        coords
    }

    /// Allow permanently failed chunks to be tried again
    pub fn reset_failures(&mut self) {
        self.failures.clear();
        self.permanently_failed.clear();
    }

    fn is_pending(&self, coord: ChunkCoord) -> bool {
        self.loader.as_ref().is_some_and(|l| l.is_pending(coord)) || self.ready.iter().any(|d| d.coord == coord)
    }

    /// Fraction of the wanted chunk set that is resident.
    ///
    /// Permanently failed chunks are left out, so progress can reach 1.0.
    pub fn get_loading_progress(&self) -> f32 {
        let wanted: Vec<ChunkCoord> = self
            .desired
            .iter()
            .copied()
            .filter(|c| !self.permanently_failed.contains(c))
            .collect();
        if wanted.is_empty() {
            return 1.0;
        }
        let resident = wanted.iter().filter(|c| self.chunks.is_loaded(**c)).count();
        resident as f32 / wanted.len() as f32
    }

    /// Coordinates within `load_distance` of `observer`, nearest first
    fn chunks_in_range(&self, observer: Vec3) -> Vec<ChunkPriority> {
        let center = self.chunks.world_to_chunk(observer);
        let reach = (self.load_distance / self.chunks.chunk_size()).ceil() as i32 + 1;
        let mut in_range: Vec<ChunkPriority> = (-reach..=reach)
            .flat_map(|dz| (-reach..=reach).map(move |dx| center.offset(dx, dz)))
            .map(|coord| ChunkPriority::new(coord, self.chunks.get_distance_to_chunk(observer, coord)))
            .filter(|p| p.distance <= self.load_distance)
            .collect();
        in_range.sort_by(|a, b| b.cmp(a));
        in_range
    }

    /// Advance streaming by one tick for `observer`
    pub fn update(&mut self, observer: Vec3) {
        self.tick += 1;
        let mut stats = StreamingStats::default();
        let evicted_before = self.chunks.evicted_total();

        if let Some(level) = self.sea_watcher.take_change() {
            self.chunks.apply_sea_level(level.meters);
        }
        self.chunks.set_observer(observer);

        let in_range = self.chunks_in_range(observer);
        self.desired = in_range.iter().map(|p| p.coord).collect();

        // Unload beyond the hysteresis band
        for coord in self.chunks.get_loaded_chunks() {
            if self.chunks.get_distance_to_chunk(observer, coord) > self.unload_distance && self.chunks.unload_chunk(coord) {
                stats.unloaded += 1;
            }
        }

        // Drop requests the observer moved away from
        let wanted: HashSet<ChunkCoord> = self.desired.iter().copied().collect();
        if let Some(loader) = self.loader.as_mut() {
            let stale: Vec<ChunkCoord> = loader.pending().filter(|c| !wanted.contains(c)).collect();
            for coord in stale {
                if loader.cancel(coord) {
                    stats.cancelled += 1;
                }
            }
        }
        let before = self.ready.len();
        self.ready.retain(|d| wanted.contains(&d.coord));
        stats.cancelled += before - self.ready.len();

        let mut queue: ChunkPriorityQueue = in_range
            .into_iter()
            .filter(|p| self.should_request(p.coord))
            .collect();

        match self.mode {
            LoadMode::Synchronous => {
                while let Some(next) = queue.pop() {
                    self.load_now(next.coord, &mut stats);
                }
            }
            LoadMode::Budgeted => {
                self.budget.reset();
                while self.budget.can_start_next() {
                    let Some(next) = queue.pop() else { break };
                    let started = Instant::now();
                    self.load_now(next.coord, &mut stats);
                    self.budget.complete_item(started.elapsed());
                }
                stats.deferred = queue.len();
            }
            LoadMode::Background => self.load_background(&mut queue, &mut stats),
        }

        self.chunks.refresh_lods(observer);
        self.sync_collision();

        stats.evicted = (self.chunks.evicted_total() - evicted_before) as usize;
        stats.in_flight = self.loader.as_ref().map_or(0, ChunkLoader::pending_count);
        stats.pending = match self.mode {
            LoadMode::Background => stats.in_flight + self.ready.len(),
            _ => stats.deferred,
        };
        stats.resident = self.chunks.len();
        stats.memory_mb = self.chunks.get_memory_usage_mb();
        self.stats = stats;

        log::debug!(
            "Tick {}: +{} -{} evicted {} failed {} deferred {} pending {} resident {} ({:.1} MB)",
            self.tick,
            stats.loaded,
            stats.unloaded,
            stats.evicted,
            stats.failed,
            stats.deferred,
            stats.pending,
            stats.resident,
            stats.memory_mb
        );
    }

    fn should_request(&self, coord: ChunkCoord) -> bool {
        if self.chunks.is_loaded(coord) || self.permanently_failed.contains(&coord) || self.is_pending(coord) {
            return false;
        }
        self.failures.get(&coord).is_none_or(|f| self.tick >= f.retry_at)
    }

    fn load_now(&mut self, coord: ChunkCoord, stats: &mut StreamingStats) {
        match self.chunks.load_chunk(coord) {
            Ok(_) => {
                self.failures.remove(&coord);
                stats.loaded += 1;
            }
            Err(e) => self.record_failure(coord, e, stats),
        }
    }

    fn load_background(&mut self, queue: &mut ChunkPriorityQueue, stats: &mut StreamingStats) {
        let sea = self.sea_level.get_sea_level_meters();
        let Some(loader) = self.loader.as_mut() else {
            return;
        };

        let mut request_failed = None;
        for next in queue.drain_sorted() {
            if let Err(e) = loader.request(next.coord, next.distance, sea) {
                request_failed = Some(e);
                break;
            }
        }

        let mut failures = Vec::new();
        for result in loader.poll_results() {
            match result {
                LoadResult::Built(data) => self.ready.push_back(data),
                LoadResult::Failed(coord, e) => failures.push((coord, e)),
            }
        }
        if let Some(e) = request_failed {
            log::error!("Background loader unavailable: {}", e);
        }
        for (coord, e) in failures {
            self.record_failure(coord, e, stats);
        }

        // Merge nearest first within the item budget
        let observer = self.chunks.observer().unwrap_or(Vec3::ZERO);
        let mut ready: Vec<ChunkData> = self.ready.drain(..).collect();
        ready.sort_by(|a, b| {
            let da = self.chunks.get_distance_to_chunk(observer, a.coord);
            let db = self.chunks.get_distance_to_chunk(observer, b.coord);
            da.total_cmp(&db).then_with(|| a.coord.cmp(&b.coord))
        });
        self.budget.reset();
        let mut ready = ready.into_iter();
        for data in ready.by_ref() {
            if !self.budget.can_start_next() {
                self.ready.push_back(data);
                break;
            }
            let started = Instant::now();
            let coord = data.coord;
            if self.chunks.insert_built(data) {
                self.failures.remove(&coord);
                stats.loaded += 1;
            }
            self.budget.complete_item(started.elapsed());
        }
        self.ready.extend(ready);
        stats.deferred = self.ready.len();
    }

    fn record_failure(&mut self, coord: ChunkCoord, error: Error, stats: &mut StreamingStats) {
        stats.failed += 1;
        let record = self.failures.entry(coord).or_insert(FailureRecord {
            attempts: 0,
            retry_at: 0,
        });
        record.attempts += 1;
        record.retry_at = self.tick + self.retry_delay_ticks;

        if record.attempts >= self.max_load_attempts {
            log::warn!(
                "Chunk {} failed {} times, giving up: {}",
                coord,
                record.attempts,
                error
            );
            self.failures.remove(&coord);
            self.permanently_failed.insert(coord);
        } else {
            log::warn!(
                "Chunk {} failed (attempt {}/{}), retrying in {} ticks: {}",
                coord,
                record.attempts,
                self.max_load_attempts,
                self.retry_delay_ticks,
                error
            );
        }
    }

    /// Give every resident chunk collision, then re-check memory.
    ///
    /// Runs after the LOD refresh, so freshly built meshes count too.
    fn sync_collision(&mut self) {
        let mut created = 0;
        for chunk in self.chunks.chunks_mut() {
            if self.collision.create_collision(chunk) {
                created += 1;
            }
        }
        if created > 0 {
            log::trace!("Created collision for {} chunks", created);
        }
        self.chunks.enforce_budget(None);
    }
}
