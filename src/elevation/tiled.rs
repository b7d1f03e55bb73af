//! Tileset-backed elevation with an LRU tile cache

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::elevation::cache::{CacheStats, TileCache, TileKey};
use crate::elevation::source::ElevationSource;
use crate::elevation::tileset::{read_tile, ElevationTile, TileEntry, TilesetIndex};

/// Tile layout of one level (0 = full resolution)
#[derive(Clone, Debug)]
struct LevelLayout {
    width: u32,
    height: u32,
    tiles: HashMap<(u32, u32), TileEntry>,
}

impl LevelLayout {
    fn from_entries<'a>(width: u32, height: u32, entries: impl Iterator<Item = &'a TileEntry>, tile_size: u32) -> Self {
        let tiles = entries
            .map(|e| ((e.src_x / tile_size, e.src_y / tile_size), e.clone()))
            .collect();
        Self { width, height, tiles }
    }
}

/// Reads a tileset directory lazily, one tile at a time
pub struct TiledElevationProvider {
    dir: PathBuf,
    index: TilesetIndex,
    levels: Vec<LevelLayout>,
    cache: TileCache,
    /// Most recent tile, skips the LRU bookkeeping for runs inside one tile
    last: Option<(TileKey, Arc<ElevationTile>)>,
    tiles_loaded: u64,
}

impl TiledElevationProvider {
    /// Open `dir/tileset.json`. Tiles are read on first use.
    pub fn open(dir: &Path, cache_memory_mb: f32) -> Result<Self> {
        let index = TilesetIndex::load(dir)?;

        let mut levels = vec![LevelLayout::from_entries(
            index.source_width,
            index.source_height,
            index.tiles.values(),
            index.tile_size,
        )];
        let mut overviews: Vec<_> = index.overviews.iter().collect();
        overviews.sort_by_key(|o| o.level);
        for overview in overviews {
            // Only a contiguous run of levels 1, 2, ... is usable
            if overview.level as usize != levels.len() {
                log::warn!(
                    "Ignoring overview level {} in {}: levels must be contiguous",
                    overview.level,
                    dir.display()
                );
                break;
            }
            levels.push(LevelLayout::from_entries(
                overview.width,
                overview.height,
                overview.tiles.values(),
                index.tile_size,
            ));
        }

        let cache = TileCache::with_memory_budget(cache_memory_mb, index.tile_size);
        log::info!(
            "Opened tileset {} ({}x{} px, {} tiles, {} overview levels, cache {} tiles)",
            dir.display(),
            index.source_width,
            index.source_height,
            index.tiles.len(),
            levels.len() - 1,
            cache.max_tiles()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            levels,
            cache,
            last: None,
            tiles_loaded: 0,
        })
    }

    pub fn index(&self) -> &TilesetIndex {
        &self.index
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tiles decoded from disk since opening (cache misses)
    pub fn tiles_loaded(&self) -> u64 {
        self.tiles_loaded
    }

    fn tile(&mut self, key: TileKey, entry: &TileEntry) -> Result<Arc<ElevationTile>> {
        if let Some((last_key, tile)) = &self.last {
            if *last_key == key {
                return Ok(tile.clone());
            }
        }

        let tile = match self.cache.get(key) {
            Some(tile) => tile,
            None => {
                let tile = read_tile(&self.dir.join(&entry.file))?;
                if tile.width != entry.width || tile.height != entry.height {
                    return Err(Error::DataUnavailable(format!(
                        "tile {} is {}x{}, index says {}x{}",
                        entry.file, tile.width, tile.height, entry.width, entry.height
                    )));
                }
                let tile = Arc::new(tile);
                self.tiles_loaded += 1;
                log::trace!("Loaded elevation tile {}", entry.file);
                self.cache.insert(key, tile.clone());
                tile
            }
        };
        self.last = Some((key, tile.clone()));
        Ok(tile)
    }

    fn sample_level(&mut self, level: u32, px: u32, py: u32) -> Result<f32> {
        let layout = self
            .levels
            .get(level as usize)
            .ok_or_else(|| Error::DataUnavailable(format!("no overview level {}", level)))?;
        let px = px.min(layout.width - 1);
        let py = py.min(layout.height - 1);
        let tile_size = self.index.tile_size;
        let (tx, ty) = (px / tile_size, py / tile_size);
        let entry = layout
            .tiles
            .get(&(tx, ty))
            .cloned()
            .ok_or_else(|| Error::DataUnavailable(format!("missing tile {}_{} at level {}", tx, ty, level)))?;

        let tile = self.tile(TileKey::new(level, tx, ty), &entry)?;
        let (lx, ly) = (px - entry.src_x, py - entry.src_y);
        if lx >= tile.width || ly >= tile.height {
            return Err(Error::DataUnavailable(format!("pixel ({}, {}) outside {}", px, py, entry.file)));
        }
        Ok(tile.get(lx, ly))
    }
}

impl ElevationSource for TiledElevationProvider {
    fn name(&self) -> &str {
        "tileset"
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.index.source_width, self.index.source_height)
    }

    fn sample(&mut self, px: u32, py: u32) -> Result<f32> {
        self.sample_level(0, px, py)
    }

    fn overview_levels(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    fn overview_dimensions(&self, level: u32) -> (u32, u32) {
        match self.levels.get(level as usize) {
            Some(layout) => (layout.width, layout.height),
            None => {
                let step = 1u32 << level.min(31);
                (
                    self.index.source_width.div_ceil(step).max(1),
                    self.index.source_height.div_ceil(step).max(1),
                )
            }
        }
    }

    fn sample_overview(&mut self, level: u32, px: u32, py: u32) -> Result<f32> {
        if (level as usize) < self.levels.len() {
            return self.sample_level(level, px, py);
        }
        let step = 1u32 << level.min(31);
        self.sample_level(0, px.saturating_mul(step), py.saturating_mul(step))
    }

    fn is_tiled(&self) -> bool {
        true
    }

    fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
