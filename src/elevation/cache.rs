//! LRU cache for decoded elevation tiles
//!
//! When the cache is full, the least recently used tile is evicted on insert.

use std::collections::HashMap;
use std::sync::Arc;

use crate::elevation::tileset::ElevationTile;

/// Identifies a tile: overview `level` (0 = full resolution) and grid position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u32,
    pub tx: u32,
    pub ty: u32,
}

impl TileKey {
    pub fn new(level: u32, tx: u32, ty: u32) -> Self {
        Self { level, tx, ty }
    }
}

/// Snapshot of cache occupancy
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub cached_tiles: usize,
    pub max_tiles: usize,
    pub memory_mb: f32,
}

/// LRU cache of decoded tiles
pub struct TileCache {
    tiles: HashMap<TileKey, Arc<ElevationTile>>,
    /// Oldest first, newest last
    access_order: Vec<TileKey>,
    max_tiles: usize,
    memory_bytes: usize,
}

impl TileCache {
    pub fn new(max_tiles: usize) -> Self {
        let max_tiles = max_tiles.max(1);
        Self {
            tiles: HashMap::with_capacity(max_tiles),
            access_order: Vec::with_capacity(max_tiles),
            max_tiles,
            memory_bytes: 0,
        }
    }

    /// Capacity that fits `memory_mb` of `tile_size`-square 16-bit tiles
    pub fn with_memory_budget(memory_mb: f32, tile_size: u32) -> Self {
        let tile_bytes = (tile_size as usize).pow(2) * std::mem::size_of::<u16>();
        let budget = (memory_mb.max(0.0) as f64 * 1024.0 * 1024.0) as usize;
        Self::new(budget / tile_bytes.max(1))
    }

    /// Get a tile, marking it most recently used
    pub fn get(&mut self, key: TileKey) -> Option<Arc<ElevationTile>> {
        let tile = self.tiles.get(&key).cloned()?;
        self.update_access_order(key);
        Some(tile)
    }

    /// Insert a tile, evicting the least recently used one if at capacity.
    ///
    /// Returns the evicted tile's key, if any.
    pub fn insert(&mut self, key: TileKey, tile: Arc<ElevationTile>) -> Option<TileKey> {
        if let Some(old) = self.tiles.remove(&key) {
            self.memory_bytes -= old.memory_bytes();
            self.remove_from_access_order(key);
        }

        let evicted = if self.tiles.len() >= self.max_tiles {
            self.evict_oldest()
        } else {
            None
        };

        self.memory_bytes += tile.memory_bytes();
        self.tiles.insert(key, tile);
        self.access_order.push(key);
        evicted
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.tiles.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
        self.access_order.clear();
        self.memory_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_tiles: self.tiles.len(),
            max_tiles: self.max_tiles,
            memory_mb: crate::core::types::bytes_to_mb(self.memory_bytes),
        }
    }

    fn evict_oldest(&mut self) -> Option<TileKey> {
        let key = self.access_order.first().copied()?;
        self.remove_from_access_order(key);
        if let Some(tile) = self.tiles.remove(&key) {
            self.memory_bytes -= tile.memory_bytes();
        }
        log::debug!("Evicted elevation tile {:?}", key);
        Some(key)
    }

    fn update_access_order(&mut self, key: TileKey) {
        self.remove_from_access_order(key);
        self.access_order.push(key);
    }

    fn remove_from_access_order(&mut self, key: TileKey) {
        if let Some(pos) = self.access_order.iter().position(|&k| k == key) {
            self.access_order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(size: u32) -> Arc<ElevationTile> {
        Arc::new(ElevationTile {
            width: size,
            height: size,
            samples: vec![0; (size * size) as usize],
        })
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = TileCache::new(4);
        let key = TileKey::new(0, 1, 2);
        cache.insert(key, tile(2));
        assert!(cache.contains(key));
        assert_eq!(cache.get(key).unwrap().width, 2);
        assert!(cache.get(TileKey::new(0, 0, 0)).is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = TileCache::new(2);
        let a = TileKey::new(0, 0, 0);
        let b = TileKey::new(0, 1, 0);
        let c = TileKey::new(0, 2, 0);
        cache.insert(a, tile(2));
        cache.insert(b, tile(2));

        // Touch a so b becomes the oldest
        cache.get(a);
        assert_eq!(cache.insert(c, tile(2)), Some(b));
        assert!(cache.contains(a));
        assert!(!cache.contains(b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let mut cache = TileCache::new(1);
        let a = TileKey::new(0, 0, 0);
        cache.insert(a, tile(2));
        assert_eq!(cache.insert(a, tile(4)), None);
        assert_eq!(cache.stats().memory_mb, crate::core::types::bytes_to_mb(32));
    }

    #[test]
    fn test_memory_budget_capacity() {
        // 512x512 u16 tiles are 0.5 MiB each
        let cache = TileCache::with_memory_budget(128.0, 512);
        assert_eq!(cache.max_tiles(), 256);
        assert_eq!(TileCache::with_memory_budget(0.0, 512).max_tiles(), 1);
    }

    #[test]
    fn test_stats() {
        let mut cache = TileCache::new(8);
        cache.insert(TileKey::new(0, 0, 0), tile(4));
        cache.insert(TileKey::new(1, 0, 0), tile(4));
        let stats = cache.stats();
        assert_eq!(stats.cached_tiles, 2);
        assert_eq!(stats.max_tiles, 8);
        assert!(stats.memory_mb > 0.0);
        cache.clear();
        assert!(cache.is_empty());
    }
}
