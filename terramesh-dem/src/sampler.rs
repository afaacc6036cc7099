//! Decoded tile cache used while sampling heights.

use crate::single_flight::KeyedLocks;
use crate::{ElevationTile, LocalTileStore, RawTile, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Decoded tiles kept in memory. A full SRTM1 tile is ~25 MB, so 16 stay under 400 MB.
pub const DEFAULT_TILE_CACHE_SIZE: usize = 16;

/// Loads raw tiles from the local store and keeps the most recently used ones
/// decoded in memory.
pub struct TileSampler {
    store: LocalTileStore,
    cache: Mutex<LruCache<String, Arc<RawTile>>>,
    loading: KeyedLocks,
}

impl TileSampler {
    pub fn new(store: LocalTileStore, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
            loading: KeyedLocks::new(),
        }
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, Arc<RawTile>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decoded samples for a tile, loading them at most once per eviction.
    pub async fn raw(&self, tile: &ElevationTile) -> Result<Arc<RawTile>> {
        if let Some(raw) = self.cache().get(&tile.name) {
            return Ok(raw.clone());
        }

        let _guard = self.loading.lock(&tile.name).await;
        if let Some(raw) = self.cache().get(&tile.name) {
            return Ok(raw.clone());
        }

        let raw = Arc::new(self.store.load(tile).await?);
        log::debug!("Loaded elevation tile {} ({}x{})", tile.name, raw.side(), raw.side());
        self.cache().put(tile.name.clone(), raw.clone());
        Ok(raw)
    }

    pub async fn elevation(&self, tile: &ElevationTile, lat: f64, lon: f64) -> Result<f32> {
        let raw = self.raw(tile).await?;
        Ok(raw.elevation_at(&tile.bounds, lat, lon))
    }

    pub fn cached(&self) -> usize {
        self.cache().len()
    }
}
