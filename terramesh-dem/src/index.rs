//! In-memory index of locally available elevation tiles.

use crate::ElevationTile;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Map of tile name to tile, shared by every resolver caller.
///
/// All operations go through one mutex. Writes are rare and the tile set is
/// small (tens to low hundreds), so the linear scan in
/// [`find_containing`](Self::find_containing) is negligible next to network
/// and storage latency.
#[derive(Debug, Default)]
pub struct TileIndex {
    tiles: Mutex<HashMap<String, ElevationTile>>,
}

impl TileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from stored tile names, skipping entries that do not
    /// parse.
    pub fn rebuild<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = Self::new();
        for name in names {
            match ElevationTile::parse(name.as_ref()) {
                Ok(tile) => index.add(tile),
                Err(e) => log::warn!("Skipping unindexable tile {:?}: {}", name.as_ref(), e),
            }
        }
        index
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ElevationTile>> {
        // Entries are inserted whole, so a poisoned map is still consistent.
        self.tiles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or overwrite by name.
    pub fn add(&self, tile: ElevationTile) {
        self.lock().insert(tile.name.clone(), tile);
    }

    pub fn get(&self, name: &str) -> Option<ElevationTile> {
        self.lock().get(name).cloned()
    }

    pub fn find_containing(&self, lat: f64, lon: f64) -> Option<ElevationTile> {
        self.lock()
            .values()
            .find(|t| t.bounds.contains(lat, lon))
            .cloned()
    }

    /// Independent snapshot; later inserts do not show up in it.
    pub fn all(&self) -> Vec<ElevationTile> {
        self.lock().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }
}
