//! The service's own copy of raw elevation tiles.

use crate::tile::TILE_KEY_PREFIX;
use crate::{ElevationTile, RawTile, Result};
use bytes::Bytes;
use std::sync::Arc;
use terramesh_storage::ObjectStore;

/// Raw tiles under `dem/{name}` in the object store, uncompressed so later
/// loads need no decoding beyond a byte swap.
#[derive(Clone)]
pub struct LocalTileStore {
    objects: Arc<dyn ObjectStore>,
}

impl LocalTileStore {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }

    pub fn key_for(tile_name: &str) -> String {
        format!("{}{}", TILE_KEY_PREFIX, tile_name)
    }

    /// Metadata-only probe.
    pub async fn exists(&self, tile_name: &str) -> Result<bool> {
        Ok(self.objects.head(&Self::key_for(tile_name)).await?)
    }

    /// Single atomic put. Returns the storage key.
    pub async fn save(&self, tile_name: &str, raw: Bytes) -> Result<String> {
        let key = Self::key_for(tile_name);
        self.objects.put(&key, raw).await?;
        Ok(key)
    }

    /// Load and decode a stored tile. A tile that was indexed but has since
    /// vanished from the store is reported as an invalid tile.
    pub async fn load(&self, tile: &ElevationTile) -> Result<RawTile> {
        match self.objects.get(&tile.storage_key).await? {
            Some(bytes) => RawTile::decode(&tile.name, &bytes),
            None => Err(crate::DemError::InvalidTile {
                name: tile.name.clone(),
                reason: format!("{} missing from store", tile.storage_key),
            }),
        }
    }

    /// Names of every stored tile.
    pub async fn list(&self) -> Result<Vec<String>> {
        let keys = self.objects.list(TILE_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(TILE_KEY_PREFIX).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terramesh_storage::memory::MemoryObjectStore;

    #[tokio::test]
    async fn test_save_exists_load_list() {
        let store = LocalTileStore::new(Arc::new(MemoryObjectStore::new()));
        assert!(!store.exists("N46W113").await.unwrap());

        let key = store.save("N46W113", Bytes::from(RawTile::flat().encode())).await.unwrap();
        assert_eq!(key, "dem/N46W113");
        assert!(store.exists("N46W113").await.unwrap());

        let tile = ElevationTile::parse("N46W113").unwrap();
        assert_eq!(store.load(&tile).await.unwrap(), RawTile::flat());
        assert_eq!(store.list().await.unwrap(), vec!["N46W113".to_string()]);
    }

    #[tokio::test]
    async fn test_load_missing_is_an_error() {
        let store = LocalTileStore::new(Arc::new(MemoryObjectStore::new()));
        let tile = ElevationTile::parse("N00E000").unwrap();
        assert!(store.load(&tile).await.is_err());
    }
}
