//! In-process implementations of the storage traits.
//!
//! Used for tests and for running without Postgres. The metadata stores
//! mirror the conditional-update semantics of the SQL in [`crate::postgres`].

use crate::{
    ChunkKey, ChunkMetadata, ChunkMetadataStore, ChunkStatus, DemTileState, DemTileStatus,
    ObjectStore, TileStatusStore,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| anyhow!("In-memory store lock poisoned"))
}

fn stale_cutoff(stale_after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(stale_after)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops an object behind the metadata's back.
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().ok()?.remove(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(lock(&self.objects)?.get(key).cloned())
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        lock(&self.objects)?.insert(key.to_string(), data);
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.objects)?.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(lock(&self.objects)?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    rows: Mutex<HashMap<ChunkKey, ChunkMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shifts a row's `updated_at` into the past.
    pub fn age_row(&self, key: &ChunkKey, by: Duration) {
        if let Ok(mut rows) = self.rows.lock() {
            if let Some(row) = rows.get_mut(key) {
                row.updated_at -= chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
            }
        }
    }
}

#[async_trait]
impl ChunkMetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &ChunkKey) -> Result<Option<ChunkMetadata>> {
        Ok(lock(&self.rows)?.get(key).cloned())
    }

    async fn insert_pending(&self, key: &ChunkKey) -> Result<bool> {
        let mut rows = lock(&self.rows)?;
        if rows.contains_key(key) {
            return Ok(false);
        }
        rows.insert(key.clone(), ChunkMetadata::pending(key.clone(), Utc::now()));
        Ok(true)
    }

    async fn claim_stale_pending(&self, key: &ChunkKey, stale_after: Duration) -> Result<bool> {
        let cutoff = stale_cutoff(stale_after);
        let mut rows = lock(&self.rows)?;
        match rows.get_mut(key) {
            Some(row) if row.status == ChunkStatus::Pending && row.updated_at < cutoff => {
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_ready(&self, key: &ChunkKey, checksum: &str) -> Result<bool> {
        let mut rows = lock(&self.rows)?;
        match rows.get_mut(key) {
            Some(row) if row.status == ChunkStatus::Pending => {
                row.status = ChunkStatus::Ready;
                row.checksum = Some(checksum.to_string());
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn refresh_checksum(&self, key: &ChunkKey, checksum: &str) -> Result<bool> {
        let mut rows = lock(&self.rows)?;
        match rows.get_mut(key) {
            Some(row) if row.status == ChunkStatus::Ready && row.checksum.as_deref() != Some(checksum) => {
                row.checksum = Some(checksum.to_string());
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryTileStatusStore {
    rows: Mutex<HashMap<(String, String), DemTileStatus>>,
}

impl MemoryTileStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&self, scope: &str, tile_name: &str, f: impl FnOnce(&mut DemTileStatus)) -> Result<()> {
        let mut rows = lock(&self.rows)?;
        let row = rows
            .entry((scope.to_string(), tile_name.to_string()))
            .or_insert_with(|| DemTileStatus {
                scope: scope.to_string(),
                tile_name: tile_name.to_string(),
                state: DemTileState::Missing,
                last_error: None,
                storage_key: None,
                updated_at: Utc::now(),
            });
        f(row);
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TileStatusStore for MemoryTileStatusStore {
    async fn get(&self, scope: &str, tile_name: &str) -> Result<Option<DemTileStatus>> {
        Ok(lock(&self.rows)?
            .get(&(scope.to_string(), tile_name.to_string()))
            .cloned())
    }

    async fn try_claim(&self, scope: &str, tile_name: &str, stale_after: Duration) -> Result<bool> {
        let cutoff = stale_cutoff(stale_after);
        let mut rows = lock(&self.rows)?;
        let id = (scope.to_string(), tile_name.to_string());
        let claimable = match rows.get(&id) {
            None => true,
            Some(row) => {
                row.state.is_claimable()
                    || (row.state == DemTileState::Downloading && row.updated_at < cutoff)
            }
        };
        if !claimable {
            return Ok(false);
        }
        rows.insert(
            id,
            DemTileStatus {
                scope: scope.to_string(),
                tile_name: tile_name.to_string(),
                state: DemTileState::Downloading,
                last_error: None,
                storage_key: None,
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn mark_ready(&self, scope: &str, tile_name: &str, storage_key: &str) -> Result<()> {
        self.upsert(scope, tile_name, |row| {
            row.state = DemTileState::Ready;
            row.last_error = None;
            row.storage_key = Some(storage_key.to_string());
        })
    }

    async fn mark_failed(&self, scope: &str, tile_name: &str, error: &str) -> Result<()> {
        self.upsert(scope, tile_name, |row| {
            row.state = DemTileState::Failed;
            row.last_error = Some(error.to_string());
        })
    }
}
