//! Coordinate → locally available elevation tile.
//!
//! ## Thread Safety
//!
//! `TileResolver` is shared by every generation task:
//! - Tiles already in the index are returned without touching any lock but
//!   the index's own
//! - Concurrent callers for the same missing tile queue on a per-name lock,
//!   and only the first one fetches
//! - Different tiles are fetched in parallel

use crate::single_flight::KeyedLocks;
use crate::{DemError, ElevationTile, LocalTileStore, RawTile, Result, TileIndex, TileSource};
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use terramesh_metrics::TerrainMetrics;
use terramesh_storage::TileStatusStore;

/// Durable download claim shared with other service instances.
pub struct TileGate {
    pub store: Arc<dyn TileStatusStore>,
    /// Partition of the status table these tiles are recorded under.
    pub scope: String,
    /// After this long a `downloading` claim is presumed dead.
    pub lease: Duration,
}

pub struct TileResolver {
    index: Arc<TileIndex>,
    source: Arc<dyn TileSource>,
    store: LocalTileStore,
    locks: KeyedLocks,
    gate: Option<TileGate>,
    metrics: Arc<TerrainMetrics>,
}

impl TileResolver {
    pub fn new(
        index: Arc<TileIndex>,
        source: Arc<dyn TileSource>,
        store: LocalTileStore,
        metrics: Arc<TerrainMetrics>,
    ) -> Self {
        Self {
            index,
            source,
            store,
            locks: KeyedLocks::new(),
            gate: None,
            metrics,
        }
    }

    pub fn with_gate(mut self, gate: TileGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn index(&self) -> &Arc<TileIndex> {
        &self.index
    }

    pub fn store(&self) -> &LocalTileStore {
        &self.store
    }

    /// Tile containing `(lat, lon)`, fetched and stored on first demand.
    ///
    /// Returns [`DemError::TileNotFound`] if the source has no such tile.
    pub async fn resolve(&self, lat: f64, lon: f64) -> Result<ElevationTile> {
        self.resolve_inner(lat, lon, false).await
    }

    /// Like [`resolve`](Self::resolve), but a tile missing at the source is
    /// replaced by a stored sea-level tile, indexed like any other.
    pub async fn resolve_or_flat(&self, lat: f64, lon: f64) -> Result<ElevationTile> {
        self.resolve_inner(lat, lon, true).await
    }

    async fn resolve_inner(&self, lat: f64, lon: f64, flat_fallback: bool) -> Result<ElevationTile> {
        if let Some(tile) = self.index.find_containing(lat, lon) {
            return Ok(tile);
        }

        let tile = ElevationTile::for_coordinate(lat, lon)?;
        let _guard = self.locks.lock(&tile.name).await;

        // Someone else may have finished while we waited.
        if let Some(tile) = self.index.get(&tile.name) {
            return Ok(tile);
        }

        if self.store.exists(&tile.name).await? {
            log::debug!("Indexing stored elevation tile {}", tile.name);
            self.metrics.record_tile_found_locally();
            self.index.add(tile.clone());
            return Ok(tile);
        }

        match self.download(&tile).await {
            Ok(()) => {}
            Err(DemError::TileNotFound { .. }) if flat_fallback => {
                self.store_flat(&tile).await?;
            }
            Err(e) => return Err(e),
        }

        self.index.add(tile.clone());
        Ok(tile)
    }

    /// Fetch and persist one tile, holding the durable claim if configured.
    async fn download(&self, tile: &ElevationTile) -> Result<()> {
        if let Some(gate) = &self.gate {
            if !gate.store.try_claim(&gate.scope, &tile.name, gate.lease).await? {
                log::debug!("Tile {} is claimed by another instance", tile.name);
                return Err(DemError::TileBusy {
                    name: tile.name.clone(),
                });
            }
        }

        let result = self.fetch_and_save(tile).await;

        if let Some(gate) = &self.gate {
            let recorded = match &result {
                Ok(()) => gate.store.mark_ready(&gate.scope, &tile.name, &tile.storage_key).await,
                Err(e) => gate.store.mark_failed(&gate.scope, &tile.name, &e.to_string()).await,
            };
            if let Err(e) = recorded {
                log::warn!("Failed to record status of tile {}: {:#}", tile.name, e);
            }
        }

        result
    }

    async fn fetch_and_save(&self, tile: &ElevationTile) -> Result<()> {
        let start = Instant::now();
        let raw = match self.source.fetch(&tile.name).await {
            Ok(raw) => raw,
            Err(e @ DemError::TileNotFound { .. }) => {
                log::debug!("No source data for tile {}", tile.name);
                self.metrics.record_tile_not_found();
                return Err(e);
            }
            Err(e) => {
                self.metrics.record_tile_fetch_failure();
                return Err(e);
            }
        };

        // Refuse to persist something we could never sample.
        RawTile::decode(&tile.name, &raw)?;

        let size = raw.len();
        self.store.save(&tile.name, raw).await?;
        self.metrics.record_tile_fetch(start.elapsed(), size);
        log::info!("Stored elevation tile {} ({} bytes) in {:.2?}", tile.name, size, start.elapsed());
        Ok(())
    }

    async fn store_flat(&self, tile: &ElevationTile) -> Result<()> {
        self.store
            .save(&tile.name, Bytes::from(RawTile::flat().encode()))
            .await?;
        if let Some(gate) = &self.gate {
            if let Err(e) = gate.store.mark_ready(&gate.scope, &tile.name, &tile.storage_key).await {
                log::warn!("Failed to record status of tile {}: {:#}", tile.name, e);
            }
        }
        self.metrics.record_tile_synthesized();
        log::info!("Stored flat sea-level tile {}", tile.name);
        Ok(())
    }
}
