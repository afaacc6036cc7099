//! Durable state for terramesh.
//!
//! - [`ObjectStore`]: blob storage for elevation tiles and chunk artifacts
//! - [`ChunkMetadataStore`]: per-chunk generation status (pending / ready)
//! - [`TileStatusStore`]: durable download gating for elevation tiles
//! - [`WorldVersions`]: read-only world registry loaded at startup
//! - [`WriteGate`]: process-wide permit bounding metadata writes

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub mod gate;
pub mod memory;
pub mod metadata;
pub mod object;
pub mod postgres;
pub mod tile_status;
pub mod world;

pub use gate::{WriteGate, WritePermit};
pub use metadata::{ChunkKey, ChunkMetadata, ChunkStatus, TERRAIN_LAYER};
pub use tile_status::{DemTileState, DemTileStatus};
pub use world::{WorldVersion, WorldVersions};

/// Blob storage keyed by slash-separated paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Full object payload, or `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Atomically replaces the object at `key`.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Metadata-only existence probe, never transfers the payload.
    async fn head(&self, key: &str) -> Result<bool>;

    /// Keys under `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Durable chunk generation status.
///
/// Rows move `pending -> ready` exactly once and never go back.
#[async_trait]
pub trait ChunkMetadataStore: Send + Sync {
    async fn get(&self, key: &ChunkKey) -> Result<Option<ChunkMetadata>>;

    /// Inserts a pending row. Returns `false` if a row already existed, in
    /// which case nothing was written.
    async fn insert_pending(&self, key: &ChunkKey) -> Result<bool>;

    /// Re-arms a pending row whose last update is older than `stale_after`.
    /// Returns `true` only for the single caller that won the row.
    async fn claim_stale_pending(&self, key: &ChunkKey, stale_after: Duration) -> Result<bool>;

    /// Flips a pending row to ready. Returns `false` if the row was not
    /// pending (already ready, or missing).
    async fn mark_ready(&self, key: &ChunkKey, checksum: &str) -> Result<bool>;

    /// Records a new checksum on a ready row whose artifact was rewritten.
    /// Returns `true` only if the stored checksum changed.
    async fn refresh_checksum(&self, key: &ChunkKey, checksum: &str) -> Result<bool>;
}

/// Durable per-tile download state shared between service instances.
#[async_trait]
pub trait TileStatusStore: Send + Sync {
    async fn get(&self, scope: &str, tile_name: &str) -> Result<Option<DemTileStatus>>;

    /// Atomic `missing | failed | stale downloading -> downloading`.
    /// Returns `true` if this caller now owns the download.
    async fn try_claim(&self, scope: &str, tile_name: &str, stale_after: Duration) -> Result<bool>;

    async fn mark_ready(&self, scope: &str, tile_name: &str, storage_key: &str) -> Result<()>;

    async fn mark_failed(&self, scope: &str, tile_name: &str, error: &str) -> Result<()>;
}
