//! Chunk request state machine: `not found -> pending -> ready`.
//!
//! A request never waits for generation. It either gets the stored artifact
//! or an "accepted" answer, and at most one generation task per chunk runs in
//! this process at a time. Durable metadata decides which request starts a
//! task; the in-flight set only stops this process from starting a second
//! one for a chunk it is already working on.

use anyhow::{Context, Result};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use terramesh_gen::heightfield::MAX_RESOLUTION;
use terramesh_gen::{ChunkGenerator, format};
use terramesh_metrics::TerrainMetrics;
use terramesh_storage::{
    ChunkKey, ChunkMetadataStore, ChunkStatus, ObjectStore, WorldVersion, WorldVersions, WriteGate,
};
use thiserror::Error;

#[derive(Debug)]
pub enum ChunkResponse {
    Ready { bytes: Bytes, checksum: Option<String> },
    Accepted,
}

#[derive(Debug, Error)]
pub enum ChunkRequestError {
    #[error("Unknown world version {0}")]
    UnknownVersion(String),

    #[error("World version {0} is no longer served")]
    InactiveVersion(String),

    #[error("Resolution {0} is outside 1..={max}", max = MAX_RESOLUTION)]
    InvalidResolution(u16),

    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

/// Hex SHA-256 of an artifact, stored as its checksum and served as its ETag.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub struct ChunkCoordinator {
    worlds: WorldVersions,
    metadata: Arc<dyn ChunkMetadataStore>,
    objects: Arc<dyn ObjectStore>,
    generator: Arc<dyn ChunkGenerator>,
    gate: WriteGate,
    metrics: Arc<TerrainMetrics>,
    pending_timeout: Duration,
    in_flight: Mutex<HashSet<ChunkKey>>,
}

/// Removes a chunk from the in-flight set when its task ends, however it ends.
struct InFlight {
    coordinator: Arc<ChunkCoordinator>,
    key: ChunkKey,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.coordinator.in_flight().remove(&self.key);
    }
}

impl ChunkCoordinator {
    pub fn new(
        worlds: WorldVersions,
        metadata: Arc<dyn ChunkMetadataStore>,
        objects: Arc<dyn ObjectStore>,
        generator: Arc<dyn ChunkGenerator>,
        gate: WriteGate,
        metrics: Arc<TerrainMetrics>,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            worlds,
            metadata,
            objects,
            generator,
            gate,
            metrics,
            pending_timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<ChunkKey>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_generating(&self, key: &ChunkKey) -> bool {
        self.in_flight().contains(key)
    }

    pub async fn request(
        self: &Arc<Self>,
        version: &str,
        resolution: u16,
        x: i32,
        z: i32,
    ) -> Result<ChunkResponse, ChunkRequestError> {
        let world = self
            .worlds
            .lookup(version)
            .ok_or_else(|| ChunkRequestError::UnknownVersion(version.to_string()))?;
        if !world.active {
            return Err(ChunkRequestError::InactiveVersion(version.to_string()));
        }
        if resolution == 0 || resolution > MAX_RESOLUTION {
            return Err(ChunkRequestError::InvalidResolution(resolution));
        }

        let key = ChunkKey::terrain(version, resolution, x, z);
        let row = self.metadata.get(&key).await.context("Failed to read chunk metadata")?;

        match row {
            Some(row) if row.status == ChunkStatus::Ready => {
                if let Some(bytes) = self.load_artifact(&row.storage_key).await? {
                    self.metrics.record_served(bytes.len());
                    return Ok(ChunkResponse::Ready {
                        bytes,
                        checksum: row.checksum,
                    });
                }
                if self.launch(&key, world) {
                    log::warn!("Chunk {} is marked ready but its artifact is missing, regenerating", key);
                    self.metrics.record_inconsistency();
                }
            }
            Some(_) => {
                if !self.is_generating(&key)
                    && self.metadata.claim_stale_pending(&key, self.pending_timeout).await?
                {
                    log::info!("Reclaiming abandoned pending chunk {}", key);
                    self.launch(&key, world);
                }
            }
            None => {
                // Detached so a dropped request cannot leave a pending row with no task.
                let coordinator = self.clone();
                let (task_key, task_world) = (key.clone(), world.clone());
                tokio::spawn(async move { coordinator.insert_and_launch(&task_key, &task_world).await })
                    .await
                    .context("Pending insert task failed")??;
            }
        }

        self.metrics.record_accepted();
        Ok(ChunkResponse::Accepted)
    }

    async fn insert_and_launch(self: &Arc<Self>, key: &ChunkKey, world: &WorldVersion) -> Result<()> {
        if self.metadata.insert_pending(key).await? {
            self.launch(key, world);
        } else {
            log::debug!("Chunk {} was claimed by a concurrent request", key);
        }
        Ok(())
    }

    /// Stored artifact, or `None` if it is missing or unusable.
    async fn load_artifact(&self, storage_key: &str) -> Result<Option<Bytes>> {
        let Some(bytes) = self
            .objects
            .get(storage_key)
            .await
            .with_context(|| format!("Failed to read artifact {}", storage_key))?
        else {
            return Ok(None);
        };

        match format::validate(&bytes) {
            Ok(_) => Ok(Some(bytes)),
            Err(e) => {
                log::error!("Stored artifact {} is corrupt: {}", storage_key, e);
                Ok(None)
            }
        }
    }

    /// Spawns the generation task unless one is already running here.
    fn launch(self: &Arc<Self>, key: &ChunkKey, world: &WorldVersion) -> bool {
        if !self.in_flight().insert(key.clone()) {
            log::debug!("Chunk {} is already generating", key);
            return false;
        }

        let guard = InFlight {
            coordinator: self.clone(),
            key: key.clone(),
        };
        let world = world.clone();
        self.metrics.record_generation_launched();

        tokio::spawn(async move {
            let coordinator = guard.coordinator.clone();
            if let Err(e) = coordinator.generate_and_store(&guard.key, &world).await {
                coordinator.metrics.record_generation_failure();
                log::error!("Generation of chunk {} failed, left pending: {:#}", guard.key, e);
            }
        });
        true
    }

    async fn generate_and_store(&self, key: &ChunkKey, world: &WorldVersion) -> Result<()> {
        let start = Instant::now();

        let field = self
            .generator
            .generate(key, world)
            .await
            .with_context(|| format!("Failed to generate chunk {}", key))?;
        let bytes = Bytes::from(format::serialize(&field));
        let sum = checksum(&bytes);
        let size = bytes.len();

        self.objects
            .put(&key.artifact_key(), bytes)
            .await
            .with_context(|| format!("Failed to store artifact {}", key.artifact_key()))?;

        let waiting = Instant::now();
        let _permit = self.gate.acquire().await?;
        self.metrics.record_write_wait(waiting.elapsed());

        let flipped = self
            .metadata
            .mark_ready(key, &sum)
            .await
            .with_context(|| format!("Failed to mark chunk {} ready", key))?;
        if !flipped {
            let changed = self
                .metadata
                .refresh_checksum(key, &sum)
                .await
                .with_context(|| format!("Failed to refresh checksum of chunk {}", key))?;
            if changed {
                log::warn!("Chunk {} was regenerated with different content, checksum updated", key);
            } else {
                log::debug!("Chunk {} was already ready, artifact rewritten", key);
            }
        }

        self.metrics.record_generation(start.elapsed(), size);
        log::info!("Generated chunk {} ({} bytes) in {:.2?}", key, size, start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use terramesh_gen::{GenerateError, Heightfield, sample_count};
    use terramesh_storage::memory::{MemoryMetadataStore, MemoryObjectStore};
    use terramesh_storage::ChunkMetadata;

    struct SpyGenerator {
        calls: AtomicUsize,
        fail: AtomicBool,
        shift: AtomicUsize,
        delay: Duration,
    }

    impl SpyGenerator {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                shift: AtomicUsize::new(0),
                delay,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChunkGenerator for SpyGenerator {
        async fn generate(&self, key: &ChunkKey, _world: &WorldVersion) -> Result<Heightfield, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(GenerateError::Elevation(terramesh_dem::DemError::TileBusy {
                    name: "N46W113".to_string(),
                }));
            }
            let shift = self.shift.load(Ordering::SeqCst);
            let heights = (0..sample_count(key.resolution)).map(|i| (i + shift) as f32).collect();
            Ok(Heightfield::from_heights(key.resolution, heights))
        }
    }

    /// Commits the pending row, then stalls before returning.
    struct SlowInsertStore {
        inner: Arc<MemoryMetadataStore>,
        delay: Duration,
    }

    #[async_trait]
    impl ChunkMetadataStore for SlowInsertStore {
        async fn get(&self, key: &ChunkKey) -> Result<Option<ChunkMetadata>> {
            self.inner.get(key).await
        }

        async fn insert_pending(&self, key: &ChunkKey) -> Result<bool> {
            let inserted = self.inner.insert_pending(key).await?;
            tokio::time::sleep(self.delay).await;
            Ok(inserted)
        }

        async fn claim_stale_pending(&self, key: &ChunkKey, older_than: Duration) -> Result<bool> {
            self.inner.claim_stale_pending(key, older_than).await
        }

        async fn mark_ready(&self, key: &ChunkKey, checksum: &str) -> Result<bool> {
            self.inner.mark_ready(key, checksum).await
        }

        async fn refresh_checksum(&self, key: &ChunkKey, checksum: &str) -> Result<bool> {
            self.inner.refresh_checksum(key, checksum).await
        }
    }

    struct Fixture {
        coordinator: Arc<ChunkCoordinator>,
        generator: Arc<SpyGenerator>,
        metadata: Arc<MemoryMetadataStore>,
        objects: Arc<MemoryObjectStore>,
        metrics: Arc<TerrainMetrics>,
    }

    fn world(version: &str, active: bool) -> WorldVersion {
        WorldVersion {
            version: version.to_string(),
            id: 1,
            active,
            origin_lat: 46.5,
            origin_lon: -113.5,
            chunk_size_m: 512.0,
        }
    }

    fn fixture(delay: Duration) -> Fixture {
        fixture_with(delay, WriteGate::default(), None)
    }

    fn fixture_with(delay: Duration, gate: WriteGate, insert_delay: Option<Duration>) -> Fixture {
        let generator = Arc::new(SpyGenerator::new(delay));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let store: Arc<dyn ChunkMetadataStore> = match insert_delay {
            Some(delay) => Arc::new(SlowInsertStore {
                inner: metadata.clone(),
                delay,
            }),
            None => metadata.clone(),
        };
        let objects = Arc::new(MemoryObjectStore::new());
        let metrics = Arc::new(TerrainMetrics::default());
        let coordinator = Arc::new(ChunkCoordinator::new(
            WorldVersions::new([world("v1", true), world("v0", false)]),
            store,
            objects.clone(),
            generator.clone(),
            gate,
            metrics.clone(),
            Duration::from_secs(300),
        ));
        Fixture {
            coordinator,
            generator,
            metadata,
            objects,
            metrics,
        }
    }

    async fn wait_until_idle(coordinator: &ChunkCoordinator, key: &ChunkKey) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.is_generating(key) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn status(metadata: &MemoryMetadataStore, key: &ChunkKey) -> Option<ChunkStatus> {
        metadata.get(key).await.unwrap().map(|row| row.status)
    }

    #[tokio::test]
    async fn test_first_request_accepted_then_ready() {
        let f = fixture(Duration::from_millis(10));
        let key = ChunkKey::terrain("v1", 64, 3, -2);

        let first = f.coordinator.request("v1", 64, 3, -2).await.unwrap();
        assert!(matches!(first, ChunkResponse::Accepted));
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Pending));

        wait_until_idle(&f.coordinator, &key).await;
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Ready));

        match f.coordinator.request("v1", 64, 3, -2).await.unwrap() {
            ChunkResponse::Ready { bytes, checksum: sum } => {
                assert_eq!(bytes.len(), 16919);
                assert_eq!(sum, Some(checksum(&bytes)));
                let field = format::deserialize(&bytes).unwrap();
                assert_eq!(field.heights[4224], 4224.0);
            }
            ChunkResponse::Accepted => panic!("chunk should be ready"),
        }
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(f.metrics.total_artifacts_served.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_launch_once() {
        let f = fixture(Duration::from_millis(100));
        let key = ChunkKey::terrain("v1", 16, 0, 0);

        let mut handles = Vec::new();
        for _ in 0..24 {
            let coordinator = f.coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.request("v1", 16, 0, 0).await }));
        }
        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert!(matches!(response, ChunkResponse::Accepted));
        }

        // A second wave while still pending.
        assert!(matches!(
            f.coordinator.request("v1", 16, 0, 0).await.unwrap(),
            ChunkResponse::Accepted
        ));

        wait_until_idle(&f.coordinator, &key).await;
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(f.metadata.len(), 1);
        assert_eq!(f.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_ready_is_terminal() {
        let f = fixture(Duration::ZERO);
        let key = ChunkKey::terrain("v1", 8, 1, 1);

        f.coordinator.request("v1", 8, 1, 1).await.unwrap();
        wait_until_idle(&f.coordinator, &key).await;

        for _ in 0..5 {
            assert!(matches!(
                f.coordinator.request("v1", 8, 1, 1).await.unwrap(),
                ChunkResponse::Ready { .. }
            ));
            assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Ready));
        }
        assert!(!f.metadata.insert_pending(&key).await.unwrap());
        assert_eq!(f.generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_stays_pending_until_stale() {
        let f = fixture(Duration::ZERO);
        f.generator.fail.store(true, Ordering::SeqCst);
        let key = ChunkKey::terrain("v1", 8, 0, 0);

        f.coordinator.request("v1", 8, 0, 0).await.unwrap();
        wait_until_idle(&f.coordinator, &key).await;
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Pending));
        assert!(f.objects.is_empty());
        assert_eq!(f.metrics.total_generation_failures.load(Ordering::Relaxed), 1);

        // Fresh pending row: nothing is relaunched.
        f.coordinator.request("v1", 8, 0, 0).await.unwrap();
        wait_until_idle(&f.coordinator, &key).await;
        assert_eq!(f.generator.calls(), 1);

        // Abandoned pending row: reclaimed and regenerated.
        f.generator.fail.store(false, Ordering::SeqCst);
        f.metadata.age_row(&key, Duration::from_secs(600));
        let response = f.coordinator.request("v1", 8, 0, 0).await.unwrap();
        assert!(matches!(response, ChunkResponse::Accepted));
        wait_until_idle(&f.coordinator, &key).await;
        assert_eq!(f.generator.calls(), 2);
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Ready));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_regenerated() {
        let f = fixture(Duration::ZERO);
        let key = ChunkKey::terrain("v1", 4, 9, 9);

        f.coordinator.request("v1", 4, 9, 9).await.unwrap();
        wait_until_idle(&f.coordinator, &key).await;
        let original = f.objects.remove(&key.artifact_key()).unwrap();

        let response = f.coordinator.request("v1", 4, 9, 9).await.unwrap();
        assert!(matches!(response, ChunkResponse::Accepted));
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Ready));

        wait_until_idle(&f.coordinator, &key).await;
        assert_eq!(f.generator.calls(), 2);
        assert_eq!(f.metrics.total_inconsistencies.load(Ordering::Relaxed), 1);
        match f.coordinator.request("v1", 4, 9, 9).await.unwrap() {
            ChunkResponse::Ready { bytes, .. } => assert_eq!(bytes, original),
            ChunkResponse::Accepted => panic!("artifact should be back"),
        }
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_regenerated() {
        let f = fixture(Duration::ZERO);
        let key = ChunkKey::terrain("v1", 4, 0, 1);

        f.coordinator.request("v1", 4, 0, 1).await.unwrap();
        wait_until_idle(&f.coordinator, &key).await;
        f.objects
            .put(&key.artifact_key(), Bytes::from_static(&[1, 4, 0]))
            .await
            .unwrap();

        let response = f.coordinator.request("v1", 4, 0, 1).await.unwrap();
        assert!(matches!(response, ChunkResponse::Accepted));
        wait_until_idle(&f.coordinator, &key).await;
        assert!(matches!(
            f.coordinator.request("v1", 4, 0, 1).await.unwrap(),
            ChunkResponse::Ready { .. }
        ));
    }

    #[tokio::test]
    async fn test_regenerated_artifact_refreshes_checksum() {
        let f = fixture(Duration::ZERO);
        let key = ChunkKey::terrain("v1", 4, 2, 2);

        f.coordinator.request("v1", 4, 2, 2).await.unwrap();
        wait_until_idle(&f.coordinator, &key).await;
        let original = f.metadata.get(&key).await.unwrap().unwrap().checksum.unwrap();

        f.objects.remove(&key.artifact_key()).unwrap();
        f.generator.shift.store(1, Ordering::SeqCst);
        f.coordinator.request("v1", 4, 2, 2).await.unwrap();
        wait_until_idle(&f.coordinator, &key).await;

        match f.coordinator.request("v1", 4, 2, 2).await.unwrap() {
            ChunkResponse::Ready { bytes, checksum: sum } => {
                assert_eq!(format::deserialize(&bytes).unwrap().heights[0], 1.0);
                assert_eq!(sum, Some(checksum(&bytes)));
                assert_ne!(sum, Some(original));
            }
            ChunkResponse::Accepted => panic!("artifact should be back"),
        }
    }

    #[tokio::test]
    async fn test_ready_waits_for_write_permit() {
        let gate = WriteGate::new(1);
        let held = gate.acquire().await.unwrap();
        let f = fixture_with(Duration::ZERO, gate.clone(), None);
        let key = ChunkKey::terrain("v1", 8, 5, 5);

        f.coordinator.request("v1", 8, 5, 5).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.objects.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Artifact is stored but the row cannot flip without a permit.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.objects.len(), 1);
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Pending));
        assert!(f.coordinator.is_generating(&key));
        assert_eq!(gate.available(), 0);

        drop(held);
        wait_until_idle(&f.coordinator, &key).await;
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Ready));
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_dropped_request_still_launches_generation() {
        let f = fixture_with(Duration::ZERO, WriteGate::default(), Some(Duration::from_millis(100)));
        let key = ChunkKey::terrain("v1", 8, 7, 7);

        let dropped = tokio::time::timeout(Duration::from_millis(10), f.coordinator.request("v1", 8, 7, 7)).await;
        assert!(dropped.is_err());
        assert_eq!(status(&f.metadata, &key).await, Some(ChunkStatus::Pending));

        tokio::time::timeout(Duration::from_secs(5), async {
            while status(&f.metadata, &key).await != Some(ChunkStatus::Ready) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.generator.calls(), 1);
        assert_eq!(f.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_requests() {
        let f = fixture(Duration::ZERO);

        let err = f.coordinator.request("nope", 64, 0, 0).await.unwrap_err();
        assert!(matches!(err, ChunkRequestError::UnknownVersion(_)));

        let err = f.coordinator.request("v0", 64, 0, 0).await.unwrap_err();
        assert!(matches!(err, ChunkRequestError::InactiveVersion(_)));

        for r in [0, MAX_RESOLUTION + 1] {
            let err = f.coordinator.request("v1", r, 0, 0).await.unwrap_err();
            assert!(matches!(err, ChunkRequestError::InvalidResolution(_)));
        }

        assert!(f.metadata.is_empty());
        assert_eq!(f.generator.calls(), 0);
    }

    #[test]
    fn test_checksum_is_hex_sha256() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
