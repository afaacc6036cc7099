use crate::{
    ChunkKey, ChunkMetadata, ChunkMetadataStore, ChunkStatus, DemTileState, DemTileStatus,
    TileStatusStore, WorldVersion, WorldVersions,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::NoTls;

pub struct PostgresStorage {
    pool: Pool,
}

impl PostgresStorage {
    /// Creates the shared connection pool (capped at `max_size`) and the schema.
    pub async fn new(connection_string: &str, max_size: usize) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(connection_string.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(max_size.max(1)));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create Postgres pool")?;

        // Ensure connections work and schema exists
        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;

        client.batch_execute("
            CREATE TABLE IF NOT EXISTS terrain_chunks (
                world_version TEXT NOT NULL,
                layer TEXT NOT NULL,
                resolution INT NOT NULL,
                chunk_x INT NOT NULL,
                chunk_z INT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'ready')),
                storage_key TEXT NOT NULL,
                checksum TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (world_version, layer, resolution, chunk_x, chunk_z)
            );

            CREATE TABLE IF NOT EXISTS dem_tile_status (
                world_version TEXT NOT NULL,
                tile_name TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('missing', 'downloading', 'ready', 'failed')),
                last_error TEXT,
                storage_key TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (world_version, tile_name)
            );

            CREATE TABLE IF NOT EXISTS world_versions (
                version TEXT PRIMARY KEY,
                id INT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT TRUE,
                origin_lat DOUBLE PRECISION NOT NULL,
                origin_lon DOUBLE PRECISION NOT NULL,
                chunk_size_m DOUBLE PRECISION NOT NULL
            );
        ").await.context("Failed to init schema")?;

        log::info!("Database schema ready");
        Ok(())
    }

    /// Snapshot of the `world_versions` table, taken once at startup.
    pub async fn load_world_versions(&self) -> Result<WorldVersions> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        let rows = client.query(
            "SELECT version, id, active, origin_lat, origin_lon, chunk_size_m FROM world_versions",
            &[],
        ).await.context("Failed to load world versions")?;

        log::debug!("Loaded {} world version row(s)", rows.len());
        let versions = rows.iter().map(|row| WorldVersion {
            version: row.get(0),
            id: row.get(1),
            active: row.get(2),
            origin_lat: row.get(3),
            origin_lon: row.get(4),
            chunk_size_m: row.get(5),
        });
        Ok(WorldVersions::new(versions))
    }
}

fn row_to_metadata(key: &ChunkKey, row: &tokio_postgres::Row) -> Result<ChunkMetadata> {
    let status: String = row.get(0);
    Ok(ChunkMetadata {
        key: key.clone(),
        status: ChunkStatus::parse(&status)?,
        storage_key: row.get(1),
        checksum: row.get(2),
        created_at: row.get::<_, DateTime<Utc>>(3),
        updated_at: row.get::<_, DateTime<Utc>>(4),
    })
}

#[async_trait]
impl ChunkMetadataStore for PostgresStorage {
    async fn get(&self, key: &ChunkKey) -> Result<Option<ChunkMetadata>> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        let rows = client.query(
            "SELECT status, storage_key, checksum, created_at, updated_at
             FROM terrain_chunks
             WHERE world_version = $1 AND layer = $2 AND resolution = $3 AND chunk_x = $4 AND chunk_z = $5",
            &[&key.world_version, &key.layer, &(key.resolution as i32), &key.x, &key.z],
        ).await.context("Failed to query chunk metadata")?;

        match rows.first() {
            Some(row) => Ok(Some(row_to_metadata(key, row)?)),
            None => Ok(None),
        }
    }

    async fn insert_pending(&self, key: &ChunkKey) -> Result<bool> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        let inserted = client.execute(
            "INSERT INTO terrain_chunks (world_version, layer, resolution, chunk_x, chunk_z, status, storage_key)
             VALUES ($1, $2, $3, $4, $5, 'pending', $6)
             ON CONFLICT DO NOTHING",
            &[&key.world_version, &key.layer, &(key.resolution as i32), &key.x, &key.z, &key.artifact_key()],
        ).await.context("Failed to insert pending chunk")?;
        Ok(inserted == 1)
    }

    async fn claim_stale_pending(&self, key: &ChunkKey, stale_after: Duration) -> Result<bool> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        let claimed = client.execute(
            "UPDATE terrain_chunks SET updated_at = NOW()
             WHERE world_version = $1 AND layer = $2 AND resolution = $3 AND chunk_x = $4 AND chunk_z = $5
               AND status = 'pending'
               AND updated_at < NOW() - make_interval(secs => $6)",
            &[&key.world_version, &key.layer, &(key.resolution as i32), &key.x, &key.z, &stale_after.as_secs_f64()],
        ).await.context("Failed to claim stale chunk")?;
        Ok(claimed == 1)
    }

    async fn mark_ready(&self, key: &ChunkKey, checksum: &str) -> Result<bool> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        let updated = client.execute(
            "UPDATE terrain_chunks SET status = 'ready', checksum = $6, updated_at = NOW()
             WHERE world_version = $1 AND layer = $2 AND resolution = $3 AND chunk_x = $4 AND chunk_z = $5
               AND status = 'pending'",
            &[&key.world_version, &key.layer, &(key.resolution as i32), &key.x, &key.z, &checksum],
        ).await.context("Failed to mark chunk ready")?;
        Ok(updated == 1)
    }

    async fn refresh_checksum(&self, key: &ChunkKey, checksum: &str) -> Result<bool> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        let updated = client.execute(
            "UPDATE terrain_chunks SET checksum = $6, updated_at = NOW()
             WHERE world_version = $1 AND layer = $2 AND resolution = $3 AND chunk_x = $4 AND chunk_z = $5
               AND status = 'ready'
               AND checksum IS DISTINCT FROM $6",
            &[&key.world_version, &key.layer, &(key.resolution as i32), &key.x, &key.z, &checksum],
        ).await.context("Failed to refresh chunk checksum")?;
        Ok(updated == 1)
    }
}

#[async_trait]
impl TileStatusStore for PostgresStorage {
    async fn get(&self, scope: &str, tile_name: &str) -> Result<Option<DemTileStatus>> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        let rows = client.query(
            "SELECT status, last_error, storage_key, updated_at
             FROM dem_tile_status WHERE world_version = $1 AND tile_name = $2",
            &[&scope, &tile_name],
        ).await.context("Failed to query tile status")?;

        let Some(row) = rows.first() else { return Ok(None) };
        let state: String = row.get(0);
        Ok(Some(DemTileStatus {
            scope: scope.to_string(),
            tile_name: tile_name.to_string(),
            state: DemTileState::parse(&state)?,
            last_error: row.get(1),
            storage_key: row.get(2),
            updated_at: row.get(3),
        }))
    }

    async fn try_claim(&self, scope: &str, tile_name: &str, stale_after: Duration) -> Result<bool> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        // Only the row that was inserted or actually flipped is returned.
        let rows = client.query(
            "INSERT INTO dem_tile_status (world_version, tile_name, status, updated_at)
             VALUES ($1, $2, 'downloading', NOW())
             ON CONFLICT (world_version, tile_name) DO UPDATE
                SET status = 'downloading', last_error = NULL, updated_at = NOW()
                WHERE dem_tile_status.status IN ('missing', 'failed')
                   OR (dem_tile_status.status = 'downloading'
                       AND dem_tile_status.updated_at < NOW() - make_interval(secs => $3))
             RETURNING tile_name",
            &[&scope, &tile_name, &stale_after.as_secs_f64()],
        ).await.context("Failed to claim tile download")?;
        Ok(!rows.is_empty())
    }

    async fn mark_ready(&self, scope: &str, tile_name: &str, storage_key: &str) -> Result<()> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        client.execute(
            "INSERT INTO dem_tile_status (world_version, tile_name, status, storage_key, updated_at)
             VALUES ($1, $2, 'ready', $3, NOW())
             ON CONFLICT (world_version, tile_name) DO UPDATE
                SET status = 'ready', storage_key = $3, last_error = NULL, updated_at = NOW()",
            &[&scope, &tile_name, &storage_key],
        ).await.context("Failed to mark tile ready")?;
        Ok(())
    }

    async fn mark_failed(&self, scope: &str, tile_name: &str, error: &str) -> Result<()> {
        let client = self.pool.get().await.context("Failed to get DB connection")?;
        client.execute(
            "INSERT INTO dem_tile_status (world_version, tile_name, status, last_error, updated_at)
             VALUES ($1, $2, 'failed', $3, NOW())
             ON CONFLICT (world_version, tile_name) DO UPDATE
                SET status = 'failed', last_error = $3, updated_at = NOW()",
            &[&scope, &tile_name, &error],
        ).await.context("Failed to mark tile failed")?;
        Ok(())
    }
}
