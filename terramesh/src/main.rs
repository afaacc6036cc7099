use anyhow::{Context, bail};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

use terramesh_dem::{HttpTileSource, LocalTileStore, TileGate, TileIndex, TileResolver, TileSampler};
use terramesh_gen::HeightfieldGenerator;
use terramesh_metrics::TerrainMetrics;
use terramesh_storage::memory::MemoryMetadataStore;
use terramesh_storage::object::FsObjectStore;
use terramesh_storage::postgres::PostgresStorage;
use terramesh_storage::{ChunkMetadataStore, ObjectStore, WorldVersions, WriteGate};

mod config;
mod coordinator;
mod routes;

use config::Args;
use coordinator::ChunkCoordinator;

const DB_CONNECT_ATTEMPTS: u32 = 30;

/// Elevation tiles are shared by every world version.
const TILE_SCOPE: &str = "shared";

async fn connect(url: &str, pool_size: usize) -> anyhow::Result<PostgresStorage> {
    for attempt in 1..=DB_CONNECT_ATTEMPTS {
        match PostgresStorage::new(url, pool_size).await {
            Ok(storage) => return Ok(storage),
            Err(e) => {
                log::warn!(
                    "Failed to connect to storage: {:#}. Retrying {}/{} in 2s...",
                    e, attempt, DB_CONNECT_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    bail!("Could not connect to storage after {} retries", DB_CONNECT_ATTEMPTS)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let metrics = Arc::new(TerrainMetrics::new(args.summary()));

    let objects: Arc<dyn ObjectStore> = Arc::new(
        FsObjectStore::new(args.data_dir.clone())
            .await
            .with_context(|| format!("Failed to open object store at {}", args.data_dir.display()))?,
    );

    let postgres = match &args.database_url {
        Some(url) => {
            log::info!("Connecting to storage...");
            Some(Arc::new(connect(url, args.db_pool_size).await?))
        }
        None => {
            log::warn!("No DATABASE_URL set, chunk metadata is kept in memory and lost on restart");
            None
        }
    };

    let worlds = match (&args.world_versions, &postgres) {
        (Some(path), _) => WorldVersions::from_json_file(path)?,
        (None, Some(pg)) => pg.load_world_versions().await?,
        (None, None) => bail!("No world versions: pass --world-versions or --database-url"),
    };
    if worlds.is_empty() {
        log::warn!("No world versions configured, every chunk request will 404");
    } else {
        log::info!("Serving {} world version(s)", worlds.len());
    }

    let metadata: Arc<dyn ChunkMetadataStore> = match &postgres {
        Some(pg) => pg.clone(),
        None => Arc::new(MemoryMetadataStore::new()),
    };

    let tiles = LocalTileStore::new(objects.clone());
    let index = Arc::new(TileIndex::rebuild(tiles.list().await?));
    log::info!("Indexed {} stored elevation tile(s)", index.count());

    let source = Arc::new(HttpTileSource::new(args.tile_source_url.clone(), args.fetch_timeout())?);
    let mut resolver = TileResolver::new(index, source, tiles.clone(), metrics.clone());
    if args.durable_tile_gate {
        match &postgres {
            Some(pg) => {
                resolver = resolver.with_gate(TileGate {
                    store: pg.clone(),
                    scope: TILE_SCOPE.to_string(),
                    // Outlives a single fetch attempt.
                    lease: args.fetch_timeout() * 2,
                });
            }
            None => log::warn!("--durable-tile-gate needs a database, ignoring"),
        }
    }

    let sampler = Arc::new(TileSampler::new(tiles, args.tile_cache_size));
    let generator = Arc::new(HeightfieldGenerator::new(Arc::new(resolver), sampler, args.ocean_fallback));

    let coordinator = Arc::new(ChunkCoordinator::new(
        worlds,
        metadata,
        objects,
        generator,
        WriteGate::new(args.write_permits),
        metrics.clone(),
        args.pending_timeout(),
    ));

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    log::info!("Listening on {} (Ctrl+C to stop)", args.bind);

    axum::serve(listener, routes::router(coordinator))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            log::info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    log::info!("\n{}", metrics.generate_report());
    Ok(())
}
