//! # terramesh-dem
//!
//! On-demand elevation tiles for terrain generation.
//!
//! Elevation data comes in 1°×1° tiles (see [`tile`] for the naming
//! convention). Nothing is pre-loaded: the first request touching a cell
//! fetches the compressed tile from the upstream source, stores it raw in the
//! service's own object store and records it in the in-memory [`TileIndex`].
//! Later requests are served from the index and the store.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use terramesh_dem::{HttpTileSource, LocalTileStore, TileIndex, TileResolver, DEFAULT_TILE_SOURCE_URL};
//! use terramesh_metrics::TerrainMetrics;
//! use terramesh_storage::object::FsObjectStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let objects = Arc::new(FsObjectStore::new("./data").await?);
//! let store = LocalTileStore::new(objects);
//! let index = Arc::new(TileIndex::rebuild(store.list().await?));
//! let source = Arc::new(HttpTileSource::new(DEFAULT_TILE_SOURCE_URL, Duration::from_secs(60))?);
//!
//! let resolver = TileResolver::new(index, source, store, Arc::new(TerrainMetrics::default()));
//! let tile = resolver.resolve(46.5, -113.2).await?;
//! assert_eq!(tile.name, "N46W113");
//! # Ok(())
//! # }
//! ```

mod error;
pub mod index;
pub mod raw;
pub mod remote;
pub mod resolver;
pub mod sampler;
pub mod single_flight;
pub mod store;
pub mod tile;

pub use error::DemError;
pub use index::TileIndex;
pub use raw::RawTile;
pub use remote::{DEFAULT_TILE_SOURCE_URL, HttpTileSource, TileSource};
pub use resolver::{TileGate, TileResolver};
pub use sampler::{DEFAULT_TILE_CACHE_SIZE, TileSampler};
pub use store::LocalTileStore;
pub use tile::{ElevationTile, TileBounds, tile_name};

/// Result type for DEM operations.
pub type Result<T> = std::result::Result<T, DemError>;
