use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use terramesh_dem::{DEFAULT_TILE_CACHE_SIZE, DEFAULT_TILE_SOURCE_URL};
use terramesh_storage::gate::DEFAULT_WRITE_PERMITS;

#[derive(Parser, Debug)]
#[command(name = "terramesh", about = "On-demand terrain chunk service backed by real elevation data")]
pub struct Args {
    /// Address the HTTP server listens on
    #[arg(long, env = "TERRAMESH_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Postgres connection string. Without it metadata lives in memory only.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Root directory of the object store (elevation tiles and chunk artifacts)
    #[arg(long, env = "TERRAMESH_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Base URL of the compressed elevation tile source
    #[arg(long, env = "TERRAMESH_TILE_SOURCE_URL", default_value = DEFAULT_TILE_SOURCE_URL)]
    pub tile_source_url: String,

    #[arg(long, default_value_t = 60)]
    pub fetch_timeout_secs: u64,

    /// Maximum Postgres connections
    #[arg(long, default_value_t = 16)]
    pub db_pool_size: usize,

    /// Concurrent metadata writes allowed from background generation
    #[arg(long, default_value_t = DEFAULT_WRITE_PERMITS)]
    pub write_permits: usize,

    /// A pending chunk untouched this long is assumed abandoned and regenerated
    #[arg(long, default_value_t = 300)]
    pub pending_timeout_secs: u64,

    /// Decoded elevation tiles kept in memory
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_SIZE)]
    pub tile_cache_size: usize,

    /// JSON file listing world versions. Defaults to the `world_versions` table.
    #[arg(long)]
    pub world_versions: Option<PathBuf>,

    /// Record tile downloads in `dem_tile_status` so several instances share them
    #[arg(long)]
    pub durable_tile_gate: bool,

    /// Serve sea level where the source has no elevation tile
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub ocean_fallback: bool,
}

impl Args {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    /// One-line summary for the metrics report.
    pub fn summary(&self) -> String {
        format!(
            "bind={}, metadata={}, data_dir={}, write_permits={}, pending_timeout={}s, tile_cache={}, durable_tile_gate={}, ocean_fallback={}",
            self.bind,
            if self.database_url.is_some() { "postgres" } else { "memory" },
            self.data_dir.display(),
            self.write_permits,
            self.pending_timeout_secs,
            self.tile_cache_size,
            self.durable_tile_gate,
            self.ocean_fallback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["terramesh"]).unwrap();
        assert_eq!(args.write_permits, 3);
        assert_eq!(args.pending_timeout(), Duration::from_secs(300));
        assert_eq!(args.tile_cache_size, 16);
        assert!(args.ocean_fallback);
        assert!(!args.durable_tile_gate);
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "terramesh",
            "--bind",
            "127.0.0.1:9000",
            "--ocean-fallback",
            "false",
            "--write-permits",
            "5",
            "--durable-tile-gate",
        ])
        .unwrap();
        assert_eq!(args.bind.port(), 9000);
        assert!(!args.ocean_fallback);
        assert_eq!(args.write_permits, 5);
        assert!(args.durable_tile_gate);
    }
}
