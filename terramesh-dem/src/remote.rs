//! Read-only client for the upstream elevation tile source.
//!
//! Tiles are gzip-compressed SRTM `.hgt` files laid out as
//! `{base_url}/{N|S}{lat}/{source_name}.hgt.gz` (the AWS "skadi" layout).
//! A missing object is reported as [`DemError::TileNotFound`]; every other
//! failure is retryable.

use crate::{DemError, ElevationTile, Result};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use std::time::Duration;

/// AWS Open Data skadi tiles.
pub const DEFAULT_TILE_SOURCE_URL: &str = "https://s3.amazonaws.com/elevation-tiles-prod/skadi";

/// Fetch raw (decompressed) tile payloads by tile name.
#[async_trait]
pub trait TileSource: Send + Sync {
    async fn fetch(&self, tile_name: &str) -> Result<Bytes>;
}

pub struct HttpTileSource {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTileSource")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpTileSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Upstream URL for a tile.
    pub fn url_for(&self, tile: &ElevationTile) -> String {
        let source = tile.source_name();
        format!("{}/{}/{}.hgt.gz", self.base_url, &source[..3], source)
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, tile_name: &str) -> Result<Bytes> {
        let tile = ElevationTile::parse(tile_name)?;
        let url = self.url_for(&tile);
        log::debug!("Fetching elevation tile {} from {}", tile_name, url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        // S3 answers 403 for absent keys when listing is not allowed.
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Err(DemError::TileNotFound {
                name: tile_name.to_string(),
            });
        }
        if !status.is_success() {
            return Err(DemError::TileDownloadFailed {
                name: tile_name.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let compressed = response.bytes().await?;
        let name = tile_name.to_string();
        tokio::task::spawn_blocking(move || gunzip(&name, &compressed)).await?
    }
}

fn gunzip(name: &str, compressed: &[u8]) -> Result<Bytes> {
    let mut raw = Vec::new();
    GzDecoder::new(compressed)
        .read_to_end(&mut raw)
        .map_err(|source| DemError::Decompress {
            name: name.to_string(),
            source,
        })?;
    Ok(Bytes::from(raw))
}
