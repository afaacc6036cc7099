//! Error types for elevation tile resolution.

use thiserror::Error;

/// Errors that can occur while resolving or reading elevation tiles.
#[derive(Debug, Error)]
pub enum DemError {
    /// The source has no tile for this cell (ocean or void). A valid outcome.
    #[error("Elevation tile {name} does not exist at the source")]
    TileNotFound {
        /// Tile name.
        name: String,
    },

    /// HTTP request error when fetching tiles.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Source answered but not with a usable payload.
    #[error("Failed to download tile {name}: {reason}")]
    TileDownloadFailed {
        /// Tile name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Compressed payload could not be inflated.
    #[error("Failed to decompress tile {name}: {source}")]
    Decompress {
        /// Tile name.
        name: String,
        /// Underlying gzip error.
        source: std::io::Error,
    },

    /// Another service instance holds the download for this tile.
    #[error("Tile {name} is being downloaded elsewhere")]
    TileBusy {
        /// Tile name.
        name: String,
    },

    /// Object store or status store failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    /// Invalid tile name - cannot parse coordinates.
    #[error("Invalid tile name: {0}")]
    InvalidTileName(String),

    /// Coordinate outside the globe.
    #[error("Invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lon: f64,
    },

    /// Stored raw tile has an impossible shape.
    #[error("Invalid raw tile {name}: {reason}")]
    InvalidTile {
        /// Tile name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Background task running blocking work was lost.
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DemError {
    /// Whether a later attempt may succeed without any change on our side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DemError::HttpRequest(_)
                | DemError::TileDownloadFailed { .. }
                | DemError::Decompress { .. }
                | DemError::TileBusy { .. }
                | DemError::Storage(_)
                | DemError::Join(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DemError::TileNotFound { .. })
    }
}
