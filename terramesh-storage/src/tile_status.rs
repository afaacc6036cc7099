use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

/// Download state of an elevation tile as recorded durably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemTileState {
    Missing,
    Downloading,
    Ready,
    Failed,
}

impl DemTileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemTileState::Missing => "missing",
            DemTileState::Downloading => "downloading",
            DemTileState::Ready => "ready",
            DemTileState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "missing" => DemTileState::Missing,
            "downloading" => DemTileState::Downloading,
            "ready" => DemTileState::Ready,
            "failed" => DemTileState::Failed,
            other => bail!("Unknown DEM tile state {:?}", other),
        })
    }

    /// States a new downloader may take over without waiting for a lease.
    pub fn is_claimable(&self) -> bool {
        matches!(self, DemTileState::Missing | DemTileState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct DemTileStatus {
    pub scope: String,
    pub tile_name: String,
    pub state: DemTileState,
    pub last_error: Option<String>,
    pub storage_key: Option<String>,
    pub updated_at: DateTime<Utc>,
}
