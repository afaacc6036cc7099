use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::fmt;

/// Layer name used by the terrain route.
pub const TERRAIN_LAYER: &str = "terrain";

/// Identity of one chunk artifact within a world version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub world_version: String,
    pub layer: String,
    pub resolution: u16,
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub fn new(world_version: impl Into<String>, layer: impl Into<String>, resolution: u16, x: i32, z: i32) -> Self {
        Self {
            world_version: world_version.into(),
            layer: layer.into(),
            resolution,
            x,
            z,
        }
    }

    pub fn terrain(world_version: impl Into<String>, resolution: u16, x: i32, z: i32) -> Self {
        Self::new(world_version, TERRAIN_LAYER, resolution, x, z)
    }

    /// `chunks/{world_version}/{layer}/r{resolution}/{x}/{z}.bin`
    pub fn artifact_key(&self) -> String {
        format!(
            "chunks/{}/{}/r{}/{}/{}.bin",
            self.world_version, self.layer, self.resolution, self.x, self.z
        )
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/r{}/({}, {})",
            self.world_version, self.layer, self.resolution, self.x, self.z
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Ready,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Ready => "ready",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ChunkStatus::Pending),
            "ready" => Ok(ChunkStatus::Ready),
            other => bail!("Unknown chunk status {:?}", other),
        }
    }
}

/// One row of durable chunk metadata.
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub key: ChunkKey,
    pub status: ChunkStatus,
    pub storage_key: String,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChunkMetadata {
    pub fn pending(key: ChunkKey, now: DateTime<Utc>) -> Self {
        let storage_key = key.artifact_key();
        Self {
            key,
            status: ChunkStatus::Pending,
            storage_key,
            checksum: None,
            created_at: now,
            updated_at: now,
        }
    }
}
