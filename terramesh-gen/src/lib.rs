use async_trait::async_trait;
use terramesh_storage::{ChunkKey, WorldVersion};
use thiserror::Error;

pub mod format;
pub mod heightfield;

pub use format::{FORMAT_VERSION, FormatError, HEADER_BYTES, deserialize, serialize, serialized_len, validate};
pub use heightfield::{Heightfield, HeightfieldGenerator, MAX_ELEVATION_M, MIN_ELEVATION_M, sample_count};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Elevation lookup failed: {0}")]
    Elevation(#[from] terramesh_dem::DemError),

    #[error("Resolution {0} is outside 1..={max}", max = heightfield::MAX_RESOLUTION)]
    InvalidResolution(u16),
}

impl GenerateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerateError::Elevation(e) => e.is_retryable(),
            GenerateError::InvalidResolution(_) => false,
        }
    }
}

/// Produces the heightfield for one chunk of a world.
#[async_trait]
pub trait ChunkGenerator: Send + Sync {
    async fn generate(&self, key: &ChunkKey, world: &WorldVersion) -> Result<Heightfield, GenerateError>;
}
