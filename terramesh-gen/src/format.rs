//! Binary chunk artifact layout.
//!
//! All values little-endian:
//!
//! | offset | size | field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | format version (1)             |
//! | 1      | 2    | resolution `r` (u16)           |
//! | 3      | 8    | min elevation (f64)            |
//! | 11     | 8    | max elevation (f64)            |
//! | 19     | 4·n  | `n = (r+1)²` heights (f32), row-major |
//!
//! A resolution-64 chunk is `19 + 4 × 4225 = 16919` bytes.

use crate::heightfield::{Heightfield, sample_count};
use thiserror::Error;

pub const FORMAT_VERSION: u8 = 1;
pub const HEADER_BYTES: usize = 1 + 2 + 8 + 8;

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("Chunk payload truncated: {len} bytes is shorter than the {header}-byte header", header = HEADER_BYTES)]
    Truncated { len: usize },

    #[error("Unsupported chunk format version {0}")]
    UnsupportedVersion(u8),

    #[error("Chunk payload is {actual} bytes, resolution {resolution} requires {expected}")]
    LengthMismatch {
        resolution: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Decoded {actual} heights, resolution {resolution} requires {expected}")]
    HeightCount {
        resolution: u16,
        expected: usize,
        actual: usize,
    },
}

/// Total artifact size for a resolution.
pub fn serialized_len(resolution: u16) -> usize {
    HEADER_BYTES + 4 * sample_count(resolution)
}

/// Encode a heightfield.
///
/// # Panics
/// Panics if the height count is not `(resolution+1)²`. That can only come
/// from a generator defect and must never reach storage.
pub fn serialize(field: &Heightfield) -> Vec<u8> {
    let expected = sample_count(field.resolution);
    assert_eq!(
        field.heights.len(),
        expected,
        "heightfield for resolution {} has {} samples, expected {}",
        field.resolution,
        field.heights.len(),
        expected
    );

    let mut out = Vec::with_capacity(serialized_len(field.resolution));
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&field.resolution.to_le_bytes());
    out.extend_from_slice(&field.min_elevation.to_le_bytes());
    out.extend_from_slice(&field.max_elevation.to_le_bytes());
    for h in &field.heights {
        out.extend_from_slice(&h.to_le_bytes());
    }
    out
}

/// Check the header and total length without decoding the heights.
/// Returns the resolution.
pub fn validate(bytes: &[u8]) -> Result<u16, FormatError> {
    if bytes.len() < HEADER_BYTES {
        return Err(FormatError::Truncated { len: bytes.len() });
    }
    if bytes[0] != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(bytes[0]));
    }

    let resolution = u16::from_le_bytes([bytes[1], bytes[2]]);
    let expected = serialized_len(resolution);
    if bytes.len() != expected {
        return Err(FormatError::LengthMismatch {
            resolution,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(resolution)
}

/// Decode an artifact, validating its length before trusting any of it.
pub fn deserialize(bytes: &[u8]) -> Result<Heightfield, FormatError> {
    let resolution = validate(bytes)?;

    let f64_at = |offset: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[offset..offset + 8]);
        f64::from_le_bytes(buf)
    };
    let min_elevation = f64_at(3);
    let max_elevation = f64_at(11);

    let heights: Vec<f32> = bytes[HEADER_BYTES..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if heights.len() != sample_count(resolution) {
        return Err(FormatError::HeightCount {
            resolution,
            expected: sample_count(resolution),
            actual: heights.len(),
        });
    }

    Ok(Heightfield {
        resolution,
        min_elevation,
        max_elevation,
        heights,
    })
}
