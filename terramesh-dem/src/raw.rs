//! Raw (uncompressed) elevation samples as stored locally.
//!
//! Layout is the SRTM `.hgt` one: a square grid of big-endian `i16` meters,
//! row 0 on the north edge and column 0 on the west edge. Edge rows and
//! columns sit exactly on the tile boundary. `-32768` marks a void.

use crate::{DemError, Result, TileBounds};

/// Void marker in SRTM data.
pub const VOID_SAMPLE: i16 = i16::MIN;

#[derive(Debug, Clone, PartialEq)]
pub struct RawTile {
    side: usize,
    samples: Vec<i16>,
}

impl RawTile {
    /// Decode a stored payload, checking it is a square grid of at least 2×2.
    pub fn decode(name: &str, bytes: &[u8]) -> Result<Self> {
        let invalid = |reason: String| DemError::InvalidTile {
            name: name.to_string(),
            reason,
        };

        if bytes.len() % 2 != 0 {
            return Err(invalid(format!("odd payload length {}", bytes.len())));
        }
        let count = bytes.len() / 2;
        let side = (count as f64).sqrt().round() as usize;
        if side < 2 || side * side != count {
            return Err(invalid(format!("{} samples is not a square grid", count)));
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { side, samples })
    }

    /// A 2×2 sea-level tile, stored for cells the source has no data for.
    pub fn flat() -> Self {
        Self {
            side: 2,
            samples: vec![0; 4],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_be_bytes()).collect()
    }

    pub fn side(&self) -> usize {
        self.side
    }

    fn at(&self, row: usize, col: usize) -> f32 {
        match self.samples[row * self.side + col] {
            VOID_SAMPLE => 0.0,
            v => v as f32,
        }
    }

    /// Bilinear elevation at a coordinate inside `bounds`. Points outside
    /// are clamped to the nearest edge.
    pub fn elevation_at(&self, bounds: &TileBounds, lat: f64, lon: f64) -> f32 {
        let span = (self.side - 1) as f64;
        let lat_extent = bounds.max_lat - bounds.min_lat;
        let lon_extent = bounds.max_lon - bounds.min_lon;

        let row_f = ((bounds.max_lat - lat) / lat_extent * span).clamp(0.0, span);
        let col_f = ((lon - bounds.min_lon) / lon_extent * span).clamp(0.0, span);

        let row0 = (row_f.floor() as usize).min(self.side - 2);
        let col0 = (col_f.floor() as usize).min(self.side - 2);
        let dr = (row_f - row0 as f64) as f32;
        let dc = (col_f - col0 as f64) as f32;

        let top = self.at(row0, col0) * (1.0 - dc) + self.at(row0, col0 + 1) * dc;
        let bottom = self.at(row0 + 1, col0) * (1.0 - dc) + self.at(row0 + 1, col0 + 1) * dc;
        top * (1.0 - dr) + bottom * dr
    }
}
