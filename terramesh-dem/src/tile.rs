//! 1°×1° elevation tile identity.
//!
//! Tiles are named `{N|S}{lat:02}{E|W}{lon:03}`:
//! - `N46` covers latitudes `[46, 47)`, `S13` covers `[-13, -12)`
//! - `E044` covers longitudes `[44, 45)`, `W113` covers `[-114, -113)`
//!
//! Latitude bands are named by their southern edge. Longitude bands are named
//! by the number of whole degrees between the band and the prime meridian, so
//! `W000` is `[-1, 0)` and `E000` is `[0, 1)`. Every name maps to exactly one
//! half-open cell.

use crate::{DemError, Result};
use std::fmt;

/// Storage key prefix for raw tiles.
pub const TILE_KEY_PREFIX: &str = "dem/";

/// Geographic bounds of a tile. Containment is half-open on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    /// Minimum latitude (south edge, inclusive).
    pub min_lat: f64,
    /// Maximum latitude (north edge, exclusive).
    pub max_lat: f64,
    /// Minimum longitude (west edge, inclusive).
    pub min_lon: f64,
    /// Maximum longitude (east edge, exclusive).
    pub max_lon: f64,
}

impl TileBounds {
    /// `min <= v < max` on both axes.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat < self.max_lat && lon >= self.min_lon && lon < self.max_lon
    }
}

/// An elevation tile known to the service. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationTile {
    pub name: String,
    pub bounds: TileBounds,
    pub storage_key: String,
}

impl ElevationTile {
    /// Tile whose cell contains `(lat, lon)`.
    pub fn for_coordinate(lat: f64, lon: f64) -> Result<Self> {
        Self::parse(&tile_name(lat, lon)?)
    }

    /// Parse a name like `N46W113`.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || DemError::InvalidTileName(name.to_string());

        let bytes = name.as_bytes();
        if bytes.len() != 7 || !name.is_ascii() {
            return Err(invalid());
        }
        let lat_deg: i32 = name[1..3].parse().map_err(|_| invalid())?;
        let lon_deg: i32 = name[4..7].parse().map_err(|_| invalid())?;
        if !name[1..3].bytes().all(|b| b.is_ascii_digit()) || !name[4..7].bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let min_lat = match bytes[0] {
            b'N' if lat_deg <= 89 => lat_deg,
            b'S' if (1..=90).contains(&lat_deg) => -lat_deg,
            _ => return Err(invalid()),
        };
        let min_lon = match bytes[3] {
            b'E' if lon_deg <= 179 => lon_deg,
            b'W' if lon_deg <= 179 => -(lon_deg + 1),
            _ => return Err(invalid()),
        };

        Ok(Self {
            name: name.to_string(),
            bounds: TileBounds {
                min_lat: min_lat as f64,
                max_lat: (min_lat + 1) as f64,
                min_lon: min_lon as f64,
                max_lon: (min_lon + 1) as f64,
            },
            storage_key: format!("{}{}", TILE_KEY_PREFIX, name),
        })
    }

    /// Synthesize a tile record from its storage key (`dem/N46W113`).
    pub fn from_storage_key(key: &str) -> Result<Self> {
        let name = key
            .strip_prefix(TILE_KEY_PREFIX)
            .ok_or_else(|| DemError::InvalidTileName(key.to_string()))?;
        Self::parse(name)
    }

    /// SRTM/skadi file name for the same cell, named by its south-west corner.
    pub fn source_name(&self) -> String {
        let lat = self.bounds.min_lat as i32;
        let lon = self.bounds.min_lon as i32;
        format!(
            "{}{:02}{}{:03}",
            if lat >= 0 { 'N' } else { 'S' },
            lat.abs(),
            if lon >= 0 { 'E' } else { 'W' },
            lon.abs()
        )
    }
}

impl fmt::Display for ElevationTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Deterministic tile name for a coordinate.
pub fn tile_name(lat: f64, lon: f64) -> Result<String> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(DemError::InvalidCoordinate { lat, lon });
    }
    // The poles and the antimeridian fold into the last band.
    let lat_band = (lat.floor() as i32).min(89);
    let lon = if lon >= 180.0 { -180.0 } else { lon };
    let lon_band = lon.floor() as i32;

    let (lat_dir, lat_deg) = if lat_band >= 0 { ('N', lat_band) } else { ('S', -lat_band) };
    let (lon_dir, lon_deg) = if lon_band >= 0 { ('E', lon_band) } else { ('W', -lon_band - 1) };

    Ok(format!("{}{:02}{}{:03}", lat_dir, lat_deg, lon_dir, lon_deg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_names() {
        assert_eq!(tile_name(46.5, -113.2).unwrap(), "N46W113");
        assert_eq!(tile_name(-12.1, 44.9).unwrap(), "S13E044");
        assert_eq!(tile_name(0.1, 0.1).unwrap(), "N00E000");
        assert_eq!(tile_name(-0.5, -0.5).unwrap(), "S01W000");
        assert_eq!(tile_name(90.0, 180.0).unwrap(), "N89W179");
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(tile_name(90.5, 0.0).is_err());
        assert!(tile_name(0.0, -180.5).is_err());
        assert!(tile_name(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_parse_bounds() {
        let tile = ElevationTile::parse("N46W113").unwrap();
        assert_eq!(tile.bounds.min_lat, 46.0);
        assert_eq!(tile.bounds.max_lat, 47.0);
        assert_eq!(tile.bounds.min_lon, -114.0);
        assert_eq!(tile.bounds.max_lon, -113.0);
        assert_eq!(tile.storage_key, "dem/N46W113");

        let tile = ElevationTile::parse("S13E044").unwrap();
        assert_eq!(tile.bounds.min_lat, -13.0);
        assert_eq!(tile.bounds.min_lon, 44.0);
    }

    #[test]
    fn test_name_and_bounds_agree() {
        let points = [
            (46.5, -113.2),
            (-12.1, 44.9),
            (0.1, 0.1),
            (-0.5, -0.5),
            (47.0, -113.0),
            (-33.8688, 151.2093),
            (-89.99, -179.99),
        ];
        for (lat, lon) in points {
            let tile = ElevationTile::for_coordinate(lat, lon).unwrap();
            assert!(tile.bounds.contains(lat, lon), "{} does not contain ({}, {})", tile, lat, lon);
        }
    }

    #[test]
    fn test_source_name_uses_south_west_corner() {
        assert_eq!(ElevationTile::parse("N46W113").unwrap().source_name(), "N46W114");
        assert_eq!(ElevationTile::parse("S13E044").unwrap().source_name(), "S13E044");
        assert_eq!(ElevationTile::parse("N00W000").unwrap().source_name(), "N00W001");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for name in ["", "N46W11", "X46W113", "N46Q113", "N9xW113", "S00E000", "N90E000", "N46E180", "N+4W113"] {
            assert!(ElevationTile::parse(name).is_err(), "{} should not parse", name);
        }
    }

    #[test]
    fn test_from_storage_key() {
        assert_eq!(ElevationTile::from_storage_key("dem/N00E000").unwrap().name, "N00E000");
        assert!(ElevationTile::from_storage_key("chunks/N00E000").is_err());
    }
}
