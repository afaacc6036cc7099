//! Elevation grid for one chunk, sampled from the DEM tiles under it.

use crate::{ChunkGenerator, GenerateError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use terramesh_dem::{ElevationTile, RawTile, TileResolver, TileSampler, tile_name};
use terramesh_storage::{ChunkKey, WorldVersion};

pub const MAX_RESOLUTION: u16 = 1024;
pub const MIN_ELEVATION_M: f32 = -500.0;
pub const MAX_ELEVATION_M: f32 = 9000.0;

/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Heights in one chunk: `(r+1)²` points so neighbouring chunks share edges.
pub fn sample_count(resolution: u16) -> usize {
    let side = resolution as usize + 1;
    side * side
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heightfield {
    pub resolution: u16,
    pub min_elevation: f64,
    pub max_elevation: f64,
    /// Row-major, row = z step (north to south), column = x step (west to east).
    pub heights: Vec<f32>,
}

impl Heightfield {
    /// # Panics
    /// Panics if `heights` does not hold `(resolution+1)²` values.
    pub fn from_heights(resolution: u16, heights: Vec<f32>) -> Self {
        assert_eq!(heights.len(), sample_count(resolution), "wrong sample count for resolution {}", resolution);

        let (min, max) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        Self {
            resolution,
            min_elevation: min as f64,
            max_elevation: max as f64,
            heights,
        }
    }
}

/// Geographic position of a point given in world meters (+X east, +Z south).
pub fn world_to_geo(world: &WorldVersion, xm: f64, zm: f64) -> (f64, f64) {
    let lat = world.origin_lat - zm / METERS_PER_DEGREE;
    let lon = world.origin_lon + xm / (METERS_PER_DEGREE * world.origin_lat.to_radians().cos());
    (lat, lon)
}

/// Sample coordinates of a chunk, row-major.
fn sample_points(world: &WorldVersion, key: &ChunkKey) -> Vec<(f64, f64)> {
    let size = world.chunk_size_m;
    let step = size / key.resolution as f64;
    let x0 = key.x as f64 * size;
    let z0 = key.z as f64 * size;

    let side = key.resolution as usize + 1;
    let mut points = Vec::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            points.push(world_to_geo(world, x0 + col as f64 * step, z0 + row as f64 * step));
        }
    }
    points
}

type LoadedTile = (ElevationTile, Arc<RawTile>);

/// Samples real elevation data through the shared tile resolver.
pub struct HeightfieldGenerator {
    resolver: Arc<TileResolver>,
    sampler: Arc<TileSampler>,
    ocean_fallback: bool,
}

impl HeightfieldGenerator {
    pub fn new(resolver: Arc<TileResolver>, sampler: Arc<TileSampler>, ocean_fallback: bool) -> Self {
        Self {
            resolver,
            sampler,
            ocean_fallback,
        }
    }

    /// Resolve and load every distinct tile the points fall in, once each.
    /// Returns the tiles and, per point, the index of the tile it falls in.
    async fn load_tiles(&self, points: &[(f64, f64)]) -> Result<(Vec<LoadedTile>, Vec<usize>), GenerateError> {
        let mut tiles: Vec<LoadedTile> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut assignment: Vec<usize> = Vec::with_capacity(points.len());

        for &(lat, lon) in points {
            // Neighbouring points almost always share a tile.
            if let Some(&last) = assignment.last() {
                let (tile, _) = &tiles[last];
                if tile.bounds.contains(lat, lon) {
                    assignment.push(last);
                    continue;
                }
            }

            let name = tile_name(lat, lon)?;
            let slot = match by_name.get(&name) {
                Some(&slot) => slot,
                None => {
                    let tile = if self.ocean_fallback {
                        self.resolver.resolve_or_flat(lat, lon).await?
                    } else {
                        self.resolver.resolve(lat, lon).await?
                    };
                    let raw = self.sampler.raw(&tile).await?;
                    tiles.push((tile, raw));
                    by_name.insert(name, tiles.len() - 1);
                    tiles.len() - 1
                }
            };
            assignment.push(slot);
        }
        Ok((tiles, assignment))
    }
}

#[async_trait]
impl ChunkGenerator for HeightfieldGenerator {
    async fn generate(&self, key: &ChunkKey, world: &WorldVersion) -> Result<Heightfield, GenerateError> {
        if key.resolution == 0 || key.resolution > MAX_RESOLUTION {
            return Err(GenerateError::InvalidResolution(key.resolution));
        }

        let points = sample_points(world, key);
        let (tiles, assignment) = self.load_tiles(&points).await?;
        log::debug!("Chunk {} spans {} elevation tile(s)", key, tiles.len());

        let heights = points
            .iter()
            .zip(&assignment)
            .map(|(&(lat, lon), &slot)| {
                let (tile, raw) = &tiles[slot];
                raw.elevation_at(&tile.bounds, lat, lon).clamp(MIN_ELEVATION_M, MAX_ELEVATION_M)
            })
            .collect();

        Ok(Heightfield::from_heights(key.resolution, heights))
    }
}
