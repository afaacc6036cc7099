//! Read-only world version registry.
//!
//! Loaded once at startup (from a JSON file or the `world_versions` table);
//! changes require a restart.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A published world and the geographic anchor its chunk grid hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldVersion {
    pub version: String,
    pub id: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Latitude of world origin (chunk 0,0 north-west corner), degrees.
    pub origin_lat: f64,
    /// Longitude of world origin, degrees.
    pub origin_lon: f64,
    /// Edge length of one chunk in meters.
    pub chunk_size_m: f64,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct WorldVersions {
    by_version: HashMap<String, WorldVersion>,
}

impl WorldVersions {
    pub fn new(versions: impl IntoIterator<Item = WorldVersion>) -> Self {
        let by_version = versions
            .into_iter()
            .map(|v| (v.version.clone(), v))
            .collect();
        Self { by_version }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read world versions from {:?}", path))?;
        let versions: Vec<WorldVersion> =
            serde_json::from_str(&text).context("Failed to parse world versions JSON")?;
        Ok(Self::new(versions))
    }

    pub fn lookup(&self, version: &str) -> Option<&WorldVersion> {
        self.by_version.get(version)
    }

    pub fn len(&self) -> usize {
        self.by_version.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_version.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_from_json() {
        let json = r#"[
            {"version": "v1", "id": 1, "active": false, "origin_lat": 46.0, "origin_lon": -114.0, "chunk_size_m": 256.0},
            {"version": "v2", "id": 2, "origin_lat": 46.0, "origin_lon": -114.0, "chunk_size_m": 512.0}
        ]"#;
        let versions: Vec<WorldVersion> = serde_json::from_str(json).unwrap();
        let registry = WorldVersions::new(versions);

        assert_eq!(registry.len(), 2);
        assert!(!registry.lookup("v1").unwrap().active);
        // `active` defaults to true when omitted
        assert!(registry.lookup("v2").unwrap().active);
        assert_eq!(registry.lookup("v2").unwrap().chunk_size_m, 512.0);
        assert!(registry.lookup("v3").is_none());
    }
}
