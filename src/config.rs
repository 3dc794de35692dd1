//! TOML configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::region::RegionTables;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub linker: LinkerConfig,
    pub geocoder: GeocoderConfig,
    pub regions: RegionsConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinkerConfig {
    /// Links farther than this from the footprint count as outside
    pub outside_footprint_threshold_m: f64,
    /// Stored links at or above this confidence are not replaced silently
    pub high_confidence: f64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            outside_footprint_threshold_m: 10.0,
            high_confidence: 0.85,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocoderConfig {
    pub base_url: String,
    /// Without a token the geocoder reports itself unavailable
    pub access_token: Option<String>,
    pub countries: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mapbox.com".to_string(),
            access_token: None,
            countries: vec!["ca".to_string(), "us".to_string()],
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RegionsConfig {
    /// Overrides the tables' default (placeholder) code
    pub default_code: Option<String>,
    /// Optional TOML file replacing parts of the built-in region tables
    pub table_file: Option<PathBuf>,
}

impl RegionsConfig {
    /// Build the shared region tables once for the process.
    pub fn load_tables(&self) -> Result<Arc<RegionTables>> {
        let tables = match &self.table_file {
            Some(path) => RegionTables::load_from_file(path)?,
            None => RegionTables::builtin(),
        };
        let tables = match &self.default_code {
            Some(code) => tables.with_default_code(code),
            None => tables,
        };
        Ok(Arc::new(tables))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub scylla_uri: String,
    pub keyspace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            scylla_uri: "127.0.0.1:9042".to_string(),
            keyspace: "geolink".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }
}
