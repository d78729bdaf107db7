//! Runtime configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional TOML file, then command-line flags.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//!
//! [store]
//! path = "neuroboard.db"
//!
//! [seed]
//! file = "seed_data.json"
//!
//! [feeder]
//! enabled = true
//! interval_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Args;
use crate::error::{DashboardError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("neuroboard.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeedConfig {
    pub file: PathBuf,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("seed_data.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeederConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl FeederConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub seed: SeedConfig,
    pub feeder: FeederConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| DashboardError::Config(e.to_string()))
    }

    /// Read a TOML file. The file must exist when a path is given.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DashboardError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, then `args.config` if given, then the remaining flags.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(path) = &args.database {
            self.store.path = path.clone();
        }
        if let Some(file) = &args.seed_file {
            self.seed.file = file.clone();
        }
        if let Some(secs) = args.feed_interval {
            self.feeder.interval_secs = secs;
        }
        if args.no_feeder {
            self.feeder.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.feeder.enabled && self.feeder.interval_secs == 0 {
            return Err(DashboardError::validation(
                "feeder.interval_secs",
                "must be greater than 0",
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(DashboardError::validation("server.host", "must not be empty"));
        }
        Ok(())
    }
}
