// src/config.rs

//! Manager configuration
//!
//! Loaded from a TOML file; every section has defaults so a missing file or
//! a partial file both produce a usable configuration.

use crate::error::{Error, Result};
use crate::updates::UpdateInterval;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the database, manifests, staging and spool areas
    pub data_dir: PathBuf,
    /// Where package files are installed
    pub install_root: PathBuf,
    /// Interval between automatic update checks
    pub update_interval: UpdateInterval,
    /// Upper bound on concurrently applied packages
    pub max_workers: usize,
    pub unpack: UnpackSection,
    pub network: NetworkSection,
}

/// External unpacker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackSection {
    pub program: String,
    /// Arguments; `{archive}` and `{dest}` are substituted
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

/// HTTP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("pallet");
        Self {
            install_root: data_dir.join("root"),
            data_dir,
            update_interval: UpdateInterval::OneDay,
            max_workers: 4,
            unpack: UnpackSection::default(),
            network: NetworkSection::default(),
        }
    }
}

impl Default for UnpackSection {
    fn default() -> Self {
        Self {
            program: "tar".to_string(),
            args: vec![
                "-xf".to_string(),
                "{archive}".to_string(),
                "-C".to_string(),
                "{dest}".to_string(),
            ],
            timeout_secs: 300,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retries: 3,
        }
    }
}

impl Config {
    /// Configuration rooted at a specific data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            install_root: data_dir.join("root"),
            data_dir,
            ..Self::default()
        }
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("pallet")
            .join("config.toml")
    }

    /// Load configuration from a TOML file, falling back to defaults if absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        if self.unpack.program.trim().is_empty() {
            return Err(Error::Config("unpack.program must not be empty".to_string()));
        }
        if self.unpack.timeout_secs == 0 {
            return Err(Error::Config("unpack.timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("pallet.db")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.data_dir.join("manifests")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.data_dir.join("spool")
    }

    pub fn unpack_timeout(&self) -> Duration {
        Duration::from_secs(self.unpack.timeout_secs)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse(
            r#"
            data_dir = "/srv/pallet"
            install_root = "/opt/apps"
            update_interval = "2d"

            [unpack]
            timeout_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/pallet"));
        assert_eq!(config.update_interval, UpdateInterval::TwoDays);
        assert_eq!(config.unpack.program, "tar");
        assert_eq!(config.unpack.timeout_secs, 10);
        assert_eq!(config.network.retries, 3);
        assert_eq!(config.db_path(), PathBuf::from("/srv/pallet/pallet.db"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Config::parse("max_workers = 0").is_err());
        assert!(Config::parse("update_interval = \"3h\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/pallet.toml")).unwrap();
        assert_eq!(config.max_workers, 4);
    }
}
