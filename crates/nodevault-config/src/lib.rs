//! # nodevault-config
//!
//! Configuration management for nodevault.
//!
//! Loads configuration from:
//! 1. `~/.nodevault/config.toml` (global)
//! 2. `.nodevault/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! The loaded [`Config`] is handed to the components that need it. There is
//! no process-wide config instance.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding [`StorageConfig::data_path`].
pub const ENV_DATA_PATH: &str = "NODEVAULT_DATA_PATH";
/// Environment variable overriding [`StorageConfig::chunk_size`].
pub const ENV_CHUNK_SIZE: &str = "NODEVAULT_CHUNK_SIZE";
/// Environment variable overriding [`StoreConfig::address`].
pub const ENV_STORE: &str = "NODEVAULT_STORE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.nodevault/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_from(&global_path)?;
            }
        }

        // 2. Project config overrides global
        let project_path = Path::new(".nodevault/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let project_config = Self::load_from(project_path)?;
            config.merge(project_config);
        }

        // 3. Environment
        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load a single TOML file without layering or env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.nodevault/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".nodevault/config.toml"))
    }

    /// Merge a project config over this one. Only values that differ from
    /// the defaults replace what is already set.
    fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.storage.data_path != defaults.storage.data_path {
            self.storage.data_path = other.storage.data_path;
        }
        if other.storage.chunk_size != defaults.storage.chunk_size {
            self.storage.chunk_size = other.storage.chunk_size;
        }
        if other.store.address != defaults.store.address {
            self.store.address = other.store.address;
        }
        if other.store.dial_timeout_ms != defaults.store.dial_timeout_ms {
            self.store.dial_timeout_ms = other.store.dial_timeout_ms;
        }
        if other.store.map_size != defaults.store.map_size {
            self.store.map_size = other.store.map_size;
        }
        if other.ingest.read_buffer_size != defaults.ingest.read_buffer_size {
            self.ingest.read_buffer_size = other.ingest.read_buffer_size;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DATA_PATH) {
            self.storage.data_path = PathBuf::from(path);
        }
        if let Ok(size) = std::env::var(ENV_CHUNK_SIZE) {
            if let Ok(n) = size.parse() {
                self.storage.chunk_size = n;
            }
        }
        if let Ok(addr) = std::env::var(ENV_STORE) {
            self.store.address = PathBuf::from(addr);
        }
    }

    /// Reject values the storage engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.chunk_size == 0 {
            return Err(ConfigError::Invalid("storage.chunk_size must be > 0".into()));
        }
        if self.ingest.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "ingest.read_buffer_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Node data storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the sharded node directories
    pub data_path: PathBuf,
    /// Bytes per unit of the built-in `size` index
    pub chunk_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            data_path: home.join(".nodevault/data"),
            chunk_size: 1024 * 1024,
        }
    }
}

/// Metadata store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the store environment
    pub address: PathBuf,
    /// Upper bound on how long opening the store may take
    pub dial_timeout_ms: u64,
    /// LMDB map size in bytes
    pub map_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            address: home.join(".nodevault/meta.lmdb"),
            dial_timeout_ms: 1000,
            map_size: 1024 * 1024 * 1024,
        }
    }
}

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Read buffer used when streaming checksums and assembling parts
    pub read_buffer_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 10240,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.chunk_size, 1024 * 1024);
        assert_eq!(config.store.dial_timeout_ms, 1000);
        assert_eq!(config.ingest.read_buffer_size, 10240);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("chunk_size"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.storage.data_path, parsed.storage.data_path);
        assert_eq!(config.store.map_size, parsed.store.map_size);
    }

    #[test]
    fn test_merge_keeps_unset_values() {
        let mut base = Config::default();
        base.storage.chunk_size = 4096;

        let mut project = Config::default();
        project.storage.data_path = PathBuf::from("/srv/nodes");
        base.merge(project);

        assert_eq!(base.storage.chunk_size, 4096);
        assert_eq!(base.storage.data_path, PathBuf::from("/srv/nodes"));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = Config::default();
        config.storage.chunk_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
