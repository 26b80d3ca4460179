//! # filedrop-config
//!
//! Configuration management for filedrop.
//!
//! Loads configuration from:
//! 1. `~/.filedrop/config.toml` (global)
//! 2. `.filedrop/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get a snapshot of the global config
pub fn config() -> Config {
    match CONFIG.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    match CONFIG.write() {
        Ok(mut guard) => *guard = new_config,
        Err(poisoned) => *poisoned.into_inner() = new_config,
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML encode error: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub pool: PoolSettings,
    pub hashing: HashingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let project = Path::new(".filedrop/config.toml");
        let mut config = Self::load_from(global.as_deref(), Some(project))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load and layer the given files without consulting the environment.
    ///
    /// Missing files are skipped. Keys present in `project` replace the same
    /// keys from `global`; everything else falls through to defaults.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Table = toml::from_str(&contents)?;
                merge_tables(&mut merged, layer);
            }
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Global config path: ~/.filedrop/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".filedrop/config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (env-shaped keys).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FILEDROP_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(path);
        }
        if let Some(workers) = lookup("FILEDROP_WORKERS") {
            self.pool.workers = parse_var("FILEDROP_WORKERS", &workers)?;
        }
        if let Some(capacity) = lookup("FILEDROP_QUEUE_CAPACITY") {
            self.pool.queue_capacity = parse_var("FILEDROP_QUEUE_CAPACITY", &capacity)?;
        }
        if let Some(algorithm) = lookup("FILEDROP_HASH_ALGORITHM") {
            self.hashing.algorithm = algorithm;
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that receives staged uploads
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of hashing workers
    pub workers: usize,
    /// Job queue capacity (0 = rendezvous: submit waits for a free worker)
    pub queue_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 0,
        }
    }
}

/// Content hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Digest algorithm: sha256 or blake3
    pub algorithm: String,
    /// Read chunk size in bytes
    pub chunk_size: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            algorithm: "sha256".to_string(),
            chunk_size: 64 * 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// error, warn, info, debug or trace (RUST_LOG wins when set)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
