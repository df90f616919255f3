use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Max number of rows moved to/from the database per statement batch.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_TABLE_PREFIX: &str = "data_frame_content_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. `None` opens an in-memory database.
    pub database_path: Option<PathBuf>,
    /// Directory receiving the raw bytes of uploaded files (default: `data/processed`).
    pub storage_dir: PathBuf,
    /// Rows per insert transaction and per read chunk (default: 8192).
    pub chunk_size: usize,
    /// SQLite busy timeout (default: 5000ms).
    pub busy_timeout_ms: u64,
    /// Prefix of every backing content table name (default: `data_frame_content_`).
    pub table_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            storage_dir: PathBuf::from("data/processed"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            busy_timeout_ms: 5_000,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

impl StoreConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StoreConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero".into()));
        }
        if self.table_prefix.is_empty() {
            return Err(ConfigError::Invalid("table_prefix must not be empty".into()));
        }
        Ok(())
    }
}
