//! Store configuration and backend factory.
//!
//! # Responsibility
//! - Resolve backend choice, database path and logging settings from the
//!   environment.
//! - Build the configured `NewsRepository` behind one trait object.
//!
//! # Invariants
//! - Blank variables are treated as unset.
//! - The in-memory backend never touches `db_path`.

use crate::logging::default_log_level;
use crate::repo::{MemoryNewsRepository, NewsRepository, RepoResult, SqliteNewsRepository};
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const BACKEND_ENV: &str = "NEWSFEED_BACKEND";
pub const DB_PATH_ENV: &str = "NEWSFEED_DB_PATH";
pub const LOG_LEVEL_ENV: &str = "NEWSFEED_LOG_LEVEL";
pub const LOG_DIR_ENV: &str = "NEWSFEED_LOG_DIR";

const DEFAULT_DB_FILE_NAME: &str = "newsfeed.sqlite3";

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(ConfigError::UnknownBackend(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownBackend(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownBackend(value) => write!(
                f,
                "unknown backend `{value}` in {BACKEND_ENV}; expected memory|sqlite"
            ),
        }
    }
}

impl Error for ConfigError {}

/// Resolved settings for one repository instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub db_path: PathBuf,
    pub log_level: String,
    /// File logging stays off when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            db_path: std::env::temp_dir().join(DEFAULT_DB_FILE_NAME),
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

impl StoreConfig {
    /// Reads `NEWSFEED_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StoreConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_blank = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(backend) = non_blank(BACKEND_ENV) {
            config.backend = backend.parse()?;
        }
        if let Some(path) = non_blank(DB_PATH_ENV) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(level) = non_blank(LOG_LEVEL_ENV) {
            config.log_level = level;
        }
        config.log_dir = non_blank(LOG_DIR_ENV).map(PathBuf::from);
        Ok(config)
    }
}

/// Builds the backend selected by `config`.
///
/// # Errors
/// - `StorageUnavailable` when the SQLite file cannot be opened or migrated.
pub fn open_repository(config: &StoreConfig) -> RepoResult<Arc<dyn NewsRepository>> {
    let repo: Arc<dyn NewsRepository> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryNewsRepository::new()),
        BackendKind::Sqlite => Arc::new(SqliteNewsRepository::open(&config.db_path)?),
    };
    info!(
        "event=repo_open module=config status=ok backend={}",
        config.backend
    );
    Ok(repo)
}
