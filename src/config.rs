//! Runtime configuration
//!
//! Loaded from a JSON file when one is present, with environment variable
//! overrides for the values operators change most often.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ConfigError;

/// Environment variable overriding the catalog database location
pub const DB_PATH_ENV: &str = "ROVER_FEED_DB";
/// Environment variable overriding the page size
pub const PAGE_SIZE_ENV: &str = "ROVER_FEED_PAGE_SIZE";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Table holding photos, indexed by recency and by votes
    pub photos_table: String,
    /// Table holding one record per (user, photo) vote
    pub user_votes_table: String,
    /// Number of records requested per page
    pub page_size: usize,
    /// How long a feed waits for one page before giving up
    pub fetch_timeout_ms: u64,
    pub default_mission: String,
    pub default_instrument: String,
    /// Catalog database file (None = platform data directory)
    pub database_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            photos_table: "marsDemoImages".to_string(),
            user_votes_table: "userVotes".to_string(),
            page_size: 5,
            fetch_timeout_ms: 10_000,
            default_mission: "curiosity".to_string(),
            default_instrument: "fcam".to_string(),
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl ExplorerConfig {
    /// Load configuration.
    ///
    /// Uses `path` when given, otherwise `<config_dir>/rover-feed/config.json`
    /// if it exists, otherwise defaults. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_config_path().filter(|p| p.exists()),
        };

        let mut config = match file {
            Some(file) => {
                info!("Loading configuration from {}", file.display());
                Self::from_json(&fs::read_to_string(&file)?)?
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn default_config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("rover-feed");
        path.push("config.json");
        Some(path)
    }

    /// Apply overrides read through `var` (the process environment in `load`)
    fn apply_env_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(db) = var(DB_PATH_ENV) {
            info!("{DB_PATH_ENV} set, using database at {db}");
            self.database_path = Some(PathBuf::from(db));
        }

        if let Some(raw) = var(PAGE_SIZE_ENV) {
            match raw.parse::<usize>() {
                Ok(size) => self.page_size = size,
                Err(e) => {
                    warn!("Invalid {PAGE_SIZE_ENV} value {raw:?}: {e}");
                    return Err(ConfigError::Invalid {
                        field: "page_size",
                        reason: format!("{PAGE_SIZE_ENV}={raw:?} is not a number"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Reject values the store and feeds cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }

        for (field, table) in [
            ("photos_table", &self.photos_table),
            ("user_votes_table", &self.user_votes_table),
        ] {
            let valid = !table.is_empty()
                && table
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{table:?} is not a valid table name"),
                });
            }
        }

        if self.photos_table == self.user_votes_table {
            return Err(ConfigError::Invalid {
                field: "user_votes_table",
                reason: "must differ from photos_table".to_string(),
            });
        }

        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Catalog database location:
    /// - Linux: ~/.local/share/rover-feed/rover_feed.db
    /// - macOS: ~/Library/Application Support/rover-feed/rover_feed.db
    /// - Windows: %APPDATA%\rover-feed\rover_feed.db
    pub fn database_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.database_path {
            return Some(path.clone());
        }

        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push("rover-feed");
        path.push("rover_feed.db");
        Some(path)
    }
}
