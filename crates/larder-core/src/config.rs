//! Host application configuration.
//!
//! The repository itself only takes a `StalenessConfig`. This module covers
//! what a host needs to build one: where the remote lives, which collection
//! to mirror, and where to keep the cache.
//!
//! Configuration is stored at `~/.config/larder/config.json`; a handful of
//! `LARDER_*` environment variables override it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::policy::{StalenessConfig, DEFAULT_MAX_AGE_MINUTES};
use crate::remote::http::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "larder";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_COLLECTION: &str = "restaurants";

pub const ENV_BASE_URL: &str = "LARDER_BASE_URL";
pub const ENV_MAX_AGE_MINUTES: &str = "LARDER_MAX_AGE_MINUTES";
pub const ENV_CACHE_DIR: &str = "LARDER_CACHE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub collection: String,
    pub max_age_minutes: i64,
    pub request_timeout_secs: u64,
    pub cache_dir: Option<PathBuf>,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            collection: DEFAULT_COLLECTION.to_string(),
            max_age_minutes: DEFAULT_MAX_AGE_MINUTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_dir: None,
            last_username: None,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Record the logged-in user in the config file. Only `last_username`
    /// changes; environment overrides applied to a loaded copy never reach disk.
    pub fn store_last_username(username: Option<&str>) -> Result<()> {
        Self::store_last_username_at(&Self::config_path()?, username)
    }

    pub fn store_last_username_at(path: &std::path::Path, username: Option<&str>) -> Result<()> {
        let mut stored = Self::load_from(path)?;
        stored.last_username = username.map(str::to_string);
        stored.save_to(path)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `LARDER_*` overrides from the environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = Some(url);
        }
        if let Some(minutes) = lookup(ENV_MAX_AGE_MINUTES) {
            self.max_age_minutes = minutes
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of minutes", ENV_MAX_AGE_MINUTES))?;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn staleness(&self) -> StalenessConfig {
        StalenessConfig::from_minutes(self.max_age_minutes)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(&self.collection))
    }
}
