//! Configuration loading and persistence.
//!
//! Settings live in `<config_dir>/config.json`; environment variables
//! override the file. The API key is never written to disk.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_API_KEY, DEFAULT_RECONNECT_INITIAL_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS,
    DEFAULT_RECONNECT_MAX_MS, DEFAULT_SERVER_URL,
};
use crate::reconnect::{Backoff, ReconnectPolicy};

const CONFIG_FILE: &str = "config.json";

/// Reconnection settings as stored on disk.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Retry dropped connections.
    pub enabled: bool,
    /// First retry delay in milliseconds.
    pub initial_ms: u64,
    /// Delay cap in milliseconds.
    pub max_ms: u64,
    /// Consecutive failures before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_ms: DEFAULT_RECONNECT_INITIAL_MS,
            max_ms: DEFAULT_RECONNECT_MAX_MS,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Policy the session should run with.
    pub fn policy(&self) -> ReconnectPolicy {
        if !self.enabled {
            return ReconnectPolicy::Disabled;
        }
        ReconnectPolicy::Backoff(Backoff {
            initial: Duration::from_millis(self.initial_ms),
            max: Duration::from_millis(self.max_ms.max(self.initial_ms)),
            max_attempts: self.max_attempts,
        })
    }
}

/// Configuration for the kos terminal client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the KOS API server.
    pub server_url: String,
    /// API key; NOT serialized to disk.
    #[serde(skip)]
    pub api_key: String,
    /// Project used when none is given on the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Reconnection settings.
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            project_id: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `KOS_CONFIG_DIR` wins; otherwise the platform config dir
    /// (e.g. `~/.config/kos`).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("KOS_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("kos")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = match Self::load_from(&dir) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("[Config] Using defaults: {e:#}");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `config.json` from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        config.api_key = DEFAULT_API_KEY.to_string();
        Ok(config)
    }

    /// Applies `KOS_API`, `KOS_API_KEY` and `KOS_PROJECT_ID` from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("KOS_API") {
            self.server_url = server_url;
        }
        if let Some(api_key) = lookup("KOS_API_KEY") {
            self.api_key = api_key;
        }
        if let Some(project_id) = lookup("KOS_PROJECT_ID").filter(|p| !p.is_empty()) {
            self.project_id = Some(project_id);
        }
    }

    /// Persists the current configuration to the default directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the current configuration into `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}
