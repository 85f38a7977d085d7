// Local configuration for the mirror.
//
// Config file: `~/.docmirror/config.toml`
// Device cache: `~/.docmirror/cache.db` unless `[cache] path` overrides it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Root directory for mirror state: `~/.docmirror/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".docmirror"))
}

/// Path to the config file: `~/.docmirror/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Default device cache location: `~/.docmirror/cache.db`.
pub fn default_cache_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("cache.db"))
}

const DEFAULT_CACHE_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_FRESH_WINDOW_MS: u64 = 5_000;

// ── Mirror config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MirrorConfig {
    /// Persistent device cache settings.
    pub cache: CacheConfig,
    /// Sync behaviour.
    pub sync: SyncConfig,
    /// Fallback session identity used before boot data arrives.
    pub session: SessionConfig,
}

impl MirrorConfig {
    /// Load from `~/.docmirror/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Device cache file, falling back to `~/.docmirror/cache.db`.
    pub fn cache_path(&self) -> Option<PathBuf> {
        self.cache.path.clone().or_else(default_cache_path)
    }
}

/// Device cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file backing the cache.
    pub path: Option<PathBuf>,
    /// Total stored bytes before writes fail with quota exceeded (0 = unlimited).
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { path: None, max_bytes: DEFAULT_CACHE_MAX_BYTES }
    }
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// A synced document younger than this is fresh and not refetched.
    pub fresh_window_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { fresh_window_ms: DEFAULT_FRESH_WINDOW_MS }
    }
}

impl SyncConfig {
    pub fn fresh_window(&self) -> Duration {
        Duration::from_millis(self.fresh_window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub user: String,
    pub user_fullname: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { user: "Guest".into(), user_fullname: None }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(std::io::Error),
    #[error("config parse error: {0}")]
    Parse(toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(toml::ser::Error),
}
