//! Configuration for the PixStu cache.
//!
//! `CacheConfig` is the explicit set of construction parameters for a store.
//! `RuntimeConfig` is the on-disk `.pixstu/config.json` that supplies the
//! defaults for it.

use crate::error::{PixstuError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Shared directory and file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const PIXSTU_DIR_NAME: &'static str = ".pixstu";
    pub const CACHE_DB_FILENAME: &'static str = "cache.sqlite";
    pub const RUNTIME_CONFIG_FILENAME: &'static str = "config.json";
    /// Environment flag that turns the cache off (`1`, `true`, `yes`, `on`).
    pub const CACHE_OFF_ENV: &'static str = "PIXSTU_CACHE_OFF";

    /// Private working directory under `root`.
    pub fn pixstu_dir(root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(Self::PIXSTU_DIR_NAME)
    }

    /// Default backing database path under `root`.
    pub fn cache_db_path(root: impl AsRef<Path>) -> PathBuf {
        Self::pixstu_dir(root).join(Self::CACHE_DB_FILENAME)
    }

    /// Runtime configuration file under `root`.
    pub fn runtime_config_path(root: impl AsRef<Path>) -> PathBuf {
        Self::pixstu_dir(root).join(Self::RUNTIME_CONFIG_FILENAME)
    }
}

/// Construction parameters for a [`CacheStore`](crate::CacheStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// Path to the shared SQLite file.
    pub db_path: PathBuf,
    /// Logical partition inside the file.
    pub namespace: String,
    /// Byte budget for the namespace (0 = unbounded).
    pub max_bytes: u64,
    /// Maximum entry age in seconds (0 = never expires).
    pub ttl_seconds: u64,
    /// When false, reads always miss and writes are dropped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CacheConfig {
    /// Default namespace used when none is given.
    pub const DEFAULT_NAMESPACE: &'static str = "default";
    /// Default time-to-live (7 days).
    pub const DEFAULT_TTL_SECS: u64 = 7 * 24 * 3600;
    /// Default namespace budget (512 MiB).
    pub const DEFAULT_MAX_BYTES: u64 = 512 * 1024 * 1024;

    /// Config for `namespace` in `db_path` with no size or age bound.
    pub fn new(db_path: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            namespace: namespace.into(),
            max_bytes: 0,
            ttl_seconds: 0,
            enabled: true,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Reject values the store cannot honor.
    ///
    /// Sizes and ages are stored as SQLite `INTEGER` (signed 64-bit), so both
    /// limits must fit in `i64`.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(PixstuError::validation("namespace", "must not be empty"));
        }
        if i64::try_from(self.max_bytes).is_err() {
            return Err(PixstuError::validation(
                "max_bytes",
                format!("{} exceeds the maximum of {}", self.max_bytes, i64::MAX),
            ));
        }
        if i64::try_from(self.ttl_seconds).is_err() {
            return Err(PixstuError::validation(
                "ttl_seconds",
                format!("{} exceeds the maximum of {}", self.ttl_seconds, i64::MAX),
            ));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(PixstuError::validation("db_path", "must not be empty"));
        }
        Ok(())
    }
}

/// Cache section of `config.json`.
///
/// Values are signed so a negative entry in a hand-edited file is reported
/// as a validation error instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub ttl_seconds: i64,
    pub max_bytes: i64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_seconds: CacheConfig::DEFAULT_TTL_SECS as i64,
            max_bytes: CacheConfig::DEFAULT_MAX_BYTES as i64,
        }
    }
}

/// Runtime configuration persisted at `.pixstu/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheSection,
}

impl RuntimeConfig {
    /// Load the runtime configuration, writing defaults if necessary.
    ///
    /// A missing or unparseable file is replaced with the defaults so the
    /// user has a valid file to edit. Missing fields take default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            debug!("Wrote default runtime config to {}", path.display());
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| PixstuError::io_with_path(e, path))?;

        match serde_json::from_str::<Self>(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(
                    "Runtime config {} is invalid ({}), restoring defaults",
                    path.display(),
                    e
                );
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
        }
    }

    /// Persist this configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PixstuError::Io {
                message: format!("Failed to create config directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json).map_err(|e| PixstuError::io_with_path(e, path))?;
        Ok(())
    }

    /// Build a validated [`CacheConfig`] for `namespace`.
    ///
    /// The cache is disabled when `PIXSTU_CACHE_OFF` is set to a truthy value.
    pub fn cache_config(
        &self,
        db_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
    ) -> Result<CacheConfig> {
        let max_bytes = u64::try_from(self.cache.max_bytes).map_err(|_| {
            PixstuError::validation(
                "cache.max_bytes",
                format!("must be >= 0, got {}", self.cache.max_bytes),
            )
        })?;
        let ttl_seconds = u64::try_from(self.cache.ttl_seconds).map_err(|_| {
            PixstuError::validation(
                "cache.ttl_seconds",
                format!("must be >= 0, got {}", self.cache.ttl_seconds),
            )
        })?;

        let config = CacheConfig::new(db_path, namespace)
            .with_max_bytes(max_bytes)
            .with_ttl_seconds(ttl_seconds)
            .with_enabled(!cache_disabled_by_env());
        config.validate()?;
        Ok(config)
    }
}

/// Check the `PIXSTU_CACHE_OFF` environment flag.
pub fn cache_disabled_by_env() -> bool {
    std::env::var(PathsConfig::CACHE_OFF_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
