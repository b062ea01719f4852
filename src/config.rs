//! File configuration with defaults.
//!
//! Every key is optional. A missing file is the same as an empty one.
//!
//! ```toml
//! data_dir = "/srv/papercache"
//! concurrency = 8
//! rate_limit_ms = 3000
//! oai_url = "https://export.arxiv.org/oai2"
//! ```

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, DatabaseOptions};
use crate::remote::Endpoints;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PAPERCACHE_DIR";

const APP_DIR: &str = "papercache";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Runtime settings. Unset keys take the documented defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the index database and artifact trees.
    pub data_dir: Option<PathBuf>,
    pub cache_capacity: usize,
    /// Harvested records per commit.
    pub batch_size: usize,
    pub harvest_delay_ms: u64,
    /// Minimum delay between requests to one host (0 disables).
    pub rate_limit_ms: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub db_max_connections: u32,
    pub db_busy_timeout_ms: u32,
    pub fuzzy_threshold: f64,
    pub oai_url: Option<String>,
    pub api_url: Option<String>,
    pub pdf_base_url: Option<String>,
    pub source_base_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache_capacity: crate::cache::DEFAULT_CACHE_CAPACITY,
            batch_size: crate::harvest::DEFAULT_BATCH_SIZE,
            harvest_delay_ms: 3000,
            rate_limit_ms: 3000,
            concurrency: 4,
            max_retries: crate::download::DEFAULT_MAX_RETRIES,
            connect_timeout_secs: crate::download::constants::CONNECT_TIMEOUT_SECS,
            read_timeout_secs: crate::download::constants::READ_TIMEOUT_SECS,
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            db_busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            fuzzy_threshold: crate::search::DEFAULT_THRESHOLD,
            oai_url: None,
            api_url: None,
            pdf_base_url: None,
            source_base_url: None,
        }
    }
}

impl Config {
    /// Parses TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// See [`Config::from_toml`]; also [`ConfigError::Read`] if the file
    /// exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw, path)
    }

    /// Loads the file at [`resolve_default_config_path`], if any.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_default() -> Result<Self, ConfigError> {
        match resolve_default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Checks every value against its supported range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_capacity == 0 {
            return Err(ConfigError::invalid("cache_capacity", self.cache_capacity, ">= 1"));
        }
        if !(1..=10_000).contains(&self.batch_size) {
            return Err(ConfigError::invalid("batch_size", self.batch_size, "1..=10000"));
        }
        if self.harvest_delay_ms > 60_000 {
            return Err(ConfigError::invalid(
                "harvest_delay_ms",
                self.harvest_delay_ms,
                "0..=60000",
            ));
        }
        if self.rate_limit_ms > 60_000 {
            return Err(ConfigError::invalid("rate_limit_ms", self.rate_limit_ms, "0..=60000"));
        }
        if !(1..=100).contains(&self.concurrency) {
            return Err(ConfigError::invalid("concurrency", self.concurrency, "1..=100"));
        }
        if self.max_retries > 10 {
            return Err(ConfigError::invalid("max_retries", self.max_retries, "0..=10"));
        }
        for (field, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
        ] {
            if !(1..=3600).contains(&value) {
                return Err(ConfigError::invalid(field, value, "1..=3600"));
            }
        }
        if !(1..=20).contains(&self.db_max_connections) {
            return Err(ConfigError::invalid(
                "db_max_connections",
                self.db_max_connections,
                "1..=20",
            ));
        }
        if self.db_busy_timeout_ms > 120_000 {
            return Err(ConfigError::invalid(
                "db_busy_timeout_ms",
                self.db_busy_timeout_ms,
                "0..=120000",
            ));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(ConfigError::invalid("fuzzy_threshold", self.fuzzy_threshold, "0.0..=1.0"));
        }
        Ok(())
    }

    /// Data directory: the configured one, `$PAPERCACHE_DIR`, or the user
    /// cache directory.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if let Some(dir) = env_var_non_empty_os(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        if let Some(cache_home) = env_var_non_empty_os("XDG_CACHE_HOME") {
            return PathBuf::from(cache_home).join(APP_DIR);
        }
        env_var_non_empty_os("HOME").map_or_else(
            || PathBuf::from(".").join(APP_DIR),
            |home| PathBuf::from(home).join(".cache").join(APP_DIR),
        )
    }

    /// Remote endpoints with overrides applied.
    #[must_use]
    pub fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::default();
        Endpoints {
            oai_url: self.oai_url.clone().unwrap_or(defaults.oai_url),
            api_url: self.api_url.clone().unwrap_or(defaults.api_url),
            pdf_base_url: self.pdf_base_url.clone().unwrap_or(defaults.pdf_base_url),
            source_base_url: self
                .source_base_url
                .clone()
                .unwrap_or(defaults.source_base_url),
        }
    }

    #[must_use]
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.db_max_connections,
            busy_timeout_ms: self.db_busy_timeout_ms,
        }
    }

    #[must_use]
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    #[must_use]
    pub fn harvest_delay(&self) -> Duration {
        Duration::from_millis(self.harvest_delay_ms)
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/papercache/config.toml`
/// 2. `$HOME/.config/papercache/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
