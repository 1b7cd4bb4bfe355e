//! Configuration loading.
//!
//! Component configs are read from a YAML, JSON or TOML file (format picked
//! from the extension) and then patched from `PREFIX_*` environment
//! variables. Each component implements [`FromEnv`] and [`ValidateConfig`].
//!
//! # Example
//!
//! ```rust,ignore
//! use utils::config::{get_env_parse_opt, load_config_file};
//!
//! let mut config: RealtimeConfig = load_config_file("kbsync.yaml")?;
//! if let Some(ms) = get_env_parse_opt("KBSYNC_POLL_INTERVAL_MS")? {
//!     config.poller.interval_ms = ms;
//! }
//! ```

use crate::error::{Result, UtilsError};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Value of `key`, or `None` if unset or blank.
pub fn get_env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Parse the value of `key`. Missing and unparsable values are errors.
pub fn get_env_parse<T>(key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get_env_parse_opt(key)? {
        Some(value) => Ok(value),
        None => Err(UtilsError::ConfigError(format!(
            "environment variable '{}' is not set",
            key
        ))),
    }
}

/// Parse the value of `key` if it is set.
pub fn get_env_parse_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = get_env_opt(key) else {
        return Ok(None);
    };
    raw.trim().parse::<T>().map(Some).map_err(|e| {
        UtilsError::ConfigError(format!("invalid value for '{}': {}", key, e))
    })
}

/// Supported config file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                UtilsError::ConfigError(format!("no file extension on {}", path.display()))
            })?;

        match extension.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            other => Err(UtilsError::ConfigError(format!(
                "unsupported config file extension '{}'",
                other
            ))),
        }
    }

    /// Deserialize `content` in this format.
    pub fn parse<T: DeserializeOwned>(self, content: &str) -> Result<T> {
        let parsed = match self {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|e| UtilsError::ConfigError(format!("invalid {:?} config: {}", self, e)))
    }
}

/// Read and deserialize a config file.
pub fn load_config_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let content = std::fs::read_to_string(path)?;
    format.parse(&content)
}

/// Types that can be built from defaults plus `PREFIX_*` variables.
pub trait FromEnv: Sized {
    fn from_env(prefix: &str) -> Result<Self>;
}

/// Configuration that can reject itself.
pub trait ValidateConfig {
    fn validate(&self) -> Result<()>;
}
