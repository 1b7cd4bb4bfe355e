//! Chat stream configuration

use crate::reveal::RevealConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use utils::config::{get_env_opt, get_env_parse_opt, FromEnv, ValidateConfig};
use utils::UtilsError;

/// Settings for asking questions and revealing the answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatStreamConfig {
    /// Base URL of the API
    pub api_base_url: String,

    /// Path of the streaming chat endpoint, relative to `api_base_url`
    pub endpoint: String,

    /// Bearer credential
    pub token: Option<String>,

    /// Whole-request timeout in seconds; covers reading the streamed body
    pub request_timeout_secs: u64,

    /// Interval between reveal ticks, in milliseconds
    pub tick_interval_ms: u64,

    /// Reveal pacing
    pub reveal: RevealConfig,
}

impl Default for ChatStreamConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            endpoint: "/chat/stream".to_string(),
            token: None,
            request_timeout_secs: 300,
            tick_interval_ms: 20,
            reveal: RevealConfig::default(),
        }
    }
}

impl ChatStreamConfig {
    /// Load from a config file, apply `KBSYNC_*` overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> utils::Result<Self> {
        let mut config: Self = utils::load_config_file(path)?;
        config.apply_env("KBSYNC")?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite fields from `{prefix}_API_URL`, `{prefix}_TOKEN`,
    /// `{prefix}_CHAT_ENDPOINT` and `{prefix}_REVEAL_TICK_MS` when set.
    pub fn apply_env(&mut self, prefix: &str) -> utils::Result<()> {
        if let Some(url) = get_env_opt(&format!("{}_API_URL", prefix)) {
            self.api_base_url = url;
        }
        if let Some(token) = get_env_opt(&format!("{}_TOKEN", prefix)) {
            self.token = Some(token);
        }
        if let Some(endpoint) = get_env_opt(&format!("{}_CHAT_ENDPOINT", prefix)) {
            self.endpoint = endpoint;
        }
        if let Some(ms) = get_env_parse_opt(&format!("{}_REVEAL_TICK_MS", prefix))? {
            self.tick_interval_ms = ms;
        }
        Ok(())
    }

    /// Full URL of the chat endpoint
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    /// Whole-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Interval between reveal ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl FromEnv for ChatStreamConfig {
    fn from_env(prefix: &str) -> utils::Result<Self> {
        let mut config = Self::default();
        config.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}

impl ValidateConfig for ChatStreamConfig {
    fn validate(&self) -> utils::Result<()> {
        let invalid = |msg: &str| -> utils::Result<()> {
            Err(UtilsError::ConfigError(msg.to_string()))
        };

        if self.api_base_url.trim().is_empty() {
            return invalid("api_base_url must not be empty");
        }
        if self.endpoint.trim().is_empty() {
            return invalid("endpoint must not be empty");
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be greater than zero");
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be greater than zero");
        }
        Ok(())
    }
}
