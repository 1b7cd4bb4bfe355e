//! Realtime configuration
//!
//! Loaded from a YAML/JSON/TOML file, overridden by `KBSYNC_*` environment
//! variables, then validated.

use crate::backoff::BackoffConfig;
use crate::connection::ConnectionConfig;
use crate::poller::PollerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use utils::config::{get_env_opt, get_env_parse_opt, FromEnv, ValidateConfig};
use utils::UtilsError;

/// Placeholder replaced by the task id in `ws_url`
pub const TASK_ID_PLACEHOLDER: &str = "{task_id}";

/// Settings for the task-progress pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Base URL of the task REST API
    pub api_base_url: String,

    /// Push endpoint; `{task_id}` is substituted per subscription, otherwise
    /// the task id is appended as a path segment
    pub ws_url: String,

    /// Bearer credential for both the push channel and REST calls
    pub token: Option<String>,

    /// Reconnect backoff
    pub backoff: BackoffConfig,

    /// Fallback poller timing
    pub poller: PollerConfig,

    /// Open timeout for the push channel, in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            ws_url: "ws://localhost:8000/ws/tasks/{task_id}".to_string(),
            token: None,
            backoff: BackoffConfig::default(),
            poller: PollerConfig::default(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl RealtimeConfig {
    /// Load from a config file, apply `KBSYNC_*` overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> utils::Result<Self> {
        let mut config: Self = utils::load_config_file(path)?;
        config.apply_env("KBSYNC")?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite fields from `{prefix}_API_URL`, `{prefix}_WS_URL`,
    /// `{prefix}_TOKEN`, `{prefix}_POLL_INTERVAL_MS` and
    /// `{prefix}_STALE_THRESHOLD_MS` when set.
    pub fn apply_env(&mut self, prefix: &str) -> utils::Result<()> {
        if let Some(url) = get_env_opt(&format!("{}_API_URL", prefix)) {
            self.api_base_url = url;
        }
        if let Some(url) = get_env_opt(&format!("{}_WS_URL", prefix)) {
            self.ws_url = url;
        }
        if let Some(token) = get_env_opt(&format!("{}_TOKEN", prefix)) {
            self.token = Some(token);
        }

        if let Some(ms) = get_env_parse_opt(&format!("{}_POLL_INTERVAL_MS", prefix))? {
            self.poller.interval_ms = ms;
        }
        if let Some(ms) = get_env_parse_opt(&format!("{}_STALE_THRESHOLD_MS", prefix))? {
            self.poller.stale_threshold_ms = ms;
        }
        Ok(())
    }

    /// Push endpoint for `task_id`; the id is percent-encoded
    pub fn channel_url(&self, task_id: &str) -> String {
        let task_id = urlencoding::encode(task_id);
        if self.ws_url.contains(TASK_ID_PLACEHOLDER) {
            self.ws_url.replace(TASK_ID_PLACEHOLDER, &task_id)
        } else {
            format!("{}/{}", self.ws_url.trim_end_matches('/'), task_id)
        }
    }

    /// Open timeout for the push channel
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Connection settings for `task_id`
    pub fn connection_config(&self, task_id: &str) -> ConnectionConfig {
        ConnectionConfig {
            url: self.channel_url(task_id),
            token: self.token.clone(),
            backoff: self.backoff,
            connect_timeout: self.connect_timeout(),
        }
    }
}

impl FromEnv for RealtimeConfig {
    fn from_env(prefix: &str) -> utils::Result<Self> {
        let mut config = Self::default();
        config.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}

impl ValidateConfig for RealtimeConfig {
    fn validate(&self) -> utils::Result<()> {
        let invalid = |msg: &str| -> utils::Result<()> {
            Err(UtilsError::ConfigError(msg.to_string()))
        };

        if self.api_base_url.trim().is_empty() {
            return invalid("api_base_url must not be empty");
        }
        if self.ws_url.trim().is_empty() {
            return invalid("ws_url must not be empty");
        }
        if self.poller.interval_ms == 0 {
            return invalid("poller.interval_ms must be greater than zero");
        }
        if self.poller.stale_threshold_ms == 0 {
            return invalid("poller.stale_threshold_ms must be greater than zero");
        }
        if self.backoff.base_delay_ms == 0 {
            return invalid("backoff.base_delay_ms must be greater than zero");
        }
        if self.backoff.base_delay_ms > self.backoff.cap_delay_ms {
            return invalid("backoff.base_delay_ms must not exceed backoff.cap_delay_ms");
        }
        if self.connect_timeout_ms == 0 {
            return invalid("connect_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}
