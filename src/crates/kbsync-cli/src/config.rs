//! Combined configuration file for the `kbsync` binary.
//!
//! ```yaml
//! realtime:
//!   api_base_url: https://kb.example.com/api
//!   ws_url: wss://kb.example.com/ws/tasks/{task_id}
//!   poller:
//!     interval_ms: 5000
//! chat:
//!   endpoint: /chat/stream
//!   reveal:
//!     answer_delay_ms: 30
//! ```

use chat_stream::ChatStreamConfig;
use realtime::RealtimeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use utils::config::ValidateConfig;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "KBSYNC";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub realtime: RealtimeConfig,
    pub chat: ChatStreamConfig,
}

impl CliConfig {
    /// Read `path` if given, otherwise start from defaults; then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> utils::Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Same as [`CliConfig::load`] with a custom variable prefix.
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> utils::Result<Self> {
        let mut config: Self = match path {
            Some(path) => utils::load_config_file(path)?,
            None => Self::default(),
        };
        config.realtime.apply_env(prefix)?;
        config.chat.apply_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}

impl ValidateConfig for CliConfig {
    fn validate(&self) -> utils::Result<()> {
        self.realtime.validate()?;
        self.chat.validate()
    }
}
