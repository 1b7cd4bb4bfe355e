//! Shared helpers for the kbsync crates.
//!
//! This crate bundles the small pieces every kbsync component needs but none
//! of them owns: an HTTP client with retry and bearer authentication, an
//! injectable clock, and configuration loading from files and the
//! environment.
//!
//! # Modules
//!
//! ## Client (`client`)
//!
//! ```rust,ignore
//! use utils::client::{ClientConfig, HttpClient};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new()
//!     .with_timeout(Duration::from_secs(30))
//!     .with_bearer_token("secret");
//!
//! let client = HttpClient::new(config)?;
//! let snapshot: serde_json::Value = client.get_json("http://localhost:8000/api/tasks/42").await?;
//! ```
//!
//! ## Clock (`clock`)
//!
//! Time source abstraction. Production code uses [`clock::TokioClock`], which
//! follows tokio's (pausable) clock; synchronous tests drive a
//! [`clock::ManualClock`] by hand.
//!
//! ## Config (`config`)
//!
//! ```rust,ignore
//! use utils::config::{get_env_opt, load_config_file};
//!
//! let config: MyConfig = load_config_file("kbsync.yaml")?;
//! let token = get_env_opt("KBSYNC_TOKEN");
//! ```
//!
//! # Features
//!
//! - `client` - HTTP client utilities (enabled by default)
//! - `config` - Configuration utilities (enabled by default)

pub mod clock;
pub mod error;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "config")]
pub mod config;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SharedClock, TokioClock};
pub use error::{Result, UtilsError};

#[cfg(feature = "client")]
pub use client::{ClientConfig, HttpClient};

#[cfg(feature = "config")]
pub use config::{
    get_env_opt, get_env_parse, get_env_parse_opt, load_config_file, ConfigFormat, FromEnv,
    ValidateConfig,
};
