//! Configuration management for the voice flow orchestrator
//!
//! Supports loading configuration from:
//! - YAML/TOML/JSON files under `config/` (`default`, then `{env}`)
//! - Environment variables (`VOICE_FLOW__` prefix, `__` separator)
//!
//! Every field has a default, so an empty configuration yields a working
//! orchestrator wired to the stock `rhasspy/...` topics.

pub mod settings;

pub use settings::{
    load_settings, load_settings_from, BusSettings, ObservabilityConfig, OrchestratorSettings,
    ResponseSettings, RetrySettings, SecondWakePolicy, Settings, TapSettings, TopicSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Unknown topic override: {0}")]
    UnknownTopic(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
