//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use voice_flow_core::{QoS, TopicRegistry, DEFAULT_TOPIC_PREFIX};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Turn orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Wire topics
    #[serde(default)]
    pub topics: TopicSettings,

    /// Bus adapter behaviour
    #[serde(default)]
    pub bus: BusSettings,

    /// Spoken responses derived from recognized intents
    #[serde(default)]
    pub responses: ResponseSettings,

    /// Observability tap
    #[serde(default)]
    pub tap: TapSettings,

    /// Logging
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_orchestrator()?;
        self.validate_bus()?;
        self.validate_topics()?;

        if self.tap.capacity == 0 {
            return Err(ConfigError::invalid("tap.capacity", "must be greater than zero"));
        }

        Ok(())
    }

    fn validate_orchestrator(&self) -> Result<(), ConfigError> {
        let o = &self.orchestrator;
        if o.stall_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.stall_timeout_ms",
                "must be greater than zero",
            ));
        }
        if o.event_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.event_queue_capacity",
                "must be greater than zero",
            ));
        }
        if o.event_channel_capacity == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.event_channel_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    fn validate_bus(&self) -> Result<(), ConfigError> {
        if self.bus.max_line_bytes == 0 {
            return Err(ConfigError::invalid(
                "bus.max_line_bytes",
                "must be greater than zero",
            ));
        }
        let retry = &self.bus.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "bus.retry.max_attempts",
                "must be at least 1",
            ));
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::invalid(
                "bus.retry.initial_backoff_ms",
                format!(
                    "initial backoff ({}ms) exceeds max backoff ({}ms)",
                    retry.initial_backoff_ms, retry.max_backoff_ms
                ),
            ));
        }
        Ok(())
    }

    fn validate_topics(&self) -> Result<(), ConfigError> {
        if self.topics.prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::invalid("topics.prefix", "must not be empty"));
        }
        self.topics
            .registry()?
            .validate()
            .map_err(|(field, message)| ConfigError::invalid(format!("topics.{}", field), message))
    }
}

/// Policy for a wake word detected while a session is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecondWakePolicy {
    /// Discard the wake event and keep the current session
    #[default]
    Ignore,
    /// Abandon the current session and start a new one
    ///
    /// Only honoured once the wake word has been re-enabled, i.e. after
    /// capture has ended.
    Interrupt,
}

/// Turn orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Time without a progressing event before a session is reset (ms)
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,

    /// What to do with a wake event during an active session
    #[serde(default)]
    pub second_wake_policy: SecondWakePolicy,

    /// Inbound event queue depth
    #[serde(default = "default_capacity")]
    pub event_queue_capacity: usize,

    /// Orchestrator event broadcast depth
    #[serde(default = "default_capacity")]
    pub event_channel_capacity: usize,
}

fn default_stall_timeout_ms() -> u64 {
    30_000
}

fn default_capacity() -> usize {
    256
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            stall_timeout_ms: default_stall_timeout_ms(),
            second_wake_policy: SecondWakePolicy::default(),
            event_queue_capacity: default_capacity(),
            event_channel_capacity: default_capacity(),
        }
    }
}

impl OrchestratorSettings {
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

/// Topic settings
///
/// All topics are derived from `prefix`; individual topics can be replaced
/// through `overrides`, keyed by registry field name (e.g. `say_text`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSettings {
    #[serde(default = "default_topic_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            prefix: default_topic_prefix(),
            overrides: BTreeMap::new(),
        }
    }
}

impl TopicSettings {
    /// Build the topic registry
    pub fn registry(&self) -> Result<TopicRegistry, ConfigError> {
        let base = TopicRegistry::with_prefix(&self.prefix);
        if self.overrides.is_empty() {
            return Ok(base);
        }

        let mut value =
            serde_json::to_value(&base).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let fields = value
            .as_object_mut()
            .ok_or_else(|| ConfigError::ParseError("topic registry is not a map".to_string()))?;

        for (name, topic) in &self.overrides {
            if !fields.contains_key(name) {
                return Err(ConfigError::UnknownTopic(name.clone()));
            }
            fields.insert(name.clone(), serde_json::Value::String(topic.clone()));
        }

        serde_json::from_value(value).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Bus adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// Delivery guarantee for lifecycle event subscriptions
    #[serde(default = "default_inbound_qos")]
    pub inbound_qos: QoS,

    /// Delivery guarantee for control commands
    #[serde(default)]
    pub outbound_qos: QoS,

    /// Longest accepted input line in bytes; longer lines are dropped
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,

    /// Publish retry policy
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_inbound_qos() -> QoS {
    QoS::AtLeastOnce
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            inbound_qos: default_inbound_qos(),
            outbound_qos: QoS::AtMostOnce,
            max_line_bytes: default_max_line_bytes(),
            retry: RetrySettings::default(),
        }
    }
}

/// Bounded exponential backoff for failed publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    50
}
fn default_max_backoff_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetrySettings {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Spoken response templates
///
/// Templates may use `{intent}`, `{text}` and `{<slot name>}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSettings {
    /// Templates keyed by intent name (matched case-insensitively)
    #[serde(default)]
    pub templates: HashMap<String, String>,

    /// Template for intents without their own entry
    #[serde(default = "default_response_template")]
    pub default_template: String,

    /// Sentence spoken when no intent was recognized
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

fn default_response_template() -> String {
    "Recognized {intent}".to_string()
}

fn default_fallback() -> String {
    "Sorry, I did not understand that.".to_string()
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            templates: HashMap::new(),
            default_template: default_response_template(),
            fallback: default_fallback(),
        }
    }
}

/// Observability tap settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records buffered between the bus and the sink
    #[serde(default = "default_tap_capacity")]
    pub capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_tap_capacity() -> usize {
    64
}

impl Default for TapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_tap_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from `config/` and the environment
///
/// Priority: env vars > config/{env}.* > config/default.* > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from files under `dir` and the environment
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(
        File::with_name(&dir.join("default").to_string_lossy()).required(false),
    );

    if let Some(env_name) = env {
        builder = builder
            .add_source(File::with_name(&dir.join(env_name).to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_FLOW")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    tracing::debug!(
        dir = %dir.display(),
        env = env.unwrap_or("default"),
        "Settings loaded"
    );

    Ok(settings)
}
