//! Bridge configuration.
//!
//! Loaded once at process start from, in increasing precedence:
//!
//! 1. an optional `.env` file, merged into the process environment
//! 2. `config/bridge.yaml` (optional) or an explicitly named YAML file (required)
//! 3. `BRIDGE__`-prefixed environment variables, `__` separating sections
//! 4. the `SERVICEBUS_CONNECTION_STRING` and `QUEUE_NAME` variables

use crate::receive_loop::{LoopConfig, TransientBackoff};
use bus_runtime::{
    AzureServiceBusConfig, InMemoryConfig, ProviderConfig, QueueConfig, QueueName, Secret,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable holding the Service Bus connection string
pub const CONNECTION_STRING_ENV: &str = "SERVICEBUS_CONNECTION_STRING";

/// Environment variable holding the queue name
pub const QUEUE_NAME_ENV: &str = "QUEUE_NAME";

/// Prefix for layered environment overrides, e.g. `BRIDGE__SERVER__PORT`
pub const ENV_PREFIX: &str = "BRIDGE";

const DEFAULT_CONFIG_FILE: &str = "config/bridge";
const REDACTED: &str = "[REDACTED]";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum BridgeConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },
}

impl BridgeConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Broker connection settings
    pub queue: QueueSettings,

    /// Receive loop tuning
    pub receive: ReceiveSettings,

    /// Drain endpoint settings
    pub drain: DrainSettings,

    /// HTTP server settings
    pub server: ServerSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Which broker backs the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueProviderKind {
    #[default]
    Azure,
    Memory,
}

/// Broker connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Broker backing the queue
    pub provider: QueueProviderKind,

    /// Service Bus connection string; required for the azure provider
    pub connection_string: String,

    /// Queue all services operate on
    pub queue_name: String,

    /// Lifetime of generated SAS tokens
    pub sas_token_ttl_seconds: u64,

    /// Upper bound on one broker HTTP exchange, excluding receive waits
    pub request_timeout_seconds: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            provider: QueueProviderKind::Azure,
            connection_string: String::new(),
            queue_name: String::new(),
            sas_token_ttl_seconds: 3600,
            request_timeout_seconds: 30,
        }
    }
}

impl fmt::Debug for QueueSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection_string = if self.connection_string.is_empty() {
            ""
        } else {
            REDACTED
        };
        f.debug_struct("QueueSettings")
            .field("provider", &self.provider)
            .field("connection_string", &connection_string)
            .field("queue_name", &self.queue_name)
            .field("sas_token_ttl_seconds", &self.sas_token_ttl_seconds)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Receive loop tuning shared by the consumer and the drain endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveSettings {
    /// Longest single receive wait
    pub per_attempt_timeout_ms: u64,

    /// Longest wait for the broker to confirm an acknowledgment
    pub ack_timeout_ms: u64,

    /// Consecutive transient receive failures tolerated before giving up
    pub max_consecutive_transient_failures: u32,

    /// First pause after a transient failure
    pub transient_backoff_initial_ms: u64,

    /// Cap on the pause after a transient failure
    pub transient_backoff_max_ms: u64,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        let backoff = TransientBackoff::default();
        Self {
            per_attempt_timeout_ms: duration_ms(LoopConfig::DEFAULT_PER_ATTEMPT_TIMEOUT),
            ack_timeout_ms: duration_ms(LoopConfig::DEFAULT_ACK_TIMEOUT),
            max_consecutive_transient_failures: LoopConfig::DEFAULT_TRANSIENT_BUDGET,
            transient_backoff_initial_ms: duration_ms(backoff.initial_delay),
            transient_backoff_max_ms: duration_ms(backoff.max_delay),
        }
    }
}

/// Drain endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainSettings {
    /// Total time one drain may spend receiving
    pub deadline_ms: u64,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self { deadline_ms: 5000 }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 64 * 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the process environment and config files.
    ///
    /// A `.env` file in the working directory, if present, is merged into the
    /// environment first. Variables already set take precedence over it.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, BridgeConfigError> {
        match dotenv::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => {}
            Err(e) => warn!(error = %e, "Ignoring unreadable .env file"),
        }

        Self::load_from(explicit_path, std::env::vars().collect())
    }

    /// Load configuration using `env` in place of the process environment
    pub fn load_from(
        explicit_path: Option<&Path>,
        env: HashMap<String, String>,
    ) -> Result<Self, BridgeConfigError> {
        let file = match explicit_path {
            Some(path) => config::File::from(path)
                .format(config::FileFormat::Yaml)
                .required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE)
                .format(config::FileFormat::Yaml)
                .required(false),
        };

        let connection_string = env.get(CONNECTION_STRING_ENV).cloned();
        let queue_name = env.get(QUEUE_NAME_ENV).cloned();

        let loaded: Self = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .source(Some(env)),
            )
            .set_override_option("queue.connection_string", connection_string)?
            .set_override_option("queue.queue_name", queue_name)?
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field requirements
    pub fn validate(&self) -> Result<(), BridgeConfigError> {
        if self.queue.provider == QueueProviderKind::Azure
            && self.queue.connection_string.trim().is_empty()
        {
            return Err(BridgeConfigError::invalid(
                "queue.connection_string",
                format!("required for the azure provider (set {CONNECTION_STRING_ENV})"),
            ));
        }

        if self.queue.queue_name.is_empty() {
            return Err(BridgeConfigError::invalid(
                "queue.queue_name",
                format!("required (set {QUEUE_NAME_ENV})"),
            ));
        }
        self.queue_name()?;

        let positive = [
            ("queue.sas_token_ttl_seconds", self.queue.sas_token_ttl_seconds),
            ("queue.request_timeout_seconds", self.queue.request_timeout_seconds),
            ("receive.per_attempt_timeout_ms", self.receive.per_attempt_timeout_ms),
            ("receive.ack_timeout_ms", self.receive.ack_timeout_ms),
            ("drain.deadline_ms", self.drain.deadline_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(BridgeConfigError::invalid(field, "must be greater than zero"));
            }
        }

        if self.receive.transient_backoff_initial_ms > self.receive.transient_backoff_max_ms {
            return Err(BridgeConfigError::invalid(
                "receive.transient_backoff_initial_ms",
                "must not exceed transient_backoff_max_ms",
            ));
        }

        Ok(())
    }

    /// Validated queue name
    pub fn queue_name(&self) -> Result<QueueName, BridgeConfigError> {
        QueueName::new(self.queue.queue_name.clone())
            .map_err(|e| BridgeConfigError::invalid("queue.queue_name", e.to_string()))
    }

    /// Client factory configuration for the selected provider
    pub fn queue_config(&self) -> QueueConfig {
        let provider = match self.queue.provider {
            QueueProviderKind::Azure => {
                let mut azure =
                    AzureServiceBusConfig::new(Secret::new(self.queue.connection_string.clone()));
                azure.sas_token_ttl = Duration::from_secs(self.queue.sas_token_ttl_seconds);
                azure.request_timeout = Duration::from_secs(self.queue.request_timeout_seconds);
                ProviderConfig::AzureServiceBus(azure)
            }
            QueueProviderKind::Memory => ProviderConfig::InMemory(InMemoryConfig::default()),
        };
        QueueConfig { provider }
    }

    /// Loop configuration for the long-running consumer
    pub fn consumer_loop_config(&self) -> LoopConfig {
        self.apply_receive_settings(LoopConfig::continuous())
    }

    /// Loop configuration for one bounded drain
    pub fn drain_loop_config(&self) -> LoopConfig {
        self.apply_receive_settings(LoopConfig::bounded_drain(Duration::from_millis(
            self.drain.deadline_ms,
        )))
    }

    /// Copy with the connection string masked, suitable for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.queue.connection_string.is_empty() {
            copy.queue.connection_string = REDACTED.to_string();
        }
        copy
    }

    fn apply_receive_settings(&self, config: LoopConfig) -> LoopConfig {
        config
            .with_per_attempt_timeout(Duration::from_millis(self.receive.per_attempt_timeout_ms))
            .with_ack_timeout(Duration::from_millis(self.receive.ack_timeout_ms))
            .with_receive_grace(Duration::from_secs(self.queue.request_timeout_seconds))
            .with_transient_budget(self.receive.max_consecutive_transient_failures)
            .with_transient_backoff(TransientBackoff {
                initial_delay: Duration::from_millis(self.receive.transient_backoff_initial_ms),
                max_delay: Duration::from_millis(self.receive.transient_backoff_max_ms),
            })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
