//! Provider selection and connection configuration.
//!
//! The active provider is chosen by the `QUEUE_PROVIDER` environment
//! variable (`RABBITMQ`, the default, or `NATS`); an unknown value is a
//! configuration error the caller must handle before anything connects.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Environment variable selecting the broker provider
pub const QUEUE_PROVIDER_ENV: &str = "QUEUE_PROVIDER";

/// Enumeration of supported broker providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    RabbitMq,
    Nats,
    InMemory,
}

impl ProviderType {
    /// Label value used on connection metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RabbitMq => "rabbitmq",
            Self::Nats => "nats",
            Self::InMemory => "memory",
        }
    }
}

impl FromStr for ProviderType {
    type Err = ConfigurationError;

    /// Parse the `QUEUE_PROVIDER` value. Only the two real brokers are
    /// selectable from the environment; the in-memory provider is
    /// constructed programmatically.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RABBITMQ" => Ok(Self::RabbitMq),
            "NATS" => Ok(Self::Nats),
            other => Err(ConfigurationError::UnknownProvider {
                provider: other.to_string(),
            }),
        }
    }
}

/// RabbitMQ connection settings, sourced from `RABBITMQ_*` environment
/// variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitMqConfig {
    pub protocol: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
    pub vhost: String,
    /// Maximum unacknowledged deliveries in flight; the only backpressure
    /// valve on the AMQP path. `None` leaves the broker default.
    pub prefetch_count: Option<u16>,
}

impl RabbitMqConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Ok(Self {
            protocol: required_env("RABBITMQ_PROTOCOL")?,
            user: required_env("RABBITMQ_USER")?,
            password: required_env("RABBITMQ_PASSWORD")?,
            host: required_env("RABBITMQ_HOST")?,
            port: required_env("RABBITMQ_PORT")?,
            vhost: required_env("RABBITMQ_VHOST")?,
            prefetch_count: optional_prefetch("RABBITMQ_PREFETCH")?,
        })
    }

    /// AMQP URI assembled from the connection settings
    pub fn amqp_uri(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            self.protocol, self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

/// NATS connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
}

impl NatsConfig {
    pub const DEFAULT_URL: &'static str = "nats://localhost:4222";

    pub fn from_env() -> Self {
        Self {
            url: env::var("NATS_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_string()),
        }
    }
}

/// In-memory provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum unacknowledged deliveries in flight per consumer
    pub prefetch_count: Option<usize>,
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    RabbitMq(RabbitMqConfig),
    Nats(NatsConfig),
    InMemory(InMemoryConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::RabbitMq(_) => ProviderType::RabbitMq,
            Self::Nats(_) => ProviderType::Nats,
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }
}

/// Configuration for broker client initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub provider: ProviderConfig,
    /// Legacy convenience: auto-bind queues to a lone exchange when a
    /// configure call carries no explicit binding. Off by default;
    /// explicit bindings are the supported path.
    pub auto_bind_single_exchange: bool,
}

impl BrokerConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            auto_bind_single_exchange: false,
        }
    }

    pub fn with_auto_bind_single_exchange(mut self, enabled: bool) -> Self {
        self.auto_bind_single_exchange = enabled;
        self
    }

    /// Build the configuration from the environment. `QUEUE_PROVIDER`
    /// defaults to `RABBITMQ`; the selected provider's own variables are
    /// then read.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let provider_name =
            env::var(QUEUE_PROVIDER_ENV).unwrap_or_else(|_| "RABBITMQ".to_string());
        let provider = match provider_name.parse::<ProviderType>()? {
            ProviderType::RabbitMq => ProviderConfig::RabbitMq(RabbitMqConfig::from_env()?),
            ProviderType::Nats => ProviderConfig::Nats(NatsConfig::from_env()),
            ProviderType::InMemory => ProviderConfig::InMemory(InMemoryConfig::default()),
        };

        Ok(Self::new(provider))
    }
}

fn required_env(key: &str) -> Result<String, ConfigurationError> {
    env::var(key).map_err(|_| ConfigurationError::MissingEnv {
        key: key.to_string(),
    })
}

fn optional_prefetch(key: &str) -> Result<Option<u16>, ConfigurationError> {
    match env::var(key) {
        Ok(value) => value
            .parse::<u16>()
            .map(Some)
            .map_err(|e| ConfigurationError::InvalidEnv {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
