//! Error types for broker operations.

use thiserror::Error;

/// Comprehensive error type for all broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Publish to '{target}' failed: {message}")]
    PublishFailed { target: String, message: String },

    #[error("Consume on '{queue}' failed: {message}")]
    ConsumeFailed { queue: String, message: String },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl BrokerError {
    /// Check whether the error is fatal to process startup.
    ///
    /// Connection and configuration failures surface before any message
    /// flows; callers are expected to halt on them. Publish and consume
    /// failures are scoped to the operation that triggered them.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConfigurationError(_)
                | Self::ValidationError(_)
        )
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Configuration errors: bad provider selection, missing environment,
/// failed declares and unresolved bindings
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("queue provider '{provider}' not found")]
    UnknownProvider { provider: String },

    #[error("missing required environment variable '{key}'")]
    MissingEnv { key: String },

    #[error("invalid value for environment variable '{key}': {message}")]
    InvalidEnv { key: String, message: String },

    #[error("failed to declare '{entity}': {message}")]
    DeclareFailed { entity: String, message: String },

    #[error("binding failed: source exchange '{exchange}' not found")]
    SourceExchangeNotFound { exchange: String },

    #[error("binding failed: destination '{destination}' not found")]
    DestinationNotFound { destination: String },

    #[error("queue '{queue}' not found in configuration")]
    QueueNotConfigured { queue: String },

    #[error("topology entity '{entity}' is not supported by the {provider} provider")]
    UnsupportedEntity { provider: String, entity: String },
}

/// Validation errors for identifiers and names
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
