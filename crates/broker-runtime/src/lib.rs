//! # Broker Runtime
//!
//! Broker-agnostic messaging runtime with support for RabbitMQ, NATS, and
//! an in-memory implementation.
//!
//! This library provides:
//! - Provider-agnostic publish and consume operations
//! - Declarative topology: exchanges, queues, bindings, and subjects
//! - Typed handlers registered per queue, with JSON deserialization
//! - Correlation identifier propagation from publisher to handler
//! - Ack/nack settlement driven by handler outcome, with prefetch
//!   backpressure
//!
//! ## Module Organization
//!
//! - [client] - Client facade, provider trait, and factory
//! - [consumer] - Typed handler registration
//! - [correlation] - Task-scoped correlation identifiers
//! - [dispatch] - Per-delivery processing pipeline
//! - [error] - Error types for all broker operations
//! - [message] - Envelope and delivery headers
//! - [observe] - Metrics and telemetry collaborators
//! - [provider] - Provider types and configuration
//! - [providers] - RabbitMQ, NATS, and in-memory providers
//! - [topology] - Topology entities and binding resolution

// Module declarations
pub mod client;
pub mod consumer;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod observe;
pub mod provider;
pub mod providers;
pub mod topology;

// Re-export commonly used types at crate root for convenience
pub use client::{BrokerClient, BrokerClientFactory, BrokerProvider};
pub use consumer::{ConsumerRegistration, DispatchError, Handler, HandlerError};
pub use correlation::{CorrelationId, CORRELATION_ID_HEADER};
pub use dispatch::DeliveryVerdict;
pub use error::{BrokerError, ConfigurationError, SerializationError, ValidationError};
pub use message::{correlation_from_headers, DeliveryHeaders, Envelope, CONTENT_TYPE_JSON};
pub use observe::{
    Metrics, NoopMetrics, NoopTelemetry, RecordingMetrics, RuntimeMetrics, Telemetry,
    TelemetrySpan, TracingTelemetry,
};
pub use provider::{
    BrokerConfig, InMemoryConfig, NatsConfig, ProviderConfig, ProviderType, RabbitMqConfig,
    QUEUE_PROVIDER_ENV,
};
pub use providers::{InMemoryProvider, NatsProvider, RabbitMqProvider};
pub use topology::{
    Arguments, Binding, Exchange, ExchangeKind, Queue, Subject, TopologyEntity,
};
