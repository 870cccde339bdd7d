//! Provider facade and the broker client used by callers.
//!
//! Callers depend only on [`BrokerClient`]; broker-specific topology types
//! travel through `configure` as opaque [`TopologyEntity`] payloads. The
//! provider variant is selected once, at construction time.

use crate::consumer::ConsumerRegistration;
use crate::error::BrokerError;
use crate::message::Envelope;
use crate::observe::{metric, Metrics, Telemetry};
use crate::provider::{BrokerConfig, ProviderConfig, ProviderType};
use crate::providers::{InMemoryProvider, NatsProvider, RabbitMqProvider};
use crate::topology::TopologyEntity;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Interface implemented once per broker kind
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    /// Establish the transport connection. Idempotent: an open connection
    /// is reused, never recreated. Failure is fatal to the caller; there
    /// is no retry inside the provider.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Apply a list of topology declarations. A failure aborts the call;
    /// entities declared before the failure stay declared (no rollback).
    async fn configure(&self, entities: &[TopologyEntity]) -> Result<(), BrokerError>;

    /// Hand a prepared envelope to the transport, fire-and-forget
    async fn publish_envelope(
        &self,
        target: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError>;

    /// Subscribe the registration's queue/subject and start the dispatch
    /// loop. The loop runs on its own task until disconnect.
    async fn consume(&self, registration: ConsumerRegistration) -> Result<(), BrokerError>;

    /// Stop subscription loops and close the transport
    async fn disconnect(&self) -> Result<(), BrokerError>;

    fn provider_type(&self) -> ProviderType;
}

/// Broker client delegating to the configured provider
pub struct BrokerClient {
    provider: Box<dyn BrokerProvider>,
    metrics: Arc<dyn Metrics>,
    telemetry: Arc<dyn Telemetry>,
}

impl BrokerClient {
    pub fn new(
        provider: Box<dyn BrokerProvider>,
        metrics: Arc<dyn Metrics>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            provider,
            metrics,
            telemetry,
        }
    }

    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.provider.connect().await
    }

    pub async fn configure(&self, entities: &[TopologyEntity]) -> Result<(), BrokerError> {
        self.provider.configure(entities).await
    }

    /// Serialize `body`, attach correlation metadata and send it to
    /// `target`. The ambient correlation identifier of the calling task is
    /// used when present; otherwise a fresh one is generated for this
    /// publish only. Serialization and transport errors return to the
    /// caller; nothing is retried or buffered.
    pub async fn publish<T: Serialize>(
        &self,
        target: &str,
        routing_key: &str,
        body: &T,
    ) -> Result<(), BrokerError> {
        let envelope = Envelope::from_value(body)?;
        let body_text = String::from_utf8_lossy(&envelope.body).into_owned();

        let span = self.telemetry.child_span(
            "publish message",
            &[
                ("target", target),
                ("routing_key", routing_key),
                ("correlation_id", envelope.correlation_id.as_str()),
                ("body", body_text.as_str()),
            ],
        );

        self.metrics.increment_counter(
            metric::MESSAGES_PUBLISH,
            &[("queue", target), ("routing_key", routing_key)],
        );

        let result = self
            .provider
            .publish_envelope(target, routing_key, envelope)
            .await;

        match &result {
            Ok(()) => self.telemetry.end_span(span, None),
            Err(err) => self.telemetry.end_span(span, Some(err)),
        }

        result
    }

    pub async fn consume(&self, registration: ConsumerRegistration) -> Result<(), BrokerError> {
        self.provider.consume(registration).await
    }

    /// Configure the registration's queue/subject, then start consuming.
    /// When configure fails, consume is not attempted.
    pub async fn add_consumer(
        &self,
        registration: ConsumerRegistration,
    ) -> Result<(), BrokerError> {
        self.provider
            .configure(std::slice::from_ref(registration.topology()))
            .await?;
        self.provider.consume(registration).await
    }

    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.provider.disconnect().await
    }

    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}

/// Factory for creating broker clients with the configured provider
pub struct BrokerClientFactory;

impl BrokerClientFactory {
    /// Create a connected client from configuration. The connection-up
    /// gauge is owned by the providers; a dial failure surfaces here and
    /// is fatal to startup.
    pub async fn create_client(
        config: BrokerConfig,
        metrics: Arc<dyn Metrics>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<BrokerClient, BrokerError> {
        info!(
            provider = config.provider.provider_type().as_str(),
            "creating broker provider"
        );

        let provider: Box<dyn BrokerProvider> = match &config.provider {
            ProviderConfig::RabbitMq(rabbitmq_config) => Box::new(RabbitMqProvider::new(
                rabbitmq_config.clone(),
                config.auto_bind_single_exchange,
                metrics.clone(),
                telemetry.clone(),
            )),
            ProviderConfig::Nats(nats_config) => Box::new(NatsProvider::new(
                nats_config.clone(),
                metrics.clone(),
                telemetry.clone(),
            )),
            ProviderConfig::InMemory(memory_config) => Box::new(InMemoryProvider::new(
                memory_config.clone(),
                config.auto_bind_single_exchange,
                metrics.clone(),
                telemetry.clone(),
            )),
        };

        provider.connect().await?;

        Ok(BrokerClient::new(provider, metrics, telemetry))
    }

    /// Create a client backed by the in-memory provider, for tests
    pub fn create_test_client(
        metrics: Arc<dyn Metrics>,
        telemetry: Arc<dyn Telemetry>,
    ) -> BrokerClient {
        let provider = InMemoryProvider::new(
            crate::provider::InMemoryConfig::default(),
            false,
            metrics.clone(),
            telemetry.clone(),
        );
        BrokerClient::new(Box::new(provider), metrics, telemetry)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
