//! Tests for the broker client facade.

use super::*;
use crate::consumer::ConsumerRegistration;
use crate::message::DeliveryHeaders;
use crate::observe::{NoopMetrics, NoopTelemetry, RecordingMetrics};
use crate::topology::{Exchange, ExchangeKind, Queue};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Serialize, serde::Deserialize)]
struct Ping {
    seq: u32,
}

/// Provider double recording which operations were invoked
#[derive(Default)]
struct RecordingProvider {
    calls: Mutex<Vec<String>>,
    fail_configure: bool,
}

impl RecordingProvider {
    fn failing_configure() -> Self {
        Self {
            fail_configure: true,
            ..Self::default()
        }
    }

    fn record(&self, call: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl BrokerProvider for RecordingProvider {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.record("connect");
        Ok(())
    }

    async fn configure(&self, _entities: &[TopologyEntity]) -> Result<(), BrokerError> {
        self.record("configure");
        if self.fail_configure {
            return Err(BrokerError::ConfigurationError(
                crate::error::ConfigurationError::DeclareFailed {
                    entity: "orders".to_string(),
                    message: "declaration refused".to_string(),
                },
            ));
        }
        Ok(())
    }

    async fn publish_envelope(
        &self,
        target: &str,
        _routing_key: &str,
        _envelope: Envelope,
    ) -> Result<(), BrokerError> {
        self.record(&format!("publish:{target}"));
        Ok(())
    }

    async fn consume(&self, _registration: ConsumerRegistration) -> Result<(), BrokerError> {
        self.record("consume");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        self.record("disconnect");
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

fn client_with(
    provider: RecordingProvider,
) -> (Arc<RecordingProvider>, Arc<RecordingMetrics>, BrokerClient) {
    let provider = Arc::new(provider);
    let recording = Arc::new(RecordingMetrics::new());
    let metrics: Arc<dyn Metrics> = recording.clone();
    let telemetry: Arc<dyn Telemetry> = Arc::new(NoopTelemetry);

    struct Shared(Arc<RecordingProvider>);

    #[async_trait]
    impl BrokerProvider for Shared {
        async fn connect(&self) -> Result<(), BrokerError> {
            self.0.connect().await
        }
        async fn configure(&self, entities: &[TopologyEntity]) -> Result<(), BrokerError> {
            self.0.configure(entities).await
        }
        async fn publish_envelope(
            &self,
            target: &str,
            routing_key: &str,
            envelope: Envelope,
        ) -> Result<(), BrokerError> {
            self.0.publish_envelope(target, routing_key, envelope).await
        }
        async fn consume(&self, registration: ConsumerRegistration) -> Result<(), BrokerError> {
            self.0.consume(registration).await
        }
        async fn disconnect(&self) -> Result<(), BrokerError> {
            self.0.disconnect().await
        }
        fn provider_type(&self) -> ProviderType {
            self.0.provider_type()
        }
    }

    let client = BrokerClient::new(Box::new(Shared(provider.clone())), metrics, telemetry);
    (provider, recording, client)
}

#[tokio::test]
async fn publish_counts_and_delegates_to_the_provider() {
    let (provider, recording, client) = client_with(RecordingProvider::default());

    client
        .publish("orders", "created.eu", &Ping { seq: 7 })
        .await
        .unwrap();

    assert_eq!(provider.calls(), vec!["publish:orders"]);
    assert_eq!(
        recording.counter_value(
            metric::MESSAGES_PUBLISH,
            &[("queue", "orders"), ("routing_key", "created.eu")],
        ),
        1
    );
}

#[tokio::test]
async fn add_consumer_configures_before_consuming() {
    let (provider, _, client) = client_with(RecordingProvider::default());
    let registration = ConsumerRegistration::new(
        Queue::new("orders.created.consumer"),
        |_payload: Ping, _headers: &DeliveryHeaders| Ok(()),
    );

    client.add_consumer(registration).await.unwrap();

    assert_eq!(provider.calls(), vec!["configure", "consume"]);
}

#[tokio::test]
async fn add_consumer_skips_consume_when_configure_fails() {
    let (provider, _, client) = client_with(RecordingProvider::failing_configure());
    let registration = ConsumerRegistration::new(
        Queue::new("orders.created.consumer"),
        |_payload: Ping, _headers: &DeliveryHeaders| Ok(()),
    );

    let err = client.add_consumer(registration).await.unwrap_err();

    assert!(matches!(err, BrokerError::ConfigurationError(_)));
    assert_eq!(provider.calls(), vec!["configure"]);
}

#[tokio::test]
async fn test_client_publishes_over_the_in_memory_provider() {
    let client = BrokerClientFactory::create_test_client(
        Arc::new(NoopMetrics),
        Arc::new(NoopTelemetry),
    );
    client.connect().await.unwrap();
    client
        .configure(&[
            Exchange::new("orders", ExchangeKind::Direct).into(),
            Queue::new("orders.created.consumer").into(),
            crate::topology::Binding::new("orders", "orders.created.consumer", "created").into(),
        ])
        .await
        .unwrap();

    client
        .publish("orders", "created", &Ping { seq: 1 })
        .await
        .unwrap();

    assert_eq!(client.provider_type(), ProviderType::InMemory);
    client.disconnect().await.unwrap();
}
