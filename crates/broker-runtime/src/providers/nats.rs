//! NATS core broker provider.
//!
//! Subjects are the only topology entity NATS knows; exchanges, queues and
//! bindings are rejected at configure time. Competing consumers share a
//! queue group. Core NATS has no acknowledgement primitive, so a delivery
//! verdict has no transport effect here: processing metrics still count
//! acks and nacks, but the server is done with the message either way.

use crate::client::BrokerProvider;
use crate::consumer::ConsumerRegistration;
use crate::dispatch::process_delivery;
use crate::error::{BrokerError, ConfigurationError};
use crate::message::{DeliveryHeaders, Envelope};
use crate::observe::{metric, Metrics, Telemetry};
use crate::provider::{NatsConfig, ProviderType};
use crate::topology::{Subject, TopologyEntity};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Broker provider backed by a NATS server
pub struct NatsProvider {
    config: NatsConfig,
    metrics: Arc<dyn Metrics>,
    telemetry: Arc<dyn Telemetry>,
    client: Mutex<Option<Client>>,
    subjects: Mutex<HashMap<String, Subject>>,
    shutdown: watch::Sender<bool>,
}

impl NatsProvider {
    pub fn new(
        config: NatsConfig,
        metrics: Arc<dyn Metrics>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            metrics,
            telemetry,
            client: Mutex::new(None),
            subjects: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    async fn connected_client(&self) -> Result<Client, BrokerError> {
        let client = self.client.lock().await;
        client
            .as_ref()
            .cloned()
            .ok_or_else(|| BrokerError::ConnectionFailed {
                message: "not connected".to_string(),
            })
    }
}

#[async_trait]
impl BrokerProvider for NatsProvider {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut client = self.client.lock().await;
        if client.is_some() {
            return Ok(());
        }

        info!(url = %self.config.url, "connecting to NATS");
        let connected = async_nats::connect(&self.config.url).await.map_err(|e| {
            BrokerError::ConnectionFailed {
                message: e.to_string(),
            }
        })?;

        *client = Some(connected);
        self.metrics.set_gauge(
            metric::MANAGER_CONNECTED,
            1.0,
            &[("provider", self.provider_type().as_str())],
        );
        Ok(())
    }

    /// Subjects need no server-side declaration; configure only records
    /// them so consume can validate its registration
    async fn configure(&self, entities: &[TopologyEntity]) -> Result<(), BrokerError> {
        let mut subjects = self.subjects.lock().await;
        for entity in entities {
            match entity {
                TopologyEntity::Subject(subject) => {
                    subjects.insert(subject.name.clone(), subject.clone());
                    self.metrics
                        .set_gauge(metric::QUEUE_CREATED, 1.0, &[("queue", &subject.name)]);
                    debug!(subject = %subject.name, group = %subject.queue_group, "subject registered");
                }
                other => {
                    return Err(BrokerError::ConfigurationError(
                        ConfigurationError::UnsupportedEntity {
                            provider: self.provider_type().as_str().to_string(),
                            entity: other.name().to_string(),
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    async fn publish_envelope(
        &self,
        target: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError> {
        let client = self.connected_client().await.map_err(|_| {
            BrokerError::PublishFailed {
                target: target.to_string(),
                message: "not connected".to_string(),
            }
        })?;

        let subject = effective_subject(target, routing_key);
        let headers = headers_to_header_map(&envelope.headers);

        client
            .publish_with_headers(subject, headers, envelope.body)
            .await
            .map_err(|e| BrokerError::PublishFailed {
                target: target.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn consume(&self, registration: ConsumerRegistration) -> Result<(), BrokerError> {
        let subject_name = registration.queue_name().to_string();
        let subject = {
            let subjects = self.subjects.lock().await;
            subjects.get(&subject_name).cloned().ok_or_else(|| {
                BrokerError::ConfigurationError(ConfigurationError::QueueNotConfigured {
                    queue: subject_name.clone(),
                })
            })?
        };

        let client = self.connected_client().await?;
        let mut subscriber = if subject.queue_group.is_empty() {
            client.subscribe(subject.name.clone()).await
        } else {
            client
                .queue_subscribe(subject.name.clone(), subject.queue_group.clone())
                .await
        }
        .map_err(|e| BrokerError::ConsumeFailed {
            queue: subject_name.clone(),
            message: e.to_string(),
        })?;

        // Make sure the server saw the subscription before we return
        client.flush().await.map_err(|e| BrokerError::ConsumeFailed {
            queue: subject_name.clone(),
            message: e.to_string(),
        })?;

        self.metrics
            .set_gauge(metric::CONSUMER_CONNECTED, 1.0, &[("queue", &subject_name)]);
        info!(subject = %subject_name, group = %subject.queue_group, "subscriber started");

        let mut shutdown = self.shutdown.subscribe();
        let metrics = self.metrics.clone();
        let telemetry = self.telemetry.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.changed() => break,
                    message = subscriber.next() => message,
                };
                let Some(message) = message else { break };

                let registration = registration.clone();
                let metrics = metrics.clone();
                let telemetry = telemetry.clone();
                tokio::spawn(async move {
                    let headers = message
                        .headers
                        .as_ref()
                        .map(header_map_to_headers)
                        .unwrap_or_default();

                    // The verdict is observational only; core NATS cannot
                    // redeliver on failure
                    let _ = process_delivery(
                        &registration,
                        &message.payload,
                        headers,
                        &metrics,
                        &telemetry,
                    )
                    .await;
                });
            }
            debug!(subject = %subject_name, "subscriber loop stopped");
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let _ = self.shutdown.send(true);
        let mut client = self.client.lock().await;
        if let Some(client) = client.take() {
            if let Err(e) = client.drain().await {
                warn!(error = %e, "error draining NATS connection");
            }
        }
        self.metrics.set_gauge(
            metric::MANAGER_CONNECTED,
            0.0,
            &[("provider", self.provider_type().as_str())],
        );
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Nats
    }
}

/// Subject a publish lands on: the routing key extends the target as a
/// subject token when present
fn effective_subject(target: &str, routing_key: &str) -> String {
    if routing_key.is_empty() {
        target.to_string()
    } else {
        format!("{target}.{routing_key}")
    }
}

fn headers_to_header_map(headers: &DeliveryHeaders) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        map.insert(key.as_str(), value.as_str());
    }
    map
}

fn header_map_to_headers(map: &HeaderMap) -> DeliveryHeaders {
    map.iter()
        .map(|(name, values)| {
            let value = values.first().map(|v| v.to_string()).unwrap_or_default();
            (name.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
#[path = "nats_tests.rs"]
mod tests;
