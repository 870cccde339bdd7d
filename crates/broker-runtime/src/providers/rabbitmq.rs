//! RabbitMQ broker provider over AMQP 0.9.1.
//!
//! One connection and one channel per provider. Publishes are serialized
//! through the channel lock; consumption happens on dedicated tasks, one
//! subscription loop per consumed queue and one short-lived task per
//! delivery. The channel prefetch window is the backpressure valve.

use crate::client::BrokerProvider;
use crate::consumer::ConsumerRegistration;
use crate::dispatch::{process_delivery, DeliveryVerdict};
use crate::error::{BrokerError, ConfigurationError};
use crate::message::{DeliveryHeaders, Envelope, CONTENT_TYPE_JSON};
use crate::observe::{metric, Metrics, Telemetry};
use crate::provider::{ProviderType, RabbitMqConfig};
use crate::topology::{
    resolve_binding, single_exchange_auto_bind, Arguments, BindDestination, Binding, Exchange,
    ExchangeKind, Queue, TopologyEntity,
};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeBindOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

struct ChannelState {
    connection: Connection,
    channel: Channel,
}

#[derive(Default)]
struct Registries {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
}

/// Broker provider backed by a RabbitMQ server
pub struct RabbitMqProvider {
    config: RabbitMqConfig,
    auto_bind_single_exchange: bool,
    metrics: Arc<dyn Metrics>,
    telemetry: Arc<dyn Telemetry>,
    state: Mutex<Option<ChannelState>>,
    registries: Mutex<Registries>,
    shutdown: watch::Sender<bool>,
}

impl RabbitMqProvider {
    pub fn new(
        config: RabbitMqConfig,
        auto_bind_single_exchange: bool,
        metrics: Arc<dyn Metrics>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            auto_bind_single_exchange,
            metrics,
            telemetry,
            state: Mutex::new(None),
            registries: Mutex::new(Registries::default()),
            shutdown,
        }
    }

    async fn channel(&self) -> Result<Channel, BrokerError> {
        let state = self.state.lock().await;
        state
            .as_ref()
            .map(|s| s.channel.clone())
            .ok_or_else(|| BrokerError::ConnectionFailed {
                message: "not connected".to_string(),
            })
    }

    async fn declare_exchange(
        &self,
        channel: &Channel,
        exchange: &Exchange,
    ) -> Result<(), BrokerError> {
        channel
            .exchange_declare(
                &exchange.name,
                exchange_kind(exchange.kind),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    internal: exchange.internal,
                    nowait: exchange.no_wait,
                },
                arguments_to_field_table(&exchange.arguments),
            )
            .await
            .map_err(|e| declare_failed(&exchange.name, e))?;

        self.metrics
            .set_gauge(metric::EXCHANGE_CREATED, 1.0, &[("exchange", &exchange.name)]);
        debug!(exchange = %exchange.name, kind = exchange.kind.as_str(), "exchange declared");
        Ok(())
    }

    async fn declare_queue(&self, channel: &Channel, queue: &Queue) -> Result<(), BrokerError> {
        channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    nowait: queue.no_wait,
                },
                arguments_to_field_table(&queue.arguments),
            )
            .await
            .map_err(|e| declare_failed(&queue.name, e))?;

        self.metrics
            .set_gauge(metric::QUEUE_CREATED, 1.0, &[("queue", &queue.name)]);
        debug!(queue = %queue.name, "queue declared");
        Ok(())
    }

    async fn bind(&self, channel: &Channel, binding: &Binding) -> Result<(), BrokerError> {
        let destination = {
            let registries = self.registries.lock().await;
            resolve_binding(binding, &registries.exchanges, &registries.queues)
                .map_err(BrokerError::ConfigurationError)?
        };

        match destination {
            BindDestination::Queue => channel
                .queue_bind(
                    &binding.destination,
                    &binding.source,
                    &binding.routing_key,
                    QueueBindOptions {
                        nowait: binding.no_wait,
                    },
                    arguments_to_field_table(&binding.arguments),
                )
                .await
                .map_err(|e| declare_failed(&binding.destination, e))?,
            BindDestination::Exchange => channel
                .exchange_bind(
                    &binding.destination,
                    &binding.source,
                    &binding.routing_key,
                    ExchangeBindOptions {
                        nowait: binding.no_wait,
                    },
                    arguments_to_field_table(&binding.arguments),
                )
                .await
                .map_err(|e| declare_failed(&binding.destination, e))?,
        }

        self.metrics
            .set_gauge(metric::QUEUE_BOUND, 1.0, &[("queue", &binding.destination)]);
        debug!(
            source = %binding.source,
            destination = %binding.destination,
            routing_key = %binding.routing_key,
            "binding declared"
        );
        Ok(())
    }
}

#[async_trait]
impl BrokerProvider for RabbitMqProvider {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let uri = self.config.amqp_uri();
        info!(host = %self.config.host, vhost = %self.config.vhost, "connecting to RabbitMQ");
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                message: e.to_string(),
            })?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                message: e.to_string(),
            })?;

        if let Some(prefetch) = self.config.prefetch_count {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| BrokerError::ConnectionFailed {
                    message: e.to_string(),
                })?;
        }

        *state = Some(ChannelState {
            connection,
            channel,
        });
        self.metrics.set_gauge(
            metric::MANAGER_CONNECTED,
            1.0,
            &[("provider", self.provider_type().as_str())],
        );
        Ok(())
    }

    async fn configure(&self, entities: &[TopologyEntity]) -> Result<(), BrokerError> {
        let channel = self.channel().await?;

        for entity in entities {
            match entity {
                TopologyEntity::Exchange(exchange) => {
                    self.declare_exchange(&channel, exchange).await?;
                    self.registries
                        .lock()
                        .await
                        .exchanges
                        .insert(exchange.name.clone(), exchange.clone());
                }
                TopologyEntity::Queue(queue) => {
                    self.declare_queue(&channel, queue).await?;
                    self.registries
                        .lock()
                        .await
                        .queues
                        .insert(queue.name.clone(), queue.clone());
                }
                TopologyEntity::Binding(binding) => {
                    self.bind(&channel, binding).await?;
                }
                TopologyEntity::Subject(subject) => {
                    return Err(BrokerError::ConfigurationError(
                        ConfigurationError::UnsupportedEntity {
                            provider: self.provider_type().as_str().to_string(),
                            entity: subject.name.clone(),
                        },
                    ));
                }
            }
        }

        if self.auto_bind_single_exchange {
            if let Some((exchange, queues)) = single_exchange_auto_bind(entities) {
                for queue in queues {
                    let binding =
                        Binding::new(&exchange.name, &queue.name, &queue.routing_key);
                    self.bind(&channel, &binding).await?;
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
        // Held across the publish so writes on the channel never interleave
        let state = self.state.lock().await;
        let channel = state
            .as_ref()
            .map(|s| &s.channel)
            .ok_or_else(|| BrokerError::PublishFailed {
                target: target.to_string(),
                message: "not connected".to_string(),
            })?;

        let properties = BasicProperties::default()
            .with_content_type(CONTENT_TYPE_JSON.into())
            .with_headers(headers_to_field_table(&envelope.headers))
            .with_timestamp(chrono::Utc::now().timestamp() as u64);

        channel
            .basic_publish(
                target,
                routing_key,
                BasicPublishOptions::default(),
                &envelope.body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::PublishFailed {
                target: target.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn consume(&self, registration: ConsumerRegistration) -> Result<(), BrokerError> {
        let queue_name = registration.queue_name().to_string();
        let queue = {
            let registries = self.registries.lock().await;
            registries.queues.get(&queue_name).cloned().ok_or_else(|| {
                BrokerError::ConfigurationError(ConfigurationError::QueueNotConfigured {
                    queue: queue_name.clone(),
                })
            })?
        };

        let channel = self.channel().await?;
        let mut consumer = channel
            .basic_consume(
                &queue.name,
                &queue.consumer_tag,
                BasicConsumeOptions {
                    no_local: queue.no_local,
                    no_ack: false,
                    exclusive: queue.exclusive,
                    nowait: queue.no_wait,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConsumeFailed {
                queue: queue_name.clone(),
                message: e.to_string(),
            })?;

        self.metrics
            .set_gauge(metric::CONSUMER_CONNECTED, 1.0, &[("queue", &queue_name)]);
        info!(queue = %queue_name, "consumer started");

        let mut shutdown = self.shutdown.subscribe();
        let metrics = self.metrics.clone();
        let telemetry = self.telemetry.clone();

        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = shutdown.changed() => break,
                    delivery = consumer.next() => delivery,
                };
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!(queue = %queue_name, error = %e, "delivery stream error");
                        continue;
                    }
                    None => break,
                };

                let registration = registration.clone();
                let metrics = metrics.clone();
                let telemetry = telemetry.clone();
                let queue_name = queue_name.clone();
                tokio::spawn(async move {
                    let headers = delivery
                        .properties
                        .headers()
                        .as_ref()
                        .map(field_table_to_headers)
                        .unwrap_or_default();

                    let verdict = process_delivery(
                        &registration,
                        &delivery.data,
                        headers,
                        &metrics,
                        &telemetry,
                    )
                    .await;

                    let outcome = match verdict {
                        DeliveryVerdict::Ack => delivery.ack(BasicAckOptions::default()).await,
                        DeliveryVerdict::Reject => {
                            delivery
                                .nack(BasicNackOptions {
                                    requeue: false,
                                    ..BasicNackOptions::default()
                                })
                                .await
                        }
                    };
                    if let Err(e) = outcome {
                        error!(queue = %queue_name, error = %e, "failed to settle delivery");
                    }
                });
            }
            debug!("consumer loop stopped");
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let _ = self.shutdown.send(true);
        let mut state = self.state.lock().await;
        if let Some(state) = state.take() {
            if let Err(e) = state.connection.close(200, "shutdown").await {
                warn!(error = %e, "error closing RabbitMQ connection");
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
        ProviderType::RabbitMq
    }
}

fn declare_failed(entity: &str, error: lapin::Error) -> BrokerError {
    BrokerError::ConfigurationError(ConfigurationError::DeclareFailed {
        entity: entity.to_string(),
        message: error.to_string(),
    })
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

fn headers_to_field_table(headers: &DeliveryHeaders) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(key.as_str().into(), AMQPValue::LongString(value.as_str().into()));
    }
    table
}

fn field_table_to_headers(table: &FieldTable) -> DeliveryHeaders {
    table
        .inner()
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                AMQPValue::Boolean(b) => b.to_string(),
                AMQPValue::ShortShortInt(i) => i.to_string(),
                AMQPValue::ShortShortUInt(i) => i.to_string(),
                AMQPValue::ShortInt(i) => i.to_string(),
                AMQPValue::ShortUInt(i) => i.to_string(),
                AMQPValue::LongInt(i) => i.to_string(),
                AMQPValue::LongUInt(i) => i.to_string(),
                AMQPValue::LongLongInt(i) => i.to_string(),
                AMQPValue::Float(f) => f.to_string(),
                AMQPValue::Double(d) => d.to_string(),
                AMQPValue::Timestamp(t) => t.to_string(),
                other => format!("{other:?}"),
            };
            (key.to_string(), value)
        })
        .collect()
}

fn arguments_to_field_table(arguments: &Arguments) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(key.as_str().into(), json_to_amqp_value(value));
    }
    table
}

fn json_to_amqp_value(value: &serde_json::Value) -> AMQPValue {
    match value {
        serde_json::Value::Null => AMQPValue::Void,
        serde_json::Value::Bool(b) => AMQPValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AMQPValue::LongLongInt(i)
            } else {
                AMQPValue::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => AMQPValue::LongString(s.as_str().into()),
        // Nested structures travel as their JSON text
        other => AMQPValue::LongString(other.to_string().into()),
    }
}

#[cfg(test)]
#[path = "rabbitmq_tests.rs"]
mod tests;
