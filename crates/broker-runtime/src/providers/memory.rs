//! In-memory broker provider.
//!
//! Implements the full topology model against process-local channels: real
//! exchange routing (direct, topic wildcards, fanout), bindings resolved
//! with the same rules as the AMQP provider, and a per-consumer prefetch
//! bound. Messages never leave the process, which makes this the provider
//! behind `BrokerClientFactory::create_test_client`.
//!
//! Each queue or subject buffer feeds exactly one consumer; a second
//! consume call on the same name is refused. Competing consumers sharing a
//! queue group are a transport behavior, observable only against a real
//! broker.

use crate::client::BrokerProvider;
use crate::consumer::ConsumerRegistration;
use crate::dispatch::process_delivery;
use crate::error::{BrokerError, ConfigurationError};
use crate::message::{DeliveryHeaders, Envelope};
use crate::observe::{metric, Metrics, Telemetry};
use crate::provider::{InMemoryConfig, ProviderType};
use crate::topology::{
    resolve_binding, single_exchange_auto_bind, BindDestination, Exchange, ExchangeKind,
    TopologyEntity,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, warn};

/// One message in flight inside the process
#[derive(Debug, Clone)]
struct Delivery {
    body: Bytes,
    headers: DeliveryHeaders,
}

/// Buffer backing a declared queue or subject
struct QueueState {
    sender: mpsc::UnboundedSender<Delivery>,
    /// Taken by the first consume call; a queue supports one consumer
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

/// Binding resolved against the registries at declare time
struct Route {
    source: String,
    destination: String,
    routing_key: String,
    kind: BindDestination,
}

#[derive(Default)]
struct BrokerState {
    connected: bool,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, QueueState>,
    routes: Vec<Route>,
}

/// Broker provider keeping all state in process memory
pub struct InMemoryProvider {
    config: InMemoryConfig,
    auto_bind_single_exchange: bool,
    metrics: Arc<dyn Metrics>,
    telemetry: Arc<dyn Telemetry>,
    state: Mutex<BrokerState>,
    shutdown: watch::Sender<bool>,
}

impl InMemoryProvider {
    pub fn new(
        config: InMemoryConfig,
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
            state: Mutex::new(BrokerState::default()),
            shutdown,
        }
    }

    /// Redeclaring a binding must not double deliveries
    fn insert_route(state: &mut BrokerState, route: Route) {
        let exists = state.routes.iter().any(|r| {
            r.source == route.source
                && r.destination == route.destination
                && r.routing_key == route.routing_key
        });
        if !exists {
            state.routes.push(route);
        }
    }

    /// Redeclaring an existing queue keeps its buffer, so an attached
    /// consumer survives repeated configure calls
    fn insert_queue(state: &mut BrokerState, name: &str) {
        if state.queues.contains_key(name) {
            return;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.queues.insert(
            name.to_string(),
            QueueState {
                sender,
                receiver: Some(receiver),
            },
        );
    }

    /// Collect the queues a message published to `exchange` with
    /// `routing_key` should land in, following exchange-to-exchange
    /// bindings transitively
    fn matching_queues<'a>(
        state: &'a BrokerState,
        exchange: &str,
        routing_key: &str,
        visited: &mut HashSet<String>,
        matched: &mut Vec<&'a mpsc::UnboundedSender<Delivery>>,
    ) {
        if !visited.insert(exchange.to_string()) {
            return;
        }
        let Some(declared) = state.exchanges.get(exchange) else {
            return;
        };

        for route in state.routes.iter().filter(|r| r.source == exchange) {
            let applies = match declared.kind {
                ExchangeKind::Direct => route.routing_key == routing_key,
                ExchangeKind::Topic => topic_matches(&route.routing_key, routing_key),
                // Header matching is not modeled; a headers exchange
                // delivers to every binding, like fanout
                ExchangeKind::Fanout | ExchangeKind::Headers => true,
            };
            if !applies {
                continue;
            }

            match route.kind {
                BindDestination::Queue => {
                    if let Some(queue) = state.queues.get(&route.destination) {
                        matched.push(&queue.sender);
                    }
                }
                BindDestination::Exchange => {
                    Self::matching_queues(state, &route.destination, routing_key, visited, matched);
                }
            }
        }
    }
}

#[async_trait]
impl BrokerProvider for InMemoryProvider {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.connected = true;
        self.metrics.set_gauge(
            metric::MANAGER_CONNECTED,
            1.0,
            &[("provider", self.provider_type().as_str())],
        );
        Ok(())
    }

    async fn configure(&self, entities: &[TopologyEntity]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;

        for entity in entities {
            match entity {
                TopologyEntity::Exchange(exchange) => {
                    state
                        .exchanges
                        .insert(exchange.name.clone(), exchange.clone());
                    self.metrics.set_gauge(
                        metric::EXCHANGE_CREATED,
                        1.0,
                        &[("exchange", &exchange.name)],
                    );
                }
                TopologyEntity::Queue(queue) => {
                    Self::insert_queue(&mut state, &queue.name);
                    self.metrics
                        .set_gauge(metric::QUEUE_CREATED, 1.0, &[("queue", &queue.name)]);
                }
                TopologyEntity::Subject(subject) => {
                    Self::insert_queue(&mut state, &subject.name);
                    self.metrics
                        .set_gauge(metric::QUEUE_CREATED, 1.0, &[("queue", &subject.name)]);
                }
                TopologyEntity::Binding(binding) => {
                    let kind = resolve_binding(binding, &state.exchanges, &state.queues)
                        .map_err(BrokerError::ConfigurationError)?;
                    Self::insert_route(
                        &mut state,
                        Route {
                            source: binding.source.clone(),
                            destination: binding.destination.clone(),
                            routing_key: binding.routing_key.clone(),
                            kind,
                        },
                    );
                    self.metrics.set_gauge(
                        metric::QUEUE_BOUND,
                        1.0,
                        &[("queue", &binding.destination)],
                    );
                }
            }
        }

        if self.auto_bind_single_exchange {
            if let Some((exchange, queues)) = single_exchange_auto_bind(entities) {
                for queue in queues {
                    debug!(
                        exchange = %exchange.name,
                        queue = %queue.name,
                        routing_key = %queue.routing_key,
                        "auto-binding queue to lone exchange"
                    );
                    Self::insert_route(
                        &mut state,
                        Route {
                            source: exchange.name.clone(),
                            destination: queue.name.clone(),
                            routing_key: queue.routing_key.clone(),
                            kind: BindDestination::Queue,
                        },
                    );
                    self.metrics
                        .set_gauge(metric::QUEUE_BOUND, 1.0, &[("queue", &queue.name)]);
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
        let state = self.state.lock().await;
        if !state.connected {
            return Err(BrokerError::PublishFailed {
                target: target.to_string(),
                message: "not connected".to_string(),
            });
        }

        let delivery = Delivery {
            body: envelope.body,
            headers: envelope.headers,
        };

        let mut matched = Vec::new();
        let mut visited = HashSet::new();
        if state.exchanges.contains_key(target) {
            Self::matching_queues(&state, target, routing_key, &mut visited, &mut matched);
        } else if let Some(queue) = state.queues.get(target) {
            // Subject-style publish straight to the named buffer
            matched.push(&queue.sender);
        } else if target.is_empty() {
            // Default exchange: the routing key names the queue
            if let Some(queue) = state.queues.get(routing_key) {
                matched.push(&queue.sender);
            }
        } else {
            return Err(BrokerError::PublishFailed {
                target: target.to_string(),
                message: "exchange not found".to_string(),
            });
        }

        if matched.is_empty() {
            // Fire and forget: an unroutable message is dropped
            warn!(target = %target, routing_key = %routing_key, "message matched no queue");
        }
        for sender in matched {
            // Receiver dropped means the consumer is gone; drop the copy
            let _ = sender.send(delivery.clone());
        }

        Ok(())
    }

    async fn consume(&self, registration: ConsumerRegistration) -> Result<(), BrokerError> {
        let queue_name = registration.queue_name().to_string();
        let mut receiver = {
            let mut state = self.state.lock().await;
            let queue = state.queues.get_mut(&queue_name).ok_or_else(|| {
                BrokerError::ConfigurationError(ConfigurationError::QueueNotConfigured {
                    queue: queue_name.clone(),
                })
            })?;
            queue.receiver.take().ok_or_else(|| BrokerError::ConsumeFailed {
                queue: queue_name.clone(),
                message: "queue already has a consumer".to_string(),
            })?
        };

        self.metrics
            .set_gauge(metric::CONSUMER_CONNECTED, 1.0, &[("queue", &queue_name)]);

        let semaphore = self
            .config
            .prefetch_count
            .map(|count| Arc::new(Semaphore::new(count)));
        let mut shutdown = self.shutdown.subscribe();
        let metrics = self.metrics.clone();
        let telemetry = self.telemetry.clone();

        tokio::spawn(async move {
            loop {
                let permit = match &semaphore {
                    Some(semaphore) => {
                        let acquired = tokio::select! {
                            _ = shutdown.changed() => break,
                            acquired = semaphore.clone().acquire_owned() => acquired,
                        };
                        match acquired {
                            Ok(permit) => Some(permit),
                            Err(_) => break,
                        }
                    }
                    None => None,
                };

                let delivery = tokio::select! {
                    _ = shutdown.changed() => break,
                    delivery = receiver.recv() => delivery,
                };
                let Some(delivery) = delivery else { break };

                let registration = registration.clone();
                let metrics = metrics.clone();
                let telemetry = telemetry.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    // No redelivery in memory: the verdict is final either way
                    let _ = process_delivery(
                        &registration,
                        &delivery.body,
                        delivery.headers,
                        &metrics,
                        &telemetry,
                    )
                    .await;
                });
            }
            debug!(queue = %queue_name, "consumer loop stopped");
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.connected = false;
        let _ = self.shutdown.send(true);
        self.metrics.set_gauge(
            metric::MANAGER_CONNECTED,
            0.0,
            &[("provider", self.provider_type().as_str())],
        );
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

/// AMQP topic match: `*` matches exactly one dot-separated segment, `#`
/// matches zero or more
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn segments_match(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                segments_match(&pattern[1..], key)
                    || (!key.is_empty() && segments_match(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => segments_match(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => segments_match(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    segments_match(&pattern, &key)
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
