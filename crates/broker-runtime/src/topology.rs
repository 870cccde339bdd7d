//! Topology entities declared against a broker.
//!
//! AMQP-style brokers work with exchanges, queues and bindings; subject-style
//! brokers address subjects shared by a queue group. Entities are immutable
//! once declared and live until the connection closes.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque key/value arguments forwarded to the broker on declare/bind
pub type Arguments = HashMap<String, serde_json::Value>;

/// Routing behavior of an AMQP-style exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    /// Wire name of the exchange kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Fanout => "fanout",
            Self::Topic => "topic",
            Self::Headers => "headers",
        }
    }
}

/// AMQP-style routing entity receiving published messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: Arguments,
}

impl Exchange {
    /// Create an exchange declaration with default options
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: false,
            auto_delete: false,
            internal: false,
            no_wait: false,
            arguments: Arguments::new(),
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }
}

/// AMQP-style message buffer consumed by subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub routing_key: String,
    pub consumer_tag: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
    pub arguments: Arguments,
}

impl Queue {
    /// Create a queue declaration with default options
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routing_key: String::new(),
            consumer_tag: String::new(),
            durable: false,
            auto_delete: false,
            exclusive: false,
            no_local: false,
            no_wait: false,
            arguments: Arguments::new(),
        }
    }

    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    pub fn consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = consumer_tag.into();
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Routing rule connecting a source exchange to a destination queue or
/// exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub source: String,
    pub destination: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: Arguments,
}

impl Binding {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            routing_key: routing_key.into(),
            no_wait: false,
            arguments: Arguments::new(),
        }
    }
}

/// Subject-style addressable topic with competing-consumer queue group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub queue_group: String,
}

impl Subject {
    pub fn new(name: impl Into<String>, queue_group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_group: queue_group.into(),
        }
    }
}

/// Heterogeneous topology declaration passed to `configure`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TopologyEntity {
    Exchange(Exchange),
    Queue(Queue),
    Binding(Binding),
    Subject(Subject),
}

impl TopologyEntity {
    /// Name of the entity; for bindings, the destination name
    pub fn name(&self) -> &str {
        match self {
            Self::Exchange(e) => &e.name,
            Self::Queue(q) => &q.name,
            Self::Binding(b) => &b.destination,
            Self::Subject(s) => &s.name,
        }
    }
}

impl From<Exchange> for TopologyEntity {
    fn from(exchange: Exchange) -> Self {
        Self::Exchange(exchange)
    }
}

impl From<Queue> for TopologyEntity {
    fn from(queue: Queue) -> Self {
        Self::Queue(queue)
    }
}

impl From<Binding> for TopologyEntity {
    fn from(binding: Binding) -> Self {
        Self::Binding(binding)
    }
}

impl From<Subject> for TopologyEntity {
    fn from(subject: Subject) -> Self {
        Self::Subject(subject)
    }
}

/// Destination kind a binding resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindDestination {
    Queue,
    Exchange,
}

/// Resolve a binding against the current registries.
///
/// The source must name a previously declared exchange. The destination is
/// looked up in the queue registry first, then the exchange registry; a
/// queue wins when names collide. This ordering is a compatibility
/// guarantee and must not change.
pub(crate) fn resolve_binding<Q>(
    binding: &Binding,
    exchanges: &HashMap<String, Exchange>,
    queues: &HashMap<String, Q>,
) -> Result<BindDestination, ConfigurationError> {
    if !exchanges.contains_key(&binding.source) {
        return Err(ConfigurationError::SourceExchangeNotFound {
            exchange: binding.source.clone(),
        });
    }

    if queues.contains_key(&binding.destination) {
        Ok(BindDestination::Queue)
    } else if exchanges.contains_key(&binding.destination) {
        Ok(BindDestination::Exchange)
    } else {
        Err(ConfigurationError::DestinationNotFound {
            destination: binding.destination.clone(),
        })
    }
}

/// Legacy convenience: when a configure call declares exactly one exchange
/// and one or more queues without any explicit binding, each queue may be
/// auto-bound to that exchange using the queue's own routing key. Returns
/// the participants when the shape matches.
pub(crate) fn single_exchange_auto_bind(
    entities: &[TopologyEntity],
) -> Option<(&Exchange, Vec<&Queue>)> {
    let mut exchanges = entities.iter().filter_map(|e| match e {
        TopologyEntity::Exchange(x) => Some(x),
        _ => None,
    });
    let exchange = exchanges.next()?;
    if exchanges.next().is_some() {
        return None;
    }

    let has_bindings = entities
        .iter()
        .any(|e| matches!(e, TopologyEntity::Binding(_)));
    if has_bindings {
        return None;
    }

    let queues: Vec<&Queue> = entities
        .iter()
        .filter_map(|e| match e {
            TopologyEntity::Queue(q) => Some(q),
            _ => None,
        })
        .collect();
    if queues.is_empty() {
        return None;
    }

    Some((exchange, queues))
}

#[cfg(test)]
#[path = "topology_tests.rs"]
mod tests;
