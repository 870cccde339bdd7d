//! Broker provider implementations.
//!
//! Each provider adapts one transport to the [`BrokerProvider`] contract:
//! RabbitMQ over AMQP, NATS core, and an in-memory broker for tests.
//!
//! [`BrokerProvider`]: crate::client::BrokerProvider

pub mod memory;
pub mod nats;
pub mod rabbitmq;

pub use memory::InMemoryProvider;
pub use nats::NatsProvider;
pub use rabbitmq::RabbitMqProvider;
