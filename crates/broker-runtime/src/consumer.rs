//! Typed consumer registrations and handler invocation.
//!
//! A registration binds a queue or subject to a handler for one payload
//! type. The payload type is erased here, at registration time: the
//! dispatcher deserializes each body straight into `T` and calls the
//! handler, with no runtime type lookup. The handler instance is built once
//! and reused for every delivery on the queue.

use crate::message::DeliveryHeaders;
use crate::topology::TopologyEntity;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a message handler
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Failure of a single delivery's processing. Terminates only that
/// delivery; the subscription loop keeps consuming.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to deserialize message: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
}

/// Typed message handler invoked once per delivery
pub trait Handler<T>: Send + Sync + 'static {
    fn handle(&self, payload: T, headers: &DeliveryHeaders) -> Result<(), HandlerError>;
}

impl<T, F> Handler<T> for F
where
    F: Fn(T, &DeliveryHeaders) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, payload: T, headers: &DeliveryHeaders) -> Result<(), HandlerError> {
        self(payload, headers)
    }
}

type ErasedHandler =
    dyn Fn(&[u8], &DeliveryHeaders) -> Result<(), DispatchError> + Send + Sync;

/// Binds a queue or subject to a typed handler
#[derive(Clone)]
pub struct ConsumerRegistration {
    queue: TopologyEntity,
    queue_name: String,
    handler: Arc<ErasedHandler>,
}

impl ConsumerRegistration {
    /// Register `handler` for deliveries on `queue`, deserializing bodies
    /// into `T`
    pub fn new<T, H>(queue: impl Into<TopologyEntity>, handler: H) -> Self
    where
        T: DeserializeOwned,
        H: Handler<T>,
    {
        let queue = queue.into();
        let queue_name = queue.name().to_string();
        let handler = Arc::new(handler);

        let erased: Arc<ErasedHandler> =
            Arc::new(move |body: &[u8], headers: &DeliveryHeaders| {
                let payload: T = serde_json::from_slice(body)?;
                handler.handle(payload, headers)?;
                Ok(())
            });

        Self {
            queue,
            queue_name,
            handler: erased,
        }
    }

    /// Name of the queue or subject this registration consumes
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Topology entity to declare before consuming
    pub fn topology(&self) -> &TopologyEntity {
        &self.queue
    }

    /// Deserialize and handle one delivery
    pub(crate) fn invoke(
        &self,
        body: &[u8],
        headers: &DeliveryHeaders,
    ) -> Result<(), DispatchError> {
        (self.handler)(body, headers)
    }
}

impl fmt::Debug for ConsumerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRegistration")
            .field("queue", &self.queue_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
