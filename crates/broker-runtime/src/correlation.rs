//! Correlation identifiers scoped to a single processing task.
//!
//! Every published message carries an `x-correlation-id` header; every
//! delivery-processing task binds that identifier at entry so all nested
//! calls (including publishes made from inside a handler) observe the same
//! value. The value lives in tokio task-local storage: it is visible to one
//! task and everything it calls, and never to sibling tasks.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// Header key carrying the correlation identifier on every message.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

tokio::task_local! {
    static CURRENT_CORRELATION: CorrelationId;
}

/// Identifier threaded through a message's entire processing path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new random correlation identifier
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Run `fut` with this identifier bound as the ambient value for the
    /// current task. Everything `fut` calls observes it via [`current`];
    /// sibling tasks never do.
    ///
    /// ```
    /// # use broker_runtime::correlation::CorrelationId;
    /// # tokio_test::block_on(async {
    /// let id: CorrelationId = "req-7".parse().unwrap();
    /// id.clone()
    ///     .scope(async move {
    ///         assert_eq!(CorrelationId::current(), Some(id));
    ///     })
    ///     .await;
    /// # });
    /// ```
    ///
    /// [`current`]: CorrelationId::current
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CORRELATION.scope(self, fut).await
    }

    /// Ambient identifier of the current task, if one was bound at entry
    pub fn current() -> Option<CorrelationId> {
        CURRENT_CORRELATION.try_with(|id| id.clone()).ok()
    }

    /// Ambient identifier, or a fresh one for this operation only.
    ///
    /// The fresh identifier is not stored back into the ambient context.
    pub fn current_or_new() -> CorrelationId {
        Self::current().unwrap_or_else(Self::new)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "correlation_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

#[cfg(test)]
#[path = "correlation_tests.rs"]
mod tests;
