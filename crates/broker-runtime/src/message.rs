//! Message envelope built at publish time and headers handed to handlers.

use crate::correlation::{CorrelationId, CORRELATION_ID_HEADER};
use crate::error::SerializationError;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;

/// Content type of every published body
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// String-keyed headers delivered alongside a message body
pub type DeliveryHeaders = HashMap<String, String>;

/// Wire message: opaque JSON body plus headers.
///
/// The envelope always carries `x-correlation-id`. It is created at publish
/// time and ends when the transport accepts the send; there is no
/// publish-confirm tracking.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub body: Bytes,
    pub headers: DeliveryHeaders,
    pub correlation_id: CorrelationId,
}

impl Envelope {
    /// Serialize `body` and attach the ambient correlation identifier of
    /// the calling task, or a fresh one for this publish only.
    pub fn from_value<T: Serialize>(body: &T) -> Result<Self, SerializationError> {
        let bytes = serde_json::to_vec(body)?;
        let correlation_id = CorrelationId::current_or_new();

        let mut headers = DeliveryHeaders::new();
        headers.insert(
            CORRELATION_ID_HEADER.to_string(),
            correlation_id.to_string(),
        );

        Ok(Self {
            body: Bytes::from(bytes),
            headers,
            correlation_id,
        })
    }
}

/// Correlation identifier carried in delivery headers, or a new one when
/// the header is absent or empty
pub fn correlation_from_headers(headers: &DeliveryHeaders) -> CorrelationId {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
