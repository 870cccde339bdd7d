//! Per-delivery processing pipeline shared by every provider.
//!
//! State machine per delivery: Received -> Dispatching -> Acknowledged or
//! Rejected. Both terminal states are final; there is no retry loop and no
//! dead-letter routing. Failures never escape the pipeline, so the
//! subscription loop that spawned it keeps consuming.

use crate::consumer::ConsumerRegistration;
use crate::message::{correlation_from_headers, DeliveryHeaders};
use crate::observe::{metric, Metrics, Telemetry};
use std::sync::Arc;
use tracing::{error, trace};

/// Terminal state of one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVerdict {
    /// Handler succeeded; the transport should acknowledge
    Ack,
    /// Deserialization or handler failed; the transport should drop the
    /// message (`requeue=false`)
    Reject,
}

/// Process one delivery end to end.
///
/// Binds the correlation identifier from the headers (or a fresh one) as
/// the ambient value for this task, opens the telemetry root span, invokes
/// the registered handler and translates the outcome into a verdict. The
/// ack/nack counters are incremented here exactly once per delivery.
pub async fn process_delivery(
    registration: &ConsumerRegistration,
    body: &[u8],
    headers: DeliveryHeaders,
    metrics: &Arc<dyn Metrics>,
    telemetry: &Arc<dyn Telemetry>,
) -> DeliveryVerdict {
    let queue = registration.queue_name().to_string();
    let correlation = correlation_from_headers(&headers);

    trace!(queue = %queue, correlation_id = %correlation, "processing message");

    let span_correlation = correlation.clone();
    correlation
        .scope(async move {
            let span = telemetry.root_span(
                &format!("process message queue {queue}"),
                &[
                    ("queue", queue.as_str()),
                    ("correlation_id", span_correlation.as_str()),
                ],
            );

            match registration.invoke(body, &headers) {
                Ok(()) => {
                    metrics.increment_counter(metric::MESSAGES_ACK, &[("queue", &queue)]);
                    telemetry.end_span(span, None);
                    DeliveryVerdict::Ack
                }
                Err(err) => {
                    error!(
                        queue = %queue,
                        correlation_id = %span_correlation,
                        error = %err,
                        "message processing failed"
                    );
                    metrics.increment_counter(metric::MESSAGES_NACK, &[("queue", &queue)]);
                    telemetry.end_span(span, Some(&err));
                    DeliveryVerdict::Reject
                }
            }
        })
        .await
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
