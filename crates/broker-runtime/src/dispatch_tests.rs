//! Tests for the per-delivery processing pipeline.

use super::*;
use crate::consumer::{ConsumerRegistration, HandlerError};
use crate::correlation::{CorrelationId, CORRELATION_ID_HEADER};
use crate::observe::{NoopTelemetry, RecordingMetrics};
use crate::topology::Queue;
use serde::Deserialize;
use std::sync::Mutex;

#[derive(Debug, Deserialize)]
struct Ping {
    seq: u32,
}

fn collaborators() -> (Arc<RecordingMetrics>, Arc<dyn Metrics>, Arc<dyn Telemetry>) {
    let recording = Arc::new(RecordingMetrics::new());
    let metrics: Arc<dyn Metrics> = recording.clone();
    let telemetry: Arc<dyn Telemetry> = Arc::new(NoopTelemetry);
    (recording, metrics, telemetry)
}

#[tokio::test]
async fn successful_handler_acks_and_counts_exactly_once() {
    let (recording, metrics, telemetry) = collaborators();
    let registration = ConsumerRegistration::new(
        Queue::new("pings"),
        |_payload: Ping, _headers: &DeliveryHeaders| Ok(()),
    );

    let verdict = process_delivery(
        &registration,
        br#"{"seq":1}"#,
        DeliveryHeaders::new(),
        &metrics,
        &telemetry,
    )
    .await;

    assert_eq!(verdict, DeliveryVerdict::Ack);
    assert_eq!(
        recording.counter_value(metric::MESSAGES_ACK, &[("queue", "pings")]),
        1
    );
    assert_eq!(
        recording.counter_value(metric::MESSAGES_NACK, &[("queue", "pings")]),
        0
    );
}

#[tokio::test]
async fn failing_handler_rejects_and_counts_exactly_once() {
    let (recording, metrics, telemetry) = collaborators();
    let registration = ConsumerRegistration::new(
        Queue::new("pings"),
        |_payload: Ping, _headers: &DeliveryHeaders| Err(HandlerError::new("boom")),
    );

    let verdict = process_delivery(
        &registration,
        br#"{"seq":1}"#,
        DeliveryHeaders::new(),
        &metrics,
        &telemetry,
    )
    .await;

    assert_eq!(verdict, DeliveryVerdict::Reject);
    assert_eq!(
        recording.counter_value(metric::MESSAGES_NACK, &[("queue", "pings")]),
        1
    );
    assert_eq!(
        recording.counter_value(metric::MESSAGES_ACK, &[("queue", "pings")]),
        0
    );
}

#[tokio::test]
async fn malformed_body_rejects_without_stopping_anything() {
    let (recording, metrics, telemetry) = collaborators();
    let registration = ConsumerRegistration::new(
        Queue::new("pings"),
        |_payload: Ping, _headers: &DeliveryHeaders| Ok(()),
    );

    let verdict = process_delivery(
        &registration,
        b"not json",
        DeliveryHeaders::new(),
        &metrics,
        &telemetry,
    )
    .await;

    assert_eq!(verdict, DeliveryVerdict::Reject);
    assert_eq!(
        recording.counter_value(metric::MESSAGES_NACK, &[("queue", "pings")]),
        1
    );
}

#[tokio::test]
async fn handler_observes_the_delivery_correlation_id() {
    let (_, metrics, telemetry) = collaborators();
    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();

    let registration = ConsumerRegistration::new(
        Queue::new("pings"),
        move |_payload: Ping, _headers: &DeliveryHeaders| {
            *sink.lock().unwrap() = CorrelationId::current();
            Ok(())
        },
    );

    let mut headers = DeliveryHeaders::new();
    headers.insert(CORRELATION_ID_HEADER.to_string(), "corr-123".to_string());

    process_delivery(&registration, br#"{"seq":1}"#, headers, &metrics, &telemetry).await;

    let seen = observed.lock().unwrap().clone();
    assert_eq!(seen.map(|id| id.to_string()), Some("corr-123".to_string()));
}

#[tokio::test]
async fn missing_correlation_header_gets_a_generated_id() {
    let (_, metrics, telemetry) = collaborators();
    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();

    let registration = ConsumerRegistration::new(
        Queue::new("pings"),
        move |_payload: Ping, _headers: &DeliveryHeaders| {
            *sink.lock().unwrap() = CorrelationId::current();
            Ok(())
        },
    );

    process_delivery(
        &registration,
        br#"{"seq":1}"#,
        DeliveryHeaders::new(),
        &metrics,
        &telemetry,
    )
    .await;

    let seen = observed.lock().unwrap().clone();
    assert!(seen.is_some());
    assert!(!seen.unwrap().as_str().is_empty());
}
