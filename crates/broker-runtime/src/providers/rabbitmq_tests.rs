//! Tests for the RabbitMQ provider. Wire conversions and the
//! not-connected paths are covered here; behavior against a live broker
//! belongs to integration environments.

use super::*;
use crate::observe::{NoopMetrics, NoopTelemetry};
use crate::topology::Subject;

fn offline_provider() -> RabbitMqProvider {
    RabbitMqProvider::new(
        RabbitMqConfig {
            protocol: "amqp".to_string(),
            user: "guest".to_string(),
            password: "guest".to_string(),
            host: "localhost".to_string(),
            port: "5672".to_string(),
            vhost: "apps".to_string(),
            prefetch_count: Some(16),
        },
        false,
        Arc::new(NoopMetrics),
        Arc::new(NoopTelemetry),
    )
}

#[tokio::test]
async fn configure_without_a_connection_fails() {
    let provider = offline_provider();

    let err = provider
        .configure(&[Exchange::new("orders", ExchangeKind::Direct).into()])
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::ConnectionFailed { .. }));
}

#[tokio::test]
async fn publish_without_a_connection_fails() {
    let provider = offline_provider();
    let envelope = Envelope::from_value(&serde_json::json!({"id": 1})).unwrap();

    let err = provider
        .publish_envelope("orders", "created", envelope)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BrokerError::PublishFailed { ref target, .. } if target == "orders"
    ));
}

#[tokio::test]
async fn consuming_an_undeclared_queue_is_a_configuration_error() {
    let provider = offline_provider();
    let registration = ConsumerRegistration::new(
        Queue::new("ghost"),
        |_payload: serde_json::Value, _headers: &DeliveryHeaders| Ok(()),
    );

    let err = provider.consume(registration).await.unwrap_err();

    assert!(matches!(
        err,
        BrokerError::ConfigurationError(ConfigurationError::QueueNotConfigured { ref queue })
            if queue == "ghost"
    ));
}

#[test]
fn provider_reports_its_type() {
    assert_eq!(offline_provider().provider_type(), ProviderType::RabbitMq);
}

#[test]
fn header_values_survive_the_field_table_round_trip() {
    let mut headers = DeliveryHeaders::new();
    headers.insert("x-correlation-id".to_string(), "corr-123".to_string());
    headers.insert("x-origin".to_string(), "billing".to_string());

    let restored = field_table_to_headers(&headers_to_field_table(&headers));

    assert_eq!(restored, headers);
}

#[test]
fn non_string_field_table_values_are_stringified() {
    let mut table = FieldTable::default();
    table.insert("retries".into(), AMQPValue::LongLongInt(3));
    table.insert("redelivered".into(), AMQPValue::Boolean(true));

    let headers = field_table_to_headers(&table);

    assert_eq!(headers["retries"], "3");
    assert_eq!(headers["redelivered"], "true");
}

#[test]
fn declare_arguments_map_onto_amqp_values() {
    assert_eq!(
        json_to_amqp_value(&serde_json::json!(3600000)),
        AMQPValue::LongLongInt(3600000)
    );
    assert_eq!(
        json_to_amqp_value(&serde_json::json!(true)),
        AMQPValue::Boolean(true)
    );
    assert_eq!(
        json_to_amqp_value(&serde_json::json!("quorum")),
        AMQPValue::LongString("quorum".into())
    );
    assert_eq!(json_to_amqp_value(&serde_json::Value::Null), AMQPValue::Void);
}

#[test]
fn exchange_kinds_map_onto_their_amqp_names() {
    assert_eq!(exchange_kind(ExchangeKind::Direct), lapin::ExchangeKind::Direct);
    assert_eq!(exchange_kind(ExchangeKind::Topic), lapin::ExchangeKind::Topic);
    assert_eq!(exchange_kind(ExchangeKind::Fanout), lapin::ExchangeKind::Fanout);
    assert_eq!(exchange_kind(ExchangeKind::Headers), lapin::ExchangeKind::Headers);
}

#[tokio::test]
async fn subjects_are_rejected_even_before_looking_at_the_channel() {
    let provider = offline_provider();

    // A subject can never be declared over AMQP, connected or not
    let err = provider
        .configure(&[Subject::new("metrics.cpu", "workers").into()])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BrokerError::ConnectionFailed { .. }
            | BrokerError::ConfigurationError(ConfigurationError::UnsupportedEntity { .. })
    ));
}
