//! Tests for broker error types.

use super::*;

#[test]
fn connection_and_configuration_errors_are_startup_fatal() {
    let conn = BrokerError::ConnectionFailed {
        message: "dial refused".to_string(),
    };
    let config = BrokerError::ConfigurationError(ConfigurationError::UnknownProvider {
        provider: "KAFKA".to_string(),
    });

    assert!(conn.is_startup_fatal());
    assert!(config.is_startup_fatal());
}

#[test]
fn publish_and_consume_errors_are_scoped_to_the_operation() {
    let publish = BrokerError::PublishFailed {
        target: "orders".to_string(),
        message: "channel closed".to_string(),
    };
    let consume = BrokerError::ConsumeFailed {
        queue: "orders.created.consumer".to_string(),
        message: "basic.consume refused".to_string(),
    };

    assert!(!publish.is_startup_fatal());
    assert!(!consume.is_startup_fatal());
}

#[test]
fn serde_errors_convert_into_broker_errors() {
    let json_err = serde_json::from_str::<u32>("not a number").unwrap_err();
    let err: BrokerError = SerializationError::from(json_err).into();

    assert!(matches!(err, BrokerError::SerializationError(_)));
}

#[test]
fn binding_errors_identify_the_unresolved_name() {
    let err = ConfigurationError::DestinationNotFound {
        destination: "missing".to_string(),
    };
    assert!(err.to_string().contains("missing"));

    let err = ConfigurationError::SourceExchangeNotFound {
        exchange: "ghost".to_string(),
    };
    assert!(err.to_string().contains("ghost"));
}
