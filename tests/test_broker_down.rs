//! Behavior when the broker cannot be reached
//!
//! These run without RabbitMQ: every operation must fail fast with the error
//! kind that names the failing stage, and the soft-fail points must not fail.


use connector_amqp::health::DISCONNECTED;
use connector_amqp::protocol::ConnectorIdentity;
use connector_amqp::{Broker, BrokerError, ErrorKind};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::unreachable_config;
use tokio::time::timeout;

fn broker() -> Broker {
    Broker::from_config(Arc::new(unreachable_config())).unwrap()
}

#[tokio::test]
async fn test_is_alive_reports_unavailable_with_cause() {
    let broker = broker();

    let error = broker.probe().is_alive().await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Unavailable);
    let BrokerError::Unavailable { source } = &error else {
        panic!("expected Unavailable, got {error:?}");
    };
    assert_eq!(source.kind(), ErrorKind::Connection);
    assert!(error.amqp_error().is_some());
}

#[tokio::test]
async fn test_version_soft_fails() {
    assert_eq!(broker().probe().version().await, DISCONNECTED);
}

#[tokio::test]
async fn test_registration_fails_with_connection_error() {
    let identity = ConnectorIdentity::new("conn-1", "Test", "EXTERNAL_IMPORT", "external-import");

    let error = broker()
        .topology()
        .register_connector_queues(&identity)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_unregistration_fails_with_connection_error() {
    let broker = broker();

    let error = broker.topology().unregister_connector("conn-1").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Connection);

    let error = broker.topology().unregister_exchanges().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_publish_fails_without_retry() {
    let broker = broker();

    let error = broker
        .publisher()
        .push_to_connector("conn-1", &json!({"type": "test"}))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_consume_returns_immediately_on_connect_failure() {
    let broker = broker();
    let (tx, _rx) = tokio::sync::mpsc::channel::<String>(1);

    let result = timeout(
        Duration::from_secs(5),
        broker.consumer().consume_queue((), "conn-1", |_handle| {}, tx),
    )
    .await
    .expect("consume should not hang when the broker is down");

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_metrics_fail_with_management_error() {
    let error = broker().probe().metrics("test").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Management);
}

#[tokio::test]
async fn test_health_checks_flag_every_component() {
    let health = broker().health_checks();

    let results = timeout(Duration::from_secs(15), health.run_health_checks())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(!result.healthy, "{} should be unhealthy", result.component);
        assert!(result.response_time_ms.is_some());
    }
    assert_eq!(
        results[1].message.as_deref(),
        Some("Management API unreachable")
    );
    assert!(!health.calculate_overall_health().await);
}
