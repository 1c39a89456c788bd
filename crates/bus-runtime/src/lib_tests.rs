//! Tests for the bus-runtime library surface.

use super::*;
use std::time::Duration;

/// Verify a full send, receive and complete cycle through the public API.
#[tokio::test]
async fn test_round_trip_through_crate_root() {
    let client = QueueClientFactory::create_test_client();
    let queue: QueueName = "bridge".parse().unwrap();

    client
        .send_message(&queue, Message::from_text("Message 1"))
        .await
        .unwrap();
    let received = client
        .receive_message(&queue, Duration::from_millis(50))
        .await
        .unwrap()
        .expect("message should be delivered");
    client
        .complete_message(received.receipt_handle.clone())
        .await
        .unwrap();

    assert_eq!(received.body_text(), "Message 1");
    assert_eq!(received.delivery_count, 1);
}

#[tokio::test]
async fn test_factory_rejects_malformed_connection_string() {
    let config = QueueConfig {
        provider: ProviderConfig::AzureServiceBus(AzureServiceBusConfig::new(Secret::new(
            "not-a-connection-string",
        ))),
    };

    let result = QueueClientFactory::create_client(config).await;

    assert!(matches!(
        result,
        Err(QueueError::ConfigurationError(ConfigurationError::Invalid { .. }))
    ));
}
