//! Tests for client traits and the client factory.

use super::*;
use crate::provider::AzureServiceBusConfig;
use crate::provider::Secret;

fn queue() -> QueueName {
    QueueName::new("client-tests".to_string()).unwrap()
}

// ============================================================================
// Factory Tests
// ============================================================================

#[tokio::test]
async fn test_factory_create_test_client() {
    // Act
    let client = QueueClientFactory::create_test_client();

    // Assert
    assert_eq!(
        client.provider_type(),
        ProviderType::InMemory,
        "Test client should use InMemory provider"
    );
}

#[tokio::test]
async fn test_factory_create_from_in_memory_config() {
    // Arrange
    let config = QueueConfig {
        provider: ProviderConfig::InMemory(InMemoryConfig::default()),
    };

    // Act
    let result = QueueClientFactory::create_client(config).await;

    // Assert
    assert!(result.is_ok(), "Should create client from InMemory config");
    assert_eq!(result.unwrap().provider_type(), ProviderType::InMemory);
}

#[tokio::test]
async fn test_factory_create_from_azure_config() {
    // Arrange
    let config = QueueConfig {
        provider: ProviderConfig::AzureServiceBus(AzureServiceBusConfig::new(Secret::new(
            "Endpoint=sb://test.servicebus.windows.net/;SharedAccessKeyName=test;SharedAccessKey=dGVzdA==",
        ))),
    };

    // Act
    let result = QueueClientFactory::create_client(config).await;

    // Assert
    assert!(result.is_ok(), "Creating the client must not contact the broker");
    assert_eq!(result.unwrap().provider_type(), ProviderType::AzureServiceBus);
}

#[tokio::test]
async fn test_factory_clients_are_independent() {
    // Arrange
    let first = QueueClientFactory::create_test_client();
    let second = QueueClientFactory::create_test_client();
    first
        .send_message(&queue(), Message::from_text("only in first"))
        .await
        .unwrap();

    // Act
    let received = second
        .receive_message(&queue(), Duration::from_millis(10))
        .await
        .unwrap();

    // Assert
    assert!(received.is_none());
}

#[tokio::test]
async fn test_create_clients_in_memory_share_one_store() {
    // Arrange
    let config = QueueConfig::default();

    // Act
    let clients = QueueClientFactory::create_clients(config, 2).await.unwrap();
    clients[0]
        .send_message(&queue(), Message::from_text("shared"))
        .await
        .unwrap();
    let received = clients[1]
        .receive_message(&queue(), Duration::from_millis(10))
        .await
        .unwrap();

    // Assert
    assert_eq!(clients.len(), 2);
    assert_eq!(received.map(|m| m.body_text()), Some("shared".to_string()));
}

#[tokio::test]
async fn test_create_clients_azure_yields_requested_count() {
    let config = QueueConfig {
        provider: ProviderConfig::AzureServiceBus(AzureServiceBusConfig::new(Secret::new(
            "Endpoint=sb://test.servicebus.windows.net/;SharedAccessKeyName=test;SharedAccessKey=dGVzdA==",
        ))),
    };

    let clients = QueueClientFactory::create_clients(config, 3).await.unwrap();

    assert_eq!(clients.len(), 3);
    assert!(clients
        .iter()
        .all(|c| c.provider_type() == ProviderType::AzureServiceBus));
}

// ============================================================================
// StandardQueueClient Tests
// ============================================================================

/// Verify the client rejects bodies over the provider limit before sending.
#[tokio::test]
async fn test_standard_client_enforces_provider_size_limit() {
    // Arrange
    let provider = InMemoryProvider::default();
    let client = StandardQueueClient::new(Box::new(provider.clone()));
    let oversized = bytes::Bytes::from(vec![b'x'; ProviderType::InMemory.max_message_size() + 1]);

    // Act
    let result = client.send_message(&queue(), Message::new(oversized)).await;

    // Assert
    assert!(matches!(result, Err(QueueError::MessageTooLarge { .. })));
    assert_eq!(provider.message_count(&queue()), 0);
}

/// Verify the client delegates the full lock cycle to its provider.
#[tokio::test]
async fn test_standard_client_delegates_to_provider() {
    // Arrange
    let provider = InMemoryProvider::default();
    let client = StandardQueueClient::new(Box::new(provider.clone()));
    client
        .send_message(&queue(), Message::from_text("Message 1"))
        .await
        .unwrap();

    // Act
    let received = client
        .receive_message(&queue(), Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    let in_flight = provider.in_flight_count(&queue());
    client.complete_message(received.receipt_handle).await.unwrap();

    // Assert
    assert_eq!(in_flight, 1);
    assert_eq!(provider.message_count(&queue()), 0);
    assert_eq!(client.provider_type(), ProviderType::InMemory);
}
