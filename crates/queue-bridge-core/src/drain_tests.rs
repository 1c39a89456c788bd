//! Tests for the drain service.

use super::*;
use bus_runtime::{
    InMemoryProvider, Message, MessageId, ProviderType, QueueError, ReceiptHandle,
    ReceivedMessage, StandardQueueClient,
};
use std::sync::atomic::{AtomicU32, Ordering};

fn queue() -> QueueName {
    QueueName::new("drain-tests".to_string()).unwrap()
}

async fn seeded(count: u32) -> (InMemoryProvider, Arc<dyn QueueClient>) {
    let provider = InMemoryProvider::default();
    let client: Arc<dyn QueueClient> = Arc::new(StandardQueueClient::new(Box::new(provider.clone())));
    for i in 1..=count {
        client
            .send_message(&queue(), Message::from_text(format!("Message {}", i)))
            .await
            .unwrap();
    }
    (provider, client)
}

/// Client that refuses every operation as unauthorised
struct Unauthorized;

/// Client whose broker can never be reached
struct Unreachable {
    receives: AtomicU32,
}

#[async_trait::async_trait]
impl QueueClient for Unreachable {
    async fn send_message(
        &self,
        _queue: &QueueName,
        _message: Message,
    ) -> Result<MessageId, QueueError> {
        Err(QueueError::ConnectionFailed {
            message: "connection refused".to_string(),
        })
    }

    async fn receive_message(
        &self,
        _queue: &QueueName,
        _timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::ConnectionFailed {
            message: "connection refused".to_string(),
        })
    }

    async fn complete_message(&self, _receipt: ReceiptHandle) -> Result<(), QueueError> {
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

#[async_trait::async_trait]
impl QueueClient for Unauthorized {
    async fn send_message(
        &self,
        _queue: &QueueName,
        _message: Message,
    ) -> Result<MessageId, QueueError> {
        Err(QueueError::AuthenticationFailed {
            message: "401".to_string(),
        })
    }

    async fn receive_message(
        &self,
        _queue: &QueueName,
        _timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        Err(QueueError::AuthenticationFailed {
            message: "401".to_string(),
        })
    }

    async fn complete_message(&self, _receipt: ReceiptHandle) -> Result<(), QueueError> {
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

/// Verify queued messages are all acknowledged and the queue ends empty.
#[tokio::test(start_paused = true)]
async fn test_drain_empties_queue() {
    // Arrange
    let (provider, client) = seeded(3).await;
    let drain = DrainService::with_deadline(client, queue(), DrainService::DEFAULT_DEADLINE);

    // Act
    let report = drain.drain().await.unwrap();

    // Assert
    assert_eq!(report.acknowledged, 3);
    assert_eq!(report.elapsed, Duration::from_secs(5));
    assert_eq!(provider.message_count(&queue()), 0);
}

/// Verify an empty queue drains once the deadline is reached.
#[tokio::test(start_paused = true)]
async fn test_drain_empty_queue_finishes_at_deadline() {
    // Arrange
    let (_provider, client) = seeded(0).await;
    let drain = DrainService::with_deadline(client, queue(), Duration::from_secs(2));

    // Act
    let report = drain.drain().await.unwrap();

    // Assert
    assert_eq!(report.acknowledged, 0);
    assert_eq!(report.elapsed, Duration::from_secs(2));
}

/// Verify the mode is forced to bounded drain whatever the template.
#[tokio::test(start_paused = true)]
async fn test_new_forces_bounded_drain() {
    let (_provider, client) = seeded(0).await;
    let template = LoopConfig {
        overall_deadline: Some(Duration::from_secs(1)),
        ..LoopConfig::continuous()
    };

    let drain = DrainService::new(client, queue(), template);
    let report = drain.drain().await.unwrap();

    assert_eq!(drain.deadline(), Some(Duration::from_secs(1)));
    assert_eq!(report.elapsed, Duration::from_secs(1));
}

/// Verify a cancelled drain is an error, not a success.
#[tokio::test(start_paused = true)]
async fn test_cancelled_drain_is_an_error() {
    let (_provider, client) = seeded(1).await;
    let drain = DrainService::with_deadline(client, queue(), Duration::from_secs(5));
    let cancel = CancellationSignal::new();
    cancel.cancel();

    let err = drain.drain_with_cancel(&cancel).await.unwrap_err();

    assert!(matches!(err, DrainError::Cancelled { acknowledged: 0 }));
}

/// Verify a permanent receive failure fails the drain.
#[tokio::test(start_paused = true)]
async fn test_drain_failure() {
    let drain = DrainService::with_deadline(Arc::new(Unauthorized), queue(), Duration::from_secs(5));

    let err = drain.drain().await.unwrap_err();

    assert!(matches!(
        err,
        DrainError::Failed {
            acknowledged: 0,
            source: LoopError::Receive(QueueError::AuthenticationFailed { .. })
        }
    ));
    assert_eq!(err.acknowledged(), 0);
}

/// Verify a broker that is never reachable is not reported as cleared.
#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_fails_the_drain() {
    // Arrange
    let client = Arc::new(Unreachable {
        receives: AtomicU32::new(0),
    });
    let drain = DrainService::with_deadline(client.clone(), queue(), Duration::from_secs(1));

    // Act
    let result = drain.drain().await;

    // Assert
    assert!(matches!(
        result,
        Err(DrainError::Failed {
            acknowledged: 0,
            source: LoopError::Receive(QueueError::ConnectionFailed { .. })
        })
    ));
    assert!(client.receives.load(Ordering::SeqCst) > 1);
}
