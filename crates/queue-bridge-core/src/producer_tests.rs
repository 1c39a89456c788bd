//! Tests for the producer service.

use super::*;
use bus_runtime::{
    InMemoryConfig, InMemoryProvider, MessageId, ProviderType, ReceiptHandle, ReceivedMessage,
    StandardQueueClient,
};
use std::sync::Mutex;
use std::time::Duration;

/// Client that records sent bodies and fails on a chosen send
struct RecordingClient {
    fail_at: Option<u32>,
    sent: Mutex<Vec<String>>,
    attempts: Mutex<u32>,
}

impl RecordingClient {
    fn new(fail_at: Option<u32>) -> Self {
        Self {
            fail_at,
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }
}

#[async_trait::async_trait]
impl QueueClient for RecordingClient {
    async fn send_message(
        &self,
        _queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };

        if Some(attempt) == self.fail_at {
            return Err(QueueError::ConnectionFailed {
                message: "broker unreachable".to_string(),
            });
        }

        self.sent
            .lock()
            .unwrap()
            .push(String::from_utf8(message.body.to_vec()).unwrap());
        Ok(MessageId::new())
    }

    async fn receive_message(
        &self,
        _queue: &QueueName,
        _timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        Ok(None)
    }

    async fn complete_message(&self, _receipt: ReceiptHandle) -> Result<(), QueueError> {
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

fn queue() -> QueueName {
    QueueName::new("producer-tests".to_string()).unwrap()
}

/// Verify a fault-free enqueue sends exactly `count` labelled messages.
#[tokio::test]
async fn test_enqueue_sends_all_messages() {
    // Arrange
    let client = Arc::new(RecordingClient::new(None));
    let producer = ProducerService::new(client.clone(), queue());

    // Act
    let report = producer.enqueue(3).await.unwrap();

    // Assert
    assert_eq!(report, EnqueueReport { sent: 3 });
    assert_eq!(
        *client.sent.lock().unwrap(),
        vec!["Message 1", "Message 2", "Message 3"]
    );
}

/// Verify a failure at message k reports k-1 sent and stops.
#[tokio::test]
async fn test_enqueue_reports_partial_send() {
    // Arrange
    let client = Arc::new(RecordingClient::new(Some(3)));
    let producer = ProducerService::new(client.clone(), queue());

    // Act
    let err = producer.enqueue(5).await.unwrap_err();

    // Assert
    match &err {
        EnqueueError::PartialSend {
            sent,
            requested,
            source,
        } => {
            assert_eq!(*sent, 2);
            assert_eq!(*requested, 5);
            assert!(matches!(source, QueueError::ConnectionFailed { .. }));
        }
    }
    assert_eq!(err.sent(), 2);
    assert_eq!(err.to_string(), "sent 2 of 5 messages");
    assert_eq!(*client.attempts.lock().unwrap(), 3);
}

/// Verify a failure on the first message reports nothing sent.
#[tokio::test]
async fn test_enqueue_first_send_fails() {
    let client = Arc::new(RecordingClient::new(Some(1)));
    let producer = ProducerService::new(client.clone(), queue());

    let err = producer.enqueue(1).await.unwrap_err();

    assert_eq!(err.sent(), 0);
    assert!(client.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_enqueue_zero_is_a_no_op() {
    let client = Arc::new(RecordingClient::new(Some(1)));
    let producer = ProducerService::new(client.clone(), queue());

    let report = producer.enqueue(0).await.unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(*client.attempts.lock().unwrap(), 0);
}

/// Verify messages land on a real queue in order.
#[tokio::test]
async fn test_enqueue_against_in_memory_queue() {
    // Arrange
    let provider = InMemoryProvider::new(InMemoryConfig::default());
    let client: Arc<dyn QueueClient> = Arc::new(StandardQueueClient::new(Box::new(provider.clone())));
    let producer = ProducerService::new(client.clone(), queue());

    // Act
    producer.enqueue(2).await.unwrap();

    // Assert
    assert_eq!(provider.message_count(&queue()), 2);
    let first = client
        .receive_message(&queue(), Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.body_text(), "Message 1");
}
