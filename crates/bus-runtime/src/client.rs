//! Client traits and implementations for queue operations.

use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage};
use crate::provider::{InMemoryConfig, ProviderConfig, ProviderType, QueueConfig};
use crate::providers::{AzureServiceBusProvider, InMemoryProvider};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for queue operations across all providers
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send single message to queue
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError>;

    /// Receive a single message under a delivery lock.
    ///
    /// Waits at most `timeout` for a delivery. `Ok(None)` means the wait
    /// elapsed with nothing available.
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Mark message as successfully processed, removing it from the queue
    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Interface implemented by specific queue providers (Azure, in-memory)
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Send single message
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Receive single message
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Complete message processing
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration.
    ///
    /// Every call yields an independent client handle; callers that run
    /// separate receive loops should create one client each.
    pub async fn create_client(config: QueueConfig) -> Result<Box<dyn QueueClient>, QueueError> {
        let provider: Box<dyn QueueProvider> = match config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryProvider::new(in_memory_config))
            }
            ProviderConfig::AzureServiceBus(azure_config) => Box::new(
                AzureServiceBusProvider::new(azure_config)
                    .await
                    .map_err(|e| e.to_queue_error())?,
            ),
        };

        Ok(Box::new(StandardQueueClient::new(provider)))
    }

    /// Create `count` client handles for the same broker.
    ///
    /// Azure handles are independent connections. In-memory handles share one
    /// store, since separate stores would be separate brokers.
    pub async fn create_clients(
        config: QueueConfig,
        count: usize,
    ) -> Result<Vec<Box<dyn QueueClient>>, QueueError> {
        match config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                let provider = InMemoryProvider::new(in_memory_config);
                Ok((0..count)
                    .map(|_| {
                        Box::new(StandardQueueClient::new(Box::new(provider.clone())))
                            as Box<dyn QueueClient>
                    })
                    .collect())
            }
            provider @ ProviderConfig::AzureServiceBus(_) => {
                let mut clients = Vec::with_capacity(count);
                for _ in 0..count {
                    clients.push(
                        Self::create_client(QueueConfig {
                            provider: provider.clone(),
                        })
                        .await?,
                    );
                }
                Ok(clients)
            }
        }
    }

    /// Create test client with in-memory provider
    pub fn create_test_client() -> Box<dyn QueueClient> {
        let provider = InMemoryProvider::new(InMemoryConfig::default());
        Box::new(StandardQueueClient::new(Box::new(provider)))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    provider: Box<dyn QueueProvider>,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Box<dyn QueueProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    #[instrument(skip(self, message), fields(queue = %queue, body_len = message.body.len()))]
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        let max_size = self.provider.provider_type().max_message_size();
        if message.body.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message.body.len(),
                max_size,
            });
        }

        let message_id = self.provider.send_message(queue, &message).await?;
        debug!(message_id = %message_id, "Message sent");
        Ok(message_id)
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        self.provider.receive_message(queue, timeout).await
    }

    #[instrument(skip(self, receipt), fields(receipt = %receipt.handle()))]
    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.complete_message(&receipt).await
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }
}
