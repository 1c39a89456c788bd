//! Common test utilities for queue bridge integration tests
//!
//! This module provides:
//! - In-memory client handles that share one store
//! - A client wrapper that injects send and receive faults
//! - Builders for application state and HTTP requests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::response::Response;
use bus_runtime::{
    InMemoryConfig, Message, MessageId, ProviderConfig, ProviderType, QueueClient,
    QueueClientFactory, QueueConfig, QueueError, QueueName, ReceiptHandle, ReceivedMessage,
};
use queue_bridge_api::AppState;
use queue_bridge_core::{BridgeConfig, DrainService, ProducerService, QueueProviderKind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const QUEUE: &str = "integration";

pub fn queue() -> QueueName {
    QueueName::new(QUEUE.to_string()).unwrap()
}

/// Bridge configuration for the in-memory provider with short timeouts
pub fn memory_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.queue.provider = QueueProviderKind::Memory;
    config.queue.queue_name = QUEUE.to_string();
    config.receive.per_attempt_timeout_ms = 100;
    config.receive.ack_timeout_ms = 1000;
    config.drain.deadline_ms = 500;
    config
}

/// `count` independent handles onto one in-memory broker
pub async fn shared_clients(count: usize) -> Vec<Arc<dyn QueueClient>> {
    shared_clients_with(InMemoryConfig::default(), count).await
}

pub async fn shared_clients_with(config: InMemoryConfig, count: usize) -> Vec<Arc<dyn QueueClient>> {
    let queue_config = QueueConfig {
        provider: ProviderConfig::InMemory(config),
    };
    QueueClientFactory::create_clients(queue_config, count)
        .await
        .unwrap()
        .into_iter()
        .map(Arc::<dyn QueueClient>::from)
        .collect()
}

/// Application state with separate producer and drain handles on one broker
pub fn app_state(
    config: BridgeConfig,
    producer_client: Arc<dyn QueueClient>,
    drain_client: Arc<dyn QueueClient>,
) -> AppState {
    let drain = DrainService::new(drain_client, queue(), config.drain_loop_config());
    AppState::new(config, ProducerService::new(producer_client, queue()), drain)
}

pub async fn seed(client: &dyn QueueClient, count: u32) {
    for index in 1..=count {
        client
            .send_message(&queue(), Message::from_text(ProducerService::message_body(index)))
            .await
            .unwrap();
    }
}

/// Receive whatever is left without acknowledging it
pub async fn leftover(client: &dyn QueueClient) -> Vec<String> {
    let mut bodies = Vec::new();
    while let Some(message) = client
        .receive_message(&queue(), Duration::from_millis(10))
        .await
        .unwrap()
    {
        bodies.push(message.body_text());
    }
    bodies
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Fault injection
// ============================================================================

/// What the next receive should do before reaching the inner client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveFault {
    /// Fail with a retryable connection error
    Transient,
    /// Fail with an authentication error
    Fatal,
}

/// Wraps a real client and injects scripted faults.
///
/// Receive faults are consumed front to back; once exhausted, calls pass
/// through. Sends fail once `send_budget` successes have been used.
pub struct FaultyClient {
    inner: Arc<dyn QueueClient>,
    receive_faults: Mutex<Vec<ReceiveFault>>,
    send_budget: Option<u32>,
    sends: AtomicU32,
    receives: AtomicU32,
    completes: AtomicU32,
}

impl FaultyClient {
    pub fn new(inner: Arc<dyn QueueClient>) -> Self {
        Self {
            inner,
            receive_faults: Mutex::new(Vec::new()),
            send_budget: None,
            sends: AtomicU32::new(0),
            receives: AtomicU32::new(0),
            completes: AtomicU32::new(0),
        }
    }

    pub fn with_receive_faults(self, faults: Vec<ReceiveFault>) -> Self {
        *self.receive_faults.lock().unwrap() = faults;
        self
    }

    pub fn with_send_budget(mut self, budget: u32) -> Self {
        self.send_budget = Some(budget);
        self
    }

    pub fn receive_calls(&self) -> u32 {
        self.receives.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> u32 {
        self.completes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueClient for FaultyClient {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst);
        if self.send_budget.is_some_and(|budget| attempt >= budget) {
            return Err(QueueError::ConnectionFailed {
                message: "connection reset".to_string(),
            });
        }
        self.inner.send_message(queue, message).await
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        let fault = {
            let mut faults = self.receive_faults.lock().unwrap();
            if faults.is_empty() {
                None
            } else {
                Some(faults.remove(0))
            }
        };

        match fault {
            Some(ReceiveFault::Transient) => Err(QueueError::ConnectionFailed {
                message: "connection reset".to_string(),
            }),
            Some(ReceiveFault::Fatal) => Err(QueueError::AuthenticationFailed {
                message: "token rejected".to_string(),
            }),
            None => self.inner.receive_message(queue, timeout).await,
        }
    }

    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.inner.complete_message(receipt).await
    }

    fn provider_type(&self) -> ProviderType {
        self.inner.provider_type()
    }
}
