//! # Bus Runtime
//!
//! Provider-agnostic queue client for peek-lock message processing, with an
//! Azure Service Bus REST provider and an in-memory provider.
//!
//! This library provides:
//! - Send, receive-with-lock and complete operations
//! - Error classification into transient and fatal failures
//! - Shared Access Signature authentication for Service Bus
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message structures and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and implementations
//! - [`providers`] - Concrete provider backends

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory, QueueProvider, StandardQueueClient};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
pub use provider::{
    AzureServiceBusConfig, InMemoryConfig, ProviderConfig, ProviderType, QueueConfig, Secret,
};
pub use providers::{AzureError, AzureServiceBusProvider, ConnectionString, InMemoryProvider};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
