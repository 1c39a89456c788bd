//! Receive loops running side by side on one broker

mod common;

use bus_runtime::{InMemoryConfig, Message, QueueClient};
use common::{leftover, memory_config, queue, seed, shared_clients, shared_clients_with, FaultyClient};
use queue_bridge_core::{
    CancellationSignal, ConsumerExit, ConsumerService, DrainService, LoopConfig, ProducerService,
};
use std::sync::Arc;
use std::time::Duration;

/// Verify two consumers split the queue without acknowledging anything twice.
#[tokio::test(start_paused = true)]
async fn test_two_consumers_share_work() {
    // Arrange
    let clients = shared_clients(3).await;
    seed(clients[0].as_ref(), 20).await;
    let config = memory_config().consumer_loop_config();
    let first = ConsumerService::new(clients[1].clone(), queue(), config.clone());
    let second = ConsumerService::new(clients[2].clone(), queue(), config);
    let cancel = CancellationSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    // Act
    let (a, b) = tokio::join!(first.run(&cancel), second.run(&cancel));

    // Assert
    let total = a.unwrap().acknowledged() + b.unwrap().acknowledged();
    assert_eq!(total, 20);
    assert!(leftover(clients[0].as_ref()).await.is_empty());
}

/// Verify a drain and a consumer never both acknowledge the same message.
#[tokio::test(start_paused = true)]
async fn test_drain_alongside_consumer() {
    // Arrange
    let clients = shared_clients(3).await;
    seed(clients[0].as_ref(), 10).await;
    let config = memory_config();
    let consumer =
        ConsumerService::new(clients[1].clone(), queue(), config.consumer_loop_config());
    let drain = DrainService::new(clients[2].clone(), queue(), config.drain_loop_config());
    let cancel = CancellationSignal::new();

    // Act
    let consumer_run = async {
        let exit = consumer.run(&cancel).await;
        exit.map(|e| e.acknowledged())
    };
    let drain_run = async {
        let report = drain.drain().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        report
    };
    let (consumed, drained) = tokio::join!(consumer_run, drain_run);

    // Assert
    assert_eq!(consumed.unwrap() + drained.unwrap().acknowledged, 10);
}

/// Verify a message whose lock lapses is delivered again to the next receiver.
#[tokio::test(start_paused = true)]
async fn test_abandoned_lock_is_redelivered() {
    // Arrange
    let clients = shared_clients_with(
        InMemoryConfig {
            lock_duration: Duration::from_secs(1),
            ..InMemoryConfig::default()
        },
        2,
    )
    .await;
    clients[0]
        .send_message(&queue(), Message::from_text("orphaned"))
        .await
        .unwrap();

    // A receiver that takes the lock and never acknowledges.
    let abandoned = clients[0]
        .receive_message(&queue(), Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(abandoned.delivery_count, 1);

    let consumer = ConsumerService::new(
        clients[1].clone(),
        queue(),
        LoopConfig::continuous().with_per_attempt_timeout(Duration::from_millis(500)),
    );

    // Act
    let exit = consumer.run_once(&CancellationSignal::new()).await.unwrap();

    // Assert
    assert_eq!(exit, ConsumerExit::Completed { acknowledged: 1 });
    assert!(leftover(clients[0].as_ref()).await.is_empty());
}

/// Verify a consumer outlives a burst of transient failures within budget.
#[tokio::test(start_paused = true)]
async fn test_consumer_recovers_from_transient_burst() {
    // Arrange
    let clients = shared_clients(2).await;
    let flaky = Arc::new(FaultyClient::new(clients[1].clone()).with_receive_faults(vec![
        common::ReceiveFault::Transient,
        common::ReceiveFault::Transient,
        common::ReceiveFault::Transient,
    ]));
    let producer = ProducerService::new(clients[0].clone(), queue());
    producer.enqueue(2).await.unwrap();
    let consumer = ConsumerService::new(
        flaky.clone(),
        queue(),
        memory_config().consumer_loop_config(),
    );
    let cancel = CancellationSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    // Act
    let exit = consumer.run(&cancel).await.unwrap();

    // Assert
    assert_eq!(exit, ConsumerExit::Cancelled { acknowledged: 2 });
    assert_eq!(flaky.complete_calls(), 2);
    assert!(flaky.receive_calls() > 3);
}

/// Verify a transient burst longer than the budget stops the consumer.
#[tokio::test(start_paused = true)]
async fn test_consumer_gives_up_after_budget() {
    // Arrange
    let clients = shared_clients(1).await;
    let flaky = Arc::new(
        FaultyClient::new(clients[0].clone())
            .with_receive_faults(vec![common::ReceiveFault::Transient; 10]),
    );
    let consumer = ConsumerService::new(
        flaky.clone(),
        queue(),
        memory_config()
            .consumer_loop_config()
            .with_transient_budget(2),
    );

    // Act
    let result = consumer.run(&CancellationSignal::new()).await;

    // Assert
    assert!(result.is_err());
    assert_eq!(flaky.receive_calls(), 3);
}
