use bigdecimal::BigDecimal;
use payment_service::pipeline::{Pipeline, PipelineSettings};
use payment_service::settlement::SettlementConfig;
use payment_service::submitter::{PaymentRequest, Submitter};
use shared::{
    Currency, InMemoryBroker, InMemoryPaymentStore, NotificationMessage, OutboundMessage, PaymentFilter,
    PaymentStatus, PaymentStore, QueueBroker, RetryPolicy, Topics,
};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: InMemoryPaymentStore,
    broker: InMemoryBroker,
    submitter: Submitter,
    pipeline: Pipeline,
    topics: Topics,
}

async fn harness(workers: usize, settlement: SettlementConfig) -> Harness {
    let store = InMemoryPaymentStore::new();
    let broker = InMemoryBroker::new();
    let topics = Topics::default();
    let settings = PipelineSettings {
        topics: topics.clone(),
        dispatcher_concurrency: 1,
        settlement_workers: workers,
        settlement,
        retry: RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        seed: Some(2024),
    };
    let pipeline = Pipeline::spawn(Arc::new(store.clone()), Arc::new(broker.clone()), settings)
        .await
        .unwrap();
    let submitter = Submitter::new(Arc::new(store.clone()), Arc::new(broker.clone()), topics.submission.clone());

    Harness {
        store,
        broker,
        submitter,
        pipeline,
        topics,
    }
}

fn always_succeeds(min_ms: u64, max_ms: u64) -> SettlementConfig {
    SettlementConfig {
        min_latency: Duration::from_millis(min_ms),
        max_latency: Duration::from_millis(max_ms),
        success_probability: 1.0,
        timeout: Some(Duration::from_secs(5)),
    }
}

fn request(sender: &str, receiver: &str, amount: &str) -> PaymentRequest {
    PaymentRequest {
        sender_account: sender.to_string(),
        receiver_account: receiver.to_string(),
        amount: BigDecimal::from_str(amount).unwrap(),
        currency: Currency::Inr,
        payment_method: Some("UPI".to_string()),
        description: Some("Test payment".to_string()),
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn all_terminal(store: &InMemoryPaymentStore, expected: usize) -> bool {
    let records = store.list(&PaymentFilter::All).await.unwrap();
    records.len() == expected && records.iter().all(|r| r.is_terminal())
}

async fn notified(broker: &InMemoryBroker, topic: &str, expected: usize) -> bool {
    broker.published(topic).await.len() == expected
}

async fn notifications(broker: &InMemoryBroker, topic: &str) -> Vec<NotificationMessage> {
    broker
        .published(topic)
        .await
        .iter()
        .map(|m| serde_json::from_str(&m.payload).unwrap())
        .collect()
}

#[tokio::test]
async fn submitted_payment_completes_and_notifies_once() {
    let mut h = harness(5, always_succeeds(1, 5)).await;
    h.pipeline
        .attach_notification_logger(Arc::new(h.broker.clone()), &h.topics.notification, RetryPolicy::default())
        .await
        .unwrap();

    let record = h
        .submitter
        .submit(request("1234567890", "0987654321", "1000.00"))
        .await
        .unwrap();
    assert_eq!(record.status(), PaymentStatus::Pending);

    eventually(|| all_terminal(&h.store, 1)).await;
    let settled = h.store.get_by_transaction_id(&record.transaction_id).await.unwrap().unwrap();
    assert_eq!(settled.status(), PaymentStatus::Completed);

    eventually(|| async { h.broker.acked(&h.topics.notification).await == 1 }).await;
    let sent = notifications(&h.broker, &h.topics.notification).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].transaction_id, record.transaction_id);
    assert_eq!(sent[0].status, PaymentStatus::Completed);
    assert_eq!(
        sent[0].message,
        "Payment of 1000.00 INR from 1234567890 to 0987654321 completed successfully"
    );
    h.pipeline.shutdown();
}

#[tokio::test]
async fn each_submission_is_dispatched_exactly_once() {
    let h = harness(2, always_succeeds(1, 2)).await;
    for i in 0..3 {
        h.submitter
            .submit(request(&format!("111111111{}", i), "0987654321", "10"))
            .await
            .unwrap();
    }

    eventually(|| all_terminal(&h.store, 3)).await;
    eventually(|| notified(&h.broker, &h.topics.notification, 3)).await;
    assert_eq!(h.broker.published(&h.topics.submission).await.len(), 3);
    assert_eq!(h.broker.published(&h.topics.processing).await.len(), 3);
    h.pipeline.shutdown();
}

#[tokio::test]
async fn settlement_concurrency_never_exceeds_pool_size() {
    let workers = 3;
    let h = harness(workers, always_succeeds(20, 40)).await;
    let stats = h.pipeline.stats();

    for i in 0..12 {
        h.submitter
            .submit(request(&format!("12345678{:02}", i), "0987654321", "5.25"))
            .await
            .unwrap();
    }

    eventually(|| all_terminal(&h.store, 12)).await;
    assert!(stats.peak() >= 1);
    assert!(stats.peak() <= workers);
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.completed(), 12);
    h.pipeline.shutdown();
}

#[tokio::test]
async fn duplicate_processing_messages_settle_once() {
    let h = harness(4, always_succeeds(10, 20)).await;
    let record = h
        .submitter
        .submit(request("1234567890", "0987654321", "42.00"))
        .await
        .unwrap();

    let duplicate = format!(r#"{{"transactionId":"{}"}}"#, record.transaction_id);
    for _ in 0..3 {
        h.broker
            .publish(&h.topics.processing, OutboundMessage::new(&record.transaction_id, duplicate.as_str()))
            .await
            .unwrap();
    }

    eventually(|| async { h.broker.acked(&h.topics.processing).await == 4 }).await;
    eventually(|| all_terminal(&h.store, 1)).await;
    assert_eq!(notifications(&h.broker, &h.topics.notification).await.len(), 1);
    h.pipeline.shutdown();
}

#[tokio::test]
async fn unknown_transaction_is_acknowledged_without_side_effects() {
    let h = harness(2, always_succeeds(1, 2)).await;
    h.broker
        .publish(
            &h.topics.processing,
            OutboundMessage::new("TXN-ghost", r#"{"transactionId":"TXN-ghost"}"#),
        )
        .await
        .unwrap();

    eventually(|| async { h.broker.acked(&h.topics.processing).await == 1 }).await;
    assert!(h.store.list(&PaymentFilter::All).await.unwrap().is_empty());
    assert!(h.broker.published(&h.topics.notification).await.is_empty());
    h.pipeline.shutdown();
}

#[tokio::test]
async fn failed_settlements_are_recorded_and_notified() {
    let config = SettlementConfig {
        success_probability: 0.0,
        ..always_succeeds(1, 2)
    };
    let h = harness(2, config).await;
    let record = h
        .submitter
        .submit(request("1234567890", "0987654321", "99.99"))
        .await
        .unwrap();

    eventually(|| all_terminal(&h.store, 1)).await;
    let settled = h.store.get_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(settled.status(), PaymentStatus::Failed);

    eventually(|| notified(&h.broker, &h.topics.notification, 1)).await;
    let sent = notifications(&h.broker, &h.topics.notification).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, PaymentStatus::Failed);
    assert_eq!(sent[0].message, "Payment processing failed. Please contact support.");
    h.pipeline.shutdown();
}
