use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::error::BrokerError;

/// Messages kept per topic by [`InMemoryBroker`] for inspection and for
/// topics nobody has subscribed to yet.
pub const DEFAULT_RETENTION: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub key: String,
    pub payload: String,
    /// Zero on first publication, incremented on every retry.
    pub attempt: u32,
}

impl OutboundMessage {
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            attempt: 0,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Broker-specific commit of a single delivery.
pub trait Acknowledge: Send + Sync {
    fn ack(&self) -> Result<(), BrokerError>;
}

/// A message handed to a consumer. Until [`Delivery::ack`] succeeds the
/// broker is free to deliver it again.
pub struct Delivery {
    pub topic: String,
    pub key: Option<String>,
    pub payload: String,
    pub attempt: u32,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(
        topic: impl Into<String>,
        key: Option<String>,
        payload: impl Into<String>,
        attempt: u32,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload: payload.into(),
            attempt,
            acker,
        }
    }

    pub fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("payload", &self.payload)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Durable topics with at-least-once delivery to consumer groups.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Joins `group` on `topic`. Workers of the same group share the
    /// returned receiver, which buffers at most `prefetch` deliveries ahead
    /// of them.
    async fn subscribe(&self, topic: &str, group: &str, prefetch: usize)
        -> Result<mpsc::Receiver<Delivery>, BrokerError>;
}

#[derive(Default)]
struct TopicState {
    groups: HashMap<String, mpsc::UnboundedSender<Delivery>>,
    backlog: VecDeque<OutboundMessage>,
    published: VecDeque<OutboundMessage>,
    acked: Arc<AtomicUsize>,
}

/// Appends to a bounded log, evicting the oldest entry. Returns whether
/// something was evicted.
fn push_bounded(log: &mut VecDeque<OutboundMessage>, message: OutboundMessage, limit: usize) -> bool {
    log.push_back(message);
    if log.len() > limit {
        log.pop_front();
        return true;
    }
    false
}

struct CountingAck(Arc<AtomicUsize>);

impl Acknowledge for CountingAck {
    fn ack(&self) -> Result<(), BrokerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-process broker for tests and single-node runs.
///
/// Every consumer group gets its own copy of each message. Publishing
/// never waits on consumers: each group has an unbounded queue feeding its
/// prefetch channel. Messages published before any group subscribes are
/// kept, up to `retention` per topic, and handed to the first subscriber.
#[derive(Clone)]
pub struct InMemoryBroker {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
    retention: usize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker").field("retention", &self.retention).finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// `retention` caps both the publish log and the unsubscribed backlog
    /// of every topic.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            retention: retention.max(1),
        }
    }

    /// The most recent messages published to `topic`, oldest first.
    pub async fn published(&self, topic: &str) -> Vec<OutboundMessage> {
        let topics = self.topics.lock().await;
        topics
            .get(topic)
            .map(|t| t.published.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn acked(&self, topic: &str) -> usize {
        let topics = self.topics.lock().await;
        topics.get(topic).map(|t| t.acked.load(Ordering::SeqCst)).unwrap_or(0)
    }

    fn delivery(topic: &str, message: OutboundMessage, acked: &Arc<AtomicUsize>) -> Delivery {
        Delivery::new(
            topic,
            Some(message.key),
            message.payload,
            message.attempt,
            Box::new(CountingAck(Arc::clone(acked))),
        )
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), BrokerError> {
        let mut topics = self.topics.lock().await;
        let state = topics.entry(topic.to_string()).or_default();
        push_bounded(&mut state.published, message.clone(), self.retention);

        if state.groups.is_empty() {
            if push_bounded(&mut state.backlog, message, self.retention) {
                warn!("Backlog of {} is full, dropped its oldest message", topic);
            }
            return Ok(());
        }

        let acked = Arc::clone(&state.acked);
        state.groups.retain(|group, queue| {
            let delivery = Self::delivery(topic, message.clone(), &acked);
            if queue.send(delivery).is_err() {
                warn!("Consumer group {} on {} is gone, removing it", group, topic);
                return false;
            }
            true
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::channel(prefetch.max(1));
        {
            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_string()).or_default();
            if state.groups.contains_key(group) {
                return Err(BrokerError::Subscribe {
                    topic: topic.to_string(),
                    reason: format!("group {} is already subscribed", group),
                });
            }
            for message in state.backlog.drain(..) {
                // the receiver is held below, so this cannot fail
                let _ = queue_tx.send(Self::delivery(topic, message, &state.acked));
            }
            state.groups.insert(group.to_string(), queue_tx);
        }

        tokio::spawn(async move {
            while let Some(delivery) = queue_rx.recv().await {
                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backlog_reaches_first_subscriber() {
        let broker = InMemoryBroker::new();
        broker.publish("t", OutboundMessage::new("k", "early")).await.unwrap();

        let mut rx = broker.subscribe("t", "g", 8).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload, "early");
        assert_eq!(delivery.key.as_deref(), Some("k"));
        assert_eq!(delivery.attempt, 0);
    }

    #[tokio::test]
    async fn each_group_gets_a_copy_and_acks_are_counted() {
        let broker = InMemoryBroker::new();
        let mut first = broker.subscribe("t", "a", 8).await.unwrap();
        let mut second = broker.subscribe("t", "b", 8).await.unwrap();

        broker
            .publish("t", OutboundMessage::new("k", "hello").with_attempt(2))
            .await
            .unwrap();

        let d1 = first.recv().await.unwrap();
        let d2 = second.recv().await.unwrap();
        assert_eq!(d1.payload, "hello");
        assert_eq!(d2.attempt, 2);

        d1.ack().unwrap();
        assert_eq!(broker.acked("t").await, 1);
        assert_eq!(broker.published("t").await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_group_subscription_is_rejected() {
        let broker = InMemoryBroker::new();
        let _rx = broker.subscribe("t", "g", 8).await.unwrap();
        assert!(matches!(
            broker.subscribe("t", "g", 8).await,
            Err(BrokerError::Subscribe { .. })
        ));
    }

    #[tokio::test]
    async fn publish_does_not_wait_for_slow_consumers() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("t", "g", 1).await.unwrap();

        for i in 0..5 {
            broker.publish("t", OutboundMessage::new("k", format!("m{}", i))).await.unwrap();
        }

        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload, format!("m{}", i));
        }
    }

    #[tokio::test]
    async fn retention_caps_log_and_backlog() {
        let broker = InMemoryBroker::with_retention(2);
        for i in 0..4 {
            broker.publish("t.dlq", OutboundMessage::new("k", format!("m{}", i))).await.unwrap();
        }

        let kept: Vec<String> = broker.published("t.dlq").await.into_iter().map(|m| m.payload).collect();
        assert_eq!(kept, vec!["m2", "m3"]);

        let mut rx = broker.subscribe("t.dlq", "g", 8).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, "m2");
        assert_eq!(rx.recv().await.unwrap().payload, "m3");
    }

    #[tokio::test]
    async fn dropped_group_is_removed() {
        let broker = InMemoryBroker::new();
        let rx = broker.subscribe("t", "g", 1).await.unwrap();
        drop(rx);

        broker.publish("t", OutboundMessage::new("k", "first")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        broker.publish("t", OutboundMessage::new("k", "second")).await.unwrap();

        // the group is gone, so the name can be taken again
        assert!(broker.subscribe("t", "g", 1).await.is_ok());
    }
}
