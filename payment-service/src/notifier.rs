use shared::{NotificationMessage, OutboundMessage, PaymentStatus, QueueBroker};
use std::sync::Arc;
use tracing::{error, info};

/// Publishes settlement outcomes to the notification topic.
///
/// Fire-and-forget: failures are logged and never reach the caller.
#[derive(Clone)]
pub struct Notifier {
    broker: Arc<dyn QueueBroker>,
    topic: String,
}

impl Notifier {
    pub fn new(broker: Arc<dyn QueueBroker>, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    pub async fn notify(&self, transaction_id: &str, status: PaymentStatus, message: impl Into<String>) {
        let notification = NotificationMessage::new(transaction_id, status, message);
        let json = match serde_json::to_string(&notification) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode notification for {}: {}", transaction_id, e);
                return;
            }
        };

        match self.broker.publish(&self.topic, OutboundMessage::new(transaction_id, json)).await {
            Ok(()) => info!("Sent notification: {} - {}", transaction_id, status),
            Err(e) => error!("Failed to send notification for {}: {}", transaction_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared::{BrokerError, Delivery, InMemoryBroker};
    use tokio::sync::mpsc;

    struct DownBroker;

    #[async_trait]
    impl QueueBroker for DownBroker {
        async fn publish(&self, topic: &str, _message: OutboundMessage) -> Result<(), BrokerError> {
            Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "broker down".to_string(),
            })
        }

        async fn subscribe(
            &self,
            topic: &str,
            _group: &str,
            _prefetch: usize,
        ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
            Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: "broker down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn publishes_notification_envelope() {
        let broker = InMemoryBroker::new();
        let notifier = Notifier::new(Arc::new(broker.clone()), "notes");

        notifier.notify("TXN-1", PaymentStatus::Completed, "done").await;

        let published = broker.published("notes").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, "TXN-1");
        let notification: NotificationMessage = serde_json::from_str(&published[0].payload).unwrap();
        assert_eq!(notification.status, PaymentStatus::Completed);
        assert_eq!(notification.message, "done");
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let notifier = Notifier::new(Arc::new(DownBroker), "notes");
        notifier.notify("TXN-1", PaymentStatus::Failed, "nope").await;
    }
}
