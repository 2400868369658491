use async_trait::async_trait;
use shared::{Delivery, Disposition, MessageHandler, OutboundMessage, PaymentRecord, QueueBroker};
use std::sync::Arc;
use tracing::{info, warn};

/// Relays accepted payments from the submission topic to the processing
/// topic, decoupling acceptance from settlement capacity. Routing such as
/// priority lanes belongs here.
#[derive(Clone)]
pub struct Dispatcher {
    broker: Arc<dyn QueueBroker>,
    processing_topic: String,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn QueueBroker>, processing_topic: impl Into<String>) -> Self {
        Self {
            broker,
            processing_topic: processing_topic.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&mut self, delivery: &Delivery) -> Disposition {
        let payment = match serde_json::from_str::<PaymentRecord>(&delivery.payload) {
            Ok(payment) => payment,
            Err(e) => {
                // nothing has happened to the payment yet, so dropping is safe
                warn!("Dropping undecodable submission message: {}", e);
                return Disposition::Ack;
            }
        };

        let message = OutboundMessage::new(&payment.transaction_id, delivery.payload.as_str());
        match self.broker.publish(&self.processing_topic, message).await {
            Ok(()) => {
                info!("Sent payment to processing queue: Transaction ID = {}", payment.transaction_id);
                Disposition::Ack
            }
            Err(e) => Disposition::Retry(e.to_string()),
        }
    }
}
