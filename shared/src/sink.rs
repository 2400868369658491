use async_trait::async_trait;
use tracing::{info, warn};

use crate::broker::Delivery;
use crate::consumer::{Disposition, MessageHandler};
use crate::messages::NotificationMessage;

/// Terminal consumer of the notification topic. Delivery channels
/// (email, SMS, push) hang off this point; for now it only logs.
#[derive(Debug, Clone, Default)]
pub struct NotificationLogger;

#[async_trait]
impl MessageHandler for NotificationLogger {
    async fn handle(&mut self, delivery: &Delivery) -> Disposition {
        match serde_json::from_str::<NotificationMessage>(&delivery.payload) {
            Ok(notification) => {
                info!(
                    transaction_id = %notification.transaction_id,
                    status = %notification.status,
                    timestamp = %notification.timestamp,
                    "NOTIFICATION: {}",
                    notification.message
                );
            }
            Err(e) => warn!("Dropping undecodable notification: {}", e),
        }
        Disposition::Ack
    }
}
