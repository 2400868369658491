use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payment::PaymentStatus;

pub const SUBMISSION_TOPIC: &str = "payment.submission";
pub const PROCESSING_TOPIC: &str = "payment.processing";
pub const NOTIFICATION_TOPIC: &str = "payment.notification";

pub fn dead_letter_topic(topic: &str) -> String {
    format!("{}.dlq", topic)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub submission: String,
    pub processing: String,
    pub notification: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            submission: SUBMISSION_TOPIC.to_string(),
            processing: PROCESSING_TOPIC.to_string(),
            notification: NOTIFICATION_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(transaction_id: impl Into<String>, status: PaymentStatus, message: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Only the idempotency key is needed to settle a payment; the rest of
/// the snapshot is re-read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRef {
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub topic: String,
    pub key: Option<String>,
    pub payload: String,
    pub attempts: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_wire_shape() {
        let notification = NotificationMessage::new("TXN-1", PaymentStatus::Failed, "declined");
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["transactionId"], "TXN-1");
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["message"], "declined");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn transaction_ref_ignores_other_fields() {
        let payload = r#"{"id":3,"transactionId":"TXN-9","status":"PENDING","amount":"5"}"#;
        let reference: TransactionRef = serde_json::from_str(payload).unwrap();
        assert_eq!(reference.transaction_id, "TXN-9");
    }

    #[test]
    fn dead_letter_topic_appends_suffix() {
        assert_eq!(dead_letter_topic(PROCESSING_TOPIC), "payment.processing.dlq");
    }
}
