use thiserror::Error;

use crate::payment::PaymentStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal transition from {from} to {to}")]
pub struct TransitionError {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("payment not found: {0}")]
    NotFound(String),
    #[error("duplicate transaction id: {0}")]
    DuplicateTransaction(String),
    /// The record changed since it was read; the caller's copy is stale.
    #[error("concurrent update on payment {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("failed to acknowledge message: {0}")]
    Ack(String),
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Encode(e.to_string())
    }
}
