use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::Deserialize;
use shared::{new_transaction_id, Currency, NewPayment, OutboundMessage, PaymentRecord, PaymentStore, QueueBroker};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{FieldErrors, PaymentError};

const MAX_AMOUNT: i64 = 1_000_000;
const MAX_PAYMENT_METHOD_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub sender_account: String,
    pub receiver_account: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub payment_method: Option<String>,
    pub description: Option<String>,
}

fn valid_account(account: &str) -> bool {
    (10..=20).contains(&account.len()) && account.bytes().all(|b| b.is_ascii_digit())
}

impl PaymentRequest {
    /// Checks every field and reports each invalid one, keyed by its wire
    /// name.
    pub fn validate(&self) -> Result<(), PaymentError> {
        let mut errors = FieldErrors::new();
        let mut reject = |field: &str, msg: &str| {
            errors.insert(field.to_string(), msg.to_string());
        };

        if !valid_account(&self.sender_account) {
            reject("senderAccount", "must be 10 to 20 digits");
        }
        if !valid_account(&self.receiver_account) {
            reject("receiverAccount", "must be 10 to 20 digits");
        }
        let (_, scale) = self.amount.as_bigint_and_exponent();
        if self.amount <= BigDecimal::zero() {
            reject("amount", "must be greater than 0");
        } else if self.amount > BigDecimal::from(MAX_AMOUNT) {
            reject("amount", "exceeds maximum limit");
        } else if scale > 2 {
            reject("amount", "has more than 2 decimal places");
        }
        if self.payment_method.as_ref().is_some_and(|m| m.chars().count() > MAX_PAYMENT_METHOD_LEN) {
            reject("paymentMethod", "is too long");
        }
        if self.description.as_ref().is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
            reject("description", "is too long");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PaymentError::Validation(errors))
        }
    }
}

/// Accepts payments: one store row, then one submission message.
#[derive(Clone)]
pub struct Submitter {
    store: Arc<dyn PaymentStore>,
    broker: Arc<dyn QueueBroker>,
    topic: String,
}

impl Submitter {
    pub fn new(store: Arc<dyn PaymentStore>, broker: Arc<dyn QueueBroker>, topic: impl Into<String>) -> Self {
        Self {
            store,
            broker,
            topic: topic.into(),
        }
    }

    /// Writes the `PENDING` record before publishing, so any consumer that
    /// sees the message can find the record.
    pub async fn submit(&self, request: PaymentRequest) -> Result<PaymentRecord, PaymentError> {
        info!(
            "Creating payment from {} to {}",
            request.sender_account, request.receiver_account
        );

        let payment = NewPayment {
            transaction_id: new_transaction_id(),
            sender_account: request.sender_account,
            receiver_account: request.receiver_account,
            amount: request.amount,
            currency: request.currency,
            payment_method: request.payment_method,
            description: request.description,
        };

        let record = self.store.insert(payment).await?;
        info!(
            "Payment created with ID: {} and Transaction ID: {}",
            record.id, record.transaction_id
        );

        let json = serde_json::to_string(&record).map_err(shared::BrokerError::from)?;
        if let Err(e) = self
            .broker
            .publish(&self.topic, OutboundMessage::new(&record.transaction_id, json))
            .await
        {
            error!(
                "Payment {} stored but not queued, it stays PENDING: {}",
                record.transaction_id, e
            );
            return Err(e.into());
        }
        info!("Sent payment message to queue: Transaction ID = {}", record.transaction_id);

        Ok(record)
    }
}
