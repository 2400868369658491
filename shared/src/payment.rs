use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TransitionError;

/// Lifecycle of a payment.
///
/// ```text
/// PENDING --> PROCESSING --> COMPLETED
///    |                  \--> FAILED
///    \--> CANCELLED
/// ```
///
/// `COMPLETED`, `FAILED` and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Cancelled) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Edges an operator may take by hand. The rest belong to settlement,
    /// which owns the notification for them.
    pub fn allows_manual_transition(self, next: PaymentStatus) -> bool {
        matches!((self, next), (PaymentStatus::Pending, PaymentStatus::Cancelled))
    }

    pub fn transition_to(self, next: PaymentStatus) -> Result<PaymentStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown payment status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Inr,
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn as_str(self) -> &'static str {
        match self {
            Currency::Inr => "INR",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INR" => Ok(Currency::Inr),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            other => Err(format!("unsupported currency: {}", other)),
        }
    }
}

pub fn new_transaction_id() -> String {
    format!("TXN-{}", Uuid::new_v4())
}

/// Creation draft for a payment; everything a store needs to insert a
/// `PENDING` record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub transaction_id: String,
    pub sender_account: String,
    pub receiver_account: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub payment_method: Option<String>,
    pub description: Option<String>,
}

/// A stored payment. Also the payload of the submission and processing
/// topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: i64,
    pub transaction_id: String,
    pub sender_account: String,
    pub receiver_account: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    status: PaymentStatus,
    pub payment_method: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    version: i32,
}

impl PaymentRecord {
    /// Rebuilds a record loaded from a store.
    pub fn restore(
        id: i64,
        payment: NewPayment,
        status: PaymentStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: i32,
    ) -> Self {
        Self {
            id,
            transaction_id: payment.transaction_id,
            sender_account: payment.sender_account,
            receiver_account: payment.receiver_account,
            amount: payment.amount,
            currency: payment.currency,
            status,
            payment_method: payment.payment_method,
            description: payment.description,
            created_at,
            updated_at,
            version,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Optimistic-concurrency token; bumped by the store on every update.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transition(&mut self, next: PaymentStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition_to(next)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Listing criteria for [`crate::store::PaymentStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentFilter {
    All,
    Sender(String),
    Receiver(String),
    Status(PaymentStatus),
}

impl PaymentFilter {
    pub fn matches(&self, record: &PaymentRecord) -> bool {
        match self {
            PaymentFilter::All => true,
            PaymentFilter::Sender(account) => &record.sender_account == account,
            PaymentFilter::Receiver(account) => &record.receiver_account == account,
            PaymentFilter::Status(status) => record.status() == *status,
        }
    }
}
