use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{Currency, NewPayment, PaymentRecord, PaymentStatus, StoreError};

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::payments)]
pub struct PaymentRow {
    pub id: i64,
    pub transaction_id: String,
    pub sender_account: String,
    pub receiver_account: String,
    pub amount: bigdecimal::BigDecimal,
    pub currency: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub description: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewPaymentRow {
    pub transaction_id: String,
    pub sender_account: String,
    pub receiver_account: String,
    pub amount: bigdecimal::BigDecimal,
    pub currency: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub description: Option<String>,
}

impl From<&NewPayment> for NewPaymentRow {
    fn from(payment: &NewPayment) -> Self {
        Self {
            transaction_id: payment.transaction_id.clone(),
            sender_account: payment.sender_account.clone(),
            receiver_account: payment.receiver_account.clone(),
            amount: payment.amount.clone(),
            currency: payment.currency.as_str().to_string(),
            status: PaymentStatus::Pending.as_str().to_string(),
            payment_method: payment.payment_method.clone(),
            description: payment.description.clone(),
        }
    }
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |e: String| StoreError::Backend(format!("payment {}: {}", id, e));
        let currency: Currency = row.currency.parse().map_err(corrupt)?;
        let status: PaymentStatus = row.status.parse().map_err(corrupt)?;

        Ok(PaymentRecord::restore(
            row.id,
            NewPayment {
                transaction_id: row.transaction_id,
                sender_account: row.sender_account,
                receiver_account: row.receiver_account,
                amount: row.amount,
                currency,
                payment_method: row.payment_method,
                description: row.description,
            },
            status,
            row.created_at,
            row.updated_at,
            row.version,
        ))
    }
}
