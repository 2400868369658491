use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::payment::{NewPayment, PaymentFilter, PaymentRecord, PaymentStatus};

/// Durable keyed storage for payment records.
///
/// Records are created once via [`PaymentStore::insert`] and afterwards
/// only change status through [`PaymentStore::update`], which is a
/// compare-and-set on [`PaymentRecord::version`].
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: NewPayment) -> Result<PaymentRecord, StoreError>;
    async fn get_by_id(&self, id: i64) -> Result<Option<PaymentRecord>, StoreError>;
    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<PaymentRecord>, StoreError>;
    /// Persists the record's status and `updated_at`. Fails with
    /// [`StoreError::Conflict`] if the stored version is no longer the
    /// one the record was read at.
    async fn update(&self, record: &PaymentRecord) -> Result<PaymentRecord, StoreError>;
    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>, StoreError>;
    async fn exists_by_id(&self, id: i64) -> Result<bool, StoreError>;
    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct Records {
    by_id: BTreeMap<i64, PaymentRecord>,
    by_transaction: HashMap<String, i64>,
    next_id: i64,
}

/// A thread-safe in-memory payment store.
///
/// Transaction ids stay reserved after a delete, so a transaction id is
/// unique for the lifetime of the store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPaymentStore {
    records: Arc<RwLock<Records>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: NewPayment) -> Result<PaymentRecord, StoreError> {
        let mut records = self.records.write().await;
        if records.by_transaction.contains_key(&payment.transaction_id) {
            return Err(StoreError::DuplicateTransaction(payment.transaction_id));
        }

        records.next_id += 1;
        let id = records.next_id;
        let now = Utc::now();
        let record = PaymentRecord::restore(id, payment, PaymentStatus::Pending, now, now, 0);

        records.by_transaction.insert(record.transaction_id.clone(), id);
        records.by_id.insert(id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<PaymentRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.by_id.get(&id).cloned())
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .by_transaction
            .get(transaction_id)
            .and_then(|id| records.by_id.get(id))
            .cloned())
    }

    async fn update(&self, record: &PaymentRecord) -> Result<PaymentRecord, StoreError> {
        let mut records = self.records.write().await;
        let stored = records
            .by_id
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.to_string()))?;

        if stored.version() != record.version() {
            return Err(StoreError::Conflict(record.transaction_id.clone()));
        }

        let mut updated = record.clone();
        updated.set_version(record.version() + 1);
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .by_id
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    async fn exists_by_id(&self, id: i64) -> Result<bool, StoreError> {
        let records = self.records.read().await;
        Ok(records.by_id.contains_key(&id))
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .by_id
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}
