use shared::{PaymentFilter, PaymentRecord, PaymentStatus, PaymentStore, TransitionError};
use std::sync::Arc;
use tracing::info;

use crate::error::PaymentError;
use crate::submitter::{PaymentRequest, Submitter};

/// Query and administration surface over the record store. Creation goes
/// through the submitter so every new payment is queued.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    submitter: Submitter,
}

impl PaymentService {
    pub fn new(store: Arc<dyn PaymentStore>, submitter: Submitter) -> Self {
        Self { store, submitter }
    }

    pub async fn create(&self, request: PaymentRequest) -> Result<PaymentRecord, PaymentError> {
        request.validate()?;
        self.submitter.submit(request).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<PaymentRecord, PaymentError> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("id {}", id)))
    }

    pub async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<PaymentRecord, PaymentError> {
        self.store
            .get_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", transaction_id)))
    }

    pub async fn list(&self, filter: &PaymentFilter) -> Result<Vec<PaymentRecord>, PaymentError> {
        Ok(self.store.list(filter).await?)
    }

    /// Manual status change, limited to cancelling a payment that has not
    /// been claimed. The write loses to a concurrent settlement rather than
    /// overwriting it.
    pub async fn update_status(&self, id: i64, status: PaymentStatus) -> Result<PaymentRecord, PaymentError> {
        let mut record = self.get_by_id(id).await?;
        if !record.status().allows_manual_transition(status) {
            return Err(TransitionError {
                from: record.status(),
                to: status,
            }
            .into());
        }
        record.transition(status)?;
        let saved = self.store.update(&record).await?;
        info!("Payment {} status updated to {}", saved.transaction_id, status);
        Ok(saved)
    }

    pub async fn delete(&self, id: i64) -> Result<(), PaymentError> {
        self.store.delete_by_id(id).await?;
        info!("Payment {} deleted", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use shared::{Currency, InMemoryBroker, InMemoryPaymentStore};
    use std::str::FromStr;

    fn service() -> (PaymentService, InMemoryBroker) {
        let store: Arc<dyn PaymentStore> = Arc::new(InMemoryPaymentStore::new());
        let broker = InMemoryBroker::new();
        let submitter = Submitter::new(store.clone(), Arc::new(broker.clone()), "submission");
        (PaymentService::new(store, submitter), broker)
    }

    fn service_with_store() -> (PaymentService, InMemoryPaymentStore) {
        let store = InMemoryPaymentStore::new();
        let submitter = Submitter::new(Arc::new(store.clone()), Arc::new(InMemoryBroker::new()), "submission");
        (PaymentService::new(Arc::new(store.clone()), submitter), store)
    }

    fn request(sender: &str) -> PaymentRequest {
        PaymentRequest {
            sender_account: sender.to_string(),
            receiver_account: "0987654321".to_string(),
            amount: BigDecimal::from_str("250.50").unwrap(),
            currency: Currency::Usd,
            payment_method: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn invalid_request_is_neither_stored_nor_queued() {
        let (service, broker) = service();
        let err = service.create(request("123")).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert!(service.list(&PaymentFilter::All).await.unwrap().is_empty());
        assert!(broker.published("submission").await.is_empty());
    }

    #[tokio::test]
    async fn lookups_and_filters() {
        let (service, _broker) = service();
        let first = service.create(request("1111111111")).await.unwrap();
        service.create(request("2222222222")).await.unwrap();

        assert_eq!(service.get_by_id(first.id).await.unwrap().transaction_id, first.transaction_id);
        assert_eq!(service.get_by_transaction_id(&first.transaction_id).await.unwrap().id, first.id);
        assert!(matches!(service.get_by_id(99).await, Err(PaymentError::NotFound(_))));

        let by_sender = service
            .list(&PaymentFilter::Sender("1111111111".to_string()))
            .await
            .unwrap();
        assert_eq!(by_sender.len(), 1);
        let pending = service.list(&PaymentFilter::Status(PaymentStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[tokio::test]
    async fn status_updates_follow_the_state_machine() {
        let (service, _broker) = service();
        let record = service.create(request("1111111111")).await.unwrap();

        let err = service.update_status(record.id, PaymentStatus::Completed).await.unwrap_err();
        assert!(matches!(err, PaymentError::IllegalTransition(_)));

        let cancelled = service.update_status(record.id, PaymentStatus::Cancelled).await.unwrap();
        assert_eq!(cancelled.status(), PaymentStatus::Cancelled);

        let err = service.update_status(record.id, PaymentStatus::Pending).await.unwrap_err();
        assert!(matches!(err, PaymentError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn pipeline_edges_cannot_be_taken_by_hand() {
        let (service, store) = service_with_store();
        let record = service.create(request("1111111111")).await.unwrap();

        let err = service.update_status(record.id, PaymentStatus::Processing).await.unwrap_err();
        assert!(matches!(err, PaymentError::IllegalTransition(_)));

        // a record a worker has claimed
        let mut claimed = store.get_by_id(record.id).await.unwrap().unwrap();
        claimed.transition(PaymentStatus::Processing).unwrap();
        store.update(&claimed).await.unwrap();

        for status in [PaymentStatus::Completed, PaymentStatus::Failed, PaymentStatus::Cancelled] {
            let err = service.update_status(record.id, status).await.unwrap_err();
            assert!(matches!(err, PaymentError::IllegalTransition(_)));
        }
        let stored = service.get_by_id(record.id).await.unwrap();
        assert_eq!(stored.status(), PaymentStatus::Processing);
    }

    #[tokio::test]
    async fn delete_missing_payment_is_not_found() {
        let (service, _broker) = service();
        let record = service.create(request("1111111111")).await.unwrap();

        service.delete(record.id).await.unwrap();
        assert!(matches!(service.delete(record.id).await, Err(PaymentError::NotFound(_))));
    }
}
