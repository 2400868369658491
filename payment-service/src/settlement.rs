//! Settlement worker pool.
//!
//! Each worker consumes processing messages, claims the payment by moving
//! it `PENDING -> PROCESSING` with a versioned write, runs the simulated
//! settlement call, records `COMPLETED` or `FAILED` and notifies. Every
//! worker owns its random source, seeded per worker when a base seed is
//! configured.
//!
//! Duplicate deliveries are no-ops: a record that is already terminal, or
//! already claimed, is acknowledged without any write or notification.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    Delivery, Disposition, MessageHandler, PaymentRecord, PaymentStatus, PaymentStore, RetryPolicy, StoreError,
    TransactionRef,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::notifier::Notifier;

pub const FAILURE_MESSAGE: &str = "Payment processing failed. Please contact support.";
pub const TIMEOUT_MESSAGE: &str = "Payment settlement timed out. Please contact support.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementConfig {
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Chance in `[0, 1]` that a settlement succeeds.
    pub success_probability: f64,
    /// Hard upper bound on one settlement call; expiry fails the payment.
    pub timeout: Option<Duration>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_secs(2),
            max_latency: Duration::from_secs(5),
            success_probability: 0.9,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub latency: Duration,
    pub success: bool,
}

impl SettlementConfig {
    /// Placeholder for the real risk/ledger decision.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> Draw {
        let latency = if self.max_latency > self.min_latency {
            rng.gen_range(self.min_latency..=self.max_latency)
        } else {
            self.min_latency
        };
        let success = rng.gen_bool(self.success_probability.clamp(0.0, 1.0));
        Draw { latency, success }
    }
}

/// Counters for the pool. `peak` is the highest number of settlements
/// that were ever simulated at the same time.
#[derive(Debug, Default)]
pub struct SettlementStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl SettlementStats {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveSettlement<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveSettlement(self)
    }
}

struct ActiveSettlement<'a>(&'a SettlementStats);

impl Drop for ActiveSettlement<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

enum Outcome {
    Settled,
    Declined,
    TimedOut,
}

/// Everything the workers of one pool share. Builds the per-worker
/// handlers.
#[derive(Clone)]
pub struct SettlementContext {
    pub store: Arc<dyn PaymentStore>,
    pub notifier: Notifier,
    pub config: SettlementConfig,
    pub write_retry: RetryPolicy,
    pub stats: Arc<SettlementStats>,
    pub seed: Option<u64>,
}

impl SettlementContext {
    pub fn worker(&self, index: usize) -> SettlementWorker {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        };
        SettlementWorker {
            index,
            context: self.clone(),
            rng,
        }
    }
}

pub struct SettlementWorker {
    index: usize,
    context: SettlementContext,
    rng: StdRng,
}

#[async_trait]
impl MessageHandler for SettlementWorker {
    async fn handle(&mut self, delivery: &Delivery) -> Disposition {
        let transaction_id = match serde_json::from_str::<TransactionRef>(&delivery.payload) {
            Ok(reference) => reference.transaction_id,
            Err(e) => {
                warn!("Dropping undecodable processing message: {}", e);
                return Disposition::Ack;
            }
        };
        info!("Processing payment in worker {}: {}", self.index, transaction_id);

        let record = match self.context.store.get_by_transaction_id(&transaction_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Payment not found in database: {}", transaction_id);
                return Disposition::Ack;
            }
            Err(e) => return Disposition::Retry(e.to_string()),
        };

        match record.status() {
            PaymentStatus::Pending => {}
            status if status.is_terminal() => {
                info!("Payment {} already {}, skipping duplicate delivery", transaction_id, status);
                return Disposition::Ack;
            }
            status => {
                warn!("Payment {} is already {}, another delivery owns it", transaction_id, status);
                return Disposition::Ack;
            }
        }

        match self.claim(record).await {
            Ok(Some(record)) => self.settle(record).await,
            Ok(None) => Disposition::Ack,
            Err(e) => Disposition::Retry(e.to_string()),
        }
    }
}

impl SettlementWorker {
    /// Moves the record to `PROCESSING`. `None` means another delivery won
    /// the race or the record disappeared.
    async fn claim(&self, mut record: PaymentRecord) -> Result<Option<PaymentRecord>, StoreError> {
        if let Err(e) = record.transition(PaymentStatus::Processing) {
            warn!("Cannot claim payment {}: {}", record.transaction_id, e);
            return Ok(None);
        }

        match self.context.store.update(&record).await {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::Conflict(_)) => {
                info!("Payment {} was claimed concurrently, dropping duplicate", record.transaction_id);
                Ok(None)
            }
            Err(StoreError::NotFound(_)) => {
                warn!("Payment {} disappeared before it could be claimed", record.transaction_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn settle(&mut self, mut record: PaymentRecord) -> Disposition {
        let stats = Arc::clone(&self.context.stats);
        let outcome = {
            let _active = stats.enter();
            self.simulate().await
        };

        let (status, message) = match outcome {
            Outcome::Settled => (
                PaymentStatus::Completed,
                format!(
                    "Payment of {} {} from {} to {} completed successfully",
                    record.amount, record.currency, record.sender_account, record.receiver_account
                ),
            ),
            Outcome::Declined => (PaymentStatus::Failed, FAILURE_MESSAGE.to_string()),
            Outcome::TimedOut => (PaymentStatus::Failed, TIMEOUT_MESSAGE.to_string()),
        };

        if let Err(e) = record.transition(status) {
            error!("Cannot settle payment {}: {}", record.transaction_id, e);
            return Disposition::DeadLetter(e.to_string());
        }

        match self.persist(&record).await {
            Ok(saved) => {
                if status == PaymentStatus::Completed {
                    self.context.stats.completed.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "Payment COMPLETED: {} | Amount: {} {}",
                        saved.transaction_id, saved.amount, saved.currency
                    );
                } else {
                    self.context.stats.failed.fetch_add(1, Ordering::SeqCst);
                    error!("Payment FAILED: {}", saved.transaction_id);
                }
                self.context.notifier.notify(&saved.transaction_id, status, message).await;
                Disposition::Ack
            }
            Err(StoreError::Conflict(_)) => {
                warn!(
                    "Payment {} changed while settling, keeping the stored state",
                    record.transaction_id
                );
                Disposition::Ack
            }
            Err(e) => {
                error!(
                    "Payment {} is stuck in PROCESSING, could not record {}: {}",
                    record.transaction_id, status, e
                );
                Disposition::DeadLetter(format!("failed to record {}: {}", status, e))
            }
        }
    }

    /// Stands in for the downstream settlement call.
    async fn simulate(&mut self) -> Outcome {
        let draw = self.context.config.draw(&mut self.rng);
        let call = tokio::time::sleep(draw.latency);

        match self.context.config.timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, call).await.is_err() {
                    return Outcome::TimedOut;
                }
            }
            None => call.await,
        }

        if draw.success {
            Outcome::Settled
        } else {
            Outcome::Declined
        }
    }

    async fn persist(&self, record: &PaymentRecord) -> Result<PaymentRecord, StoreError> {
        let policy = self.context.write_retry;
        let mut attempt = 0;
        loop {
            match self.context.store.update(record).await {
                Err(StoreError::Backend(reason)) if policy.allows_retry(attempt) => {
                    warn!(
                        "Retrying write for payment {} ({}): {}",
                        record.transaction_id,
                        attempt + 1,
                        reason
                    );
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
