//! Worker-pool runtime for queue consumers.
//!
//! A [`ConsumerPool`] runs a fixed number of workers over one
//! subscription. Each worker owns its own [`MessageHandler`] and turns the
//! handler's [`Disposition`] into an acknowledgement, a delayed
//! republication with a bumped attempt counter, or a dead letter.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broker::{Delivery, OutboundMessage, QueueBroker};
use crate::messages::{dead_letter_topic, DeadLetter};

/// What a handler wants done with a delivery once it returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processed, or deliberately dropped.
    Ack,
    /// Transient failure; redeliver after backoff.
    Retry(String),
    /// Permanent failure; park on the dead-letter topic.
    DeadLetter(String),
}

#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, delivery: &Delivery) -> Disposition;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// `initial_backoff * 2^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

pub struct ConsumerPool {
    name: String,
    broker: Arc<dyn QueueBroker>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl ConsumerPool {
    pub fn new(name: impl Into<String>, broker: Arc<dyn QueueBroker>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            broker,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `concurrency` workers until the subscription closes. `factory`
    /// builds one handler per worker, keyed by worker index.
    pub async fn run<H, F>(self, receiver: mpsc::Receiver<Delivery>, mut factory: F)
    where
        H: MessageHandler + 'static,
        F: FnMut(usize) -> H + Send,
    {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = JoinSet::new();

        for index in 0..self.concurrency {
            let worker = Worker {
                pool: self.name.clone(),
                index,
                broker: Arc::clone(&self.broker),
                retry: self.retry,
            };
            let handler = factory(index);
            let receiver = Arc::clone(&receiver);
            workers.spawn(async move { worker.run(handler, receiver).await });
        }
        info!("Consumer pool {} started with {} workers", self.name, self.concurrency);

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Consumer pool {} lost a worker: {}", self.name, e);
            }
        }
        info!("Consumer pool {} stopped", self.name);
    }
}

struct Worker {
    pool: String,
    index: usize,
    broker: Arc<dyn QueueBroker>,
    retry: RetryPolicy,
}

impl Worker {
    async fn run<H: MessageHandler>(&self, mut handler: H, receiver: Arc<Mutex<mpsc::Receiver<Delivery>>>) {
        loop {
            let next = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };
            let Some(delivery) = next else {
                break;
            };

            let disposition = match AssertUnwindSafe(handler.handle(&delivery)).catch_unwind().await {
                Ok(disposition) => disposition,
                Err(_) => {
                    error!(
                        "Worker {}#{} panicked handling message on {}",
                        self.pool, self.index, delivery.topic
                    );
                    Disposition::DeadLetter("handler panicked".to_string())
                }
            };

            self.settle(delivery, disposition).await;
        }
        debug!("Worker {}#{} exiting", self.pool, self.index);
    }

    async fn settle(&self, delivery: Delivery, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.ack(&delivery),
            Disposition::Retry(reason) if self.retry.allows_retry(delivery.attempt) => {
                let backoff = self.retry.backoff(delivery.attempt);
                warn!(
                    "Retrying message on {} (attempt {}) in {:?}: {}",
                    delivery.topic,
                    delivery.attempt + 1,
                    backoff,
                    reason
                );
                tokio::time::sleep(backoff).await;

                let message = OutboundMessage::new(delivery.key.clone().unwrap_or_default(), delivery.payload.clone())
                    .with_attempt(delivery.attempt + 1);
                match self.broker.publish(&delivery.topic, message).await {
                    Ok(()) => self.ack(&delivery),
                    Err(e) => error!("Failed to requeue message, leaving it unacknowledged: {}", e),
                }
            }
            Disposition::Retry(reason) => {
                self.dead_letter(&delivery, format!("retries exhausted: {}", reason)).await;
            }
            Disposition::DeadLetter(reason) => self.dead_letter(&delivery, reason).await,
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: String) {
        let topic = dead_letter_topic(&delivery.topic);
        error!("Dead-lettering message from {} to {}: {}", delivery.topic, topic, reason);

        let letter = DeadLetter {
            topic: delivery.topic.clone(),
            key: delivery.key.clone(),
            payload: delivery.payload.clone(),
            attempts: delivery.attempt + 1,
            reason,
            failed_at: Utc::now(),
        };
        let json = match serde_json::to_string(&letter) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode dead letter: {}", e);
                return;
            }
        };

        let message = OutboundMessage::new(delivery.key.clone().unwrap_or_default(), json);
        match self.broker.publish(&topic, message).await {
            Ok(()) => self.ack(delivery),
            Err(e) => error!("Failed to dead-letter message, leaving it unacknowledged: {}", e),
        }
    }

    fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack() {
            error!("Error committing message: {}", e);
        }
    }
}
