use shared::{BrokerError, ConsumerPool, NotificationLogger, PaymentStore, QueueBroker, RetryPolicy, Topics};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::notifier::Notifier;
use crate::settlement::{SettlementConfig, SettlementContext, SettlementStats};

pub const DISPATCHER_GROUP: &str = "payment-dispatcher";
pub const SETTLEMENT_GROUP: &str = "payment-settlement";
pub const NOTIFICATION_GROUP: &str = "payment-notification";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub topics: Topics,
    pub dispatcher_concurrency: usize,
    pub settlement_workers: usize,
    pub settlement: SettlementConfig,
    pub retry: RetryPolicy,
    pub seed: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            topics: Topics::default(),
            dispatcher_concurrency: 1,
            settlement_workers: 5,
            settlement: SettlementConfig::default(),
            retry: RetryPolicy::default(),
            seed: None,
        }
    }
}

/// Running consumer stages. Dropping the handle leaves them running.
pub struct Pipeline {
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<SettlementStats>,
}

impl Pipeline {
    /// Subscribes the dispatcher and the settlement pool, then runs both in
    /// the background.
    pub async fn spawn(
        store: Arc<dyn PaymentStore>,
        broker: Arc<dyn QueueBroker>,
        settings: PipelineSettings,
    ) -> Result<Self, BrokerError> {
        let topics = &settings.topics;
        let stats = Arc::new(SettlementStats::default());

        let dispatcher = Dispatcher::new(Arc::clone(&broker), topics.processing.clone());
        let dispatch_pool = ConsumerPool::new(
            "dispatcher",
            Arc::clone(&broker),
            settings.dispatcher_concurrency,
            settings.retry,
        );

        let context = SettlementContext {
            store,
            notifier: Notifier::new(Arc::clone(&broker), topics.notification.clone()),
            config: settings.settlement,
            write_retry: settings.retry,
            stats: Arc::clone(&stats),
            seed: settings.seed,
        };
        let settlement_pool = ConsumerPool::new(
            "settlement",
            Arc::clone(&broker),
            settings.settlement_workers,
            settings.retry,
        );
        let submissions = broker
            .subscribe(&topics.submission, DISPATCHER_GROUP, dispatch_pool.concurrency())
            .await?;
        let processing = broker
            .subscribe(&topics.processing, SETTLEMENT_GROUP, settlement_pool.concurrency())
            .await?;
        info!(
            "Starting payment pipeline: {} -> {} with {} settlement workers",
            topics.submission,
            topics.processing,
            settlement_pool.concurrency()
        );

        let tasks = vec![
            tokio::spawn(dispatch_pool.run(submissions, move |_| dispatcher.clone())),
            tokio::spawn(settlement_pool.run(processing, move |index| context.worker(index))),
        ];

        Ok(Self { tasks, stats })
    }

    /// Runs the logging sink on the notification topic inside this process.
    /// Used when no separate notification service is deployed.
    pub async fn attach_notification_logger(
        &mut self,
        broker: Arc<dyn QueueBroker>,
        topic: &str,
        retry: RetryPolicy,
    ) -> Result<(), BrokerError> {
        let pool = ConsumerPool::new("notification", Arc::clone(&broker), 1, retry);
        let notifications = broker.subscribe(topic, NOTIFICATION_GROUP, pool.concurrency()).await?;
        self.tasks
            .push(tokio::spawn(pool.run(notifications, |_| NotificationLogger)));
        Ok(())
    }

    pub fn stats(&self) -> Arc<SettlementStats> {
        Arc::clone(&self.stats)
    }

    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        info!("Payment pipeline stopped");
    }
}
