use anyhow::Result;
use clap::Parser;
use shared::{ConsumerPool, KafkaBroker, KafkaSettings, NotificationLogger, QueueBroker, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "notification-service")]
struct Args {
    #[command(flatten)]
    kafka: KafkaSettings,

    #[arg(long, default_value = shared::NOTIFICATION_TOPIC)]
    notification_topic: String,

    #[arg(long, default_value = "notification-service")]
    group: String,

    #[arg(long, env = "NOTIFICATION_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    #[arg(long, default_value_t = 5)]
    max_retries: u32,

    #[arg(long, default_value_t = 200)]
    retry_backoff_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let broker: Arc<dyn QueueBroker> = Arc::new(KafkaBroker::new(args.kafka)?);
    let retry = RetryPolicy {
        max_retries: args.max_retries,
        initial_backoff: Duration::from_millis(args.retry_backoff_ms),
        ..RetryPolicy::default()
    };

    info!(
        "Notification service listening on {} as {}",
        args.notification_topic, args.group
    );
    let pool = ConsumerPool::new("notification", Arc::clone(&broker), args.concurrency, retry);
    let notifications = broker
        .subscribe(&args.notification_topic, &args.group, pool.concurrency())
        .await?;

    tokio::select! {
        _ = pool.run(notifications, |_| NotificationLogger) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down notification service"),
    }
    Ok(())
}
