use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{InMemoryBroker, InMemoryPaymentStore, KafkaBroker, PaymentStore, QueueBroker};
use std::sync::Arc;
use tracing::info;

use payment_service::api::{self, AppState};
use payment_service::config::{Args, BrokerKind, StoreKind};
use payment_service::pipeline::{Pipeline, PipelineSettings};
use payment_service::postgres::{self, PgPaymentStore};
use payment_service::service::PaymentService;
use payment_service::submitter::Submitter;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    args.validate()?;

    let store: Arc<dyn PaymentStore> = match args.store {
        StoreKind::Postgres => {
            info!("Running database migrations...");
            let mut conn = PgConnection::establish(&args.database_url)?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
            info!("Migrations completed successfully");

            let pool = postgres::connect(&args.database_url, args.database_max_connections).await?;
            Arc::new(PgPaymentStore::new(pool))
        }
        StoreKind::Memory => {
            info!("Using in-memory payment store");
            Arc::new(InMemoryPaymentStore::new())
        }
    };

    let broker: Arc<dyn QueueBroker> = match args.broker {
        BrokerKind::Kafka => Arc::new(KafkaBroker::new(args.kafka.clone())?),
        BrokerKind::Memory => {
            info!("Using in-memory broker");
            Arc::new(InMemoryBroker::new())
        }
    };

    let topics = args.topics();
    let settings = PipelineSettings {
        topics: topics.clone(),
        dispatcher_concurrency: args.dispatcher_concurrency,
        settlement_workers: args.settlement_workers,
        settlement: args.settlement_config(),
        retry: args.retry_policy(),
        seed: args.seed,
    };
    let mut pipeline = Pipeline::spawn(Arc::clone(&store), Arc::clone(&broker), settings).await?;
    if args.broker == BrokerKind::Memory {
        pipeline
            .attach_notification_logger(Arc::clone(&broker), &topics.notification, args.retry_policy())
            .await?;
    }

    let submitter = Submitter::new(Arc::clone(&store), broker, topics.submission);
    let app = api::create_router(AppState {
        service: PaymentService::new(store, submitter),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Payment service web server started on port {}", args.port);
    info!("Payment service ready to accept HTTP requests at http://0.0.0.0:{}/api/payments", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    pipeline.shutdown();
    Ok(())
}
