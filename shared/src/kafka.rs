use async_trait::async_trait;
use clap::Args;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, Offset, TopicPartitionList};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::broker::{Acknowledge, Delivery, OutboundMessage, QueueBroker};
use crate::error::BrokerError;

pub const ATTEMPT_HEADER: &str = "x-attempt";

/// Connection settings shared by every producer and consumer.
#[derive(Clone, Args)]
pub struct KafkaSettings {
    #[arg(long = "kafka-brokers", env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub brokers: String,

    /// e.g. `SASL_SSL`
    #[arg(long = "kafka-security-protocol", env = "KAFKA_SECURITY_PROTOCOL")]
    pub security_protocol: Option<String>,

    /// e.g. `PLAIN` or `SCRAM-SHA-512`
    #[arg(long = "kafka-sasl-mechanism", env = "KAFKA_SASL_MECHANISM")]
    pub sasl_mechanism: Option<String>,

    #[arg(long = "kafka-username", env = "KAFKA_USERNAME")]
    pub username: Option<String>,

    #[arg(long = "kafka-password", env = "KAFKA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl fmt::Debug for KafkaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaSettings")
            .field("brokers", &self.brokers)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl KafkaSettings {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            security_protocol: None,
            sasl_mechanism: None,
            username: None,
            password: None,
        }
    }

    /// Base client configuration; callers add producer or consumer keys.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);

        let optional = [
            ("security.protocol", &self.security_protocol),
            ("sasl.mechanism", &self.sasl_mechanism),
            ("sasl.username", &self.username),
            ("sasl.password", &self.password),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                config.set(key, value);
            }
        }
        config
    }
}

/// Kafka-backed broker.
///
/// Offsets are committed only when a delivery is acknowledged, so a crash
/// before ack redelivers.
pub struct KafkaBroker {
    settings: KafkaSettings,
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaBroker {
    pub fn new(settings: KafkaSettings) -> Result<Self, BrokerError> {
        let producer: FutureProducer = settings
            .client_config()
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BrokerError::Publish {
                topic: "*".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            settings,
            producer,
            send_timeout: Duration::from_secs(5),
        })
    }
}

struct OffsetAck {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
}

impl Acknowledge for OffsetAck {
    fn ack(&self) -> Result<(), BrokerError> {
        let mut next = TopicPartitionList::new();
        next.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(|e| BrokerError::Ack(e.to_string()))?;
        self.consumer
            .commit(&next, CommitMode::Async)
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}

fn attempt_of<M: Message>(message: &M) -> u32 {
    message
        .headers()
        .and_then(|headers| headers.iter().find(|h| h.key == ATTEMPT_HEADER))
        .and_then(|h| h.value)
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl QueueBroker for KafkaBroker {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), BrokerError> {
        let attempt = message.attempt.to_string();
        let headers = OwnedHeaders::new().insert(Header {
            key: ATTEMPT_HEADER,
            value: Some(attempt.as_str()),
        });
        let record = FutureRecord::to(topic)
            .payload(&message.payload)
            .key(&message.key)
            .headers(headers);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        let subscribe_error = |reason: String| BrokerError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        let consumer: StreamConsumer = self
            .settings
            .client_config()
            .set("group.id", group)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| subscribe_error(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| subscribe_error(e.to_string()))?;
        info!("Subscribed group {} to {}", group, topic);

        let consumer = Arc::new(consumer);
        // keep the stream polled: only `prefetch` messages wait ahead of the workers
        let (tx, rx) = mpsc::channel(prefetch.max(1));
        let topic = topic.to_string();

        tokio::spawn(async move {
            let mut message_stream = consumer.stream();

            while let Some(message) = message_stream.next().await {
                let m = match message {
                    Ok(m) => m,
                    Err(e) => {
                        error!("Error receiving message from {}: {}", topic, e);
                        continue;
                    }
                };

                let acker = OffsetAck {
                    consumer: Arc::clone(&consumer),
                    topic: m.topic().to_string(),
                    partition: m.partition(),
                    offset: m.offset(),
                };

                let payload = match m.payload_view::<str>() {
                    Some(Ok(payload)) => payload.to_string(),
                    Some(Err(e)) => {
                        warn!("Dropping non-UTF-8 payload on {}: {}", topic, e);
                        if let Err(e) = acker.ack() {
                            error!("Error committing message: {}", e);
                        }
                        continue;
                    }
                    None => String::new(),
                };
                let key = m
                    .key_view::<str>()
                    .and_then(|k| k.ok())
                    .map(str::to_string);

                let delivery = Delivery::new(m.topic(), key, payload, attempt_of(&m), Box::new(acker));
                if tx.send(delivery).await.is_err() {
                    info!("Consumers of {} stopped, closing subscription", topic);
                    break;
                }
            }
        });

        Ok(rx)
    }
}
