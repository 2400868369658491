//! Payment domain model and queue plumbing shared by the payment
//! services.

pub mod broker;
pub mod consumer;
pub mod error;
pub mod kafka;
pub mod messages;
pub mod payment;
pub mod sink;
pub mod store;

pub use broker::{Acknowledge, Delivery, InMemoryBroker, OutboundMessage, QueueBroker};
pub use consumer::{ConsumerPool, Disposition, MessageHandler, RetryPolicy};
pub use error::{BrokerError, StoreError, TransitionError};
pub use kafka::{KafkaBroker, KafkaSettings};
pub use messages::*;
pub use payment::*;
pub use sink::NotificationLogger;
pub use store::{InMemoryPaymentStore, PaymentStore};
