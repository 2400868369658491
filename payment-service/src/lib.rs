//! Payment acceptance and asynchronous settlement.
//!
//! Payments are accepted over HTTP, written as `PENDING`, and queued on the
//! submission topic. The dispatcher relays them to the processing topic
//! where a fixed pool of settlement workers claims, settles and notifies.

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod postgres;
pub mod schema;
pub mod service;
pub mod settlement;
pub mod submitter;
