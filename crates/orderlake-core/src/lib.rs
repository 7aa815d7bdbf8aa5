//! Orderlake Core - streaming order ingestion from Kafka to partitioned Parquet
//!
//! This library consumes order events from Apache Kafka and writes them as
//! Parquet files laid out by business date (`year=/month=/day=`) with:
//!
//! - Schema validation against a registry, with poison messages dropped
//! - Batching on record count, size or linger time
//! - Bounded retries with exponential backoff on storage writes
//! - At-least-once delivery: offsets commit only after their batch is durable

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod partition;
pub mod record;
pub mod retry;
pub mod schema;
pub mod sink;

// Re-export commonly used types
pub use config::Config;
pub use engine::IngestionEngine;
pub use error::{DerivationError, KafkaError, RegistryError, SinkError, ValidationError};
pub use error::{Error, Result};
pub use partition::PartitionKey;
pub use record::{OrderRecord, OrderStatus, ValidatedRecord};
