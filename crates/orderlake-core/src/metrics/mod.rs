//! Ingestion metrics.

mod prometheus;

pub use self::prometheus::{IngestionMetrics, RejectReason};
