//! Partitioned Parquet storage.

pub mod columnar;
mod store;
mod writer;

pub use store::{classify, ObjectStoreSink, PartitionStore};
pub use writer::{FailureKind, ResilientSinkWriter, WriteResult};
