//! Resilient sink writer.
//!
//! Splits a sealed batch by partition key and writes one Parquet file per
//! group. Paths are deterministic per (writer, batch, group), so a retried
//! group overwrites its earlier attempt instead of adding a duplicate file.

use super::columnar::encode_parquet;
use super::store::PartitionStore;
use crate::buffer::Batch;
use crate::config::{Config, ParquetCompression};
use crate::error::SinkError;
use crate::metrics::IngestionMetrics;
use crate::partition::PartitionKey;
use crate::retry::RetryConfig;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How a failed write should be treated by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient errors outlasted the attempt ceiling
    Transient,
    /// Non-retryable error on the first occurrence
    Fatal,
}

/// Outcome of writing one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteResult {
    /// Every partition group was written
    Success {
        /// Dataset-relative paths, in partition key order
        paths: Vec<String>,
        /// Highest attempt count used by any group
        attempts: u32,
    },
    /// At least one group could not be written
    Failure {
        kind: FailureKind,
        error: SinkError,
        /// Groups that did land before the failure; their rows will be
        /// duplicated on redelivery
        written: Vec<String>,
    },
}

impl WriteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteResult::Success { .. })
    }

    /// Paths that were written, whatever the outcome.
    pub fn paths(&self) -> &[String] {
        match self {
            WriteResult::Success { paths, .. } => paths,
            WriteResult::Failure { written, .. } => written,
        }
    }
}

/// Writes batches to partitioned storage with bounded retries.
pub struct ResilientSinkWriter {
    store: Arc<dyn PartitionStore>,
    compression: ParquetCompression,
    retry: RetryConfig,
    write_timeout: Duration,
    writer_id: String,
    metrics: Option<Arc<IngestionMetrics>>,
}

impl ResilientSinkWriter {
    /// Create a writer with default retry policy and a 30 s write timeout.
    pub fn new(store: Arc<dyn PartitionStore>, compression: ParquetCompression) -> Self {
        Self {
            store,
            compression,
            retry: RetryConfig::default(),
            write_timeout: Duration::from_secs(30),
            writer_id: uuid::Uuid::new_v4().simple().to_string(),
            metrics: None,
        }
    }

    /// Create a writer using the storage and retry sections of `config`.
    pub fn from_config(store: Arc<dyn PartitionStore>, config: &Config) -> Self {
        Self::new(store, config.storage.compression.clone())
            .with_retry(RetryConfig::from(&config.retry))
            .with_write_timeout(Duration::from_millis(config.storage.write_timeout_ms))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override the generated writer id.
    pub fn with_writer_id(mut self, writer_id: impl Into<String>) -> Self {
        self.writer_id = writer_id.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }

    /// Dataset-relative path of group `seq` of batch `batch_id`.
    pub fn object_path(&self, batch_id: u64, key: &PartitionKey, seq: usize) -> String {
        format!(
            "{}/part-{}-{:010}-{:04}.parquet",
            key.path_segment(),
            self.writer_id,
            batch_id,
            seq
        )
    }

    /// Write every partition group of `batch`.
    ///
    /// Groups are written in key order and the first group that fails ends
    /// the write. Groups already written are not touched again.
    pub async fn write(&self, batch: &Batch) -> WriteResult {
        let start = Instant::now();
        let mut written = Vec::new();
        let mut max_attempts = 0;

        for (seq, (key, records)) in batch.partition_groups().into_iter().enumerate() {
            let path = self.object_path(batch.id(), &key, seq);

            let data = match encode_parquet(&records, &self.compression) {
                Ok(data) => data,
                Err(error) => {
                    return WriteResult::Failure {
                        kind: FailureKind::Fatal,
                        error,
                        written,
                    }
                }
            };
            let size = data.len();

            match self.write_group(&path, data).await {
                Ok(attempts) => {
                    debug!(
                        batch_id = batch.id(),
                        partition = %key,
                        rows = records.len(),
                        size_bytes = size,
                        attempts = attempts,
                        path = %path,
                        "Wrote partition file"
                    );
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_file_written(size);
                    }
                    max_attempts = max_attempts.max(attempts);
                    written.push(path);
                }
                Err((error, attempts)) => {
                    let (kind, error) = if error.is_retryable() {
                        (
                            FailureKind::Transient,
                            SinkError::RetriesExhausted {
                                attempts,
                                last_error: error.to_string(),
                            },
                        )
                    } else {
                        (FailureKind::Fatal, error)
                    };

                    warn!(
                        batch_id = batch.id(),
                        partition = %key,
                        path = %path,
                        attempts = attempts,
                        groups_written = written.len(),
                        error = %error,
                        "Partition write failed"
                    );
                    return WriteResult::Failure {
                        kind,
                        error,
                        written,
                    };
                }
            }
        }

        if !written.is_empty() {
            info!(
                batch_id = batch.id(),
                files = written.len(),
                rows = batch.record_count(),
                root = %self.store.root(),
                total_ms = start.elapsed().as_millis() as u64,
                "Batch written to storage"
            );
        }

        WriteResult::Success {
            paths: written,
            attempts: max_attempts,
        }
    }

    /// Put one group with retries; returns the attempts used.
    async fn write_group(&self, path: &str, data: Bytes) -> Result<u32, (SinkError, u32)> {
        let mut used = 0;
        self.retry
            .run(
                "partition_write",
                |attempt| {
                    used = attempt;
                    if attempt > 1 {
                        if let Some(ref metrics) = self.metrics {
                            metrics.record_write_retry();
                        }
                    }
                    self.put_with_timeout(path, data.clone())
                },
                SinkError::is_retryable,
            )
            .await?;
        Ok(used)
    }

    async fn put_with_timeout(&self, path: &str, data: Bytes) -> Result<(), SinkError> {
        match tokio::time::timeout(self.write_timeout, self.store.put_object(path, data)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Transient(format!(
                "Write to {} timed out after {}ms",
                path,
                self.write_timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchAccumulator;
    use crate::record::{OrderRecord, OrderStatus, SourcePosition, ValidatedRecord};
    use crate::sink::ObjectStoreSink;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(day: u32, offset: i64) -> ValidatedRecord {
        ValidatedRecord::new(
            OrderRecord {
                order_id: format!("o-{offset}"),
                customer_id: "c-1".into(),
                order_status: OrderStatus::Delivered,
                price: 42.5,
                order_purchase_timestamp: Some(format!("2018-03-{day:02} 10:22:00")),
                order_approved_at: None,
                order_delivered_carrier_date: None,
                order_delivered_customer_date: None,
                order_estimated_delivery_date: None,
            },
            PartitionKey::new(2018, 3, day),
            SourcePosition::new("orders", 0, offset),
            100,
        )
    }

    fn batch(days: &[u32]) -> Batch {
        let mut acc = BatchAccumulator::with_limits(10_000, usize::MAX, Duration::from_secs(60));
        for (offset, day) in days.iter().enumerate() {
            acc.offer(record(*day, offset as i64));
        }
        acc.seal().unwrap()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(Duration::from_millis(10), Duration::from_millis(50), 5).without_jitter()
    }

    /// Fails the first `failures` puts with `error`, then delegates.
    struct FlakyStore {
        inner: ObjectStoreSink,
        failures: AtomicU32,
        error: SinkError,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32, error: SinkError) -> Self {
            Self {
                inner: ObjectStoreSink::in_memory(),
                failures: AtomicU32::new(failures),
                error,
                calls: AtomicU32::new(0),
            }
        }

        async fn object_count(&self) -> usize {
            let objects: Vec<_> = self.inner.inner().list(None).try_collect().await.unwrap();
            objects.len()
        }
    }

    #[async_trait]
    impl PartitionStore for FlakyStore {
        async fn put_object(&self, path: &str, data: Bytes) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(self.error.clone());
            }
            self.inner.put_object(path, data).await
        }

        fn root(&self) -> String {
            "memory://flaky".into()
        }
    }

    struct HangingStore;

    #[async_trait]
    impl PartitionStore for HangingStore {
        async fn put_object(&self, _path: &str, _data: Bytes) -> Result<(), SinkError> {
            std::future::pending().await
        }

        fn root(&self) -> String {
            "memory://hanging".into()
        }
    }

    #[test]
    fn test_object_path_layout() {
        let writer = ResilientSinkWriter::new(
            Arc::new(ObjectStoreSink::in_memory()),
            ParquetCompression::Snappy,
        )
        .with_writer_id("w1");
        assert_eq!(
            writer.object_path(7, &PartitionKey::new(2018, 3, 15), 2),
            "year=2018/month=03/day=15/part-w1-0000000007-0002.parquet"
        );
    }

    #[test]
    fn test_writer_ids_are_unique() {
        let store: Arc<dyn PartitionStore> = Arc::new(ObjectStoreSink::in_memory());
        let a = ResilientSinkWriter::new(store.clone(), ParquetCompression::Snappy);
        let b = ResilientSinkWriter::new(store, ParquetCompression::Snappy);
        assert_ne!(a.writer_id(), b.writer_id());
    }

    #[tokio::test]
    async fn test_write_splits_by_partition() {
        let store = Arc::new(FlakyStore::new(0, SinkError::Transient("unused".into())));
        let writer = ResilientSinkWriter::new(store.clone(), ParquetCompression::Snappy)
            .with_writer_id("w1");

        let result = writer.write(&batch(&[15, 16, 15, 17])).await;

        match result {
            WriteResult::Success { paths, attempts } => {
                assert_eq!(attempts, 1);
                assert_eq!(
                    paths,
                    vec![
                        "year=2018/month=03/day=15/part-w1-0000000001-0000.parquet",
                        "year=2018/month=03/day=16/part-w1-0000000001-0001.parquet",
                        "year=2018/month=03/day=17/part-w1-0000000001-0002.parquet",
                    ]
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.object_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let store = Arc::new(FlakyStore::new(4, SinkError::Transient("503 Slow Down".into())));
        let metrics = Arc::new(IngestionMetrics::new().unwrap());
        let writer = ResilientSinkWriter::new(store.clone(), ParquetCompression::Snappy)
            .with_retry(fast_retry())
            .with_metrics(metrics.clone());

        let result = writer.write(&batch(&[15, 15])).await;

        assert!(matches!(result, WriteResult::Success { attempts: 5, .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
        assert_eq!(store.object_count().await, 1);
        assert_eq!(metrics.write_retries_total(), 4);
        assert_eq!(metrics.files_written_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let store = Arc::new(FlakyStore::new(10, SinkError::Transient("timeout".into())));
        let writer =
            ResilientSinkWriter::new(store.clone(), ParquetCompression::Snappy).with_retry(fast_retry());

        match writer.write(&batch(&[15])).await {
            WriteResult::Failure {
                kind,
                error,
                written,
            } => {
                assert_eq!(kind, FailureKind::Transient);
                assert!(matches!(error, SinkError::RetriesExhausted { attempts: 5, .. }));
                assert!(written.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
        assert_eq!(store.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let store = Arc::new(FlakyStore::new(1, SinkError::Permanent("AccessDenied".into())));
        let writer =
            ResilientSinkWriter::new(store.clone(), ParquetCompression::Snappy).with_retry(fast_retry());

        let result = writer.write(&batch(&[15, 16])).await;

        assert!(matches!(
            result,
            WriteResult::Failure {
                kind: FailureKind::Fatal,
                error: SinkError::Permanent(_),
                ..
            }
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let writer = ResilientSinkWriter::new(Arc::new(HangingStore), ParquetCompression::Snappy)
            .with_retry(RetryConfig::new(Duration::from_millis(10), Duration::from_millis(10), 2))
            .with_write_timeout(Duration::from_millis(100));

        match writer.write(&batch(&[15])).await {
            WriteResult::Failure { kind, error, .. } => {
                assert_eq!(kind, FailureKind::Transient);
                assert!(error.to_string().contains("timed out"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offsets_only_batch_writes_nothing() {
        let store = Arc::new(FlakyStore::new(0, SinkError::Transient("unused".into())));
        let writer = ResilientSinkWriter::new(store.clone(), ParquetCompression::Snappy);

        let mut acc = BatchAccumulator::with_limits(10, usize::MAX, Duration::from_secs(60));
        acc.skip(&SourcePosition::new("orders", 0, 3));
        let batch = acc.seal().unwrap();

        let result = writer.write(&batch).await;
        assert!(result.is_success());
        assert!(result.paths().is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }
}
