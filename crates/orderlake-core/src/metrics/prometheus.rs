//! Prometheus metrics export.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Histogram bucket boundaries in seconds for batch write duration.
/// Retried writes back off for several seconds, hence the long tail.
const WRITE_DURATION_BUCKETS: [f64; 10] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Reason a message was dropped instead of buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Payload failed schema validation
    Validation,
    /// Partition key could not be derived
    Derivation,
}

impl RejectReason {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            RejectReason::Validation => "validation",
            RejectReason::Derivation => "derivation",
        }
    }
}

/// Ingestion metrics with counters, gauges, and histograms.
pub struct IngestionMetrics {
    registry: Registry,

    // === COUNTERS ===
    messages_total: IntCounter,
    records_accepted_total: IntCounter,
    records_rejected_total: IntCounterVec,
    batches_sealed_total: IntCounter,
    batches_written_total: IntCounter,
    batches_failed_total: IntCounter,
    write_retries_total: IntCounter,
    files_written_total: IntCounter,
    bytes_written_total: IntCounter,
    offset_commits_total: IntCounter,
    offset_commit_failures_total: IntCounter,

    // === GAUGES ===
    open_batch_records: IntGauge,

    // === HISTOGRAMS ===
    batch_write_duration_seconds: Histogram,
}

impl IngestionMetrics {
    /// Create metrics registered in a fresh registry.
    pub fn new() -> crate::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered in `registry`.
    pub fn with_registry(registry: Registry) -> crate::Result<Self> {
        let counter = |name: &str, help: &str| -> crate::Result<IntCounter> {
            let c = IntCounter::new(format!("orderlake_{}", name), help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let messages_total = counter("messages_total", "Messages consumed from Kafka")?;
        let records_accepted_total =
            counter("records_accepted_total", "Records accepted into a batch")?;
        let batches_sealed_total = counter("batches_sealed_total", "Batches sealed")?;
        let batches_written_total =
            counter("batches_written_total", "Batches durably written")?;
        let batches_failed_total =
            counter("batches_failed_total", "Batches abandoned after a fatal write error")?;
        let write_retries_total =
            counter("write_retries_total", "Partition file write retries")?;
        let files_written_total = counter("files_written_total", "Parquet files written")?;
        let bytes_written_total = counter("bytes_written_total", "Parquet bytes written")?;
        let offset_commits_total =
            counter("offset_commits_total", "Successful Kafka offset commits")?;
        let offset_commit_failures_total =
            counter("offset_commit_failures_total", "Failed Kafka offset commits")?;

        let records_rejected_total = IntCounterVec::new(
            Opts::new(
                "orderlake_records_rejected_total",
                "Messages dropped as poison, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(records_rejected_total.clone()))?;

        let open_batch_records = IntGauge::new(
            "orderlake_open_batch_records",
            "Records in the batch currently accumulating",
        )?;
        registry.register(Box::new(open_batch_records.clone()))?;

        let batch_write_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "orderlake_batch_write_duration_seconds",
                "Time to durably write one batch, retries included",
            )
            .buckets(WRITE_DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(batch_write_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            records_accepted_total,
            records_rejected_total,
            batches_sealed_total,
            batches_written_total,
            batches_failed_total,
            write_retries_total,
            files_written_total,
            bytes_written_total,
            offset_commits_total,
            offset_commit_failures_total,
            open_batch_records,
            batch_write_duration_seconds,
        })
    }

    // === COUNTER RECORDING ===

    /// Record messages consumed.
    pub fn record_messages(&self, count: u64) {
        self.messages_total.inc_by(count);
    }

    /// Record a record accepted into the open batch.
    pub fn record_accepted(&self) {
        self.records_accepted_total.inc();
    }

    /// Record a dropped message.
    pub fn record_rejected(&self, reason: RejectReason) {
        self.records_rejected_total
            .with_label_values(&[reason.as_label()])
            .inc();
    }

    pub fn record_batch_sealed(&self) {
        self.batches_sealed_total.inc();
    }

    /// Record a durably written batch.
    pub fn record_batch_written(&self, duration: Duration) {
        self.batches_written_total.inc();
        self.batch_write_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record an abandoned batch.
    pub fn record_batch_failed(&self, duration: Duration) {
        self.batches_failed_total.inc();
        self.batch_write_duration_seconds
            .observe(duration.as_secs_f64());
    }

    pub fn record_write_retry(&self) {
        self.write_retries_total.inc();
    }

    /// Record one Parquet file of `bytes` written.
    pub fn record_file_written(&self, bytes: usize) {
        self.files_written_total.inc();
        self.bytes_written_total.inc_by(bytes as u64);
    }

    pub fn record_commit(&self) {
        self.offset_commits_total.inc();
    }

    pub fn record_commit_failure(&self) {
        self.offset_commit_failures_total.inc();
    }

    // === GAUGE UPDATES ===

    /// Update the open batch record count.
    pub fn set_open_batch_records(&self, count: usize) {
        self.open_batch_records.set(count as i64);
    }

    // === GETTERS ===

    pub fn messages_total(&self) -> u64 {
        self.messages_total.get()
    }

    pub fn records_accepted_total(&self) -> u64 {
        self.records_accepted_total.get()
    }

    pub fn records_rejected(&self, reason: RejectReason) -> u64 {
        self.records_rejected_total
            .with_label_values(&[reason.as_label()])
            .get()
    }

    pub fn batches_sealed_total(&self) -> u64 {
        self.batches_sealed_total.get()
    }

    pub fn batches_written_total(&self) -> u64 {
        self.batches_written_total.get()
    }

    pub fn batches_failed_total(&self) -> u64 {
        self.batches_failed_total.get()
    }

    pub fn write_retries_total(&self) -> u64 {
        self.write_retries_total.get()
    }

    pub fn files_written_total(&self) -> u64 {
        self.files_written_total.get()
    }

    pub fn offset_commits_total(&self) -> u64 {
        self.offset_commits_total.get()
    }

    pub fn offset_commit_failures_total(&self) -> u64 {
        self.offset_commit_failures_total.get()
    }

    pub fn open_batch_records(&self) -> i64 {
        self.open_batch_records.get()
    }

    /// Registry holding every metric.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Export all metrics in Prometheus text format.
    pub fn export_prometheus_text(&self) -> crate::Result<String> {
        let mut buffer = Vec::with_capacity(4096);
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = IngestionMetrics::new().unwrap();

        metrics.record_messages(3);
        metrics.record_messages(10);
        assert_eq!(metrics.messages_total(), 13);

        metrics.record_accepted();
        metrics.record_rejected(RejectReason::Validation);
        metrics.record_rejected(RejectReason::Validation);
        metrics.record_rejected(RejectReason::Derivation);
        assert_eq!(metrics.records_accepted_total(), 1);
        assert_eq!(metrics.records_rejected(RejectReason::Validation), 2);
        assert_eq!(metrics.records_rejected(RejectReason::Derivation), 1);

        metrics.record_commit();
        metrics.record_commit_failure();
        assert_eq!(metrics.offset_commits_total(), 1);
        assert_eq!(metrics.offset_commit_failures_total(), 1);
    }

    #[test]
    fn test_gauges() {
        let metrics = IngestionMetrics::new().unwrap();
        metrics.set_open_batch_records(42);
        assert_eq!(metrics.open_batch_records(), 42);
        metrics.set_open_batch_records(0);
        assert_eq!(metrics.open_batch_records(), 0);
    }

    #[test]
    fn test_batch_outcomes() {
        let metrics = IngestionMetrics::new().unwrap();
        metrics.record_batch_sealed();
        metrics.record_batch_written(Duration::from_millis(50));
        metrics.record_batch_failed(Duration::from_secs(40));
        metrics.record_file_written(2048);
        metrics.record_write_retry();

        assert_eq!(metrics.batches_sealed_total(), 1);
        assert_eq!(metrics.batches_written_total(), 1);
        assert_eq!(metrics.batches_failed_total(), 1);
        assert_eq!(metrics.files_written_total(), 1);
        assert_eq!(metrics.write_retries_total(), 1);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = IngestionMetrics::new().unwrap();
        metrics.record_messages(5);
        metrics.record_rejected(RejectReason::Validation);
        metrics.record_batch_written(Duration::from_millis(300));

        let text = metrics.export_prometheus_text().unwrap();
        assert!(text.contains("# TYPE orderlake_messages_total counter"));
        assert!(text.contains("orderlake_messages_total 5"));
        assert!(text.contains("orderlake_records_rejected_total{reason=\"validation\"} 1"));
        assert!(text.contains("orderlake_batch_write_duration_seconds_bucket{le=\"0.5\"} 1"));
        assert!(text.contains("orderlake_batch_write_duration_seconds_count 1"));
    }

    #[test]
    fn test_separate_registries() {
        let a = IngestionMetrics::new().unwrap();
        let b = IngestionMetrics::new().unwrap();
        a.record_messages(1);
        assert_eq!(b.messages_total(), 0);
    }
}
