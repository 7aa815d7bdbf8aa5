//! Offset commit coordinator.
//!
//! Turns batch write outcomes into watermark updates and broker commits.
//! Only written offsets are ever committed. After a failed write the
//! affected partitions are fenced at the batch's lowest offset, so nothing
//! later in this process can commit past the lost records.

use crate::buffer::Batch;
use crate::error::SinkError;
use crate::kafka::{OffsetCommitter, OffsetWatermark};
use crate::metrics::IngestionMetrics;
use crate::{Error, KafkaError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// What the coordinator did with one outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// False when the outcome was older than one already observed
    pub accepted: bool,
    /// Partitions whose written offset advanced
    pub advanced: Vec<(String, i32, i64)>,
    /// Partitions left behind by a fence
    pub fenced: Vec<(String, i32)>,
    /// Offsets acknowledged by the broker
    pub committed: Vec<(String, i32, i64)>,
    /// Commit failure, if any; the offsets stay written and are retried
    pub commit_error: Option<String>,
}

impl CommitReport {
    fn rejected() -> Self {
        Self::default()
    }

    pub fn offsets_committed(&self) -> usize {
        self.committed.len()
    }
}

/// Advances the watermark on write success and commits written offsets.
pub struct OffsetCommitCoordinator {
    committer: Arc<dyn OffsetCommitter>,
    watermark: Arc<OffsetWatermark>,
    commit_timeout: Duration,
    last_batch_id: Option<u64>,
    metrics: Option<Arc<IngestionMetrics>>,
}

impl OffsetCommitCoordinator {
    pub fn new(committer: Arc<dyn OffsetCommitter>, watermark: Arc<OffsetWatermark>) -> Self {
        Self {
            committer,
            watermark,
            commit_timeout: Duration::from_secs(10),
            last_batch_id: None,
            metrics: None,
        }
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn watermark(&self) -> &Arc<OffsetWatermark> {
        &self.watermark
    }

    /// Id of the newest outcome applied.
    pub fn last_batch_id(&self) -> Option<u64> {
        self.last_batch_id
    }

    /// Mark every offset of `batch` as pending.
    pub fn track_pending(&self, batch: &Batch) {
        for ((topic, partition), offset) in batch.max_offsets() {
            self.watermark.mark_pending(topic, *partition, *offset);
        }
    }

    /// Apply a successful write and commit whatever is newly written.
    pub async fn on_write_success(&mut self, batch: &Batch) -> CommitReport {
        if !self.observe(batch.id()) {
            return CommitReport::rejected();
        }

        let mut report = CommitReport {
            accepted: true,
            ..CommitReport::default()
        };

        for ((topic, partition), offset) in batch.max_offsets() {
            if self.watermark.advance_written(topic, *partition, *offset) {
                report.advanced.push((topic.clone(), *partition, *offset));
            } else {
                warn!(
                    batch_id = batch.id(),
                    topic = %topic,
                    partition = *partition,
                    offset = *offset,
                    fence = ?self.watermark.fence_of(topic, *partition),
                    "Partition fenced, watermark not advanced"
                );
                report.fenced.push((topic.clone(), *partition));
            }
        }

        match self.commit_written().await {
            Ok(committed) => report.committed = committed,
            Err(e) => report.commit_error = Some(e.to_string()),
        }
        report
    }

    /// Apply a failed write: no advance, no commit, fence the partitions.
    pub fn on_write_failure(&mut self, batch: &Batch, reason: &SinkError) -> CommitReport {
        if !self.observe(batch.id()) {
            return CommitReport::rejected();
        }

        let mut report = CommitReport {
            accepted: true,
            ..CommitReport::default()
        };

        for ((topic, partition), offset) in batch.min_offsets() {
            self.watermark.fence(topic, *partition, *offset);
            report.fenced.push((topic.clone(), *partition));
        }

        error!(
            batch_id = batch.id(),
            records = batch.record_count(),
            fenced_partitions = report.fenced.len(),
            error = %reason,
            "Batch write failed, offsets left uncommitted for redelivery"
        );
        report
    }

    /// Retry commits for offsets that are written but not committed.
    pub async fn retry_pending(&self) -> Result<Vec<(String, i32, i64)>> {
        self.commit_written().await
    }

    /// Whether any written offset still awaits a broker commit.
    pub fn has_uncommitted(&self) -> bool {
        !self.watermark.uncommitted().is_empty()
    }

    fn observe(&mut self, batch_id: u64) -> bool {
        if let Some(last) = self.last_batch_id {
            if batch_id <= last {
                warn!(
                    batch_id = batch_id,
                    last_batch_id = last,
                    "Ignoring out-of-order batch outcome"
                );
                return false;
            }
        }
        self.last_batch_id = Some(batch_id);
        true
    }

    async fn commit_written(&self) -> Result<Vec<(String, i32, i64)>> {
        let offsets = self.watermark.uncommitted();
        if offsets.is_empty() {
            return Ok(offsets);
        }

        let result = match tokio::time::timeout(
            self.commit_timeout,
            self.committer.commit_offsets(&offsets),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Kafka(KafkaError::Timeout(format!(
                "offset commit exceeded {}ms",
                self.commit_timeout.as_millis()
            )))),
        };

        match result {
            Ok(()) => {
                for (topic, partition, offset) in &offsets {
                    self.watermark.mark_committed(topic, *partition, *offset);
                }
                if let Some(ref metrics) = self.metrics {
                    metrics.record_commit();
                }
                debug!(offsets = ?offsets, "Offsets committed");
                Ok(offsets)
            }
            Err(e) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_commit_failure();
                }
                warn!(
                    partitions = offsets.len(),
                    error = %e,
                    "Offset commit failed, will retry"
                );
                Err(e)
            }
        }
    }
}
