//! Offset watermark for Kafka partitions.
//!
//! Each partition moves through pending, written and committed offsets.
//! Written and committed offsets only ever grow. A fenced partition refuses
//! to advance its written offset to or past the fence.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

const NONE: i64 = -1;
const NO_FENCE: i64 = i64::MAX;

/// Progress of the most advanced offset seen on a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Read into a batch that has not been written yet
    Pending(i64),
    /// Durably written, not yet acknowledged by the broker
    Written(i64),
    /// Acknowledged by the broker
    Committed(i64),
}

#[derive(Debug)]
struct PartitionProgress {
    pending: AtomicI64,
    written: AtomicI64,
    committed: AtomicI64,
    fence: AtomicI64,
}

impl Default for PartitionProgress {
    fn default() -> Self {
        Self {
            pending: AtomicI64::new(NONE),
            written: AtomicI64::new(NONE),
            committed: AtomicI64::new(NONE),
            fence: AtomicI64::new(NO_FENCE),
        }
    }
}

fn some(offset: i64) -> Option<i64> {
    (offset != NONE).then_some(offset)
}

/// Per-partition pending, written and committed offsets.
#[derive(Debug, Default)]
pub struct OffsetWatermark {
    partitions: DashMap<(String, i32), PartitionProgress>,
}

impl OffsetWatermark {
    /// Create an empty watermark.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `offset` is held by a batch awaiting its write.
    pub fn mark_pending(&self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .pending
            .fetch_max(offset, Ordering::SeqCst);
    }

    /// Advance the written offset. Returns false when the partition is
    /// fenced at or below `offset`; lower offsets than the current one are
    /// accepted but change nothing.
    pub fn advance_written(&self, topic: &str, partition: i32, offset: i64) -> bool {
        let entry = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();

        if offset >= entry.fence.load(Ordering::SeqCst) {
            return false;
        }
        entry.written.fetch_max(offset, Ordering::SeqCst);
        true
    }

    /// Record a broker acknowledgment of `offset`.
    pub fn mark_committed(&self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .committed
            .fetch_max(offset, Ordering::SeqCst);
    }

    /// Forbid the written offset from reaching `offset` in this process.
    pub fn fence(&self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .fence
            .fetch_min(offset, Ordering::SeqCst);
    }

    pub fn fence_of(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map(|p| p.fence.load(Ordering::SeqCst))
            .filter(|&f| f != NO_FENCE)
    }

    pub fn is_fenced(&self, topic: &str, partition: i32) -> bool {
        self.fence_of(topic, partition).is_some()
    }

    /// Get the written offset for a partition.
    pub fn written(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partitions
            .get(&(topic.to_string(), partition))
            .and_then(|p| some(p.written.load(Ordering::SeqCst)))
    }

    /// Get the committed offset for a partition.
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.partitions
            .get(&(topic.to_string(), partition))
            .and_then(|p| some(p.committed.load(Ordering::SeqCst)))
    }

    /// Current state of a partition, `None` if never seen.
    pub fn state(&self, topic: &str, partition: i32) -> Option<PartitionState> {
        let progress = self.partitions.get(&(topic.to_string(), partition))?;
        let pending = progress.pending.load(Ordering::SeqCst);
        let written = progress.written.load(Ordering::SeqCst);
        let committed = progress.committed.load(Ordering::SeqCst);

        if pending > written && pending > committed {
            Some(PartitionState::Pending(pending))
        } else if written > committed {
            Some(PartitionState::Written(written))
        } else {
            some(committed).map(PartitionState::Committed)
        }
    }

    /// Partitions whose written offset is ahead of the committed one.
    pub fn uncommitted(&self) -> Vec<(String, i32, i64)> {
        let mut offsets: Vec<_> = self
            .partitions
            .iter()
            .filter_map(|entry| {
                let written = entry.written.load(Ordering::SeqCst);
                let committed = entry.committed.load(Ordering::SeqCst);
                (written > committed).then(|| (entry.key().0.clone(), entry.key().1, written))
            })
            .collect();
        offsets.sort();
        offsets
    }

    /// Get all tracked partitions.
    pub fn partitions(&self) -> Vec<(String, i32)> {
        let mut keys: Vec<_> = self.partitions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}
