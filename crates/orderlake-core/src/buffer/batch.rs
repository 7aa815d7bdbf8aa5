//! Sealed batches handed from the accumulator to the sink writer.

use crate::partition::PartitionKey;
use crate::record::{SourcePosition, ValidatedRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Which threshold sealed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    /// Record count reached `max_records`
    RecordCount,
    /// Estimated size reached `max_bytes`
    ByteSize,
    /// First record waited `max_linger`
    Linger,
    /// Explicit flush (shutdown)
    Flush,
}

impl fmt::Display for SealReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SealReason::RecordCount => "record_count",
            SealReason::ByteSize => "byte_size",
            SealReason::Linger => "linger",
            SealReason::Flush => "flush",
        };
        f.write_str(name)
    }
}

/// An immutable group of validated records to be written together.
///
/// `max_offsets` covers every offset the batch absorbed, including those of
/// dropped records, so writing the batch advances the watermark past them.
#[derive(Debug, Clone)]
pub struct Batch {
    id: u64,
    records: Vec<ValidatedRecord>,
    byte_size: usize,
    max_offsets: BTreeMap<(String, i32), i64>,
    min_offsets: BTreeMap<(String, i32), i64>,
    skipped: usize,
    created_at: DateTime<Utc>,
    seal_reason: SealReason,
}

impl Batch {
    /// Batch id, monotonic within a process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn records(&self) -> &[ValidatedRecord] {
        &self.records
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch carries no records (it may still carry offsets).
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Highest offset absorbed per (topic, partition).
    pub fn max_offsets(&self) -> &BTreeMap<(String, i32), i64> {
        &self.max_offsets
    }

    /// Lowest offset absorbed per (topic, partition).
    pub fn min_offsets(&self) -> &BTreeMap<(String, i32), i64> {
        &self.min_offsets
    }

    /// Number of dropped records whose offsets the batch absorbed.
    pub fn skipped_count(&self) -> usize {
        self.skipped
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn seal_reason(&self) -> SealReason {
        self.seal_reason
    }

    /// Records grouped by storage partition, in partition key order.
    pub fn partition_groups(&self) -> BTreeMap<PartitionKey, Vec<&ValidatedRecord>> {
        let mut groups: BTreeMap<PartitionKey, Vec<&ValidatedRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.partition_key()).or_default().push(record);
        }
        groups
    }

    /// Number of distinct storage partitions the batch writes to.
    pub fn partitions_touched(&self) -> usize {
        self.partition_groups().len()
    }
}

/// The batch currently accepting records. Only the accumulator touches it.
#[derive(Debug)]
pub(crate) struct OpenBatch {
    id: u64,
    records: Vec<ValidatedRecord>,
    byte_size: usize,
    max_offsets: BTreeMap<(String, i32), i64>,
    min_offsets: BTreeMap<(String, i32), i64>,
    skipped: usize,
    created_at: DateTime<Utc>,
    first_offer_at: Option<tokio::time::Instant>,
}

impl OpenBatch {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            records: Vec::new(),
            byte_size: 0,
            max_offsets: BTreeMap::new(),
            min_offsets: BTreeMap::new(),
            skipped: 0,
            created_at: Utc::now(),
            first_offer_at: None,
        }
    }

    pub(crate) fn push(&mut self, record: ValidatedRecord) {
        self.track(record.source());
        self.byte_size += record.size_bytes();
        self.records.push(record);
    }

    pub(crate) fn absorb_skipped(&mut self, position: &SourcePosition) {
        self.track(position);
        self.skipped += 1;
    }

    fn track(&mut self, position: &SourcePosition) {
        if self.first_offer_at.is_none() {
            self.first_offer_at = Some(tokio::time::Instant::now());
            self.created_at = Utc::now();
        }

        let key = position.topic_partition();
        self.max_offsets
            .entry(key.clone())
            .and_modify(|o| *o = (*o).max(position.offset))
            .or_insert(position.offset);
        self.min_offsets
            .entry(key)
            .and_modify(|o| *o = (*o).min(position.offset))
            .or_insert(position.offset);
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Nothing absorbed yet, neither records nor skipped offsets.
    pub(crate) fn is_untouched(&self) -> bool {
        self.max_offsets.is_empty()
    }

    pub(crate) fn first_offer_at(&self) -> Option<tokio::time::Instant> {
        self.first_offer_at
    }

    pub(crate) fn seal(self, reason: SealReason) -> Batch {
        Batch {
            id: self.id,
            records: self.records,
            byte_size: self.byte_size,
            max_offsets: self.max_offsets,
            min_offsets: self.min_offsets,
            skipped: self.skipped,
            created_at: self.created_at,
            seal_reason: reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{OrderRecord, OrderStatus};

    fn record(partition: i32, offset: i64, timestamp_day: u32) -> ValidatedRecord {
        ValidatedRecord::new(
            OrderRecord {
                order_id: format!("order-{offset}"),
                customer_id: "customer".into(),
                order_status: OrderStatus::Created,
                price: 1.0,
                order_purchase_timestamp: Some(format!("2018-03-{timestamp_day:02} 10:00:00")),
                order_approved_at: None,
                order_delivered_carrier_date: None,
                order_delivered_customer_date: None,
                order_estimated_delivery_date: None,
            },
            PartitionKey::new(2018, 3, timestamp_day),
            SourcePosition::new("orders", partition, offset),
            100,
        )
    }

    #[test]
    fn test_offsets_tracked_per_partition() {
        let mut open = OpenBatch::new(1);
        open.push(record(0, 10, 15));
        open.push(record(1, 4, 15));
        open.push(record(0, 12, 16));
        open.absorb_skipped(&SourcePosition::new("orders", 1, 5));

        let batch = open.seal(SealReason::Flush);
        assert_eq!(batch.max_offsets()[&("orders".to_string(), 0)], 12);
        assert_eq!(batch.max_offsets()[&("orders".to_string(), 1)], 5);
        assert_eq!(batch.min_offsets()[&("orders".to_string(), 0)], 10);
        assert_eq!(batch.record_count(), 3);
        assert_eq!(batch.skipped_count(), 1);
        assert_eq!(batch.byte_size(), 300);
    }

    #[test]
    fn test_partition_groups_ordered() {
        let mut open = OpenBatch::new(7);
        open.push(record(0, 1, 16));
        open.push(record(0, 2, 15));
        open.push(record(0, 3, 16));

        let batch = open.seal(SealReason::RecordCount);
        let groups = batch.partition_groups();
        let keys: Vec<_> = groups.keys().copied().collect();
        assert_eq!(keys, vec![PartitionKey::new(2018, 3, 15), PartitionKey::new(2018, 3, 16)]);
        assert_eq!(groups[&PartitionKey::new(2018, 3, 16)].len(), 2);
        assert_eq!(batch.partitions_touched(), 2);
        assert_eq!(batch.seal_reason().to_string(), "record_count");
    }

    #[test]
    fn test_skipped_only_batch() {
        let mut open = OpenBatch::new(2);
        assert!(open.is_untouched());
        open.absorb_skipped(&SourcePosition::new("orders", 0, 99));
        assert!(!open.is_untouched());

        let batch = open.seal(SealReason::Linger);
        assert!(batch.is_empty());
        assert_eq!(batch.partitions_touched(), 0);
        assert_eq!(batch.max_offsets().len(), 1);
    }
}
