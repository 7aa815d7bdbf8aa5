//! Batch accumulator with count, size and linger triggers.
//!
//! The accumulator owns the open batch. Sealing swaps in a fresh empty batch
//! before the sealed one is returned, so a record offered right after a seal
//! always lands in the next batch.

use super::batch::{Batch, OpenBatch, SealReason};
use crate::config::BatchConfig;
use crate::record::{SourcePosition, ValidatedRecord};
use std::time::Duration;
use tracing::debug;

/// Result of offering a record.
#[derive(Debug)]
pub enum OfferOutcome {
    /// The record joined the open batch
    Accepted,
    /// The record completed the open batch, which is now sealed
    Sealed(Batch),
}

/// Buffers validated records into batches.
#[derive(Debug)]
pub struct BatchAccumulator {
    max_records: usize,
    max_bytes: usize,
    max_linger: Duration,
    next_id: u64,
    open: OpenBatch,
}

impl BatchAccumulator {
    /// Create an accumulator from batch configuration.
    pub fn new(config: &BatchConfig) -> Self {
        Self::with_limits(config.max_records, config.max_bytes, config.max_linger())
    }

    /// Create an accumulator with explicit thresholds.
    pub fn with_limits(max_records: usize, max_bytes: usize, max_linger: Duration) -> Self {
        Self {
            max_records: max_records.max(1),
            max_bytes: max_bytes.max(1),
            max_linger,
            next_id: 2,
            open: OpenBatch::new(1),
        }
    }

    /// Append a record, sealing the open batch if a threshold is reached.
    pub fn offer(&mut self, record: ValidatedRecord) -> OfferOutcome {
        self.open.push(record);

        let reason = if self.open.len() >= self.max_records {
            Some(SealReason::RecordCount)
        } else if self.open.byte_size() >= self.max_bytes {
            Some(SealReason::ByteSize)
        } else if self.linger_elapsed() {
            Some(SealReason::Linger)
        } else {
            None
        };

        match reason {
            Some(reason) => OfferOutcome::Sealed(self.swap(reason)),
            None => OfferOutcome::Accepted,
        }
    }

    /// Absorb the offset of a dropped record into the open batch.
    pub fn skip(&mut self, position: &SourcePosition) {
        self.open.absorb_skipped(position);
    }

    /// Seal the open batch if its linger time has run out.
    pub fn seal_if_expired(&mut self) -> Option<Batch> {
        if self.linger_elapsed() {
            Some(self.swap(SealReason::Linger))
        } else {
            None
        }
    }

    /// Seal whatever is open, if anything.
    pub fn seal(&mut self) -> Option<Batch> {
        if self.open.is_untouched() {
            None
        } else {
            Some(self.swap(SealReason::Flush))
        }
    }

    /// Time left before the open batch seals on linger, `None` when empty.
    pub fn time_until_linger(&self) -> Option<Duration> {
        self.open
            .first_offer_at()
            .map(|first| self.max_linger.saturating_sub(first.elapsed()))
    }

    /// Records in the open batch.
    pub fn open_records(&self) -> usize {
        self.open.len()
    }

    /// Whether the open batch has absorbed anything.
    pub fn is_empty(&self) -> bool {
        self.open.is_untouched()
    }

    fn linger_elapsed(&self) -> bool {
        self.open
            .first_offer_at()
            .is_some_and(|first| first.elapsed() >= self.max_linger)
    }

    fn swap(&mut self, reason: SealReason) -> Batch {
        let next = OpenBatch::new(self.next_id);
        self.next_id += 1;
        let sealed = std::mem::replace(&mut self.open, next).seal(reason);

        debug!(
            batch_id = sealed.id(),
            record_count = sealed.record_count(),
            skipped = sealed.skipped_count(),
            byte_size = sealed.byte_size(),
            reason = %reason,
            "Batch sealed"
        );

        sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionKey;
    use crate::record::{OrderRecord, OrderStatus};

    fn record(offset: i64) -> ValidatedRecord {
        ValidatedRecord::new(
            OrderRecord {
                order_id: format!("order-{offset}"),
                customer_id: "customer".into(),
                order_status: OrderStatus::Approved,
                price: 12.5,
                order_purchase_timestamp: Some("2018-03-15 10:22:00".into()),
                order_approved_at: None,
                order_delivered_carrier_date: None,
                order_delivered_customer_date: None,
                order_estimated_delivery_date: None,
            },
            PartitionKey::new(2018, 3, 15),
            SourcePosition::new("orders", 0, offset),
            64,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_seals_on_record_count() {
        let mut acc = BatchAccumulator::with_limits(100, usize::MAX, Duration::from_secs(60));

        for offset in 0..99 {
            assert!(matches!(acc.offer(record(offset)), OfferOutcome::Accepted));
        }

        let batch = match acc.offer(record(99)) {
            OfferOutcome::Sealed(batch) => batch,
            OfferOutcome::Accepted => panic!("expected seal at 100 records"),
        };
        assert_eq!(batch.id(), 1);
        assert_eq!(batch.record_count(), 100);
        assert_eq!(batch.seal_reason(), SealReason::RecordCount);
        assert_eq!(batch.max_offsets()[&("orders".to_string(), 0)], 99);

        assert!(acc.is_empty());
        assert!(matches!(acc.offer(record(100)), OfferOutcome::Accepted));
        assert_eq!(acc.seal().unwrap().id(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seals_on_linger() {
        let mut acc = BatchAccumulator::with_limits(100, usize::MAX, Duration::from_secs(2));

        for offset in 0..50 {
            assert!(matches!(acc.offer(record(offset)), OfferOutcome::Accepted));
        }
        assert!(acc.seal_if_expired().is_none());
        assert_eq!(acc.time_until_linger(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(acc.seal_if_expired().is_none());
        assert_eq!(acc.time_until_linger(), Some(Duration::from_millis(500)));

        tokio::time::advance(Duration::from_millis(500)).await;
        let batch = acc.seal_if_expired().expect("linger elapsed");
        assert_eq!(batch.record_count(), 50);
        assert_eq!(batch.seal_reason(), SealReason::Linger);
        assert_eq!(acc.time_until_linger(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linger_measured_from_first_record() {
        let mut acc = BatchAccumulator::with_limits(100, usize::MAX, Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(acc.seal_if_expired().is_none());

        acc.offer(record(0));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(acc.seal_if_expired().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_after_linger_seals_with_record() {
        let mut acc = BatchAccumulator::with_limits(100, usize::MAX, Duration::from_secs(2));
        acc.offer(record(0));
        tokio::time::advance(Duration::from_secs(3)).await;

        match acc.offer(record(1)) {
            OfferOutcome::Sealed(batch) => assert_eq!(batch.record_count(), 2),
            OfferOutcome::Accepted => panic!("expected linger seal"),
        }
    }

    #[tokio::test]
    async fn test_seals_on_byte_size() {
        let mut acc = BatchAccumulator::with_limits(1000, 256, Duration::from_secs(60));
        for offset in 0..3 {
            assert!(matches!(acc.offer(record(offset)), OfferOutcome::Accepted));
        }
        match acc.offer(record(3)) {
            OfferOutcome::Sealed(batch) => {
                assert_eq!(batch.seal_reason(), SealReason::ByteSize);
                assert_eq!(batch.byte_size(), 256);
            }
            OfferOutcome::Accepted => panic!("expected byte seal"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_offsets_seal_on_linger() {
        let mut acc = BatchAccumulator::with_limits(100, usize::MAX, Duration::from_secs(2));
        acc.skip(&SourcePosition::new("orders", 2, 41));
        assert!(!acc.is_empty());
        assert_eq!(acc.open_records(), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        let batch = acc.seal_if_expired().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.skipped_count(), 1);
        assert_eq!(batch.max_offsets()[&("orders".to_string(), 2)], 41);
    }

    #[tokio::test]
    async fn test_seal_empty_is_none() {
        let mut acc = BatchAccumulator::with_limits(10, usize::MAX, Duration::from_secs(1));
        assert!(acc.seal().is_none());
    }

    #[tokio::test]
    async fn test_batch_ids_monotonic() {
        let mut acc = BatchAccumulator::with_limits(1, usize::MAX, Duration::from_secs(1));
        let mut ids = Vec::new();
        for offset in 0..5 {
            if let OfferOutcome::Sealed(batch) = acc.offer(record(offset)) {
                ids.push(batch.id());
            }
        }
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }
}
