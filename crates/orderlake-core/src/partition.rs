//! Storage partition keys derived from the order purchase timestamp.
//!
//! Partitioning follows the business timestamp, never ingestion time, so
//! replays and backfills land in the same `year=/month=/day=` directories as
//! the original snapshot upload.

use crate::error::DerivationError;
use crate::record::OrderRecord;
use chrono::{Datelike, NaiveDateTime};
use std::fmt;

/// Format of `order_purchase_timestamp`, interpreted as UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Field the partition key is derived from.
pub const TIMESTAMP_FIELD: &str = "order_purchase_timestamp";

/// Calendar date a record is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl PartitionKey {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }

    /// Hive-style directory segment, e.g. `year=2018/month=03/day=15`.
    pub fn path_segment(&self) -> String {
        format!(
            "year={:04}/month={:02}/day={:02}",
            self.year, self.month, self.day
        )
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Derive the partition key of a decoded order.
pub fn derive(record: &OrderRecord) -> Result<PartitionKey, DerivationError> {
    derive_from_raw(record.order_purchase_timestamp.as_deref())
}

/// Derive a partition key from a raw timestamp field value.
pub fn derive_from_raw(value: Option<&str>) -> Result<PartitionKey, DerivationError> {
    let value = match value.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Err(DerivationError::MissingTimestamp(TIMESTAMP_FIELD.into())),
    };

    let parsed = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|e| {
        DerivationError::Unparseable {
            value: value.to_string(),
            message: e.to_string(),
        }
    })?;

    let date = parsed.and_utc().date_naive();
    Ok(PartitionKey::new(date.year(), date.month(), date.day()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_purchase_date() {
        let key = derive_from_raw(Some("2018-03-15 10:22:00")).unwrap();
        assert_eq!(key, PartitionKey::new(2018, 3, 15));
        assert_eq!(key.path_segment(), "year=2018/month=03/day=15");
    }

    #[test]
    fn test_derive_truncates_to_day() {
        let late = derive_from_raw(Some("2017-12-31 23:59:59")).unwrap();
        assert_eq!(late, PartitionKey::new(2017, 12, 31));
    }

    #[test]
    fn test_missing_timestamp() {
        assert_eq!(
            derive_from_raw(None),
            Err(DerivationError::MissingTimestamp(TIMESTAMP_FIELD.into()))
        );
        assert!(matches!(
            derive_from_raw(Some("   ")),
            Err(DerivationError::MissingTimestamp(_))
        ));
    }

    #[test]
    fn test_unparseable_timestamp() {
        for raw in ["2018/03/15 10:22:00", "2018-03-15T10:22:00Z", "2018-02-30 00:00:00"] {
            assert!(
                matches!(
                    derive_from_raw(Some(raw)),
                    Err(DerivationError::Unparseable { .. })
                ),
                "{raw} should not parse"
            );
        }
    }

    #[test]
    fn test_partition_key_ordering() {
        let a = PartitionKey::new(2018, 3, 15);
        let b = PartitionKey::new(2018, 4, 1);
        assert!(a < b);
        assert_eq!(a.to_string(), "2018-03-15");
    }
}
