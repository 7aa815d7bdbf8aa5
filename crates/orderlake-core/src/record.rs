//! Order record model shared by the validator, accumulator and writer.

use crate::partition::PartitionKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Approved,
    Invoiced,
    Processing,
    Shipped,
    Delivered,
    Unavailable,
    Canceled,
}

impl OrderStatus {
    /// Every accepted status, in lifecycle order.
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Created,
        OrderStatus::Approved,
        OrderStatus::Invoiced,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Unavailable,
        OrderStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Approved => "approved",
            OrderStatus::Invoiced => "invoiced",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Unavailable => "unavailable",
            OrderStatus::Canceled => "canceled",
        }
    }

    /// Parse a status string, returning `None` outside the enumeration.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded order event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub customer_id: String,
    pub order_status: OrderStatus,
    pub price: f64,
    /// Partitioning timestamp; presence and format are enforced by
    /// [`crate::partition::derive`].
    #[serde(default)]
    pub order_purchase_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_approved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_delivered_carrier_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_delivered_customer_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_estimated_delivery_date: Option<String>,
}

/// Broker coordinates a record was read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl SourcePosition {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// Key used by the watermark and batch offset maps.
    pub fn topic_partition(&self) -> (String, i32) {
        (self.topic.clone(), self.partition)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// An order that passed validation, annotated with its storage partition
/// and origin. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    order: OrderRecord,
    partition_key: PartitionKey,
    source: SourcePosition,
    size_bytes: usize,
}

impl ValidatedRecord {
    pub fn new(
        order: OrderRecord,
        partition_key: PartitionKey,
        source: SourcePosition,
        size_bytes: usize,
    ) -> Self {
        Self {
            order,
            partition_key,
            source,
            size_bytes,
        }
    }

    pub fn order(&self) -> &OrderRecord {
        &self.order
    }

    pub fn partition_key(&self) -> PartitionKey {
        self.partition_key
    }

    pub fn source(&self) -> &SourcePosition {
        &self.source
    }

    /// Estimated in-memory footprint, used for the byte seal trigger.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}
