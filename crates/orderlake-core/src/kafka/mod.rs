//! Kafka consumer, offset commits and the offset watermark.

mod consumer;
mod offset;

pub use consumer::{
    KafkaConsumerBuilder, MessageSource, OffsetCommitter, RawMessage, SmartKafkaConsumer,
};
pub use offset::{OffsetWatermark, PartitionState};
