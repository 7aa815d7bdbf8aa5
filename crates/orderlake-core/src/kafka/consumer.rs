//! Kafka consumer with manual offset commits.
//!
//! Uses CooperativeSticky assignor for minimal rebalance disruption.
//! Auto commit and auto offset store are both disabled: offsets reach the
//! broker only through [`OffsetCommitter::commit_offsets`], after the batch
//! carrying them has been written.

use crate::config::{KafkaConfig, OffsetReset};
use crate::record::SourcePosition;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::ClientConfig;
use rdkafka::TopicPartitionList;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Source of broker messages, in offset order per partition.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Poll up to `max_messages`, waiting at most `timeout`.
    ///
    /// An empty vector means the timeout elapsed with nothing to read.
    async fn poll_batch(&self, max_messages: usize, timeout: Duration) -> Result<Vec<RawMessage>>;
}

/// Sink for consumer offset acknowledgments.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Commit the given last-processed offsets.
    ///
    /// Offsets are the last record written, not the next to read; the
    /// implementation applies the broker's offset+1 convention.
    async fn commit_offsets(&self, offsets: &[(String, i32, i64)]) -> Result<()>;
}

/// Builder for creating a Kafka consumer.
pub struct KafkaConsumerBuilder {
    config: KafkaConfig,
}

impl KafkaConsumerBuilder {
    /// Create a new consumer builder.
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// librdkafka client configuration for this consumer.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.join(","))
            .set("group.id", &self.config.consumer_group)
            // Offsets are committed only after the owning batch is durable
            .set("enable.auto.commit", "false")
            .set(
                "auto.offset.reset",
                match self.config.auto_offset_reset {
                    OffsetReset::Earliest => "earliest",
                    OffsetReset::Latest => "latest",
                },
            )
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            // Must exceed the longest write including retries
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("partition.assignment.strategy", "cooperative-sticky")
            .set("enable.auto.offset.store", "false");

        let security = &self.config.security;
        if let Some(ref protocol) = security.protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = security.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = security.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(ref password) = security.sasl_password {
            client_config.set("sasl.password", password);
        }
        if let Some(ref path) = security.ssl_ca_location {
            client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
        }

        client_config
    }

    /// Build the consumer and subscribe to the configured topic.
    pub fn build(self) -> Result<SmartKafkaConsumer> {
        let consumer: StreamConsumer = self.client_config().create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(SmartKafkaConsumer {
            consumer: Arc::new(consumer),
            topic: self.config.topic,
            commit_timeout: Duration::from_millis(self.config.commit_timeout_ms),
        })
    }
}

/// rdkafka-backed [`MessageSource`] and [`OffsetCommitter`].
pub struct SmartKafkaConsumer {
    consumer: Arc<StreamConsumer>,
    topic: String,
    commit_timeout: Duration,
}

impl SmartKafkaConsumer {
    /// Convert a borrowed message to an owned RawMessage.
    fn convert_message(msg: &BorrowedMessage) -> RawMessage {
        RawMessage {
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|v| v.to_vec()),
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis().unwrap_or(0),
        }
    }

    /// Get the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the current partition assignment.
    pub fn assignment(&self) -> Result<Vec<(String, i32)>> {
        let tpl = self
            .consumer
            .assignment()
            .map_err(|e| Error::Kafka(KafkaError::PartitionAssignment(e.to_string())))?;

        Ok(tpl
            .elements()
            .iter()
            .map(|e| (e.topic().to_string(), e.partition()))
            .collect())
    }
}

#[async_trait]
impl MessageSource for SmartKafkaConsumer {
    async fn poll_batch(&self, max_messages: usize, timeout: Duration) -> Result<Vec<RawMessage>> {
        use futures::StreamExt;

        let mut batch = Vec::with_capacity(max_messages);
        let deadline = tokio::time::Instant::now() + timeout;
        let stream = self.consumer.stream();
        tokio::pin!(stream);

        while batch.len() < max_messages {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(msg))) => {
                    batch.push(Self::convert_message(&msg));
                }
                Ok(Some(Err(e))) => {
                    // Keep what was already read; the error surfaces next poll
                    if !batch.is_empty() {
                        break;
                    }
                    return Err(Error::Kafka(KafkaError::ConsumerGroup(e.to_string())));
                }
                Ok(None) | Err(_) => break,
            }
        }

        Ok(batch)
    }
}

#[async_trait]
impl OffsetCommitter for SmartKafkaConsumer {
    async fn commit_offsets(&self, offsets: &[(String, i32, i64)]) -> Result<()> {
        let mut tpl = TopicPartitionList::new();

        for (topic, partition, offset) in offsets {
            // Committed offset is the next offset to read
            tpl.add_partition_offset(topic, *partition, rdkafka::Offset::Offset(offset + 1))
                .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;
        }

        let consumer = Arc::clone(&self.consumer);
        let commit = tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync));

        match tokio::time::timeout(self.commit_timeout, commit).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(Error::Kafka(KafkaError::OffsetCommit(e.to_string()))),
            Ok(Err(e)) => return Err(Error::Kafka(KafkaError::OffsetCommit(e.to_string()))),
            Err(_) => {
                return Err(Error::Kafka(KafkaError::Timeout(format!(
                    "offset commit exceeded {}ms",
                    self.commit_timeout.as_millis()
                ))))
            }
        }

        debug!(offsets = ?offsets, "Batch offsets committed");

        Ok(())
    }
}

/// A Kafka message with all metadata.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Message key (optional)
    pub key: Option<Vec<u8>>,

    /// Message payload (optional; tombstones carry none)
    pub payload: Option<Vec<u8>>,

    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Broker timestamp (milliseconds since epoch)
    pub timestamp: i64,
}

impl RawMessage {
    /// Message with a payload and no key.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Vec<u8>) -> Self {
        Self {
            key: None,
            payload: Some(payload),
            topic: topic.into(),
            partition,
            offset,
            timestamp: 0,
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Broker coordinates of the message.
    pub fn position(&self) -> SourcePosition {
        SourcePosition::new(self.topic.as_str(), self.partition, self.offset)
    }

    /// Get the message key as a string.
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Payload for log context, lossily decoded and cut to `max_chars`.
    pub fn payload_preview(&self, max_chars: usize) -> String {
        match self.payload {
            Some(ref payload) => String::from_utf8_lossy(payload).chars().take(max_chars).collect(),
            None => String::from("<null>"),
        }
    }

    /// Estimated size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.key.as_ref().map(|k| k.len()).unwrap_or(0)
            + self.payload.as_ref().map(|v| v.len()).unwrap_or(0)
            + self.topic.len()
            + 24 // Fixed fields (partition, offset, timestamp)
    }
}
