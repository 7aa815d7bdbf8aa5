//! Configuration structures for orderlake.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags
//! or the environment.

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration
    pub kafka: KafkaConfig,

    /// Object storage configuration
    pub storage: StorageConfig,

    /// Schema registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Batch accumulation thresholds
    #[serde(default)]
    pub batch: BatchConfig,

    /// Storage write retry policy
    #[serde(default)]
    pub retry: WriteRetryConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Shutdown behaviour
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Topic to consume from
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Maximum messages returned by one poll
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: usize,

    /// Upper bound on a single poll in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u32,

    /// Max poll interval in milliseconds (must exceed the longest batch write)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Deadline for one offset commit in milliseconds
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,

    /// Interval between retries of failed commits in milliseconds
    #[serde(default = "default_commit_retry_interval_ms")]
    pub commit_retry_interval_ms: u64,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,
}

/// Schema registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Registry base URL; the built-in order schema is used when neither
    /// this nor `glue_registry_name` is set
    pub url: Option<String>,

    /// AWS Glue schema registry name (e.g. `keystone-registry`). Takes
    /// precedence over `url`; region and credentials come from `[storage]`
    #[serde(default)]
    pub glue_registry_name: Option<String>,

    /// Subject the order payloads are registered under
    #[serde(default = "default_subject")]
    pub subject: String,

    /// How long a resolved schema stays cached
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Deadline for a single registry request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            glue_registry_name: None,
            subject: default_subject(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Dataset root (`s3://bucket/prefix` or a local directory)
    pub root_path: String,

    /// Parquet compression
    #[serde(default)]
    pub compression: ParquetCompression,

    /// AWS region
    pub aws_region: Option<String>,

    /// AWS access key ID
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    pub aws_secret_access_key: Option<String>,

    /// S3 endpoint (for MinIO or other S3-compatible storage)
    pub s3_endpoint: Option<String>,

    /// Deadline for one object upload in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// Snappy compression (default, good balance)
    #[default]
    Snappy,
    /// Zstd compression (better ratio)
    Zstd,
    /// LZ4 compression (faster)
    Lz4,
    /// Gzip compression
    Gzip,
    /// No compression
    None,
}

/// Batch accumulation thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Seal once this many records are buffered
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Seal once the first record has waited this long (milliseconds)
    #[serde(default = "default_max_linger_ms")]
    pub max_linger_ms: u64,

    /// Seal once the estimated payload size reaches this many bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Sealed batches allowed to queue ahead of the writer
    #[serde(default = "default_max_in_flight_batches")]
    pub max_in_flight_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            max_linger_ms: default_max_linger_ms(),
            max_bytes: default_max_bytes(),
            max_in_flight_batches: default_max_in_flight_batches(),
        }
    }
}

impl BatchConfig {
    /// Linger threshold as a duration.
    pub fn max_linger(&self) -> Duration {
        Duration::from_millis(self.max_linger_ms)
    }
}

/// Storage write retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriteRetryConfig {
    /// Total attempts per partition group, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Randomise delays by ±25%
    #[serde(default = "default_enabled")]
    pub jitter: bool,
}

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_enabled(),
        }
    }
}

impl From<&WriteRetryConfig> for RetryConfig {
    fn from(config: &WriteRetryConfig) -> Self {
        let retry = RetryConfig::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        );
        if config.jitter {
            retry
        } else {
            retry.without_jitter()
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Shutdown behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    /// Time allowed to flush the open batch after a shutdown signal
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: default_grace_period_seconds(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Filter directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_topic() -> String {
    "orders".to_string()
}
fn default_consumer_group() -> String {
    "lakehouse-enterprise-writers".to_string()
}
fn default_poll_batch_size() -> usize {
    500
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_heartbeat_interval_ms() -> u32 {
    3000
}
fn default_max_poll_interval_ms() -> u32 {
    300000 // 5 minutes - must exceed the longest retried batch write
}
fn default_commit_timeout_ms() -> u64 {
    10000
}
fn default_commit_retry_interval_ms() -> u64 {
    2000
}
fn default_subject() -> String {
    "OlistOrderSchema".to_string()
}
fn default_cache_ttl_seconds() -> u64 {
    300
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_write_timeout_ms() -> u64 {
    30000
}
fn default_max_records() -> usize {
    1000
}
fn default_max_linger_ms() -> u64 {
    5000
}
fn default_max_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_max_in_flight_batches() -> usize {
    2
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    4000
}
fn default_max_delay_ms() -> u64 {
    10000
}
fn default_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}
fn default_grace_period_seconds() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration with defaults for everything but the essentials.
    pub fn minimal(bootstrap_servers: Vec<String>, root_path: impl Into<String>) -> Self {
        Self {
            kafka: KafkaConfig {
                bootstrap_servers,
                topic: default_topic(),
                consumer_group: default_consumer_group(),
                poll_batch_size: default_poll_batch_size(),
                poll_timeout_ms: default_poll_timeout_ms(),
                session_timeout_ms: default_session_timeout_ms(),
                heartbeat_interval_ms: default_heartbeat_interval_ms(),
                max_poll_interval_ms: default_max_poll_interval_ms(),
                auto_offset_reset: OffsetReset::Earliest,
                commit_timeout_ms: default_commit_timeout_ms(),
                commit_retry_interval_ms: default_commit_retry_interval_ms(),
                security: KafkaSecurityConfig::default(),
            },
            storage: StorageConfig {
                root_path: root_path.into(),
                compression: ParquetCompression::Snappy,
                aws_region: None,
                aws_access_key_id: None,
                aws_secret_access_key: None,
                s3_endpoint: None,
                write_timeout_ms: default_write_timeout_ms(),
            },
            registry: RegistryConfig::default(),
            batch: BatchConfig::default(),
            retry: WriteRetryConfig::default(),
            monitoring: MonitoringConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.storage.root_path.is_empty() {
            return Err(crate::Error::Config("Storage root path is required".into()));
        }

        if self.registry.subject.is_empty() {
            return Err(crate::Error::Config("Schema subject is required".into()));
        }

        if self.registry.glue_registry_name.is_some() && self.storage.aws_region.is_none() {
            return Err(crate::Error::Config(
                "registry.glue_registry_name requires storage.aws_region".into(),
            ));
        }

        if self.batch.max_records == 0 {
            return Err(crate::Error::Config(
                "batch.max_records must be greater than zero".into(),
            ));
        }

        if self.batch.max_linger_ms == 0 {
            return Err(crate::Error::Config(
                "batch.max_linger_ms must be greater than zero".into(),
            ));
        }

        if self.batch.max_in_flight_batches == 0 {
            return Err(crate::Error::Config(
                "batch.max_in_flight_batches must be greater than zero".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(crate::Error::Config(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".into(),
            ));
        }

        let worst_case_write_ms =
            self.retry.max_delay_ms * u64::from(self.retry.max_attempts.saturating_sub(1))
                + self.storage.write_timeout_ms * u64::from(self.retry.max_attempts);
        if worst_case_write_ms >= u64::from(self.kafka.max_poll_interval_ms) {
            tracing::warn!(
                worst_case_write_ms,
                max_poll_interval_ms = self.kafka.max_poll_interval_ms,
                "Retried batch writes may outlast max.poll.interval.ms"
            );
        }

        Ok(())
    }
}
