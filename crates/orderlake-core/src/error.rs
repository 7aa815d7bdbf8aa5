//! Error types for the orderlake core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Record-level failures (`ValidationError`, `DerivationError`) are recovered
//! locally by the pipeline; the rest propagate to the engine.

use thiserror::Error;

/// Result type alias for orderlake operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Schema registry error
    #[error("Schema registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Record failed schema validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Partition key could not be derived
    #[error("Partition derivation error: {0}")]
    Derivation(#[from] DerivationError),

    /// Storage write error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metrics registration or export error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Background task ended abnormally
    #[error("Task failed: {0}")]
    Task(String),
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Partition assignment error
    #[error("Partition assignment error: {0}")]
    PartitionAssignment(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Consumer closed
    #[error("Consumer closed")]
    ConsumerClosed,
}

/// Schema registry errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Registry could not be reached or answered with a server error
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// Subject is not registered
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    /// No schema version carries the requested id
    #[error("Schema version not found: {0}")]
    VersionNotFound(String),

    /// Registry returned a schema we cannot interpret
    #[error("Invalid schema for {subject}: {message}")]
    InvalidSchema { subject: String, message: String },

    /// Lookup exceeded its deadline
    #[error("Registry lookup timed out after {0}ms")]
    Timeout(u64),
}

impl RegistryError {
    /// Whether another lookup attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistryError::Unavailable(_) | RegistryError::Timeout(_))
    }
}

/// Reasons a payload is rejected by the schema validator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Payload is not decodable at all
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Payload was produced against a different schema
    #[error("Schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },

    /// A required field is absent or null
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field holds a value outside its domain
    #[error("Field {field} out of domain: {value}")]
    OutOfDomain { field: String, value: String },

    /// Schema format has no registered decode strategy
    #[error("Unsupported schema format: {0}")]
    UnsupportedFormat(String),

    /// Schema could not be resolved
    #[error("Schema unavailable: {0}")]
    Registry(RegistryError),
}

impl ValidationError {
    /// Whether the failure is a property of the message itself.
    ///
    /// Poison messages are dropped and their offsets skipped. A registry
    /// failure or an undecodable registered schema says nothing about the
    /// message, so neither may be dropped.
    pub fn is_poison(&self) -> bool {
        !matches!(
            self,
            ValidationError::Registry(_) | ValidationError::UnsupportedFormat(_)
        )
    }
}

/// Partition key derivation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DerivationError {
    /// Timestamp field absent
    #[error("Missing partition timestamp field {0}")]
    MissingTimestamp(String),

    /// Timestamp present but not in the expected format
    #[error("Unparseable timestamp {value:?}: {message}")]
    Unparseable { value: String, message: String },
}

/// Storage write errors, classified for the retry policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Network, throttling, 5xx or timeout; worth retrying
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Invalid destination, access denied or similar; never retried
    #[error("Permanent storage error: {0}")]
    Permanent(String),

    /// Records could not be encoded to the columnar layout
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Attempt ceiling reached on a transient error
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl SinkError {
    /// Whether the write policy should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let kafka_err = KafkaError::ConnectionFailed {
            broker: "localhost:9092".into(),
            message: "connection refused".into(),
        };
        let err: Error = kafka_err.into();
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_registry_failure_is_not_poison() {
        let err = ValidationError::Registry(RegistryError::Timeout(500));
        assert!(!err.is_poison());
        assert!(!ValidationError::UnsupportedFormat("AVRO".into()).is_poison());
        assert!(ValidationError::MissingField("order_id".into()).is_poison());
    }

    #[test]
    fn test_sink_error_classification() {
        assert!(SinkError::Transient("503".into()).is_retryable());
        assert!(!SinkError::Permanent("denied".into()).is_retryable());
        assert!(!SinkError::Encoding("bad".into()).is_retryable());
        let exhausted = SinkError::RetriesExhausted {
            attempts: 5,
            last_error: "timeout".into(),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(
            exhausted.to_string(),
            "Retries exhausted after 5 attempts: timeout"
        );
    }

    #[test]
    fn test_registry_retryable() {
        assert!(RegistryError::Unavailable("503".into()).is_retryable());
        assert!(!RegistryError::SubjectNotFound("x".into()).is_retryable());
    }
}
