//! Payload validation against a registered schema.
//!
//! ## Wire format
//!
//! Payloads are bare JSON documents or carry one of two frames:
//!
//! - Confluent: `0x00 | schema id (u32, big endian) | body`
//! - AWS Glue: `0x03 | compression | schema version id (16 byte UUID) | body`
//!
//! Framed ids are resolved through a per-id cache, so payloads produced
//! against an older version cost one registry lookup in total. An id the
//! cached latest version does not carry also drops that latest entry, so the
//! next unframed payload sees the new version.
//!
//! ## Decoding
//!
//! Each [`SchemaFormat`] maps to a [`DecodeStrategy`]. Only JSON is built in;
//! payloads whose schema has no strategy fail with `UnsupportedFormat`.

use super::{RegisteredSchema, SchemaCache, SchemaFormat, SchemaId, SchemaRegistry};
use crate::error::{DerivationError, RegistryError, ValidationError};
use crate::kafka::RawMessage;
use crate::partition::{self, TIMESTAMP_FIELD};
use crate::record::{OrderRecord, OrderStatus, ValidatedRecord};
use crate::retry::RetryConfig;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Magic byte opening a Confluent framed payload.
pub const MAGIC_BYTE: u8 = 0x00;

/// Header version byte opening a Glue framed payload.
pub const GLUE_HEADER_VERSION: u8 = 0x03;

/// Glue compression byte for an uncompressed body.
pub const GLUE_COMPRESSION_NONE: u8 = 0x00;

/// Glue compression byte for a zlib body.
pub const GLUE_COMPRESSION_ZLIB: u8 = 0x05;

const CONFLUENT_HEADER_LEN: usize = 5;
const GLUE_HEADER_LEN: usize = 18;

/// Fields every order must carry regardless of the registered schema.
const DOMAIN_REQUIRED: [&str; 4] = ["order_id", "customer_id", "order_status", "price"];

/// Reference to the schema a payload was produced against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRef {
    pub subject: String,
    /// Id carried in the payload frame, if framed
    pub id: Option<SchemaId>,
}

impl SchemaRef {
    pub fn subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<SchemaId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Why a message did not become a [`ValidatedRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Validation(ValidationError),
    Derivation(DerivationError),
}

impl Rejection {
    /// Poison messages are dropped; anything else must halt the pipeline.
    pub fn is_poison(&self) -> bool {
        match self {
            Rejection::Validation(e) => e.is_poison(),
            Rejection::Derivation(_) => true,
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Validation(e) => write!(f, "{}", e),
            Rejection::Derivation(e) => write!(f, "{}", e),
        }
    }
}

/// Decodes a payload body according to a schema.
pub trait DecodeStrategy: Send + Sync {
    fn decode(&self, schema: &RegisteredSchema, body: &[u8])
        -> Result<OrderRecord, ValidationError>;
}

/// JSON schema decode strategy.
#[derive(Debug, Default)]
pub struct JsonDecodeStrategy;

impl JsonDecodeStrategy {
    fn check_required(
        object: &Map<String, Value>,
        schema: &RegisteredSchema,
    ) -> Result<(), ValidationError> {
        let required = DOMAIN_REQUIRED
            .iter()
            .copied()
            .chain(schema.required_fields.iter().map(String::as_str))
            // The partition timestamp is reported by derivation
            .filter(|field| *field != TIMESTAMP_FIELD);

        for field in required {
            match object.get(field) {
                None | Some(Value::Null) => {
                    return Err(ValidationError::MissingField(field.to_string()))
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(ValidationError::MissingField(field.to_string()))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn check_domain(object: &Map<String, Value>) -> Result<(), ValidationError> {
        let status = object.get("order_status").and_then(Value::as_str);
        if status.and_then(OrderStatus::parse).is_none() {
            return Err(ValidationError::OutOfDomain {
                field: "order_status".into(),
                value: display_value(object.get("order_status")),
            });
        }

        match object.get("price").and_then(Value::as_f64) {
            Some(price) if price.is_finite() && price >= 0.0 => Ok(()),
            _ => Err(ValidationError::OutOfDomain {
                field: "price".into(),
                value: display_value(object.get("price")),
            }),
        }
    }
}

impl DecodeStrategy for JsonDecodeStrategy {
    fn decode(
        &self,
        schema: &RegisteredSchema,
        body: &[u8],
    ) -> Result<OrderRecord, ValidationError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::Malformed("payload is not a JSON object".into()))?;

        Self::check_required(object, schema)?;
        Self::check_domain(object)?;

        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "null".to_string(),
    }
}

fn short_header(payload: &[u8]) -> ValidationError {
    ValidationError::Malformed(format!(
        "framed payload of {} bytes is shorter than its header",
        payload.len()
    ))
}

/// Split a payload into its frame schema id (if framed) and body.
pub fn split_frame(payload: &[u8]) -> Result<(Option<SchemaId>, &[u8]), ValidationError> {
    match payload.first() {
        Some(&MAGIC_BYTE) => {
            if payload.len() < CONFLUENT_HEADER_LEN {
                return Err(short_header(payload));
            }
            let id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
            Ok((Some(SchemaId::Numeric(id)), &payload[CONFLUENT_HEADER_LEN..]))
        }
        Some(&GLUE_HEADER_VERSION) => {
            if payload.len() < GLUE_HEADER_LEN {
                return Err(short_header(payload));
            }
            match payload[1] {
                GLUE_COMPRESSION_NONE => {}
                GLUE_COMPRESSION_ZLIB => {
                    return Err(ValidationError::UnsupportedFormat("zlib compressed body".into()))
                }
                other => {
                    return Err(ValidationError::Malformed(format!(
                        "unknown compression byte {:#04x}",
                        other
                    )))
                }
            }
            let mut id = [0u8; 16];
            id.copy_from_slice(&payload[2..GLUE_HEADER_LEN]);
            Ok((
                Some(SchemaId::Version(Uuid::from_bytes(id))),
                &payload[GLUE_HEADER_LEN..],
            ))
        }
        Some(_) => Ok((None, payload)),
        None => Err(ValidationError::Malformed("empty payload".into())),
    }
}

#[derive(Debug, Clone, Copy)]
enum Lookup {
    Latest,
    ById(SchemaId),
}

/// Validates payloads against schemas resolved through a cached registry.
pub struct SchemaValidator {
    registry: Arc<dyn SchemaRegistry>,
    cache: Arc<SchemaCache>,
    strategies: HashMap<SchemaFormat, Box<dyn DecodeStrategy>>,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl SchemaValidator {
    /// Create a validator with the built-in JSON strategy.
    pub fn new(registry: Arc<dyn SchemaRegistry>, cache: Arc<SchemaCache>) -> Self {
        let mut strategies: HashMap<SchemaFormat, Box<dyn DecodeStrategy>> = HashMap::new();
        strategies.insert(SchemaFormat::Json, Box::new(JsonDecodeStrategy));

        Self {
            registry,
            cache,
            strategies,
            retry: RetryConfig::for_registry(),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Set the retry policy for registry lookups.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the deadline of a single registry lookup.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Register a decode strategy for a schema format.
    pub fn with_strategy(
        mut self,
        format: SchemaFormat,
        strategy: Box<dyn DecodeStrategy>,
    ) -> Self {
        self.strategies.insert(format, strategy);
        self
    }

    /// Schema cache shared with this validator.
    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    /// Decode and validate `payload` against the schema `schema_ref` names.
    ///
    /// A frame id in the payload takes precedence over `schema_ref.id`.
    pub async fn validate(
        &self,
        payload: &[u8],
        schema_ref: &SchemaRef,
    ) -> Result<OrderRecord, ValidationError> {
        let (frame_id, body) = split_frame(payload)?;
        let expected_id = frame_id.or(schema_ref.id);

        let schema = self.resolve(&schema_ref.subject, expected_id).await?;

        let strategy = self
            .strategies
            .get(&schema.format)
            .ok_or_else(|| ValidationError::UnsupportedFormat(schema.format.to_string()))?;

        strategy.decode(&schema, body)
    }

    /// Validate a broker message and derive its partition key.
    pub async fn prepare(
        &self,
        message: &RawMessage,
        subject: &str,
    ) -> Result<ValidatedRecord, Rejection> {
        let payload = message.payload.as_deref().ok_or_else(|| {
            Rejection::Validation(ValidationError::Malformed("null payload".into()))
        })?;

        let order = self
            .validate(payload, &SchemaRef::subject(subject))
            .await
            .map_err(Rejection::Validation)?;

        let key = partition::derive(&order).map_err(Rejection::Derivation)?;

        Ok(ValidatedRecord::new(
            order,
            key,
            message.position(),
            message.size_bytes(),
        ))
    }

    /// Resolve the schema a payload names: the latest version when it
    /// carries no id, otherwise the version with that id.
    async fn resolve(
        &self,
        subject: &str,
        expected_id: Option<SchemaId>,
    ) -> Result<Arc<RegisteredSchema>, ValidationError> {
        let Some(id) = expected_id else {
            return self.resolve_latest(subject).await;
        };

        if let Some(schema) = self.cache.get_version(&id) {
            return Ok(schema);
        }

        if let Some(cached) = self.cache.get(subject) {
            if cached.id != id {
                info!(
                    subject = subject,
                    cached_id = %cached.id,
                    payload_id = %id,
                    "Schema version change detected, refreshing"
                );
                self.cache.invalidate(subject);
            }
        }

        let schema = match self.lookup(subject, Lookup::ById(id)).await {
            Ok(schema) => schema,
            Err(RegistryError::VersionNotFound(_)) | Err(RegistryError::SubjectNotFound(_)) => {
                return Err(ValidationError::SchemaMismatch {
                    expected: format!("a registered version of {}", subject),
                    actual: format!("id {}", id),
                })
            }
            Err(e) => return Err(ValidationError::Registry(e)),
        };

        debug!(subject = subject, id = %id, version = schema.version, "Cached schema version");
        let schema = Arc::new(schema);
        self.cache.insert_version(Arc::clone(&schema));
        Ok(schema)
    }

    async fn resolve_latest(
        &self,
        subject: &str,
    ) -> Result<Arc<RegisteredSchema>, ValidationError> {
        if let Some(cached) = self.cache.get(subject) {
            return Ok(cached);
        }

        let schema = self
            .lookup(subject, Lookup::Latest)
            .await
            .map_err(ValidationError::Registry)?;
        let schema = Arc::new(schema);
        self.cache.insert(Arc::clone(&schema));
        Ok(schema)
    }

    /// Run one registry call under the request timeout and retry policy.
    async fn lookup(
        &self,
        subject: &str,
        lookup: Lookup,
    ) -> Result<RegisteredSchema, RegistryError> {
        let timeout = self.request_timeout;
        let registry = &self.registry;

        self.retry
            .run(
                "schema_registry_lookup",
                |_| async move {
                    let call = async {
                        match lookup {
                            Lookup::Latest => registry.latest(subject).await,
                            Lookup::ById(id) => registry.by_id(subject, &id).await,
                        }
                    };
                    match tokio::time::timeout(timeout, call).await {
                        Ok(result) => result,
                        Err(_) => Err(RegistryError::Timeout(timeout.as_millis() as u64)),
                    }
                },
                RegistryError::is_retryable,
            )
            .await
            .map_err(|(e, attempts)| {
                warn!(subject = subject, attempts = attempts, error = %e, "Schema lookup failed");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{StaticSchemaRegistry, ORDER_SCHEMA_ID, ORDER_SCHEMA_JSON};
    use parking_lot::Mutex;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const SUBJECT: &str = "OlistOrderSchema";

    fn validator() -> (SchemaValidator, Arc<StaticSchemaRegistry>) {
        let registry = Arc::new(StaticSchemaRegistry::with_order_schema(SUBJECT).unwrap());
        let validator = SchemaValidator::new(registry.clone(), Arc::new(SchemaCache::default()));
        (validator, registry)
    }

    fn order_json(status: &str, price: f64) -> Vec<u8> {
        serde_json::json!({
            "order_id": "e481f51cbdc54678b7cc49136f2d6af7",
            "customer_id": "9ef432eb6251297304e76186b10a928d",
            "order_status": status,
            "price": price,
            "order_purchase_timestamp": "2018-03-15 10:22:00"
        })
        .to_string()
        .into_bytes()
    }

    fn framed(id: u32, body: &[u8]) -> Vec<u8> {
        let mut out = vec![MAGIC_BYTE];
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn glue_framed(compression: u8, version_id: Uuid, body: &[u8]) -> Vec<u8> {
        let mut out = vec![GLUE_HEADER_VERSION, compression];
        out.extend_from_slice(version_id.as_bytes());
        out.extend_from_slice(body);
        out
    }

    fn glue_version_id() -> Uuid {
        Uuid::from_u128(0x7b0c_9d3e_1f2a_4b5c_8d6e_0f1a_2b3c_4d5e)
    }

    #[tokio::test]
    async fn test_valid_order() {
        let (validator, _) = validator();
        let order = validator
            .validate(&order_json("delivered", 29.99), &SchemaRef::subject(SUBJECT))
            .await
            .unwrap();
        assert_eq!(order.order_status, OrderStatus::Delivered);
        assert_eq!(order.price, 29.99);
    }

    #[tokio::test]
    async fn test_status_outside_enumeration() {
        let (validator, _) = validator();
        let err = validator
            .validate(&order_json("refunded", 10.0), &SchemaRef::subject(SUBJECT))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfDomain {
                field: "order_status".into(),
                value: "refunded".into()
            }
        );
        assert!(err.is_poison());
    }

    #[tokio::test]
    async fn test_negative_price() {
        let (validator, _) = validator();
        let err = validator
            .validate(&order_json("created", -1.0), &SchemaRef::subject(SUBJECT))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfDomain { ref field, .. } if field == "price"));
    }

    #[tokio::test]
    async fn test_zero_price_accepted() {
        let (validator, _) = validator();
        assert!(validator
            .validate(&order_json("created", 0.0), &SchemaRef::subject(SUBJECT))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_and_empty_fields() {
        let (validator, _) = validator();
        let no_customer = br#"{"order_id":"a","order_status":"created","price":1.0,"order_purchase_timestamp":"2018-03-15 10:22:00"}"#;
        assert_eq!(
            validator.validate(no_customer, &SchemaRef::subject(SUBJECT)).await,
            Err(ValidationError::MissingField("customer_id".into()))
        );

        let empty_id = br#"{"order_id":"  ","customer_id":"c","order_status":"created","price":1.0}"#;
        assert_eq!(
            validator.validate(empty_id, &SchemaRef::subject(SUBJECT)).await,
            Err(ValidationError::MissingField("order_id".into()))
        );
    }

    #[tokio::test]
    async fn test_malformed_payloads() {
        let (validator, _) = validator();
        let payloads: [&[u8]; 6] = [
            b"not json",
            b"[1,2,3]",
            b"",
            &[MAGIC_BYTE, 0, 1],
            &[GLUE_HEADER_VERSION, GLUE_COMPRESSION_NONE, 0x7b, 0x0c],
            &[GLUE_HEADER_VERSION, 0x09, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        ];
        for payload in payloads {
            let err = validator
                .validate(payload, &SchemaRef::subject(SUBJECT))
                .await
                .unwrap_err();
            assert!(matches!(err, ValidationError::Malformed(_)), "{err:?}");
        }
    }

    #[tokio::test]
    async fn test_framed_payload_with_current_id() {
        let (validator, _) = validator();
        let payload = framed(1, &order_json("shipped", 5.0));
        let order = validator
            .validate(&payload, &SchemaRef::subject(SUBJECT))
            .await
            .unwrap();
        assert_eq!(order.order_status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn test_version_change_refreshes_cache() {
        let (validator, registry) = validator();
        let subject = SchemaRef::subject(SUBJECT);

        validator.validate(&order_json("created", 1.0), &subject).await.unwrap();
        assert_eq!(validator.cache().get(SUBJECT).unwrap().id, ORDER_SCHEMA_ID);

        registry.register(
            RegisteredSchema::parse(SUBJECT, 2, 17, SchemaFormat::Json, ORDER_SCHEMA_JSON).unwrap(),
        );

        let payload = framed(17, &order_json("created", 1.0));
        validator.validate(&payload, &subject).await.unwrap();
        let cached = validator.cache().get_version(&SchemaId::Numeric(17)).unwrap();
        assert_eq!(cached.version, 2);
        assert_eq!(validator.cache().stats().invalidations.load(Ordering::Relaxed), 1);
        assert!(validator.cache().get(SUBJECT).is_none());

        // Unframed payloads now pick up the new latest version
        validator.validate(&order_json("created", 1.0), &subject).await.unwrap();
        assert_eq!(validator.cache().get(SUBJECT).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_glue_framed_payload() {
        let (validator, registry) = validator();
        registry.register(
            RegisteredSchema::parse(
                SUBJECT,
                4,
                glue_version_id(),
                SchemaFormat::Json,
                ORDER_SCHEMA_JSON,
            )
            .unwrap(),
        );

        let payload = glue_framed(
            GLUE_COMPRESSION_NONE,
            glue_version_id(),
            &order_json("invoiced", 12.5),
        );
        let order = validator
            .validate(&payload, &SchemaRef::subject(SUBJECT))
            .await
            .unwrap();
        assert_eq!(order.order_status, OrderStatus::Invoiced);
        let cached = validator
            .cache()
            .get_version(&SchemaId::Version(glue_version_id()))
            .unwrap();
        assert_eq!(cached.version, 4);
    }

    #[tokio::test]
    async fn test_glue_compressed_body_is_unsupported() {
        let (validator, _) = validator();
        let payload = glue_framed(
            GLUE_COMPRESSION_ZLIB,
            glue_version_id(),
            &order_json("created", 1.0),
        );
        let err = validator
            .validate(&payload, &SchemaRef::subject(SUBJECT))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat(_)));
        assert!(!err.is_poison());
    }

    /// Static registry that records every call it serves.
    struct CountingRegistry {
        inner: StaticSchemaRegistry,
        latest_calls: AtomicU32,
        by_id_calls: Mutex<Vec<SchemaId>>,
    }

    #[async_trait]
    impl SchemaRegistry for CountingRegistry {
        async fn latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError> {
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.latest(subject).await
        }

        async fn by_id(
            &self,
            subject: &str,
            id: &SchemaId,
        ) -> Result<RegisteredSchema, RegistryError> {
            self.by_id_calls.lock().push(*id);
            self.inner.by_id(subject, id).await
        }
    }

    #[tokio::test]
    async fn test_old_version_payloads_resolve_once() {
        let inner = StaticSchemaRegistry::with_order_schema(SUBJECT).unwrap();
        inner.register(
            RegisteredSchema::parse(SUBJECT, 2, 17, SchemaFormat::Json, ORDER_SCHEMA_JSON).unwrap(),
        );
        let registry = Arc::new(CountingRegistry {
            inner,
            latest_calls: AtomicU32::new(0),
            by_id_calls: Mutex::new(Vec::new()),
        });
        let validator = SchemaValidator::new(registry.clone(), Arc::new(SchemaCache::default()));
        let subject = SchemaRef::subject(SUBJECT);

        // Latest is version 2; producers still on version 1 keep sending id 1
        validator.validate(&order_json("created", 1.0), &subject).await.unwrap();
        for _ in 0..50 {
            validator
                .validate(&framed(1, &order_json("created", 1.0)), &subject)
                .await
                .unwrap();
            validator.validate(&order_json("created", 1.0), &subject).await.unwrap();
        }

        assert_eq!(*registry.by_id_calls.lock(), vec![ORDER_SCHEMA_ID]);
        assert_eq!(registry.latest_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_schema_id_is_mismatch() {
        let (validator, _) = validator();
        let payload = framed(99, &order_json("created", 1.0));
        let err = validator
            .validate(&payload, &SchemaRef::subject(SUBJECT))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let registry = StaticSchemaRegistry::new();
        registry.register(
            RegisteredSchema::parse(SUBJECT, 1, 5, SchemaFormat::Protobuf, "syntax = \"proto3\";")
                .unwrap(),
        );
        let validator = SchemaValidator::new(Arc::new(registry), Arc::new(SchemaCache::default()));
        let err = validator
            .validate(&order_json("created", 1.0), &SchemaRef::subject(SUBJECT))
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedFormat("PROTOBUF".into()));
    }

    struct DownRegistry {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SchemaRegistry for DownRegistry {
        async fn latest(&self, _subject: &str) -> Result<RegisteredSchema, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RegistryError::Unavailable("503 Service Unavailable".into()))
        }

        async fn by_id(
            &self,
            _subject: &str,
            _id: &SchemaId,
        ) -> Result<RegisteredSchema, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RegistryError::Unavailable("503 Service Unavailable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_outage_is_not_poison() {
        let registry = Arc::new(DownRegistry {
            calls: AtomicU32::new(0),
        });
        let validator = SchemaValidator::new(registry.clone(), Arc::new(SchemaCache::default()));
        let err = validator
            .validate(&order_json("created", 1.0), &SchemaRef::subject(SUBJECT))
            .await
            .unwrap_err();

        assert!(matches!(err, ValidationError::Registry(_)));
        assert!(!err.is_poison());
        assert_eq!(registry.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_prepare_derives_partition() {
        let (validator, _) = validator();
        let message = RawMessage::new("orders", 0, 7, order_json("approved", 3.5));
        let record = validator.prepare(&message, SUBJECT).await.unwrap();
        assert_eq!(record.partition_key().path_segment(), "year=2018/month=03/day=15");
        assert_eq!(record.source().offset, 7);
    }

    #[tokio::test]
    async fn test_prepare_missing_timestamp_is_derivation_error() {
        let (validator, _) = validator();
        let payload = br#"{"order_id":"a","customer_id":"c","order_status":"created","price":1.0}"#;
        let message = RawMessage::new("orders", 0, 8, payload.to_vec());
        let rejection = validator.prepare(&message, SUBJECT).await.unwrap_err();
        assert!(matches!(
            rejection,
            Rejection::Derivation(DerivationError::MissingTimestamp(_))
        ));
        assert!(rejection.is_poison());
    }
}
