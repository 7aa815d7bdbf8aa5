//! Schema resolution and payload validation.
//!
//! - [`registry`]: schema registry collaborators (HTTP, AWS Glue and static)
//! - [`cache`]: process-wide TTL cache of resolved schemas
//! - [`validator`]: wire framing, decode strategies and domain rules

pub mod cache;
pub mod registry;
pub mod validator;

pub use cache::{CacheStats, SchemaCache};
pub use registry::{GlueSchemaRegistry, HttpSchemaRegistry, SchemaRegistry, StaticSchemaRegistry};
pub use validator::{DecodeStrategy, JsonDecodeStrategy, Rejection, SchemaRef, SchemaValidator};

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one schema version, as carried in a payload frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaId {
    /// Registry-wide integer id (Confluent framing)
    Numeric(u32),
    /// Schema version UUID (AWS Glue framing)
    Version(Uuid),
}

impl From<u32> for SchemaId {
    fn from(id: u32) -> Self {
        SchemaId::Numeric(id)
    }
}

impl From<Uuid> for SchemaId {
    fn from(id: Uuid) -> Self {
        SchemaId::Version(id)
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaId::Numeric(id) => write!(f, "{}", id),
            SchemaId::Version(id) => write!(f, "{}", id.hyphenated()),
        }
    }
}

/// Encoding a registered schema describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaFormat {
    Json,
    Avro,
    Protobuf,
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaFormat::Json => "JSON",
            SchemaFormat::Avro => "AVRO",
            SchemaFormat::Protobuf => "PROTOBUF",
        };
        f.write_str(name)
    }
}

/// A schema version as returned by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredSchema {
    pub subject: String,
    pub version: i32,
    /// Version identity, as carried in framed payloads
    pub id: SchemaId,
    pub format: SchemaFormat,
    pub definition: String,
    /// Top-level `required` list of a JSON schema
    pub required_fields: Vec<String>,
}

impl RegisteredSchema {
    /// Build a registered schema, extracting decode rules from the definition.
    pub fn parse(
        subject: impl Into<String>,
        version: i32,
        id: impl Into<SchemaId>,
        format: SchemaFormat,
        definition: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        let subject = subject.into();
        let id = id.into();
        let definition = definition.into();

        let required_fields = match format {
            SchemaFormat::Json => {
                let doc: serde_json::Value = serde_json::from_str(&definition).map_err(|e| {
                    RegistryError::InvalidSchema {
                        subject: subject.clone(),
                        message: e.to_string(),
                    }
                })?;
                doc.get("required")
                    .and_then(|r| r.as_array())
                    .map(|fields| {
                        fields
                            .iter()
                            .filter_map(|f| f.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            SchemaFormat::Avro | SchemaFormat::Protobuf => Vec::new(),
        };

        Ok(Self {
            subject,
            version,
            id,
            format,
            definition,
            required_fields,
        })
    }
}

/// Built-in JSON schema for Olist order events.
pub const ORDER_SCHEMA_JSON: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "title": "OlistOrderSchema",
  "type": "object",
  "properties": {
    "order_id": { "type": "string", "minLength": 1 },
    "customer_id": { "type": "string", "minLength": 1 },
    "order_status": {
      "type": "string",
      "enum": ["created", "approved", "invoiced", "processing", "shipped", "delivered", "unavailable", "canceled"]
    },
    "price": { "type": "number", "minimum": 0 },
    "order_purchase_timestamp": { "type": "string" },
    "order_approved_at": { "type": ["string", "null"] },
    "order_delivered_carrier_date": { "type": ["string", "null"] },
    "order_delivered_customer_date": { "type": ["string", "null"] },
    "order_estimated_delivery_date": { "type": ["string", "null"] }
  },
  "required": ["order_id", "customer_id", "order_status", "price", "order_purchase_timestamp"]
}"#;

/// Registry id used for the built-in order schema.
pub const ORDER_SCHEMA_ID: SchemaId = SchemaId::Numeric(1);
