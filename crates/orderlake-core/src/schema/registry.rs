//! Schema registry collaborators.
//!
//! `HttpSchemaRegistry` talks to a Confluent-compatible REST registry;
//! `GlueSchemaRegistry` to the AWS Glue schema registry;
//! `StaticSchemaRegistry` serves schemas registered in-process and is used
//! when no registry is configured.

use super::{RegisteredSchema, SchemaFormat, SchemaId, ORDER_SCHEMA_ID, ORDER_SCHEMA_JSON};
use crate::config::Config;
use crate::error::RegistryError;
use async_trait::async_trait;
use aws_sdk_glue::error::{DisplayErrorContext, SdkError};
use aws_sdk_glue::operation::get_schema_version::{GetSchemaVersionError, GetSchemaVersionOutput};
use aws_sdk_glue::types::{DataFormat, SchemaId as GlueSchemaId, SchemaVersionNumber};
use aws_sdk_glue::Client as GlueClient;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

/// Resolves schemas by subject or by version id.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Latest registered version of `subject`.
    async fn latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError>;

    /// The version of `subject` carrying `id`. Fails with
    /// `VersionNotFound` when the registry knows no such version.
    async fn by_id(&self, subject: &str, id: &SchemaId) -> Result<RegisteredSchema, RegistryError>;
}

/// Response of `GET /subjects/{subject}/versions/latest`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectVersionResponse {
    subject: String,
    version: i32,
    id: u32,
    /// Absent for AVRO, the registry's historical default
    #[serde(default)]
    schema_type: Option<SchemaFormat>,
    schema: String,
}

/// Response of `GET /schemas/ids/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaByIdResponse {
    #[serde(default)]
    schema_type: Option<SchemaFormat>,
    schema: String,
}

/// Confluent-compatible REST schema registry client.
pub struct HttpSchemaRegistry {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSchemaRegistry {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn latest_url(&self, subject: &str) -> String {
        format!("{}/subjects/{}/versions/latest", self.base_url, subject)
    }

    fn by_id_url(&self, id: u32) -> String {
        format!("{}/schemas/ids/{}", self.base_url, id)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, RegistryError> {
        self.client
            .get(url)
            .header("Accept", "application/vnd.schemaregistry.v1+json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RegistryError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    RegistryError::Unavailable(e.to_string())
                }
            })
    }

    fn handle_error_response(
        &self,
        subject: &str,
        not_found: RegistryError,
        status: StatusCode,
        body: &str,
    ) -> RegistryError {
        match status {
            StatusCode::NOT_FOUND => not_found,
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                RegistryError::Unavailable(format!("{}: {}", status, body))
            }
            _ => RegistryError::InvalidSchema {
                subject: subject.to_string(),
                message: format!("{}: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError> {
        let response = self.get(&self.latest_url(subject)).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let not_found = RegistryError::SubjectNotFound(subject.to_string());
            return Err(self.handle_error_response(subject, not_found, status, &body));
        }

        let body: SubjectVersionResponse =
            response
                .json()
                .await
                .map_err(|e| RegistryError::InvalidSchema {
                    subject: subject.to_string(),
                    message: e.to_string(),
                })?;

        debug!(
            subject = %body.subject,
            version = body.version,
            id = body.id,
            "Resolved schema from registry"
        );

        RegisteredSchema::parse(
            body.subject,
            body.version,
            body.id,
            body.schema_type.unwrap_or(SchemaFormat::Avro),
            body.schema,
        )
    }

    /// `GET /schemas/ids/{id}`. Ids are registry-wide, so the version
    /// number is not reported and is left at 0.
    async fn by_id(&self, subject: &str, id: &SchemaId) -> Result<RegisteredSchema, RegistryError> {
        let numeric = match id {
            SchemaId::Numeric(numeric) => *numeric,
            SchemaId::Version(_) => {
                return Err(RegistryError::InvalidSchema {
                    subject: subject.to_string(),
                    message: format!("REST registry cannot resolve schema version {}", id),
                })
            }
        };

        let response = self.get(&self.by_id_url(numeric)).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let not_found = RegistryError::VersionNotFound(id.to_string());
            return Err(self.handle_error_response(subject, not_found, status, &body));
        }

        let body: SchemaByIdResponse =
            response
                .json()
                .await
                .map_err(|e| RegistryError::InvalidSchema {
                    subject: subject.to_string(),
                    message: e.to_string(),
                })?;

        debug!(subject = subject, id = %id, "Resolved schema version from registry");

        RegisteredSchema::parse(
            subject,
            0,
            *id,
            body.schema_type.unwrap_or(SchemaFormat::Avro),
            body.schema,
        )
    }
}

/// AWS Glue schema registry client.
///
/// Subjects map to Glue schema names inside one registry. The SDK client
/// is built on first use.
pub struct GlueSchemaRegistry {
    registry_name: String,
    region: String,
    credentials: Option<(String, String)>,
    client: OnceCell<GlueClient>,
}

impl GlueSchemaRegistry {
    /// Create a client for `registry_name` in `region` using the default
    /// credential chain.
    pub fn new(registry_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            registry_name: registry_name.into(),
            region: region.into(),
            credentials: None,
            client: OnceCell::new(),
        }
    }

    /// Use explicit credentials instead of the default chain.
    pub fn with_credentials(mut self, access_key_id: String, secret_access_key: String) -> Self {
        self.credentials = Some((access_key_id, secret_access_key));
        self
    }

    /// Build from `[registry]` and the AWS settings of `[storage]`.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let registry_name = config.registry.glue_registry_name.clone().ok_or_else(|| {
            RegistryError::Unavailable("Glue registry name is not configured".into())
        })?;
        let region = config.storage.aws_region.clone().ok_or_else(|| {
            RegistryError::Unavailable("Glue registry requires an AWS region".into())
        })?;

        let registry = Self::new(registry_name, region);
        Ok(
            match (
                config.storage.aws_access_key_id.clone(),
                config.storage.aws_secret_access_key.clone(),
            ) {
                (Some(key), Some(secret)) => registry.with_credentials(key, secret),
                _ => registry,
            },
        )
    }

    pub fn registry_name(&self) -> &str {
        &self.registry_name
    }

    async fn client(&self) -> &GlueClient {
        self.client
            .get_or_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                let loader =
                    aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
                let sdk_config = match &self.credentials {
                    Some((key, secret)) => {
                        debug!("Using explicit AWS credentials for Glue");
                        let credentials = aws_credential_types::Credentials::new(
                            key,
                            secret,
                            None,
                            None,
                            "orderlake-explicit-credentials",
                        );
                        loader.credentials_provider(credentials).load().await
                    }
                    None => loader.load().await,
                };
                info!(
                    registry = %self.registry_name,
                    region = %self.region,
                    "AWS Glue schema registry client initialized"
                );
                GlueClient::new(&sdk_config)
            })
            .await
    }
}

/// Map a Glue data format to a schema format.
fn format_from_glue(format: &DataFormat) -> Option<SchemaFormat> {
    match format {
        DataFormat::Json => Some(SchemaFormat::Json),
        DataFormat::Avro => Some(SchemaFormat::Avro),
        DataFormat::Protobuf => Some(SchemaFormat::Protobuf),
        _ => None,
    }
}

/// Turn a `GetSchemaVersion` response into a registered schema.
fn from_glue_output(
    subject: &str,
    output: &GetSchemaVersionOutput,
) -> Result<RegisteredSchema, RegistryError> {
    let invalid = |message: String| RegistryError::InvalidSchema {
        subject: subject.to_string(),
        message,
    };

    let version_id = output
        .schema_version_id()
        .ok_or_else(|| invalid("response carries no schema version id".into()))?;
    let version_id = Uuid::parse_str(version_id)
        .map_err(|e| invalid(format!("schema version id {:?}: {}", version_id, e)))?;

    let format = output
        .data_format()
        .and_then(format_from_glue)
        .ok_or_else(|| invalid(format!("unknown data format {:?}", output.data_format())))?;

    let definition = output
        .schema_definition()
        .ok_or_else(|| invalid("response carries no schema definition".into()))?;

    let version = output
        .version_number()
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0);

    RegisteredSchema::parse(subject, version, version_id, format, definition)
}

fn classify_glue_error(
    not_found: RegistryError,
    subject: &str,
    err: SdkError<GetSchemaVersionError>,
) -> RegistryError {
    let detail = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ServiceError(service) => match service.into_err() {
            GetSchemaVersionError::EntityNotFoundException(_) => not_found,
            GetSchemaVersionError::InvalidInputException(_)
            | GetSchemaVersionError::AccessDeniedException(_) => RegistryError::InvalidSchema {
                subject: subject.to_string(),
                message: detail,
            },
            _ => RegistryError::Unavailable(detail),
        },
        _ => RegistryError::Unavailable(detail),
    }
}

#[async_trait]
impl SchemaRegistry for GlueSchemaRegistry {
    async fn latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError> {
        let schema_id = GlueSchemaId::builder()
            .registry_name(&self.registry_name)
            .schema_name(subject)
            .build();
        let latest = SchemaVersionNumber::builder().latest_version(true).build();

        let output = self
            .client()
            .await
            .get_schema_version()
            .schema_id(schema_id)
            .schema_version_number(latest)
            .send()
            .await
            .map_err(|e| {
                classify_glue_error(RegistryError::SubjectNotFound(subject.to_string()), subject, e)
            })?;

        let schema = from_glue_output(subject, &output)?;
        debug!(
            subject = subject,
            version = schema.version,
            id = %schema.id,
            "Resolved latest schema from Glue"
        );
        Ok(schema)
    }

    async fn by_id(&self, subject: &str, id: &SchemaId) -> Result<RegisteredSchema, RegistryError> {
        let version_id = match id {
            SchemaId::Version(version_id) => *version_id,
            SchemaId::Numeric(_) => {
                return Err(RegistryError::InvalidSchema {
                    subject: subject.to_string(),
                    message: format!("Glue registry cannot resolve numeric schema id {}", id),
                })
            }
        };

        let output = self
            .client()
            .await
            .get_schema_version()
            .schema_version_id(version_id.hyphenated().to_string())
            .send()
            .await
            .map_err(|e| {
                classify_glue_error(RegistryError::VersionNotFound(id.to_string()), subject, e)
            })?;

        from_glue_output(subject, &output)
    }
}

/// In-process registry.
#[derive(Default)]
pub struct StaticSchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<RegisteredSchema>>>,
    versions: RwLock<HashMap<SchemaId, Arc<RegisteredSchema>>>,
}

impl StaticSchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry preloaded with the built-in order schema under `subject`.
    pub fn with_order_schema(subject: &str) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.register(RegisteredSchema::parse(
            subject,
            1,
            ORDER_SCHEMA_ID,
            SchemaFormat::Json,
            ORDER_SCHEMA_JSON,
        )?);
        Ok(registry)
    }

    /// Register (or replace) the latest version of a subject. Earlier
    /// versions stay resolvable by id.
    pub fn register(&self, schema: RegisteredSchema) {
        let schema = Arc::new(schema);
        self.versions.write().insert(schema.id, Arc::clone(&schema));
        self.schemas.write().insert(schema.subject.clone(), schema);
    }
}

#[async_trait]
impl SchemaRegistry for StaticSchemaRegistry {
    async fn latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError> {
        self.schemas
            .read()
            .get(subject)
            .map(|s| s.as_ref().clone())
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.to_string()))
    }

    async fn by_id(&self, subject: &str, id: &SchemaId) -> Result<RegisteredSchema, RegistryError> {
        self.versions
            .read()
            .get(id)
            .filter(|s| s.subject == subject)
            .map(|s| s.as_ref().clone())
            .ok_or_else(|| RegistryError::VersionNotFound(id.to_string()))
    }
}
