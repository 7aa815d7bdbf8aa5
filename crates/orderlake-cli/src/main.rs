//! Orderlake CLI - streaming order ingestion from Kafka to partitioned Parquet.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orderlake_core::config::LogFormat;
use orderlake_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Kafka-related error (connection, poll, offset commit)
    KafkaError = 2,
    /// Schema registry unavailable or subject missing
    RegistryError = 3,
    /// Storage error (S3, filesystem, retries exhausted)
    StorageError = 4,
    /// Health check failure
    HealthCheckError = 6,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        use orderlake_core::{Error, ValidationError};

        if let Some(core) = error.downcast_ref::<Error>() {
            return match core {
                Error::Config(_) | Error::Serialization(_) => ExitCode::ConfigError,
                Error::Kafka(_) => ExitCode::KafkaError,
                Error::Registry(_) | Error::Validation(ValidationError::Registry(_)) => {
                    ExitCode::RegistryError
                }
                Error::Sink(_) | Error::Io(_) => ExitCode::StorageError,
                _ => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("health") {
            ExitCode::HealthCheckError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "orderlake")]
#[command(about = "Stream order events from Kafka into partitioned Parquet", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion engine
    Ingest(Overrides),

    /// Show status and health
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },

    /// Validate configuration file
    Validate(Overrides),
}

/// Settings that override the configuration file.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Kafka bootstrap servers, comma separated
    #[arg(long, env = "KAFKA_BROKERS")]
    pub bootstrap_servers: Option<String>,

    /// Kafka topic
    #[arg(long, env = "KAFKA_TOPIC")]
    pub topic: Option<String>,

    /// Consumer group
    #[arg(long, env = "KAFKA_CONSUMER_GROUP")]
    pub consumer_group: Option<String>,

    /// Bucket name (written under `orders/`) or a full storage root
    #[arg(long, env = "S3_SILVER_BUCKET")]
    pub storage_root: Option<String>,

    /// AWS region for S3
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// Schema registry base URL
    #[arg(long, env = "SCHEMA_REGISTRY_URL")]
    pub registry_url: Option<String>,

    /// AWS Glue schema registry name; takes precedence over the URL
    #[arg(long, env = "GLUE_REGISTRY_NAME")]
    pub glue_registry_name: Option<String>,
}

impl Overrides {
    /// Apply every override that was given.
    pub fn apply(self, config: &mut Config) {
        if let Some(servers) = self.bootstrap_servers {
            config.kafka.bootstrap_servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(topic) = self.topic {
            config.kafka.topic = topic;
        }
        if let Some(group) = self.consumer_group {
            config.kafka.consumer_group = group;
        }
        if let Some(root) = self.storage_root {
            config.storage.root_path = storage_root(&root);
        }
        if let Some(region) = self.aws_region {
            config.storage.aws_region = Some(region);
        }
        if let Some(url) = self.registry_url {
            config.registry.url = Some(url);
        }
        if let Some(name) = self.glue_registry_name {
            config.registry.glue_registry_name = Some(name);
        }
    }
}

/// A bare bucket name maps to `s3://{bucket}/orders`.
fn storage_root(value: &str) -> String {
    if value.contains("://") || value.starts_with('/') || value.starts_with('.') {
        value.to_string()
    } else {
        format!("s3://{}/orders", value.trim_matches('/'))
    }
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log settings come from the config file when it parses; JSON at info otherwise
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format.clone())
        .unwrap_or(LogFormat::Json);
    let default_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_directive())
        .unwrap_or("info");

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(default_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest(overrides) => {
            let mut config = load_config(cli.config.as_deref(), &overrides)?;
            overrides.apply(&mut config);
            commands::ingest::run(config).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }

        Commands::Validate(overrides) => {
            let mut config = load_config(cli.config.as_deref(), &overrides)?;
            overrides.apply(&mut config);
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Load the configuration file, or start from defaults when there is none
/// and the environment supplies brokers and a storage root.
fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("config.toml"));

    if !path.exists() && overrides.bootstrap_servers.is_some() && overrides.storage_root.is_some()
    {
        return Ok(Config::minimal(Vec::new(), ""));
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
