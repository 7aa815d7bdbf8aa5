//! Main ingestion engine orchestration.
//!
//! Two tasks cooperate:
//! - the consumer loop polls Kafka, validates each message, and feeds the
//!   batch accumulator; sealed batches go out over a bounded channel
//! - the writer task owns the commit coordinator, writes batches in seal
//!   order, and commits offsets once their batch is durable
//!
//! The channel bound is the number of batches that may be sealed but not
//! yet written. A full channel blocks the consumer loop.
//!
//! Shutdown takes a single deadline when the signal arrives. Handing the
//! final batch to the writer and draining the writer both finish before it;
//! whatever is still unwritten then stays uncommitted and is redelivered.

use crate::buffer::{Batch, BatchAccumulator, OfferOutcome};
use crate::config::Config;
use crate::engine::OffsetCommitCoordinator;
use crate::health::{Component, HealthCheck};
use crate::kafka::{KafkaConsumerBuilder, MessageSource, OffsetCommitter, OffsetWatermark};
use crate::metrics::{IngestionMetrics, RejectReason};
use crate::retry::RetryConfig;
use crate::schema::{
    GlueSchemaRegistry, HttpSchemaRegistry, Rejection, SchemaCache, SchemaRegistry,
    SchemaValidator, StaticSchemaRegistry,
};
use crate::sink::{ObjectStoreSink, ResilientSinkWriter, WriteResult};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Characters of a rejected payload included in the log line.
const PAYLOAD_PREVIEW_CHARS: usize = 256;

/// Main ingestion engine.
pub struct IngestionEngine {
    config: Config,
    source: Arc<dyn MessageSource>,
    committer: Arc<dyn OffsetCommitter>,
    validator: Arc<SchemaValidator>,
    writer: Arc<ResilientSinkWriter>,
    watermark: Arc<OffsetWatermark>,
    metrics: Arc<IngestionMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IngestionEngine {
    /// Create an engine with every collaborator built from `config`.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let consumer = Arc::new(KafkaConsumerBuilder::new(config.kafka.clone()).build()?);

        let registry: Arc<dyn SchemaRegistry> = match (
            &config.registry.glue_registry_name,
            &config.registry.url,
        ) {
            (Some(name), _) => {
                info!(registry = %name, "Using AWS Glue schema registry");
                Arc::new(GlueSchemaRegistry::from_config(&config)?)
            }
            (None, Some(url)) => Arc::new(HttpSchemaRegistry::new(
                url.as_str(),
                Duration::from_millis(config.registry.request_timeout_ms),
            )?),
            (None, None) => {
                info!(
                    subject = %config.registry.subject,
                    "No schema registry configured, using built-in order schema"
                );
                Arc::new(StaticSchemaRegistry::with_order_schema(&config.registry.subject)?)
            }
        };
        let cache = Arc::new(SchemaCache::new(Duration::from_secs(
            config.registry.cache_ttl_seconds,
        )));
        let validator = SchemaValidator::new(registry, cache)
            .with_request_timeout(Duration::from_millis(config.registry.request_timeout_ms));

        let store = ObjectStoreSink::from_config(&config.storage)?;
        info!(root = %config.storage.root_path, "Storage initialized");

        let metrics = Arc::new(IngestionMetrics::new()?);
        let writer = ResilientSinkWriter::from_config(Arc::new(store), &config)
            .with_metrics(metrics.clone());

        Ok(Self::from_parts(
            config,
            consumer.clone(),
            consumer,
            validator,
            writer,
            metrics,
        ))
    }

    /// Create an engine from already-built collaborators.
    pub fn from_parts(
        config: Config,
        source: Arc<dyn MessageSource>,
        committer: Arc<dyn OffsetCommitter>,
        validator: SchemaValidator,
        writer: ResilientSinkWriter,
        metrics: Arc<IngestionMetrics>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            source,
            committer,
            validator: Arc::new(validator),
            writer: Arc::new(writer),
            watermark: Arc::new(OffsetWatermark::new()),
            metrics,
            health: Arc::new(HealthCheck::for_pipeline()),
            shutdown_tx,
        }
    }

    /// Run until shutdown is signalled or a fatal error occurs.
    pub async fn run(&self) -> Result<()> {
        self.health.job_started();
        info!(
            topic = %self.config.kafka.topic,
            group = %self.config.kafka.consumer_group,
            writer_id = %self.writer.writer_id(),
            "Ingestion engine started"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let (batch_tx, batch_rx) = mpsc::channel(self.config.batch.max_in_flight_batches.max(1));

        let coordinator =
            OffsetCommitCoordinator::new(self.committer.clone(), self.watermark.clone())
                .with_commit_timeout(Duration::from_millis(self.config.kafka.commit_timeout_ms))
                .with_metrics(self.metrics.clone());

        let writer_task = WriterTask {
            writer: self.writer.clone(),
            coordinator,
            metrics: self.metrics.clone(),
            health: self.health.clone(),
            commit_retry_interval: Duration::from_millis(
                self.config.kafka.commit_retry_interval_ms.max(1),
            ),
        };
        let mut writer_handle = tokio::spawn(writer_task.run(batch_rx));

        let grace = Duration::from_secs(self.config.shutdown.grace_period_seconds);
        let consume_result = self.consume(&batch_tx, &mut shutdown_rx, grace).await;
        drop(batch_tx);

        let deadline = match consume_result {
            Ok(Some(deadline)) => deadline,
            _ => tokio::time::Instant::now() + grace,
        };
        let writer_result = match tokio::time::timeout_at(deadline, &mut writer_handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Task(format!("writer task: {}", e))),
            Err(_) => {
                warn!(
                    grace_period_seconds = grace.as_secs(),
                    "Shutdown grace period exceeded, unwritten batches stay uncommitted"
                );
                writer_handle.abort();
                Ok(())
            }
        };

        self.health.job_completed();

        match (consume_result, writer_result) {
            (Err(e), _) | (Ok(_), Err(e)) => {
                error!(error = %e, "Ingestion engine halted");
                Err(e)
            }
            (Ok(_), Ok(())) => {
                info!("Ingestion engine shut down complete");
                Ok(())
            }
        }
    }

    /// Consumer loop. Returns when shutdown is requested, when the writer
    /// task has stopped, or on an error that forbids further progress.
    ///
    /// On shutdown the returned deadline bounds everything left to do.
    async fn consume(
        &self,
        batch_tx: &mpsc::Sender<Batch>,
        shutdown_rx: &mut broadcast::Receiver<()>,
        grace: Duration,
    ) -> Result<Option<tokio::time::Instant>> {
        let mut accumulator = BatchAccumulator::new(&self.config.batch);
        let poll_timeout = Duration::from_millis(self.config.kafka.poll_timeout_ms);
        let poll_retry = RetryConfig::for_kafka();
        let mut poll_failures = 0u32;
        let subject = self.config.registry.subject.as_str();

        loop {
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    let deadline = tokio::time::Instant::now() + grace;
                    info!(
                        open_records = accumulator.open_records(),
                        grace_period_seconds = grace.as_secs(),
                        "Shutdown signal received, flushing open batch"
                    );
                    if let Some(batch) = accumulator.seal() {
                        let flush = self.dispatch(batch_tx, batch);
                        if tokio::time::timeout_at(deadline, flush).await.is_err() {
                            warn!("Shutdown grace period exceeded before final batch hand-off");
                        }
                    }
                    return Ok(Some(deadline));
                }
            }

            if batch_tx.is_closed() {
                debug!("Writer task stopped, halting consumer loop");
                return Ok(None);
            }

            if let Some(batch) = accumulator.seal_if_expired() {
                if !self.dispatch(batch_tx, batch).await {
                    return Ok(None);
                }
            }

            let timeout = accumulator
                .time_until_linger()
                .map_or(poll_timeout, |linger| linger.min(poll_timeout));

            let messages = match self
                .source
                .poll_batch(self.config.kafka.poll_batch_size, timeout)
                .await
            {
                Ok(messages) => {
                    poll_failures = 0;
                    self.health.mark_healthy(Component::Broker);
                    messages
                }
                Err(e) => {
                    poll_failures += 1;
                    if poll_failures >= poll_retry.max_attempts {
                        self.health
                            .mark_unhealthy(Component::Broker, &format!("Poll failed: {}", e));
                        return Err(e);
                    }
                    let backoff = poll_retry.calculate_delay(poll_failures - 1);
                    self.health
                        .mark_degraded(Component::Broker, &format!("Poll failed: {}", e));
                    warn!(
                        failures = poll_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Poll error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            self.metrics.record_messages(messages.len() as u64);

            for message in messages {
                match self.validator.prepare(&message, subject).await {
                    Ok(record) => {
                        self.health.mark_healthy(Component::Registry);
                        self.metrics.record_accepted();
                        if let OfferOutcome::Sealed(batch) = accumulator.offer(record) {
                            if !self.dispatch(batch_tx, batch).await {
                                return Ok(None);
                            }
                        }
                    }
                    Err(rejection) if rejection.is_poison() => {
                        let reason = match rejection {
                            Rejection::Validation(_) => RejectReason::Validation,
                            Rejection::Derivation(_) => RejectReason::Derivation,
                        };
                        warn!(
                            position = %message.position(),
                            reason = reason.as_label(),
                            error = %rejection,
                            payload = %message.payload_preview(PAYLOAD_PREVIEW_CHARS),
                            "Dropping message"
                        );
                        self.metrics.record_rejected(reason);
                        accumulator.skip(&message.position());
                    }
                    Err(rejection) => {
                        self.health
                            .mark_unhealthy(Component::Registry, &rejection.to_string());
                        error!(
                            position = %message.position(),
                            error = %rejection,
                            "Schema unavailable, halting before offset can advance"
                        );
                        return Err(match rejection {
                            Rejection::Validation(e) => Error::Validation(e),
                            Rejection::Derivation(e) => Error::Derivation(e),
                        });
                    }
                }
            }

            self.metrics
                .set_open_batch_records(accumulator.open_records());
        }
    }

    /// Hand a sealed batch to the writer task. Returns false once the
    /// writer task is gone.
    async fn dispatch(&self, batch_tx: &mpsc::Sender<Batch>, batch: Batch) -> bool {
        self.metrics.record_batch_sealed();
        self.metrics.set_open_batch_records(0);
        debug!(
            batch_id = batch.id(),
            records = batch.record_count(),
            skipped = batch.skipped_count(),
            seal_reason = %batch.seal_reason(),
            "Batch sealed"
        );

        batch_tx.send(batch).await.is_ok()
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.metrics
    }

    /// Get health check.
    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    /// Offset watermark shared with the writer task.
    pub fn watermark(&self) -> &Arc<OffsetWatermark> {
        &self.watermark
    }

    /// Get shutdown signal sender.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

/// Writer side of the pipeline; sole owner of the commit coordinator.
struct WriterTask {
    writer: Arc<ResilientSinkWriter>,
    coordinator: OffsetCommitCoordinator,
    metrics: Arc<IngestionMetrics>,
    health: Arc<HealthCheck>,
    commit_retry_interval: Duration,
}

impl WriterTask {
    async fn run(mut self, mut batch_rx: mpsc::Receiver<Batch>) -> Result<()> {
        let mut retry_tick = tokio::time::interval(self.commit_retry_interval);
        retry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry_tick.tick().await;

        loop {
            tokio::select! {
                received = batch_rx.recv() => match received {
                    Some(batch) => self.process(batch).await?,
                    None => break,
                },
                _ = retry_tick.tick() => {
                    if self.coordinator.has_uncommitted() {
                        self.retry_commits().await;
                    }
                }
            }
        }

        if self.coordinator.has_uncommitted() {
            if let Err(e) = self.coordinator.retry_pending().await {
                warn!(
                    uncommitted = ?self.coordinator.watermark().uncommitted(),
                    error = %e,
                    "Offsets still uncommitted at shutdown, they will be redelivered"
                );
            }
        }
        Ok(())
    }

    async fn process(&mut self, batch: Batch) -> Result<()> {
        self.coordinator.track_pending(&batch);

        let start = Instant::now();
        let result = self.writer.write(&batch).await;
        let duration = start.elapsed();

        match result {
            WriteResult::Success { paths, attempts } => {
                self.metrics.record_batch_written(duration);
                self.health.mark_healthy(Component::Storage);

                let report = self.coordinator.on_write_success(&batch).await;
                match report.commit_error {
                    Some(ref e) => self.health.mark_degraded(Component::Commits, e),
                    None => self.health.mark_healthy(Component::Commits),
                }

                info!(
                    batch_id = batch.id(),
                    record_count = batch.record_count(),
                    partitions_touched = paths.len(),
                    outcome = "written",
                    duration_ms = duration.as_millis() as u64,
                    offsets_committed = report.offsets_committed(),
                    attempts = attempts,
                    skipped = batch.skipped_count(),
                    seal_reason = %batch.seal_reason(),
                    "Batch processed"
                );
                Ok(())
            }
            WriteResult::Failure {
                kind,
                error,
                written,
            } => {
                self.metrics.record_batch_failed(duration);
                self.health
                    .mark_unhealthy(Component::Storage, &error.to_string());
                self.coordinator.on_write_failure(&batch, &error);

                error!(
                    batch_id = batch.id(),
                    record_count = batch.record_count(),
                    partitions_touched = batch.partitions_touched(),
                    outcome = "failed",
                    failure_kind = ?kind,
                    duration_ms = duration.as_millis() as u64,
                    offsets_committed = 0,
                    files_written = written.len(),
                    error = %error,
                    "Batch processed"
                );
                Err(Error::Sink(error))
            }
        }
    }

    async fn retry_commits(&self) {
        match self.coordinator.retry_pending().await {
            Ok(committed) => {
                if !committed.is_empty() {
                    self.health.mark_healthy(Component::Commits);
                    info!(offsets = ?committed, "Pending offsets committed on retry");
                }
            }
            Err(e) => {
                self.health
                    .mark_degraded(Component::Commits, &e.to_string());
            }
        }
    }
}
