//! Intake orchestration.
//!
//! Each file reference runs screen -> acquire -> re-check -> extract ->
//! validate, and ends in exactly one [`Outcome`]. References in a batch are
//! processed concurrently and independently; a failure in one never affects
//! its siblings.

use crate::config::Config;
use crate::envelope::{self, EnvelopeEntry, FileReference, RawEnvelope};
use crate::metadata::{ExtractionError, MetadataExtractor, VideoMetadata};
use crate::outcome::{BatchReport, CorrelationId, FailureKind, Outcome};
use crate::policy::{PolicyViolation, ValidationPolicy};
use crate::storage::{LocalAsset, ObjectFetcher};
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Concurrency and time budget of one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingSettings {
    pub concurrency: usize,
    pub invocation_timeout: Duration,
}

impl From<&Config> for ProcessingSettings {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.processing.concurrency,
            invocation_timeout: config.invocation_timeout(),
        }
    }
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

pub struct IntakePipeline {
    fetcher: Arc<dyn ObjectFetcher>,
    extractor: Arc<dyn MetadataExtractor>,
    policy: Arc<ValidationPolicy>,
    settings: ProcessingSettings,
}

impl IntakePipeline {
    pub fn new(
        fetcher: Arc<dyn ObjectFetcher>,
        extractor: Arc<dyn MetadataExtractor>,
        policy: Arc<ValidationPolicy>,
        settings: ProcessingSettings,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            policy,
            settings,
        }
    }

    /// Process a transport batch within the configured invocation timeout.
    pub async fn process_envelope(&self, envelope: &RawEnvelope) -> BatchReport {
        let deadline = Instant::now() + self.settings.invocation_timeout;
        self.process_envelope_until(envelope, deadline).await
    }

    /// Process a transport batch. References still pending at `deadline` are
    /// reported as timed out; outcomes keep envelope order.
    #[instrument(skip_all, fields(records = envelope.records.len()))]
    pub async fn process_envelope_until(
        &self,
        envelope: &RawEnvelope,
        deadline: Instant,
    ) -> BatchReport {
        counter!("intake.envelopes.received").increment(1);
        let entries = envelope::parse(envelope);
        debug!(entries = entries.len(), "Envelope decoded");

        let outcomes: Vec<Outcome> = stream::iter(entries)
            .map(|entry| self.process_entry(entry, deadline))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let report = BatchReport::new(outcomes);
        info!(
            success = report.counts.success,
            retryable = report.counts.retryable,
            permanent = report.counts.permanent,
            "Batch processed"
        );
        report
    }

    async fn process_entry(&self, entry: EnvelopeEntry, deadline: Instant) -> Outcome {
        let outcome = match entry.item {
            Ok(file) => self.process_until(entry.correlation_id, file, deadline).await,
            Err(error) => {
                warn!(
                    correlation_id = %entry.correlation_id,
                    record_index = entry.record_index,
                    stage = %error.stage(),
                    error = %error,
                    "Rejected malformed record"
                );
                Outcome::failure(
                    entry.correlation_id,
                    None,
                    FailureKind::MalformedEnvelope,
                    vec![error.to_string()],
                )
            }
        };
        record_outcome(&outcome);
        outcome
    }

    /// Process one reference, reporting a timeout if `deadline` passes first.
    ///
    /// On timeout the in-flight work is dropped, which removes any local
    /// asset before this returns.
    pub async fn process_until(
        &self,
        correlation_id: CorrelationId,
        file: FileReference,
        deadline: Instant,
    ) -> Outcome {
        let work = self.process(correlation_id.clone(), file.clone());
        match tokio::time::timeout_at(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    bucket = %file.bucket,
                    key = %file.key,
                    "Invocation deadline reached before processing completed"
                );
                let reason = format!("Processing of {} did not finish before the deadline", file.key);
                Outcome::failure(correlation_id, Some(file), FailureKind::Timeout, vec![reason])
            }
        }
    }

    /// Process one reference with no deadline.
    #[instrument(skip_all, fields(correlation_id = %correlation_id, bucket = %file.bucket, key = %file.key))]
    pub async fn process(&self, correlation_id: CorrelationId, file: FileReference) -> Outcome {
        let reject = |violation: PolicyViolation, file: FileReference| {
            info!(failure = %violation.kind, reason = %violation.reason, "File rejected");
            Outcome::failure(
                correlation_id.clone(),
                Some(file),
                violation.kind,
                vec![violation.reason],
            )
        };

        // Declared facts first, nothing is downloaded for a file that cannot pass
        if let Err(violation) = self.policy.check_extension(&file.key) {
            return reject(violation, file);
        }
        if let Err(violation) = self.policy.check_size(file.declared_size) {
            return reject(violation, file);
        }

        let fetched = match self.fetcher.fetch(&file.bucket, &file.key).await {
            Ok(fetched) => fetched,
            Err(error) => {
                let kind = error.failure_kind();
                warn!(failure = %kind, error = %error, "Failed to acquire file");
                return Outcome::failure(correlation_id, Some(file), kind, vec![error.to_string()]);
            }
        };
        let asset = LocalAsset::adopt(fetched);

        if let Err(violation) = self.policy.check_size(asset.size_bytes()) {
            return reject(violation, file);
        }

        let metadata = match self.extract(&asset).await {
            Ok(metadata) => metadata,
            Err(error) => {
                let kind = error.failure_kind();
                warn!(failure = %kind, error = %error, "Metadata extraction failed");
                return Outcome::failure(correlation_id, Some(file), kind, vec![error.to_string()]);
            }
        };

        if metadata.has_timing_drift() {
            warn!(
                duration_seconds = metadata.duration_seconds,
                container_duration_seconds = metadata.container_duration_seconds,
                fps = metadata.fps,
                "Frame timing disagrees with container duration"
            );
        }

        let verdict = self.policy.validate(&metadata, asset.size_bytes());
        if let Err(e) = asset.release() {
            warn!(error = %e, "Failed to remove local asset");
        }

        match verdict.primary_failure() {
            Some(kind) => {
                let reasons = verdict.failure_reasons();
                info!(failure = %kind, reasons = ?reasons, "Video failed validation");
                Outcome::failure(correlation_id, Some(file), kind, reasons)
            }
            None => {
                info!(
                    duration_seconds = metadata.duration_seconds,
                    resolution = %metadata.resolution(),
                    resolution_category = %metadata.quality().resolution_category,
                    "Video accepted"
                );
                Outcome::success(correlation_id, file, metadata)
            }
        }
    }

    /// Run the extractor on the blocking pool. The asset stays owned by the
    /// caller so cancellation still releases it.
    async fn extract(&self, asset: &LocalAsset) -> Result<VideoMetadata, ExtractionError> {
        let extractor = Arc::clone(&self.extractor);
        let path = asset.path().to_path_buf();
        let started = std::time::Instant::now();

        let result = tokio::task::spawn_blocking(move || extractor.extract(&path))
            .await
            .unwrap_or_else(|e| Err(ExtractionError::Decoder(format!("extractor task failed: {e}"))));

        histogram!("intake.extract.duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }
}

fn record_outcome(outcome: &Outcome) {
    let failure = outcome.failure_kind().map_or("none", |k| k.as_str());
    counter!(
        "intake.outcomes",
        "disposition" => outcome.disposition.as_str(),
        "failure" => failure
    )
    .increment(1);
}
