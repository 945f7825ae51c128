//! Outcome classification.
//!
//! Every file reference (and every record that could not be decoded into one)
//! ends in exactly one [`Outcome`]. The disposition of a failed outcome is a
//! fixed function of its [`FailureKind`], so callers can acknowledge, retry or
//! dead-letter the unit of work without re-deriving the decision.

use crate::envelope::FileReference;
use crate::metadata::{VideoMetadata, VideoQuality};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier tying an outcome back to the transport message that triggered it.
///
/// Derived from the transport record's message id, which stays stable across
/// redeliveries of the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Correlation id for the `index`-th transport record of a batch.
    pub fn for_record(message_id: Option<&str>, index: usize) -> Self {
        match message_id {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self(format!("record-{index}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the caller should do with the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Forward to downstream analysis and acknowledge.
    Success,
    /// Leave for redelivery.
    Retryable,
    /// Dead-letter; retrying will not help.
    Permanent,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Success => "success",
            Disposition::Retryable => "retryable",
            Disposition::Permanent => "permanent",
        }
    }

    /// Disposition of a transport message carrying several outcomes.
    ///
    /// Any retryable outcome keeps the whole message alive for redelivery;
    /// otherwise any permanent outcome dead-letters it.
    pub fn combine(self, other: Disposition) -> Disposition {
        match (self, other) {
            (Disposition::Retryable, _) | (_, Disposition::Retryable) => Disposition::Retryable,
            (Disposition::Permanent, _) | (_, Disposition::Permanent) => Disposition::Permanent,
            _ => Disposition::Success,
        }
    }
}

/// Failure taxonomy of the intake pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedEnvelope,
    AcquisitionFailed,
    InvalidExtension,
    OversizedFile,
    UnreadableVideo,
    ExtractionError,
    DurationOutOfRange,
    Timeout,
}

impl FailureKind {
    /// Fixed failure-to-disposition table.
    pub const fn disposition(self) -> Disposition {
        match self {
            FailureKind::AcquisitionFailed | FailureKind::Timeout => Disposition::Retryable,
            FailureKind::MalformedEnvelope
            | FailureKind::InvalidExtension
            | FailureKind::OversizedFile
            | FailureKind::UnreadableVideo
            | FailureKind::ExtractionError
            | FailureKind::DurationOutOfRange => Disposition::Permanent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MalformedEnvelope => "malformed_envelope",
            FailureKind::AcquisitionFailed => "acquisition_failed",
            FailureKind::InvalidExtension => "invalid_extension",
            FailureKind::OversizedFile => "oversized_file",
            FailureKind::UnreadableVideo => "unreadable_video",
            FailureKind::ExtractionError => "extraction_error",
            FailureKind::DurationOutOfRange => "duration_out_of_range",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result payload of an outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeDetail {
    Accepted {
        metadata: VideoMetadata,
        quality: VideoQuality,
    },
    Rejected {
        failure: FailureKind,
        reasons: Vec<String>,
    },
}

/// Terminal result for one file reference or one undecodable record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub correlation_id: CorrelationId,
    /// Absent only when the record never decoded into a file reference.
    pub file_reference: Option<FileReference>,
    pub disposition: Disposition,
    #[serde(flatten)]
    pub detail: OutcomeDetail,
}

impl Outcome {
    pub fn success(
        correlation_id: CorrelationId,
        file_reference: FileReference,
        metadata: VideoMetadata,
    ) -> Self {
        Self {
            correlation_id,
            file_reference: Some(file_reference),
            disposition: Disposition::Success,
            detail: OutcomeDetail::Accepted {
                quality: metadata.quality(),
                metadata,
            },
        }
    }

    pub fn failure(
        correlation_id: CorrelationId,
        file_reference: Option<FileReference>,
        failure: FailureKind,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            correlation_id,
            file_reference,
            disposition: failure.disposition(),
            detail: OutcomeDetail::Rejected { failure, reasons },
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.detail {
            OutcomeDetail::Rejected { failure, .. } => Some(*failure),
            OutcomeDetail::Accepted { .. } => None,
        }
    }

    pub fn reasons(&self) -> &[String] {
        match &self.detail {
            OutcomeDetail::Rejected { reasons, .. } => reasons,
            OutcomeDetail::Accepted { .. } => &[],
        }
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        match &self.detail {
            OutcomeDetail::Accepted { metadata, .. } => Some(metadata),
            OutcomeDetail::Rejected { .. } => None,
        }
    }

    pub fn quality(&self) -> Option<&VideoQuality> {
        match &self.detail {
            OutcomeDetail::Accepted { quality, .. } => Some(quality),
            OutcomeDetail::Rejected { .. } => None,
        }
    }
}

/// Tally of outcomes per disposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub retryable: usize,
    pub permanent: usize,
}

/// All outcomes of one invocation, in envelope order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<Outcome>,
    pub counts: OutcomeCounts,
}

impl BatchReport {
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        let mut counts = OutcomeCounts::default();
        for outcome in &outcomes {
            match outcome.disposition {
                Disposition::Success => counts.success += 1,
                Disposition::Retryable => counts.retryable += 1,
                Disposition::Permanent => counts.permanent += 1,
            }
        }
        Self { outcomes, counts }
    }

    /// Accepted videos, the only thing handed to downstream analysis.
    pub fn accepted(&self) -> impl Iterator<Item = (&FileReference, &VideoMetadata)> {
        self.outcomes
            .iter()
            .filter_map(|o| Some((o.file_reference.as_ref()?, o.metadata()?)))
    }

    /// Combined disposition per transport message.
    pub fn dispositions(&self) -> HashMap<&str, Disposition> {
        let mut by_message: HashMap<&str, Disposition> = HashMap::new();
        for outcome in &self.outcomes {
            by_message
                .entry(outcome.correlation_id.as_str())
                .and_modify(|d| *d = d.combine(outcome.disposition))
                .or_insert(outcome.disposition);
        }
        by_message
    }

    pub fn outcomes_for<'a>(
        &'a self,
        correlation_id: &'a str,
    ) -> impl Iterator<Item = &'a Outcome> + 'a {
        self.outcomes
            .iter()
            .filter(move |o| o.correlation_id.as_str() == correlation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_table() {
        use FailureKind::*;

        for kind in [AcquisitionFailed, Timeout] {
            assert_eq!(kind.disposition(), Disposition::Retryable, "{kind}");
        }
        for kind in [
            MalformedEnvelope,
            InvalidExtension,
            OversizedFile,
            UnreadableVideo,
            ExtractionError,
            DurationOutOfRange,
        ] {
            assert_eq!(kind.disposition(), Disposition::Permanent, "{kind}");
        }
    }

    #[test]
    fn test_combine_prefers_retry() {
        use Disposition::*;

        assert_eq!(Success.combine(Success), Success);
        assert_eq!(Success.combine(Permanent), Permanent);
        assert_eq!(Permanent.combine(Retryable), Retryable);
        assert_eq!(Retryable.combine(Success), Retryable);
    }

    #[test]
    fn test_correlation_id_fallback() {
        assert_eq!(CorrelationId::for_record(Some("abc"), 3).as_str(), "abc");
        assert_eq!(CorrelationId::for_record(Some(""), 3).as_str(), "record-3");
        assert_eq!(CorrelationId::for_record(None, 0).as_str(), "record-0");
    }

    #[test]
    fn test_batch_report_counts_and_dispositions() {
        let report = BatchReport::new(vec![
            Outcome::failure(
                CorrelationId::new("m1"),
                None,
                FailureKind::MalformedEnvelope,
                vec!["bad".to_string()],
            ),
            Outcome::failure(
                CorrelationId::new("m1"),
                None,
                FailureKind::Timeout,
                vec!["late".to_string()],
            ),
            Outcome::failure(
                CorrelationId::new("m2"),
                None,
                FailureKind::OversizedFile,
                vec![],
            ),
        ]);

        assert_eq!(
            report.counts,
            OutcomeCounts {
                success: 0,
                retryable: 1,
                permanent: 2
            }
        );
        let dispositions = report.dispositions();
        assert_eq!(dispositions["m1"], Disposition::Retryable);
        assert_eq!(dispositions["m2"], Disposition::Permanent);
        assert_eq!(report.outcomes_for("m1").count(), 2);
        assert_eq!(report.accepted().count(), 0);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = Outcome::failure(
            CorrelationId::new("m1"),
            None,
            FailureKind::InvalidExtension,
            vec!["Invalid file format".to_string()],
        );
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["correlation_id"], "m1");
        assert_eq!(json["disposition"], "permanent");
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["failure"], "invalid_extension");
    }
}
