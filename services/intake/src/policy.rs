//! Validation rules applied to a file before and after extraction.
//!
//! Every rule runs and every failure is kept, so a rejected video carries all
//! of its reasons.

use crate::config::ValidationConfig;
use crate::metadata::VideoMetadata;
use crate::outcome::FailureKind;
use serde::Serialize;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One failed policy check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyViolation {
    pub kind: FailureKind,
    pub reason: String,
}

impl PolicyViolation {
    fn new(kind: FailureKind, reason: String) -> Self {
        Self { kind, reason }
    }
}

/// Result of validating extracted metadata. Every check runs; violations
/// accumulate in check order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationVerdict {
    violations: Vec<PolicyViolation>,
}

impl ValidationVerdict {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[PolicyViolation] {
        &self.violations
    }

    pub fn failure_reasons(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.reason.clone()).collect()
    }

    /// Kind of the first violation, used to tag the outcome.
    pub fn primary_failure(&self) -> Option<FailureKind> {
        self.violations.first().map(|v| v.kind)
    }
}

/// Format, size and duration policy for uploaded videos.
///
/// Bounds come from configuration; the policy is read-only once built and is
/// shared between concurrent workers without locking.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    max_size_bytes: u64,
    min_duration_seconds: f64,
    max_duration_seconds: f64,
    /// Lowercase, dot-prefixed.
    allowed_extensions: Vec<String>,
}

impl ValidationPolicy {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            max_size_bytes: config.max_video_size_mb.saturating_mul(BYTES_PER_MB),
            min_duration_seconds: config.min_duration_seconds as f64,
            max_duration_seconds: config.max_duration_seconds as f64,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .collect(),
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    /// Case-insensitive extension check on a file name or object key.
    pub fn check_extension(&self, name: &str) -> Result<(), PolicyViolation> {
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let extension = file_name
            .rfind('.')
            .map(|i| file_name[i..].to_ascii_lowercase());

        match extension {
            Some(ext) if self.allowed_extensions.iter().any(|a| *a == ext) => Ok(()),
            _ => Err(PolicyViolation::new(
                FailureKind::InvalidExtension,
                format!(
                    "Invalid file format: {}. Only {} files are supported.",
                    name,
                    self.allowed_extensions.join(", ")
                ),
            )),
        }
    }

    pub fn check_size(&self, size_bytes: u64) -> Result<(), PolicyViolation> {
        if size_bytes > self.max_size_bytes {
            return Err(PolicyViolation::new(
                FailureKind::OversizedFile,
                format!(
                    "Video file too large: {:.2}MB > {}MB limit",
                    size_bytes as f64 / BYTES_PER_MB as f64,
                    self.max_size_bytes / BYTES_PER_MB
                ),
            ));
        }
        Ok(())
    }

    /// Run every check against extracted metadata. Bounds are inclusive.
    pub fn validate(&self, metadata: &VideoMetadata, file_size_bytes: u64) -> ValidationVerdict {
        let mut violations = Vec::new();

        if let Err(violation) = self.check_size(file_size_bytes) {
            violations.push(violation);
        }

        let duration = metadata.duration_seconds;
        if duration < self.min_duration_seconds {
            violations.push(PolicyViolation::new(
                FailureKind::DurationOutOfRange,
                format!(
                    "Video too short: {}s < {}s minimum",
                    duration, self.min_duration_seconds
                ),
            ));
        }
        if duration > self.max_duration_seconds {
            violations.push(PolicyViolation::new(
                FailureKind::DurationOutOfRange,
                format!(
                    "Video too long: {}s > {}s maximum",
                    duration, self.max_duration_seconds
                ),
            ));
        }
        if duration.is_nan() {
            violations.push(PolicyViolation::new(
                FailureKind::DurationOutOfRange,
                "Video duration is not a number".to_string(),
            ));
        }

        if !metadata.is_readable {
            violations.push(PolicyViolation::new(
                FailureKind::UnreadableVideo,
                "Invalid or corrupted video file".to_string(),
            ));
        }

        ValidationVerdict { violations }
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
    }
}

fn normalize_extension(extension: &str) -> String {
    let lower = extension.trim().to_ascii_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{lower}")
    }
}

/// Builder for policies with non-default bounds.
pub struct ValidationPolicyBuilder {
    config: ValidationConfig,
}

impl ValidationPolicyBuilder {
    pub fn new() -> Self {
        Self {
            config: ValidationConfig::default(),
        }
    }

    pub fn max_video_size_mb(mut self, mb: u64) -> Self {
        self.config.max_video_size_mb = mb;
        self
    }

    pub fn duration_bounds(mut self, min_seconds: u64, max_seconds: u64) -> Self {
        self.config.min_duration_seconds = min_seconds;
        self.config.max_duration_seconds = max_seconds;
        self
    }

    pub fn allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.allowed_extensions = extensions;
        self
    }

    pub fn build(self) -> ValidationPolicy {
        ValidationPolicy::new(&self.config)
    }
}

impl Default for ValidationPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
