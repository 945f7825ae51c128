use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the intake service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Upload validation policy
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Batch processing limits
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Notification queue configuration
    #[serde(default)]
    pub sqs: SqsConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Validation policy bounds
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Maximum file size in MB (1 MB = 1024 * 1024 bytes)
    #[serde(default = "default_max_video_size_mb")]
    pub max_video_size_mb: u64,
    /// Minimum video duration in seconds (inclusive)
    #[serde(default = "default_min_duration_seconds")]
    pub min_duration_seconds: u64,
    /// Maximum video duration in seconds (inclusive)
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
    /// Accepted file extensions, compared case-insensitively
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

/// Batch processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// File references processed concurrently within one batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Time budget for one invocation, in seconds
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,
    /// Directory for downloaded objects (system temp dir when unset)
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Filesystem,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Root directory of the filesystem backend; buckets are subdirectories
    pub local_root: Option<PathBuf>,
}

/// SQS consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SqsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Queue receiving upload notifications
    pub queue_url: Option<String>,
    /// Queue receiving reports of permanently rejected messages
    pub dead_letter_queue_url: Option<String>,
    /// Messages per receive call (1-10)
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
    /// Long-poll wait time in seconds
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: i32,
    /// Visibility timeout for received messages in seconds
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: i32,
}

/// API configuration for the invocation endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// Default value functions
fn default_service_name() -> String {
    "intake-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_video_size_mb() -> u64 {
    500
}

fn default_min_duration_seconds() -> u64 {
    10
}

fn default_max_duration_seconds() -> u64 {
    300
}

fn default_allowed_extensions() -> Vec<String> {
    vec![".mp4".to_string()]
}

fn default_concurrency() -> usize {
    4
}

fn default_invocation_timeout_secs() -> u64 {
    840 // 14 minutes, under the 15 minute function limit
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_messages() -> i32 {
    10
}

fn default_wait_time_secs() -> i32 {
    20
}

fn default_visibility_timeout_secs() -> i32 {
    900
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from config files and environment, then validate it
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .set_default("service.name", "intake-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/intake").required(false))
            .add_source(config::File::with_name("/etc/intake/intake").required(false))
            // Override with environment variables
            // INTAKE__SQS__QUEUE_URL -> sqs.queue_url
            .add_source(
                config::Environment::with_prefix("INTAKE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("validation.allowed_extensions")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no record could be processed under
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.validation.max_video_size_mb == 0 {
            return invalid("validation.max_video_size_mb must be greater than zero");
        }
        if self.validation.min_duration_seconds >= self.validation.max_duration_seconds {
            return invalid(
                "validation.min_duration_seconds must be less than validation.max_duration_seconds",
            );
        }
        if self.validation.allowed_extensions.is_empty() {
            return invalid("validation.allowed_extensions must not be empty");
        }
        if self.processing.concurrency == 0 {
            return invalid("processing.concurrency must be greater than zero");
        }
        if self.processing.invocation_timeout_secs == 0 {
            return invalid("processing.invocation_timeout_secs must be greater than zero");
        }
        if self.storage.backend == StorageBackend::Filesystem && self.storage.local_root.is_none()
        {
            return invalid("storage.local_root is required for the filesystem backend");
        }
        if self.sqs.enabled && self.sqs.queue_url.is_none() {
            return invalid("sqs.queue_url is required when sqs.enabled is true");
        }
        if !(1..=10).contains(&self.sqs.max_messages) {
            return invalid("sqs.max_messages must be between 1 and 10");
        }
        if !self.sqs.enabled && !self.api.enabled {
            return invalid("at least one of sqs.enabled or api.enabled must be true");
        }
        Ok(())
    }

    /// Get the invocation time budget as Duration
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.processing.invocation_timeout_secs)
    }

    /// Get the maximum object size in bytes
    pub fn max_video_size_bytes(&self) -> u64 {
        self.validation.max_video_size_mb.saturating_mul(1024 * 1024)
    }

    /// Get the download directory, defaulting to the system temp dir
    pub fn download_dir(&self) -> PathBuf {
        self.processing
            .download_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("intake"))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_video_size_mb: default_max_video_size_mb(),
            min_duration_seconds: default_min_duration_seconds(),
            max_duration_seconds: default_max_duration_seconds(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            download_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            local_root: None,
        }
    }
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            queue_url: None,
            dead_letter_queue_url: None,
            max_messages: default_max_messages(),
            wait_time_secs: default_wait_time_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.sqs.queue_url = Some("https://sqs.us-west-2.amazonaws.com/1/uploads".to_string());
        config
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.validation.max_video_size_mb, 500);
        assert_eq!(config.validation.min_duration_seconds, 10);
        assert_eq!(config.validation.max_duration_seconds, 300);
        assert_eq!(config.validation.allowed_extensions, vec![".mp4"]);
        assert_eq!(config.max_video_size_bytes(), 500 * 1024 * 1024);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.invocation_timeout(), Duration::from_secs(840));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_sqs_requires_queue_url() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sqs.queue_url"));

        let mut config = Config::default();
        config.sqs.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_bounds_must_be_ordered() {
        let mut config = valid_config();
        config.validation.min_duration_seconds = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filesystem_backend_requires_root() {
        let mut config = valid_config();
        config.storage.backend = StorageBackend::Filesystem;
        assert!(config.validate().is_err());

        config.storage.local_root = Some(PathBuf::from("/srv/objects"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_some_entry_point_required() {
        let mut config = valid_config();
        config.sqs.enabled = false;
        config.api.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = valid_config();
        config.processing.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.validation.max_video_size_mb = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.validation.allowed_extensions.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_backend_deserialization() {
        let storage: StorageConfig =
            serde_json::from_str(r#"{"backend": "filesystem", "local_root": "/data"}"#).unwrap();
        assert_eq!(storage.backend, StorageBackend::Filesystem);
        assert_eq!(storage.region, "us-west-2");
    }
}
