//! Repform Intake Service
//!
//! Upload intake and validation for the Repform exercise analysis platform.
//! The service receives notifications of newly uploaded workout videos,
//! downloads each referenced file, extracts its container metadata and checks
//! it against format, size and duration policy. Every file ends in a
//! classified outcome so the transport can acknowledge, retry or dead-letter
//! the message that carried it.
//!
//! ## Features
//!
//! - **Layered Envelope Decoding**: queue record, pub/sub notification and
//!   storage event list decoded in fixed stages with per-record isolation
//! - **Bounded Acquisition**: streaming downloads capped at the size limit,
//!   local copies removed on every exit path
//! - **Container Metadata**: frame count, frame rate, dimensions and codec read
//!   straight from the MP4 sample tables or movie fragments, with a
//!   readable-frame probe and a derived quality summary
//! - **Outcome Classification**: fixed failure table mapping every failure to
//!   a retryable or permanent disposition
//!
//! ## Architecture
//!
//! ```text
//!  SQS Queue / POST /v1/invocations
//! ┌──────────────┐
//! │ RawEnvelope  │
//! └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐   Err   ┌──────────────┐
//! │ Envelope     │────────▶│ Malformed    │─────────────────────┐
//! │ Parser       │         │ Outcome      │                     │
//! └──────────────┘         └──────────────┘                     │
//!        │ FileReference                                        │
//!        ▼                                                      │
//! ┌──────────────┐         ┌──────────────┐                     │
//! │ Intake       │────────▶│ Object       │  S3 / filesystem    │
//! │ Pipeline     │◀────────│ Fetcher      │                     │
//! └──────────────┘         └──────────────┘                     │
//!        │ LocalAsset                                           │
//!        ▼                                                      │
//! ┌──────────────┐         ┌──────────────┐         ┌──────────────┐
//! │ Metadata     │────────▶│ Validation   │────────▶│ BatchReport  │
//! │ Extractor    │         │ Policy       │         │ (Outcomes)   │
//! └──────────────┘         └──────────────┘         └──────────────┘
//!                                                          │
//!                                                          ▼
//!                                            delete / release / dead-letter
//! ```

pub mod api;
pub mod config;
pub mod envelope;
pub mod metadata;
pub mod outcome;
pub mod pipeline;
pub mod policy;
pub mod sqs_consumer;
pub mod storage;

pub use config::Config;
pub use envelope::{parse, EnvelopeError, FileReference, RawEnvelope};
pub use metadata::{
    ContainerMetadataExtractor, ExtractionError, MetadataExtractor, VideoMetadata, VideoQuality,
};
pub use outcome::{BatchReport, CorrelationId, Disposition, FailureKind, Outcome};
pub use pipeline::{IntakePipeline, ProcessingSettings};
pub use policy::{ValidationPolicy, ValidationPolicyBuilder, ValidationVerdict};
pub use sqs_consumer::SqsConsumer;
pub use storage::{AcquisitionError, FilesystemFetcher, LocalAsset, ObjectFetcher, S3Fetcher};
