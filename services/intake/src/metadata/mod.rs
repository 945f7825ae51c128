//! Video metadata extraction.

pub mod frame_probe;
pub mod mp4_box;
pub mod quality;

use crate::outcome::FailureKind;
use frame_probe::{FrameProbe, SampleProbe};
use mp4_box::Mp4Error;
pub use quality::{FpsCategory, ResolutionCategory, VideoQuality};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Tolerance used when comparing durations, in seconds.
const DURATION_EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Cannot open video file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while reading video: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed video container: {0}")]
    Container(#[from] Mp4Error),

    #[error("Container has no video track")]
    NoVideoTrack,

    #[error("Video track reports a frame rate of zero")]
    ZeroFrameRate,

    #[error("No readable frame: {0}")]
    NoDecodableFrame(String),

    #[error("Frame decoder failure: {0}")]
    Decoder(String),
}

impl ExtractionError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ExtractionError::ZeroFrameRate | ExtractionError::Decoder(_) => {
                FailureKind::ExtractionError
            }
            ExtractionError::Open { .. }
            | ExtractionError::Io(_)
            | ExtractionError::Container(_)
            | ExtractionError::NoVideoTrack
            | ExtractionError::NoDecodableFrame(_) => FailureKind::UnreadableVideo,
        }
    }
}

/// Structural facts about a video file. Never mutated after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// `frame_count / fps`.
    pub duration_seconds: f64,
    pub fps: f64,
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    /// Four-character codec tag, e.g. `avc1`.
    pub codec: String,
    pub file_size_bytes: u64,
    pub is_readable: bool,
    /// Duration declared by the track header.
    pub container_duration_seconds: f64,
}

impl VideoMetadata {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Width over height, 0 when the height is unknown.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }

    pub fn total_pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn file_size_mb(&self) -> f64 {
        self.file_size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn quality(&self) -> VideoQuality {
        VideoQuality::assess(self)
    }

    /// True when `frame_count / fps` disagrees with the reported duration, or
    /// the reported duration is more than one frame off the track header.
    pub fn has_timing_drift(&self) -> bool {
        if self.fps <= 0.0 {
            return true;
        }
        let derived = self.frame_count as f64 / self.fps;
        let frame_interval = 1.0 / self.fps;

        (derived - self.duration_seconds).abs() > DURATION_EPSILON
            || (self.duration_seconds - self.container_duration_seconds).abs()
                > frame_interval + DURATION_EPSILON
    }
}

/// Derives [`VideoMetadata`] from a local file.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<VideoMetadata, ExtractionError>;
}

/// Reads metadata from the ISO base media container and confirms frame
/// readability with a [`FrameProbe`].
#[derive(Debug, Clone, Default)]
pub struct ContainerMetadataExtractor<P = SampleProbe> {
    probe: P,
}

impl ContainerMetadataExtractor<SampleProbe> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P: FrameProbe> ContainerMetadataExtractor<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }
}

impl<P: FrameProbe> MetadataExtractor for ContainerMetadataExtractor<P> {
    fn extract(&self, path: &Path) -> Result<VideoMetadata, ExtractionError> {
        let mut file = File::open(path).map_err(|source| ExtractionError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let file_size_bytes = file.metadata()?.len();

        let track = mp4_box::read_video_track(&mut file, file_size_bytes)?
            .ok_or(ExtractionError::NoVideoTrack)?;

        let frame_count = track.frame_count();
        if frame_count == 0 {
            return Err(ExtractionError::NoDecodableFrame(
                "video track has no samples".to_string(),
            ));
        }
        let fps = track
            .average_frame_rate()
            .ok_or(ExtractionError::ZeroFrameRate)?;

        self.probe.probe(path, &track)?;

        let metadata = VideoMetadata {
            duration_seconds: frame_count as f64 / fps,
            fps,
            frame_count,
            width: track.width,
            height: track.height,
            codec: track.codec_tag(),
            file_size_bytes,
            is_readable: true,
            container_duration_seconds: track.media_duration_seconds(),
        };

        debug!(
            path = %path.display(),
            duration_seconds = metadata.duration_seconds,
            fps = metadata.fps,
            frame_count = metadata.frame_count,
            resolution = %metadata.resolution(),
            codec = %metadata.codec,
            fragmented = track.fragmented,
            "Extracted video metadata"
        );

        Ok(metadata)
    }
}
