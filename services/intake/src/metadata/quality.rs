//! Quality summary of an accepted video, derived from its extracted metadata.

use super::VideoMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolution band by frame height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionCategory {
    #[serde(rename = "4K")]
    Uhd4k,
    #[serde(rename = "1440p")]
    Qhd1440p,
    #[serde(rename = "1080p")]
    FullHd1080p,
    #[serde(rename = "720p")]
    Hd720p,
    #[serde(rename = "480p")]
    Sd480p,
    #[serde(rename = "low_res")]
    LowRes,
}

impl ResolutionCategory {
    pub fn from_height(height: u32) -> Self {
        match height {
            2160.. => ResolutionCategory::Uhd4k,
            1440.. => ResolutionCategory::Qhd1440p,
            1080.. => ResolutionCategory::FullHd1080p,
            720.. => ResolutionCategory::Hd720p,
            480.. => ResolutionCategory::Sd480p,
            _ => ResolutionCategory::LowRes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionCategory::Uhd4k => "4K",
            ResolutionCategory::Qhd1440p => "1440p",
            ResolutionCategory::FullHd1080p => "1080p",
            ResolutionCategory::Hd720p => "720p",
            ResolutionCategory::Sd480p => "480p",
            ResolutionCategory::LowRes => "low_res",
        }
    }
}

impl fmt::Display for ResolutionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame rate band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FpsCategory {
    /// 60 fps and above.
    HighFps,
    /// 30 up to 60 fps.
    StandardFps,
    /// 24 up to 30 fps.
    CinematicFps,
    LowFps,
}

impl FpsCategory {
    pub fn from_fps(fps: f64) -> Self {
        if fps >= 60.0 {
            FpsCategory::HighFps
        } else if fps >= 30.0 {
            FpsCategory::StandardFps
        } else if fps >= 24.0 {
            FpsCategory::CinematicFps
        } else {
            FpsCategory::LowFps
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FpsCategory::HighFps => "high_fps",
            FpsCategory::StandardFps => "standard_fps",
            FpsCategory::CinematicFps => "cinematic_fps",
            FpsCategory::LowFps => "low_fps",
        }
    }
}

impl fmt::Display for FpsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived figures reported alongside the metadata of an accepted video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoQuality {
    pub resolution_category: ResolutionCategory,
    /// Height of 720 or more.
    pub is_hd: bool,
    /// Height of 1080 or more.
    pub is_full_hd: bool,
    pub fps_category: FpsCategory,
    /// Width over height, 0 when the height is unknown.
    pub aspect_ratio: f64,
    pub total_pixels: u64,
    pub file_size_mb: f64,
    /// Megabytes of file per minute of footage.
    pub file_efficiency_mb_per_minute: f64,
    pub estimated_bitrate_kbps: u64,
}

impl VideoQuality {
    pub fn assess(metadata: &VideoMetadata) -> Self {
        let file_size_mb = metadata.file_size_mb();
        let (file_efficiency_mb_per_minute, estimated_bitrate_kbps) =
            if metadata.duration_seconds > 0.0 {
                let bits_per_second =
                    metadata.file_size_bytes as f64 * 8.0 / metadata.duration_seconds;
                (
                    file_size_mb / (metadata.duration_seconds / 60.0),
                    (bits_per_second / 1000.0) as u64,
                )
            } else {
                (0.0, 0)
            };

        Self {
            resolution_category: ResolutionCategory::from_height(metadata.height),
            is_hd: metadata.height >= 720,
            is_full_hd: metadata.height >= 1080,
            fps_category: FpsCategory::from_fps(metadata.fps),
            aspect_ratio: metadata.aspect_ratio(),
            total_pixels: metadata.total_pixels(),
            file_size_mb,
            file_efficiency_mb_per_minute,
            estimated_bitrate_kbps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(width: u32, height: u32, fps: f64, duration: f64, size: u64) -> VideoMetadata {
        VideoMetadata {
            duration_seconds: duration,
            fps,
            frame_count: (duration * fps) as u64,
            width,
            height,
            codec: "avc1".to_string(),
            file_size_bytes: size,
            is_readable: true,
            container_duration_seconds: duration,
        }
    }

    #[test]
    fn test_resolution_bands() {
        let cases = [
            (2160, ResolutionCategory::Uhd4k),
            (2159, ResolutionCategory::Qhd1440p),
            (1440, ResolutionCategory::Qhd1440p),
            (1080, ResolutionCategory::FullHd1080p),
            (1079, ResolutionCategory::Hd720p),
            (720, ResolutionCategory::Hd720p),
            (719, ResolutionCategory::Sd480p),
            (480, ResolutionCategory::Sd480p),
            (479, ResolutionCategory::LowRes),
            (0, ResolutionCategory::LowRes),
        ];
        for (height, expected) in cases {
            assert_eq!(ResolutionCategory::from_height(height), expected, "height {height}");
        }
    }

    #[test]
    fn test_hd_flags_follow_height() {
        let hd = VideoQuality::assess(&metadata(1280, 720, 30.0, 30.0, 1024));
        assert!(hd.is_hd);
        assert!(!hd.is_full_hd);

        let full_hd = VideoQuality::assess(&metadata(1920, 1080, 30.0, 30.0, 1024));
        assert!(full_hd.is_hd);
        assert!(full_hd.is_full_hd);

        let sd = VideoQuality::assess(&metadata(1280, 719, 30.0, 30.0, 1024));
        assert!(!sd.is_hd);
    }

    #[test]
    fn test_fps_bands() {
        let cases = [
            (120.0, FpsCategory::HighFps),
            (60.0, FpsCategory::HighFps),
            (59.94, FpsCategory::StandardFps),
            (30.0, FpsCategory::StandardFps),
            (29.97, FpsCategory::CinematicFps),
            (24.0, FpsCategory::CinematicFps),
            (23.976, FpsCategory::LowFps),
            (15.0, FpsCategory::LowFps),
        ];
        for (fps, expected) in cases {
            assert_eq!(FpsCategory::from_fps(fps), expected, "fps {fps}");
        }
    }

    #[test]
    fn test_size_derived_figures() {
        // 15 MiB over 30 seconds
        let quality = VideoQuality::assess(&metadata(1920, 1080, 30.0, 30.0, 15 * 1024 * 1024));

        assert_eq!(quality.file_size_mb, 15.0);
        assert_eq!(quality.file_efficiency_mb_per_minute, 30.0);
        assert_eq!(quality.estimated_bitrate_kbps, 4194);
        assert_eq!(quality.total_pixels, 1920 * 1080);
        assert!((quality.aspect_ratio - 16.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_duration_and_height() {
        let quality = VideoQuality::assess(&metadata(640, 0, 30.0, 0.0, 1024));
        assert_eq!(quality.aspect_ratio, 0.0);
        assert_eq!(quality.file_efficiency_mb_per_minute, 0.0);
        assert_eq!(quality.estimated_bitrate_kbps, 0);
    }

    #[test]
    fn test_serialized_labels() {
        let quality = VideoQuality::assess(&metadata(3840, 2160, 60.0, 30.0, 1024));
        let json = serde_json::to_value(&quality).unwrap();
        assert_eq!(json["resolution_category"], "4K");
        assert_eq!(json["fps_category"], "high_fps");
    }
}
