//! Confirms that a video track has at least one readable frame.
//!
//! A container can carry a perfectly valid header over a truncated or garbage
//! `mdat`; the probe reads actual sample data so such files surface as
//! unreadable instead of producing metadata for a video nobody can play.

use super::mp4_box::VideoTrack;
use super::ExtractionError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Check run after the container header has been parsed.
pub trait FrameProbe: Send + Sync {
    fn probe(&self, path: &Path, track: &VideoTrack) -> Result<(), ExtractionError>;
}

/// Reads the first sample straight from the file.
///
/// The sample must be fully present and non-empty. For codecs storing
/// length-prefixed NAL units the sample must split cleanly into units with a
/// clear forbidden-zero bit, using the length field width declared by the
/// track's codec configuration.
#[derive(Debug, Clone)]
pub struct SampleProbe {
    max_sample_bytes: u32,
}

impl SampleProbe {
    pub fn new(max_sample_bytes: u32) -> Self {
        Self { max_sample_bytes }
    }
}

impl Default for SampleProbe {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl FrameProbe for SampleProbe {
    fn probe(&self, path: &Path, track: &VideoTrack) -> Result<(), ExtractionError> {
        let location = track.first_sample.ok_or_else(|| {
            ExtractionError::NoDecodableFrame("sample table has no sample location".to_string())
        })?;

        if location.size == 0 {
            return Err(ExtractionError::NoDecodableFrame(
                "first sample is empty".to_string(),
            ));
        }
        if location.size > self.max_sample_bytes {
            return Err(ExtractionError::NoDecodableFrame(format!(
                "first sample of {} bytes exceeds {} byte limit",
                location.size, self.max_sample_bytes
            )));
        }

        let mut file = File::open(path).map_err(|source| ExtractionError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        file.seek(SeekFrom::Start(location.offset))?;

        let mut sample = vec![0u8; location.size as usize];
        file.read_exact(&mut sample).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ExtractionError::NoDecodableFrame(
                "first sample extends past end of file".to_string(),
            ),
            _ => ExtractionError::Io(e),
        })?;

        if track.uses_length_prefixed_nal_units() {
            count_nal_units(&sample, track.nal_length_size)
                .map_err(ExtractionError::NoDecodableFrame)?;
        }

        Ok(())
    }
}

/// Walk length-prefixed NAL units with `length_size`-byte big-endian length
/// fields, returning how many were found.
pub fn count_nal_units(sample: &[u8], length_size: u8) -> Result<usize, String> {
    let width = usize::from(length_size);
    if !(1..=4).contains(&width) {
        return Err(format!("unsupported NAL length field of {length_size} bytes"));
    }

    let mut rest = sample;
    let mut units = 0;

    while !rest.is_empty() {
        if rest.len() < width {
            return Err(format!("{} trailing bytes after NAL unit {units}", rest.len()));
        }
        let len = rest[..width]
            .iter()
            .fold(0usize, |len, &byte| (len << 8) | usize::from(byte));
        rest = &rest[width..];

        if len == 0 || len > rest.len() {
            return Err(format!(
                "NAL unit {units} declares {len} bytes with {} available",
                rest.len()
            ));
        }
        if rest[0] & 0x80 != 0 {
            return Err(format!("NAL unit {units} has forbidden bit set"));
        }

        rest = &rest[len..];
        units += 1;
    }

    if units == 0 {
        return Err("sample contains no NAL units".to_string());
    }
    Ok(units)
}

/// Decodes the first frame through GStreamer.
#[cfg(feature = "gstreamer")]
#[derive(Debug, Clone)]
pub struct GstFrameProbe {
    timeout: std::time::Duration,
}

#[cfg(feature = "gstreamer")]
impl GstFrameProbe {
    pub fn new(timeout: std::time::Duration) -> Result<Self, ExtractionError> {
        gstreamer::init().map_err(|e| ExtractionError::Decoder(e.to_string()))?;
        Ok(Self { timeout })
    }
}

#[cfg(feature = "gstreamer")]
impl FrameProbe for GstFrameProbe {
    fn probe(&self, path: &Path, _track: &VideoTrack) -> Result<(), ExtractionError> {
        use gstreamer as gst;
        use gstreamer::prelude::*;
        use gstreamer_app as gst_app;
        use gstreamer_video as gst_video;

        let location = path.to_str().ok_or_else(|| {
            ExtractionError::Decoder(format!("non UTF-8 path: {}", path.display()))
        })?;

        let pipeline = gst::parse::launch(
            "filesrc name=src ! decodebin ! videoconvert ! appsink name=sink sync=false max-buffers=1",
        )
        .map_err(|e| ExtractionError::Decoder(e.to_string()))?
        .downcast::<gst::Pipeline>()
        .map_err(|_| ExtractionError::Decoder("launch line did not build a pipeline".into()))?;

        let src = pipeline
            .by_name("src")
            .ok_or_else(|| ExtractionError::Decoder("filesrc missing".into()))?;
        src.set_property("location", location);

        let sink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| ExtractionError::Decoder("appsink missing".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ExtractionError::NoDecodableFrame(e.to_string()))?;

        let sample = sink.try_pull_sample(gst::ClockTime::from_mseconds(
            self.timeout.as_millis() as u64,
        ));
        let _ = pipeline.set_state(gst::State::Null);

        let sample = sample.ok_or_else(|| {
            ExtractionError::NoDecodableFrame("decoder produced no frame".to_string())
        })?;
        let caps = sample.caps().ok_or_else(|| {
            ExtractionError::NoDecodableFrame("decoded frame has no caps".to_string())
        })?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| ExtractionError::NoDecodableFrame(e.to_string()))?;

        if info.width() == 0 || info.height() == 0 {
            return Err(ExtractionError::NoDecodableFrame(
                "decoded frame has zero dimensions".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_nal_units() {
        let sample = [0, 0, 0, 2, 0x65, 0x88, 0, 0, 0, 1, 0x06];
        assert_eq!(count_nal_units(&sample, 4), Ok(2));
    }

    #[test]
    fn test_short_length_fields() {
        let two_byte = [0, 2, 0x65, 0x88, 0, 1, 0x06];
        assert_eq!(count_nal_units(&two_byte, 2), Ok(2));

        let one_byte = [2, 0x65, 0x88, 1, 0x06];
        assert_eq!(count_nal_units(&one_byte, 1), Ok(2));

        // read with the wrong width the same bytes overrun the sample
        assert!(count_nal_units(&two_byte, 4).is_err());
    }

    #[test]
    fn test_unsupported_length_size() {
        assert!(count_nal_units(&[0, 0, 0, 1, 0x06], 0).is_err());
        assert!(count_nal_units(&[0, 0, 0, 1, 0x06], 5).is_err());
    }

    #[test]
    fn test_nal_length_overruns_sample() {
        let sample = [0, 0, 0, 9, 0x65, 0x88];
        assert!(count_nal_units(&sample, 4).is_err());
    }

    #[test]
    fn test_forbidden_bit() {
        let sample = [0, 0, 0, 1, 0xe5];
        assert!(count_nal_units(&sample, 4)
            .unwrap_err()
            .contains("forbidden bit"));
    }

    #[test]
    fn test_empty_sample() {
        assert!(count_nal_units(&[], 4).is_err());
        assert!(count_nal_units(&[0, 0], 4).is_err());
    }
}
