//! Minimal ISO base media file (MP4 / MOV) reader.
//!
//! Only what the extractor needs is decoded: the first video track's sample
//! summary, dimensions, codec fourcc, NAL length size and the location of its
//! first sample. Progressive files keep all of this in the `moov` sample
//! tables. Fragmented files (`moov` carries an `mvex`) keep their samples in
//! `moof/traf/trun` boxes, which are read one fragment at a time. `mdat`
//! payloads are skipped with a seek.

use bytes::{Buf, Bytes};
use std::io::{self, Read, Seek, SeekFrom};
use thiserror::Error;

/// Upper bound on the size of a header box (`moov`, `moof`) read into memory.
pub const MAX_HEADER_BOX_BYTES: u64 = 64 * 1024 * 1024;

/// NAL length prefix size used when the sample entry carries no codec
/// configuration box.
pub const DEFAULT_NAL_LENGTH_SIZE: u8 = 4;

/// Fixed fields of a visual sample entry, before its child boxes.
const VISUAL_SAMPLE_ENTRY_LEN: usize = 78;

const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
const TFHD_DEFAULT_DURATION: u32 = 0x00_0008;
const TFHD_DEFAULT_SIZE: u32 = 0x00_0010;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

const TRUN_DATA_OFFSET: u32 = 0x00_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x00_0400;
const TRUN_SAMPLE_CTS_OFFSET: u32 = 0x00_0800;

pub type FourCc = [u8; 4];

#[derive(Debug, Error)]
pub enum Mp4Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("invalid size {size} for box '{box_type}'")]
    InvalidBoxSize { box_type: String, size: u64 },

    #[error("{box_type} box of {size} bytes exceeds parser limit")]
    BoxTooLarge { box_type: String, size: u64 },

    #[error("no moov box found")]
    MissingMoov,

    #[error("video track has no '{0}' box")]
    MissingBox(&'static str),

    #[error("track run data offset {0} points before the start of the file")]
    InvalidDataOffset(i64),
}

/// File position and size of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLocation {
    pub offset: u64,
    pub size: u32,
}

/// Summary of the first video track in a container.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrack {
    pub track_id: u32,
    pub codec: FourCc,
    pub width: u32,
    pub height: u32,
    /// Media timescale in ticks per second (`mdhd`).
    pub timescale: u32,
    /// Media duration in timescale ticks (`mdhd`, or the fragment total when
    /// that is longer).
    pub media_duration: u64,
    /// Sample count from the sample size table (`stsz`) plus fragments.
    pub sample_count: u64,
    /// Sample count from the time-to-sample table (`stts`) plus fragments.
    pub timed_sample_count: u64,
    /// Sum of all sample durations in timescale ticks.
    pub total_sample_delta: u64,
    pub first_sample: Option<SampleLocation>,
    /// Byte width of each NAL unit length prefix (`avcC` / `hvcC`).
    pub nal_length_size: u8,
    /// Whether any samples came from movie fragments.
    pub fragmented: bool,
}

impl VideoTrack {
    pub fn frame_count(&self) -> u64 {
        if self.sample_count > 0 {
            self.sample_count
        } else {
            self.timed_sample_count
        }
    }

    /// Average frame rate over the sample table, `None` when it would be zero
    /// or undefined.
    pub fn average_frame_rate(&self) -> Option<f64> {
        let frames = self.frame_count();
        if self.timescale == 0 || self.total_sample_delta == 0 || frames == 0 {
            return None;
        }
        Some(frames as f64 * f64::from(self.timescale) / self.total_sample_delta as f64)
    }

    pub fn media_duration_seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.media_duration as f64 / f64::from(self.timescale)
    }

    /// Codec fourcc as text; non-printable bytes are shown as `?`.
    pub fn codec_tag(&self) -> String {
        self.codec
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '?'
                }
            })
            .collect()
    }

    /// Whether samples are stored as length-prefixed NAL units.
    pub fn uses_length_prefixed_nal_units(&self) -> bool {
        matches!(&self.codec, b"avc1" | b"avc3" | b"hvc1" | b"hev1")
    }

    fn merge_fragments(&mut self, fragments: FragmentSummary) {
        if fragments.samples == 0 {
            return;
        }
        self.fragmented = true;
        self.sample_count = self.sample_count.saturating_add(fragments.samples);
        self.timed_sample_count = self.timed_sample_count.saturating_add(fragments.samples);
        self.total_sample_delta = self
            .total_sample_delta
            .saturating_add(fragments.total_delta);
        // mdhd of a fragmented file usually only covers the samples in moov
        self.media_duration = self.media_duration.max(self.total_sample_delta);
        self.first_sample = self.first_sample.or(fragments.first_sample);
    }
}

/// Locate `moov` in a container and summarise its first video track,
/// including samples held in movie fragments.
///
/// Returns `Ok(None)` when the container holds no video track.
pub fn read_video_track<R: Read + Seek>(
    reader: &mut R,
    file_len: u64,
) -> Result<Option<VideoTrack>, Mp4Error> {
    let boxes = scan_top_level(reader, file_len)?;
    let moov_header = boxes
        .iter()
        .find(|header| &header.kind == b"moov")
        .ok_or(Mp4Error::MissingMoov)?;
    let moov = read_body(reader, moov_header)?;

    let Some(mut track) = first_video_track(&moov)? else {
        return Ok(None);
    };

    if let Some(mvex) = child(&moov, b"mvex")? {
        let defaults = parse_track_extends(&mvex, track.track_id)?;
        let fragments = read_fragments(reader, &boxes, track.track_id, defaults)?;
        track.merge_fragments(fragments);
    }

    Ok(Some(track))
}

/// Position of one top-level box in the file.
#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    kind: FourCc,
    offset: u64,
    header_len: u64,
    size: u64,
}

impl BoxHeader {
    fn body_offset(&self) -> u64 {
        self.offset + self.header_len
    }

    fn body_len(&self) -> u64 {
        self.size - self.header_len
    }

    fn type_name(&self) -> String {
        String::from_utf8_lossy(&self.kind).into_owned()
    }
}

fn scan_top_level<R: Read + Seek>(
    reader: &mut R,
    file_len: u64,
) -> Result<Vec<BoxHeader>, Mp4Error> {
    let mut boxes: Vec<BoxHeader> = Vec::new();
    let mut position = 0u64;

    while position + 8 <= file_len {
        reader.seek(SeekFrom::Start(position))?;

        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind: FourCc = [header[4], header[5], header[6], header[7]];

        let (size, header_len) = match size32 {
            0 => (file_len - position, 8),
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large)?;
                (u64::from_be_bytes(large), 16)
            }
            n => (u64::from(n), 8),
        };

        if size < header_len || position.saturating_add(size) > file_len {
            // a cut-off tail after the movie header only loses trailing fragments
            if boxes.iter().any(|b| &b.kind == b"moov") {
                break;
            }
            return Err(Mp4Error::InvalidBoxSize {
                box_type: String::from_utf8_lossy(&kind).into_owned(),
                size,
            });
        }

        boxes.push(BoxHeader {
            kind,
            offset: position,
            header_len,
            size,
        });
        position += size;
    }

    Ok(boxes)
}

fn read_body<R: Read + Seek>(reader: &mut R, header: &BoxHeader) -> Result<Bytes, Mp4Error> {
    let len = header.body_len();
    if len > MAX_HEADER_BOX_BYTES {
        return Err(Mp4Error::BoxTooLarge {
            box_type: header.type_name(),
            size: len,
        });
    }
    reader.seek(SeekFrom::Start(header.body_offset()))?;
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    Ok(Bytes::from(body))
}

fn first_video_track(moov: &Bytes) -> Result<Option<VideoTrack>, Mp4Error> {
    for (kind, trak) in children(moov.clone())? {
        if &kind == b"trak" {
            if let Some(track) = parse_trak(trak)? {
                return Ok(Some(track));
            }
        }
    }
    Ok(None)
}

/// Split a box payload into its child boxes.
fn children(mut data: Bytes) -> Result<Vec<(FourCc, Bytes)>, Mp4Error> {
    let mut boxes = Vec::new();

    while data.has_remaining() {
        let size32 = take_u32(&mut data, "box header")?;
        let kind = take_fourcc(&mut data, "box header")?;
        let body_len = match size32 {
            0 => data.remaining() as u64,
            1 => take_u64(&mut data, "box header")?.saturating_sub(16),
            n if n < 8 => {
                return Err(Mp4Error::InvalidBoxSize {
                    box_type: String::from_utf8_lossy(&kind).into_owned(),
                    size: u64::from(n),
                })
            }
            n => u64::from(n) - 8,
        };

        if body_len > data.remaining() as u64 {
            return Err(Mp4Error::InvalidBoxSize {
                box_type: String::from_utf8_lossy(&kind).into_owned(),
                size: body_len,
            });
        }

        boxes.push((kind, data.split_to(body_len as usize)));
    }

    Ok(boxes)
}

fn child(data: &Bytes, kind: &FourCc) -> Result<Option<Bytes>, Mp4Error> {
    Ok(children(data.clone())?
        .into_iter()
        .find(|(k, _)| k == kind)
        .map(|(_, body)| body))
}

fn parse_trak(trak: Bytes) -> Result<Option<VideoTrack>, Mp4Error> {
    let Some(mdia) = child(&trak, b"mdia")? else {
        return Ok(None);
    };
    let Some(hdlr) = child(&mdia, b"hdlr")? else {
        return Ok(None);
    };
    if parse_handler(hdlr)? != *b"vide" {
        return Ok(None);
    }

    let mdhd = child(&mdia, b"mdhd")?.ok_or(Mp4Error::MissingBox("mdhd"))?;
    let (timescale, media_duration) = parse_media_header(mdhd)?;

    let minf = child(&mdia, b"minf")?.ok_or(Mp4Error::MissingBox("minf"))?;
    let stbl = child(&minf, b"stbl")?.ok_or(Mp4Error::MissingBox("stbl"))?;

    let stsd = child(&stbl, b"stsd")?.ok_or(Mp4Error::MissingBox("stsd"))?;
    let entry = parse_sample_description(stsd)?;

    let (timed_sample_count, total_sample_delta) = match child(&stbl, b"stts")? {
        Some(stts) => parse_time_to_sample(stts)?,
        None => (0, 0),
    };

    let (sample_count, first_sample_size) = match child(&stbl, b"stsz")? {
        Some(stsz) => parse_sample_sizes(stsz)?,
        None => (0, None),
    };

    let first_chunk_offset = match (child(&stbl, b"stco")?, child(&stbl, b"co64")?) {
        (Some(stco), _) => parse_chunk_offset(stco, false)?,
        (None, Some(co64)) => parse_chunk_offset(co64, true)?,
        (None, None) => None,
    };

    let (track_id, mut width, mut height) = match child(&trak, b"tkhd")? {
        Some(tkhd) => parse_track_header(&tkhd)?,
        None => (0, 0, 0),
    };
    if width == 0 || height == 0 {
        width = entry.width;
        height = entry.height;
    }

    let first_sample = match (first_chunk_offset, first_sample_size) {
        (Some(offset), Some(size)) => Some(SampleLocation { offset, size }),
        _ => None,
    };

    Ok(Some(VideoTrack {
        track_id,
        codec: entry.codec,
        width,
        height,
        timescale,
        media_duration,
        sample_count,
        timed_sample_count,
        total_sample_delta,
        first_sample,
        nal_length_size: entry.nal_length_size,
        fragmented: false,
    }))
}

fn parse_handler(mut hdlr: Bytes) -> Result<FourCc, Mp4Error> {
    skip(&mut hdlr, 8, "hdlr")?;
    take_fourcc(&mut hdlr, "hdlr")
}

fn parse_media_header(mut mdhd: Bytes) -> Result<(u32, u64), Mp4Error> {
    let version = take_u8(&mut mdhd, "mdhd")?;
    skip(&mut mdhd, 3, "mdhd")?;
    if version == 1 {
        skip(&mut mdhd, 16, "mdhd")?;
        let timescale = take_u32(&mut mdhd, "mdhd")?;
        let duration = take_u64(&mut mdhd, "mdhd")?;
        Ok((timescale, duration))
    } else {
        skip(&mut mdhd, 8, "mdhd")?;
        let timescale = take_u32(&mut mdhd, "mdhd")?;
        let duration = take_u32(&mut mdhd, "mdhd")?;
        Ok((timescale, u64::from(duration)))
    }
}

/// Track id plus the trailing 16.16 fixed-point width and height of `tkhd`.
fn parse_track_header(tkhd: &Bytes) -> Result<(u32, u32, u32), Mp4Error> {
    let mut body = tkhd.clone();
    let version = take_u8(&mut body, "tkhd")?;
    skip(&mut body, 3, "tkhd")?;
    // creation and modification times
    skip(&mut body, if version == 1 { 16 } else { 8 }, "tkhd")?;
    let track_id = take_u32(&mut body, "tkhd")?;

    let (width, height) = if tkhd.len() < 84 {
        (0, 0)
    } else {
        let mut tail = tkhd.slice(tkhd.len() - 8..);
        (tail.get_u32() >> 16, tail.get_u32() >> 16)
    };
    Ok((track_id, width, height))
}

struct SampleEntry {
    codec: FourCc,
    width: u32,
    height: u32,
    nal_length_size: u8,
}

fn parse_sample_description(mut stsd: Bytes) -> Result<SampleEntry, Mp4Error> {
    skip(&mut stsd, 4, "stsd")?;
    let entry_count = take_u32(&mut stsd, "stsd")?;
    if entry_count == 0 {
        return Err(Mp4Error::Truncated("stsd: no sample entries"));
    }
    let entry_size = take_u32(&mut stsd, "stsd entry")? as usize;
    let codec = take_fourcc(&mut stsd, "stsd entry")?;
    let entry = stsd.split_to(entry_size.saturating_sub(8).min(stsd.remaining()));

    // reserved(6) data_reference_index(2) pre_defined/reserved(16), then width/height
    let (width, height) = if entry.len() >= 28 {
        let mut dimensions = entry.slice(24..28);
        (u32::from(dimensions.get_u16()), u32::from(dimensions.get_u16()))
    } else {
        (0, 0)
    };

    let nal_length_size = if entry.len() > VISUAL_SAMPLE_ENTRY_LEN {
        codec_nal_length_size(entry.slice(VISUAL_SAMPLE_ENTRY_LEN..))
    } else {
        None
    };

    Ok(SampleEntry {
        codec,
        width,
        height,
        nal_length_size: nal_length_size.unwrap_or(DEFAULT_NAL_LENGTH_SIZE),
    })
}

/// `lengthSizeMinusOne + 1` from an `avcC` or `hvcC` box among the sample
/// entry's children. Stops at the first malformed child.
fn codec_nal_length_size(mut extensions: Bytes) -> Option<u8> {
    while extensions.remaining() >= 8 {
        let size = extensions.get_u32() as usize;
        let mut kind = [0u8; 4];
        extensions.copy_to_slice(&mut kind);
        if size < 8 || size - 8 > extensions.remaining() {
            return None;
        }
        let config = extensions.split_to(size - 8);

        let index = match &kind {
            b"avcC" => 4,
            b"hvcC" => 21,
            _ => continue,
        };
        return config.get(index).map(|byte| (byte & 0b11) + 1);
    }
    None
}

fn parse_time_to_sample(mut stts: Bytes) -> Result<(u64, u64), Mp4Error> {
    skip(&mut stts, 4, "stts")?;
    let entry_count = take_u32(&mut stts, "stts")?;

    let mut samples = 0u64;
    let mut total_delta = 0u64;
    for _ in 0..entry_count {
        let count = u64::from(take_u32(&mut stts, "stts entry")?);
        let delta = u64::from(take_u32(&mut stts, "stts entry")?);
        samples = samples.saturating_add(count);
        total_delta = total_delta.saturating_add(count.saturating_mul(delta));
    }

    Ok((samples, total_delta))
}

fn parse_sample_sizes(mut stsz: Bytes) -> Result<(u64, Option<u32>), Mp4Error> {
    skip(&mut stsz, 4, "stsz")?;
    let uniform_size = take_u32(&mut stsz, "stsz")?;
    let sample_count = take_u32(&mut stsz, "stsz")?;

    let first = if sample_count == 0 {
        None
    } else if uniform_size != 0 {
        Some(uniform_size)
    } else {
        Some(take_u32(&mut stsz, "stsz entry")?)
    };

    Ok((u64::from(sample_count), first))
}

fn parse_chunk_offset(mut table: Bytes, large: bool) -> Result<Option<u64>, Mp4Error> {
    skip(&mut table, 4, "chunk offset table")?;
    let entry_count = take_u32(&mut table, "chunk offset table")?;
    if entry_count == 0 {
        return Ok(None);
    }
    let offset = if large {
        take_u64(&mut table, "co64 entry")?
    } else {
        u64::from(take_u32(&mut table, "stco entry")?)
    };
    Ok(Some(offset))
}

/// Per-sample defaults for a track's fragments (`trex`).
#[derive(Debug, Clone, Copy, Default)]
struct SampleDefaults {
    duration: u32,
    size: u32,
}

fn parse_track_extends(mvex: &Bytes, track_id: u32) -> Result<SampleDefaults, Mp4Error> {
    for (kind, mut trex) in children(mvex.clone())? {
        if &kind != b"trex" {
            continue;
        }
        skip(&mut trex, 4, "trex")?;
        if take_u32(&mut trex, "trex")? != track_id {
            continue;
        }
        // default_sample_description_index
        skip(&mut trex, 4, "trex")?;
        return Ok(SampleDefaults {
            duration: take_u32(&mut trex, "trex")?,
            size: take_u32(&mut trex, "trex")?,
        });
    }
    Ok(SampleDefaults::default())
}

/// Samples of one track accumulated over every movie fragment.
#[derive(Debug, Default)]
struct FragmentSummary {
    samples: u64,
    total_delta: u64,
    first_sample: Option<SampleLocation>,
}

fn read_fragments<R: Read + Seek>(
    reader: &mut R,
    boxes: &[BoxHeader],
    track_id: u32,
    defaults: SampleDefaults,
) -> Result<FragmentSummary, Mp4Error> {
    let mut summary = FragmentSummary::default();
    for header in boxes.iter().filter(|header| &header.kind == b"moof") {
        let moof = read_body(reader, header)?;
        parse_movie_fragment(moof, header.offset, track_id, defaults, &mut summary)?;
    }
    Ok(summary)
}

fn parse_movie_fragment(
    moof: Bytes,
    moof_offset: u64,
    track_id: u32,
    defaults: SampleDefaults,
    summary: &mut FragmentSummary,
) -> Result<(), Mp4Error> {
    // without an explicit base, a traf's data follows the previous traf's data
    let mut previous_end = moof_offset;

    for (kind, traf) in children(moof)? {
        if &kind != b"traf" {
            continue;
        }
        let tfhd = child(&traf, b"tfhd")?.ok_or(Mp4Error::MissingBox("tfhd"))?;
        let header = parse_fragment_header(tfhd, defaults)?;
        let base = match header.base_data_offset {
            Some(offset) => offset,
            None if header.base_is_moof => moof_offset,
            None => previous_end,
        };

        let mut cursor = base;
        for (kind, trun) in children(traf)? {
            if &kind != b"trun" {
                continue;
            }
            let run = parse_track_run(trun, base, cursor, &header)?;
            cursor = run.data_end;

            if header.track_id == track_id && run.sample_count > 0 {
                summary.samples = summary.samples.saturating_add(run.sample_count);
                summary.total_delta = summary.total_delta.saturating_add(run.total_delta);
                summary.first_sample = summary.first_sample.or(run.first_sample);
            }
        }
        previous_end = cursor;
    }

    Ok(())
}

struct FragmentHeader {
    track_id: u32,
    base_data_offset: Option<u64>,
    base_is_moof: bool,
    default_duration: u32,
    default_size: u32,
}

fn parse_fragment_header(
    mut tfhd: Bytes,
    defaults: SampleDefaults,
) -> Result<FragmentHeader, Mp4Error> {
    let flags = take_u32(&mut tfhd, "tfhd")? & 0x00ff_ffff;
    let track_id = take_u32(&mut tfhd, "tfhd")?;

    let base_data_offset = if flags & TFHD_BASE_DATA_OFFSET != 0 {
        Some(take_u64(&mut tfhd, "tfhd")?)
    } else {
        None
    };
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        skip(&mut tfhd, 4, "tfhd")?;
    }
    let default_duration = if flags & TFHD_DEFAULT_DURATION != 0 {
        take_u32(&mut tfhd, "tfhd")?
    } else {
        defaults.duration
    };
    let default_size = if flags & TFHD_DEFAULT_SIZE != 0 {
        take_u32(&mut tfhd, "tfhd")?
    } else {
        defaults.size
    };

    Ok(FragmentHeader {
        track_id,
        base_data_offset,
        base_is_moof: flags & TFHD_DEFAULT_BASE_IS_MOOF != 0,
        default_duration,
        default_size,
    })
}

struct TrackRun {
    sample_count: u64,
    total_delta: u64,
    first_sample: Option<SampleLocation>,
    /// File offset just past this run's sample data.
    data_end: u64,
}

fn parse_track_run(
    mut trun: Bytes,
    base: u64,
    cursor: u64,
    header: &FragmentHeader,
) -> Result<TrackRun, Mp4Error> {
    let flags = take_u32(&mut trun, "trun")? & 0x00ff_ffff;
    let sample_count = take_u32(&mut trun, "trun")?;

    let start = if flags & TRUN_DATA_OFFSET != 0 {
        let offset = i64::from(take_u32(&mut trun, "trun")? as i32);
        base.checked_add_signed(offset)
            .ok_or(Mp4Error::InvalidDataOffset(offset))?
    } else {
        cursor
    };
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        skip(&mut trun, 4, "trun")?;
    }

    let per_sample_fields = [
        TRUN_SAMPLE_DURATION,
        TRUN_SAMPLE_SIZE,
        TRUN_SAMPLE_FLAGS,
        TRUN_SAMPLE_CTS_OFFSET,
    ]
    .iter()
    .filter(|&&field| flags & field != 0)
    .count();

    let count = u64::from(sample_count);
    if per_sample_fields == 0 {
        let size = header.default_size;
        return Ok(TrackRun {
            sample_count: count,
            total_delta: count.saturating_mul(u64::from(header.default_duration)),
            first_sample: (count > 0).then_some(SampleLocation { offset: start, size }),
            data_end: start.saturating_add(count.saturating_mul(u64::from(size))),
        });
    }

    if (trun.remaining() as u64) < count.saturating_mul(4 * per_sample_fields as u64) {
        return Err(Mp4Error::Truncated("trun entries"));
    }

    let mut total_delta = 0u64;
    let mut data_len = 0u64;
    let mut first_sample = None;
    for _ in 0..sample_count {
        let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
            trun.get_u32()
        } else {
            header.default_duration
        };
        let size = if flags & TRUN_SAMPLE_SIZE != 0 {
            trun.get_u32()
        } else {
            header.default_size
        };
        if flags & TRUN_SAMPLE_FLAGS != 0 {
            trun.advance(4);
        }
        if flags & TRUN_SAMPLE_CTS_OFFSET != 0 {
            trun.advance(4);
        }

        if first_sample.is_none() {
            first_sample = Some(SampleLocation {
                offset: start.saturating_add(data_len),
                size,
            });
        }
        total_delta = total_delta.saturating_add(u64::from(duration));
        data_len = data_len.saturating_add(u64::from(size));
    }

    Ok(TrackRun {
        sample_count: count,
        total_delta,
        first_sample,
        data_end: start.saturating_add(data_len),
    })
}

fn skip(buf: &mut Bytes, n: usize, what: &'static str) -> Result<(), Mp4Error> {
    if buf.remaining() < n {
        return Err(Mp4Error::Truncated(what));
    }
    buf.advance(n);
    Ok(())
}

fn take_u8(buf: &mut Bytes, what: &'static str) -> Result<u8, Mp4Error> {
    if buf.remaining() < 1 {
        return Err(Mp4Error::Truncated(what));
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut Bytes, what: &'static str) -> Result<u32, Mp4Error> {
    if buf.remaining() < 4 {
        return Err(Mp4Error::Truncated(what));
    }
    Ok(buf.get_u32())
}

fn take_u64(buf: &mut Bytes, what: &'static str) -> Result<u64, Mp4Error> {
    if buf.remaining() < 8 {
        return Err(Mp4Error::Truncated(what));
    }
    Ok(buf.get_u64())
}

fn take_fourcc(buf: &mut Bytes, what: &'static str) -> Result<FourCc, Mp4Error> {
    if buf.remaining() < 4 {
        return Err(Mp4Error::Truncated(what));
    }
    let mut code = [0u8; 4];
    buf.copy_to_slice(&mut code);
    Ok(code)
}
