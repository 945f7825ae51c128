//! Shared fixtures for integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::Path;

/// A single NAL unit with the forbidden bit clear.
pub const VALID_SAMPLE: &[u8] = &[0, 0, 0, 2, 0x65, 0x88];

/// NAL length running past the end of the sample.
pub const CORRUPT_SAMPLE: &[u8] = &[0, 0, 0, 9, 0xe5, 0x00];

/// Payload of the single NAL unit in every valid sample.
const NAL_PAYLOAD: &[u8] = &[0x65, 0x88];

const TRACK_ID: u32 = 1;

/// How samples are laid out in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Sample tables in `moov`, one `mdat`.
    Progressive,
    /// Empty tables in `moov`, one `moof` + `mdat` pair per second.
    Fragmented,
}

/// Minimal single-track MP4 with 30 fps timing.
pub struct Mp4Fixture {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    pub sample: Vec<u8>,
    pub layout: Layout,
    /// Written to an `avcC` box when set.
    pub nal_length_size: Option<u8>,
}

impl Mp4Fixture {
    const TIMESCALE: u32 = 15360;
    const DELTA: u32 = 512;
    const FRAMES_PER_FRAGMENT: u32 = 30;

    pub fn with_duration(seconds: u32) -> Self {
        Self {
            width: 1280,
            height: 720,
            frames: seconds * 30,
            sample: VALID_SAMPLE.to_vec(),
            layout: Layout::Progressive,
            nal_length_size: None,
        }
    }

    pub fn corrupt(mut self) -> Self {
        self.sample = CORRUPT_SAMPLE.to_vec();
        self
    }

    pub fn fragmented(mut self) -> Self {
        self.layout = Layout::Fragmented;
        self
    }

    /// Declare `size`-byte NAL length fields and encode the sample to match.
    pub fn with_nal_length_size(mut self, size: u8) -> Self {
        let mut sample = (NAL_PAYLOAD.len() as u32).to_be_bytes()[4 - usize::from(size)..].to_vec();
        sample.extend_from_slice(NAL_PAYLOAD);
        self.sample = sample;
        self.nal_length_size = Some(size);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let ftyp = mp4_box(b"ftyp", b"isom\0\0\x02\0isomavc1");
        match self.layout {
            Layout::Progressive => {
                let mdat = mp4_box(b"mdat", &self.sample);
                // the first sample sits right after the mdat header
                let sample_offset = (ftyp.len() + 8) as u32;
                let moov = mp4_box(b"moov", &self.trak(Some(sample_offset)));
                [ftyp, mdat, moov].concat()
            }
            Layout::Fragmented => {
                let trex = full_box(
                    b"trex",
                    0,
                    0,
                    &u32s(&[TRACK_ID, 1, Self::DELTA, self.sample.len() as u32, 0]),
                );
                let moov = mp4_box(b"moov", &[self.trak(None), mp4_box(b"mvex", &trex)].concat());

                let mut out = [ftyp, moov].concat();
                let mut remaining = self.frames;
                let mut sequence = 1;
                while remaining > 0 {
                    let count = remaining.min(Self::FRAMES_PER_FRAGMENT);
                    out.extend(self.fragment(sequence, count));
                    remaining -= count;
                    sequence += 1;
                }
                out
            }
        }
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, self.to_bytes()).unwrap();
    }

    /// Video track; sample tables are left empty when `sample_offset` is `None`.
    fn trak(&self, sample_offset: Option<u32>) -> Vec<u8> {
        let mut tkhd_body = vec![0u8; 72];
        tkhd_body[8..12].copy_from_slice(&TRACK_ID.to_be_bytes());
        tkhd_body.extend(u32s(&[self.width << 16, self.height << 16]));
        let tkhd = full_box(b"tkhd", 0, 0, &tkhd_body);

        let media_duration = match sample_offset {
            Some(_) => self.frames * Self::DELTA,
            None => 0,
        };
        let mdhd = full_box(
            b"mdhd",
            0,
            0,
            &u32s(&[0, 0, Self::TIMESCALE, media_duration, 0]),
        );
        let mut hdlr_body = u32s(&[0]);
        hdlr_body.extend_from_slice(b"vide");
        hdlr_body.extend(vec![0u8; 13]);
        let hdlr = full_box(b"hdlr", 0, 0, &hdlr_body);

        let mut entry_body = vec![0u8; 24];
        entry_body.extend_from_slice(&(self.width as u16).to_be_bytes());
        entry_body.extend_from_slice(&(self.height as u16).to_be_bytes());
        entry_body.extend(vec![0u8; 50]);
        if let Some(size) = self.nal_length_size {
            entry_body.extend(mp4_box(b"avcC", &[1, 0x64, 0, 0x1f, 0xfc | (size - 1), 0xe0]));
        }
        let mut stsd_body = u32s(&[1]);
        stsd_body.extend(mp4_box(b"avc1", &entry_body));
        let stsd = full_box(b"stsd", 0, 0, &stsd_body);

        let (stts, stsz, stco) = match sample_offset {
            Some(offset) => (
                full_box(b"stts", 0, 0, &u32s(&[1, self.frames, Self::DELTA])),
                full_box(b"stsz", 0, 0, &u32s(&[self.sample.len() as u32, self.frames])),
                full_box(b"stco", 0, 0, &u32s(&[1, offset])),
            ),
            None => (
                full_box(b"stts", 0, 0, &u32s(&[0])),
                full_box(b"stsz", 0, 0, &u32s(&[0, 0])),
                full_box(b"stco", 0, 0, &u32s(&[0])),
            ),
        };

        let stbl = mp4_box(b"stbl", &[stsd, stts, stsz, stco].concat());
        let minf = mp4_box(b"minf", &stbl);
        let mdia = mp4_box(b"mdia", &[mdhd, hdlr, minf].concat());
        mp4_box(b"trak", &[tkhd, mdia].concat())
    }

    /// `moof` + `mdat` carrying `count` samples; durations and sizes come from
    /// the `trex` defaults and data is addressed relative to the `moof`.
    fn fragment(&self, sequence: u32, count: u32) -> Vec<u8> {
        const DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
        const DATA_OFFSET_PRESENT: u32 = 0x00_0001;

        let build = |data_offset: u32| {
            let mfhd = full_box(b"mfhd", 0, 0, &u32s(&[sequence]));
            let tfhd = full_box(b"tfhd", 0, DEFAULT_BASE_IS_MOOF, &u32s(&[TRACK_ID]));
            let trun = full_box(b"trun", 0, DATA_OFFSET_PRESENT, &u32s(&[count, data_offset]));
            let traf = mp4_box(b"traf", &[tfhd, trun].concat());
            mp4_box(b"moof", &[mfhd, traf].concat())
        };
        let moof_len = build(0).len() as u32;
        let moof = build(moof_len + 8);
        let mdat = mp4_box(b"mdat", &self.sample.repeat(count as usize));
        [moof, mdat].concat()
    }
}

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = ((u32::from(version) << 24) | flags).to_be_bytes().to_vec();
    payload.extend_from_slice(body);
    mp4_box(kind, &payload)
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// Transport record wrapping one object-created event, the way the queue
/// delivers it.
pub fn transport_record(message_id: &str, bucket: &str, raw_key: &str, size: u64) -> Value {
    let inner = json!({
        "Records": [{
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "eventTime": "2024-05-01T12:00:00.000Z",
            "s3": {
                "bucket": {"name": bucket},
                "object": {"key": raw_key, "size": size}
            }
        }]
    });
    let notification = json!({
        "Type": "Notification",
        "MessageId": format!("sns-{message_id}"),
        "TopicArn": "arn:aws:sns:us-west-2:123456789012:video-uploads",
        "Message": inner.to_string(),
        "Timestamp": "2024-05-01T12:00:01.000Z"
    });
    json!({
        "messageId": message_id,
        "receiptHandle": format!("handle-{message_id}"),
        "body": notification.to_string()
    })
}
