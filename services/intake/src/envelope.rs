//! Transport envelope decoding.
//!
//! A queue batch carries records whose `body` is a string-encoded pub/sub
//! notification, whose `Message` is in turn a string-encoded list of storage
//! event records. Decoding always runs in the same order, one stage per type:
//!
//! ```text
//! RawEnvelope.Records[i]      -> OuterEnvelope      (transport record)
//! OuterEnvelope.body          -> InnerNotification  (notification JSON)
//! InnerNotification.Message   -> InnerRecordList    (storage event JSON)
//! InnerRecordList.Records[j]  -> FileReference      (object-created records only)
//! ```
//!
//! A failure at any stage affects only the transport record (or the single
//! storage event record) being decoded; siblings in the same batch still parse.

use crate::outcome::CorrelationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// `eventSource` values identifying object-storage notifications.
pub const OBJECT_STORAGE_EVENT_SOURCES: &[&str] = &["object-storage", "aws:s3"];

/// `eventName` prefix of object creation events (`ObjectCreated:Put`, ...).
pub const OBJECT_CREATED_PREFIX: &str = "ObjectCreated";

const NOTIFICATION_TYPE: &str = "Notification";

/// Decoding stage at which a record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStage {
    TransportRecord,
    Notification,
    EventRecords,
    FileRecord,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeStage::TransportRecord => "transport record",
            DecodeStage::Notification => "notification",
            DecodeStage::EventRecords => "event record list",
            DecodeStage::FileRecord => "file-creation record",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {stage} decoding failed: {message}")]
    Decode { stage: DecodeStage, message: String },

    #[error("Malformed envelope: notification type is {0:?}, expected \"Notification\"")]
    UnexpectedNotificationType(String),
}

impl EnvelopeError {
    fn decode(stage: DecodeStage, error: serde_json::Error) -> Self {
        EnvelopeError::Decode {
            stage,
            message: error.to_string(),
        }
    }

    pub fn stage(&self) -> DecodeStage {
        match self {
            EnvelopeError::Decode { stage, .. } => *stage,
            EnvelopeError::UnexpectedNotificationType(_) => DecodeStage::Notification,
        }
    }
}

/// Batch of transport records as delivered by the queue.
///
/// Records are kept as raw JSON so a single malformed record cannot fail the
/// batch as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "Records", default)]
    pub records: Vec<Value>,
}

/// Stage one: a single transport record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OuterEnvelope {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub receipt_handle: Option<String>,
    pub body: String,
}

impl OuterEnvelope {
    pub fn decode(record: &Value) -> Result<Self, EnvelopeError> {
        OuterEnvelope::deserialize(record)
            .map_err(|e| EnvelopeError::decode(DecodeStage::TransportRecord, e))
    }
}

/// Stage two: the pub/sub notification carried in a transport record body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InnerNotification {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "MessageId")]
    pub message_id: String,
    #[serde(rename = "TopicArn")]
    pub topic_arn: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: Option<String>,
}

impl InnerNotification {
    pub fn decode(body: &str) -> Result<Self, EnvelopeError> {
        let notification: InnerNotification = serde_json::from_str(body)
            .map_err(|e| EnvelopeError::decode(DecodeStage::Notification, e))?;

        if notification.kind != NOTIFICATION_TYPE {
            return Err(EnvelopeError::UnexpectedNotificationType(notification.kind));
        }

        Ok(notification)
    }
}

/// Stage three: the storage event records carried in a notification message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InnerRecordList {
    #[serde(rename = "Records")]
    pub records: Vec<Value>,
}

impl InnerRecordList {
    pub fn decode(message: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(message)
            .map_err(|e| EnvelopeError::decode(DecodeStage::EventRecords, e))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectCreatedRecord {
    event_name: String,
    #[serde(default)]
    event_time: Option<DateTime<Utc>>,
    s3: StorageEntity,
}

#[derive(Debug, Deserialize)]
struct StorageEntity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
    size: u64,
}

/// A newly created object in remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    pub bucket: String,
    /// Object key, already URL-decoded.
    pub key: String,
    pub declared_size: u64,
    pub event_time: Option<DateTime<Utc>>,
    pub event_name: String,
}

impl FileReference {
    /// Last path component of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    fn from_record(record: &Value) -> Option<Result<Self, EnvelopeError>> {
        let source = record.get("eventSource").and_then(Value::as_str)?;
        let name = record.get("eventName").and_then(Value::as_str)?;
        if !OBJECT_STORAGE_EVENT_SOURCES.contains(&source) || !name.starts_with(OBJECT_CREATED_PREFIX)
        {
            return None;
        }

        let parsed = ObjectCreatedRecord::deserialize(record)
            .map(|r| FileReference {
                bucket: r.s3.bucket.name,
                key: decode_object_key(&r.s3.object.key),
                declared_size: r.s3.object.size,
                event_time: r.event_time,
                event_name: r.event_name,
            })
            .map_err(|e| EnvelopeError::decode(DecodeStage::FileRecord, e));

        Some(parsed)
    }
}

/// One parser result: a file reference or the reason its record was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeEntry {
    pub correlation_id: CorrelationId,
    /// Position of the originating transport record in the batch.
    pub record_index: usize,
    pub item: Result<FileReference, EnvelopeError>,
}

/// Decode a transport batch into file references.
///
/// Never fails as a whole: undecodable transport records and undecodable
/// object-created records come back as `Err` entries next to the well-formed
/// ones. Records that are not object-created events are skipped.
pub fn parse(envelope: &RawEnvelope) -> Vec<EnvelopeEntry> {
    envelope
        .records
        .iter()
        .enumerate()
        .flat_map(|(index, record)| parse_record(index, record))
        .collect()
}

fn parse_record(index: usize, record: &Value) -> Vec<EnvelopeEntry> {
    let correlation_id =
        CorrelationId::for_record(record.get("messageId").and_then(Value::as_str), index);
    let entry = |item: Result<FileReference, EnvelopeError>| EnvelopeEntry {
        correlation_id: correlation_id.clone(),
        record_index: index,
        item,
    };

    let records = OuterEnvelope::decode(record)
        .and_then(|outer| InnerNotification::decode(&outer.body))
        .and_then(|notification| InnerRecordList::decode(&notification.message));

    match records {
        Ok(list) => list
            .records
            .iter()
            .filter_map(FileReference::from_record)
            .map(entry)
            .collect(),
        Err(error) => vec![entry(Err(error))],
    }
}

/// Decode an object key as it appears in storage notifications.
///
/// `+` becomes a space and `%XX` becomes the byte `0xXX`, in a single
/// left-to-right pass (`%2520` decodes to `%20`, `%2B` to `+`). A `%` not
/// followed by two hex digits is kept literally.
pub fn decode_object_key(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        decoded.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
