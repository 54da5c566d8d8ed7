//! Delta report decoding.
//!
//! The diff tool emits a JSON array of records shaped like
//! `{Image1, Image2, DiffType, Diff}`. The shape of `Diff` depends on
//! `DiffType`, so decoding runs in two phases: the envelope is decoded with
//! `Diff` captured as an opaque [`Value`], then the payload is resolved by
//! kind. Unknown kinds keep the opaque payload.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::ReportError;

/// Wire name of the filesystem record kind.
pub const FILE_KIND: &str = "File";
/// Wire name of the image-configuration record kind.
pub const METADATA_KIND: &str = "Metadata";

/// A single file entry in a filesystem delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "Name")]
    pub path: String,
    #[serde(rename = "Size", default)]
    pub size_bytes: i64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size_bytes: i64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }
}

/// Filesystem differences between two images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDelta {
    #[serde(rename = "Adds", default, deserialize_with = "null_as_empty")]
    pub adds: Vec<FileEntry>,
    #[serde(rename = "Dels", default, deserialize_with = "null_as_empty")]
    pub dels: Vec<FileEntry>,
    #[serde(rename = "Mods", default, deserialize_with = "null_as_empty")]
    pub mods: Vec<FileEntry>,
}

impl FileDelta {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.dels.is_empty() && self.mods.is_empty()
    }
}

/// Image configuration differences; each entry is a serialized `Key:Value`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDelta {
    #[serde(rename = "Adds", default, deserialize_with = "null_as_empty")]
    pub adds: Vec<String>,
    #[serde(rename = "Dels", default, deserialize_with = "null_as_empty")]
    pub dels: Vec<String>,
}

impl MetadataDelta {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.dels.is_empty()
    }
}

/// The diff tool writes `null` for an empty list in some positions and `[]`
/// in others. Both decode to an empty `Vec`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Record kind, borrowed from the payload it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind<'a> {
    File,
    Metadata,
    Other(&'a str),
}

impl DiffKind<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            DiffKind::File => FILE_KIND,
            DiffKind::Metadata => METADATA_KIND,
            DiffKind::Other(kind) => *kind,
        }
    }
}

/// Payload of a record, resolved from the record kind.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffPayload {
    File(FileDelta),
    Metadata(MetadataDelta),
    /// A kind this decoder does not understand. The payload is kept as-is.
    Unresolved { kind: String, raw: Value },
}

impl DiffPayload {
    pub fn kind(&self) -> DiffKind<'_> {
        match self {
            DiffPayload::File(_) => DiffKind::File,
            DiffPayload::Metadata(_) => DiffKind::Metadata,
            DiffPayload::Unresolved { kind, .. } => DiffKind::Other(kind),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            DiffPayload::File(delta) => json!(delta),
            DiffPayload::Metadata(delta) => json!(delta),
            DiffPayload::Unresolved { raw, .. } => raw.clone(),
        }
    }
}

/// One record of a delta report.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRecord {
    pub subject_a: String,
    pub subject_b: String,
    pub payload: DiffPayload,
}

impl DiffRecord {
    pub fn kind(&self) -> DiffKind<'_> {
        self.payload.kind()
    }

    /// Render this record in the diff tool's wire format.
    pub fn to_wire(&self) -> Value {
        json!({
            "Image1": self.subject_a,
            "Image2": self.subject_b,
            "DiffType": self.kind().as_str(),
            "Diff": self.payload.to_value(),
        })
    }
}

/// Ordered records produced by the diff tool for one image pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaReport {
    pub records: Vec<DiffRecord>,
}

impl DeltaReport {
    pub fn new(records: Vec<DiffRecord>) -> Self {
        Self { records }
    }

    /// Render the whole report in the diff tool's wire format.
    pub fn to_wire(&self) -> Value {
        Value::Array(self.records.iter().map(DiffRecord::to_wire).collect())
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_wire()).unwrap_or_else(|_| "<unrenderable>".into())
    }
}

/// Record envelope; `Diff` stays opaque until the kind is known.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "Image1")]
    image1: String,
    #[serde(rename = "Image2")]
    image2: String,
    #[serde(rename = "DiffType")]
    diff_type: String,
    #[serde(rename = "Diff", default)]
    diff: Value,
}

/// Decode a raw report produced by the diff tool.
///
/// Fails with [`ReportError::MalformedReport`] if the envelope or a File /
/// Metadata payload does not decode. No partial result is returned.
pub fn decode_report(raw: &[u8]) -> Result<DeltaReport, ReportError> {
    let malformed = |reason: String| ReportError::MalformedReport {
        reason,
        raw: String::from_utf8_lossy(raw).into_owned(),
    };

    let envelopes: Vec<RawRecord> =
        serde_json::from_slice(raw).map_err(|e| malformed(format!("envelope: {e}")))?;

    let mut records = Vec::with_capacity(envelopes.len());
    for (index, envelope) in envelopes.into_iter().enumerate() {
        let payload = match envelope.diff_type.as_str() {
            // A null or absent `Diff` is an empty delta.
            FILE_KIND => DiffPayload::File(
                serde_json::from_value::<Option<FileDelta>>(envelope.diff)
                    .map_err(|e| malformed(format!("record {index} ({FILE_KIND}): {e}")))?
                    .unwrap_or_default(),
            ),
            METADATA_KIND => DiffPayload::Metadata(
                serde_json::from_value::<Option<MetadataDelta>>(envelope.diff)
                    .map_err(|e| malformed(format!("record {index} ({METADATA_KIND}): {e}")))?
                    .unwrap_or_default(),
            ),
            other => {
                tracing::debug!(kind = %other, index, "leaving payload of unknown kind unresolved");
                DiffPayload::Unresolved {
                    kind: other.to_string(),
                    raw: envelope.diff,
                }
            }
        };
        records.push(DiffRecord {
            subject_a: envelope.image1,
            subject_b: envelope.image2,
            payload,
        });
    }

    Ok(DeltaReport { records })
}
