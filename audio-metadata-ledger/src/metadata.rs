use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Calendar partition recovered from a date-partitioned key. Values are kept
/// as the path segments spelled them (`"05"`, not `5`), or the sentinel when
/// a segment was missing or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DatePartition {
    pub year: String,
    pub month: String,
    pub day: String,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub file_name: String,
    pub client_id: String,
    /// ISO-8601 UTC, millisecond precision
    pub upload_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<DatePartition>,
}

/// Field combination deciding whether a row is already in a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    file_name: String,
    upload_timestamp: String,
    client_id: String,
    partition: Option<DatePartition>,
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Metadata {
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            file_name: self.file_name.clone(),
            upload_timestamp: self.upload_timestamp.clone(),
            client_id: self.client_id.clone(),
            partition: self.partition.clone(),
        }
    }

    /// File name without its final extension
    pub fn file_stem(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.file_name,
        }
    }

    /// Upload timestamp squashed into something safe for an object key,
    /// e.g. `20240501T120000123Z`
    pub fn compact_timestamp(&self) -> String {
        self.upload_timestamp
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect()
    }
}
