use serde::{Deserialize, Serialize};

/// S3 event notification payload, trimmed to the fields we read
#[derive(Debug, Clone, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records")]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3EventRecord {
    #[serde(default)]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3BucketEntity,
    pub object: S3ObjectEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3ObjectEntity {
    /// Form-encoded, see `interpreter::decode_key`
    pub key: String,
}

/// One entry of a notification batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

impl Notification {
    pub fn object_created(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            event_name: None,
        }
    }

    /// Entries without an event name are assumed to be creations
    pub fn is_object_created(&self) -> bool {
        self.event_name
            .as_deref()
            .map_or(true, |name| name.starts_with("ObjectCreated"))
    }
}

impl S3Event {
    pub fn into_notifications(self) -> Vec<Notification> {
        self.records
            .into_iter()
            .map(|record| Notification {
                bucket: record.s3.bucket.name,
                key: record.s3.object.key,
                event_name: record.event_name,
            })
            .collect()
    }
}
