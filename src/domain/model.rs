use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Destination of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTarget {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
}

impl ObjectTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// A part acknowledged by the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: Option<String>,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    Multipart,
    SinglePut,
}

/// Final result of a closed upload stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub bucket: String,
    pub key: String,
    pub upload_id: Option<String>,
    pub e_tag: Option<String>,
    pub parts: Vec<CompletedPart>,
    pub total_bytes: u64,
    pub mode: UploadMode,
    pub completed_at: DateTime<Utc>,
}
