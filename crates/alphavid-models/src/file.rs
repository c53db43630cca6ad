//! Uploaded file record.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::FileId;

/// Client-supplied metadata for an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Duration in seconds
    pub duration: f64,
}

impl NewFile {
    pub fn new(name: impl Into<String>, size: u64, duration: f64) -> Self {
        Self {
            name: name.into(),
            size,
            duration,
        }
    }

    /// Lowercased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }
}

/// Persisted upload metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
    pub duration: f64,
    pub uploaded_at: DateTime<Utc>,
    /// Key of the source artifact; absent until the bytes are stored
    pub storage_key: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(file: NewFile, now: DateTime<Utc>, retention: Duration) -> Self {
        Self {
            file_id: FileId::new(),
            name: file.name,
            size: file.size,
            duration: file.duration,
            uploaded_at: now,
            storage_key: None,
            expires_at: now + retention,
        }
    }

    pub fn extension(&self) -> Option<String> {
        file_extension(&self.name)
    }

    pub fn touch(&mut self, now: DateTime<Utc>, retention: Duration) {
        self.expires_at = now + retention;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn file_extension(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}
