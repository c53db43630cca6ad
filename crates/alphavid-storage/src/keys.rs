//! Backend-agnostic key layout: `{prefix}/{yyyy}/{mm}/{dd}/{id}.{ext}`.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::{StorageError, StorageResult};

/// Top-level key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPrefix {
    /// Uploaded originals
    Raw,
    /// Produced artifacts
    Processed,
}

impl KeyPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPrefix::Raw => "raw",
            KeyPrefix::Processed => "processed",
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build a storage key dated at `at`.
pub fn storage_key(prefix: KeyPrefix, id: &str, ext: &str, at: DateTime<Utc>) -> String {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    format!("{}/{}/{}.{}", prefix, at.format("%Y/%m/%d"), id, ext)
}

/// Reject keys that could escape a filesystem root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}
