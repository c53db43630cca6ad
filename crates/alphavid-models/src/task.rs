//! Conversion task record.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error_code::ErrorCode;
use crate::ids::{FileId, TaskId};
use crate::options::ConvertOptions;

/// Task lifecycle status.
///
/// `Success` and `Failed` are absorbing: once reached, the record never
/// changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, waiting for a worker
    #[default]
    Pending,
    /// Claimed by a worker
    Running,
    /// Output artifact stored and addressable
    Success,
    /// Terminated with an error code and message
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one conversion.
///
/// Nullable fields are always present on the wire (as `null`) so pollers see
/// a stable shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub file_id: FileId,
    pub status: TaskStatus,
    /// Snapshot taken at creation; never mutated afterwards
    pub options: ConvertOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100; 100 only on SUCCESS
    pub progress: u8,
    /// Consumer-facing artifact location
    pub result_url: Option<String>,
    /// Storage key of the output artifact
    pub result_key: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    /// Record becomes unobservable after this instant unless touched again
    pub expires_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a PENDING record.
    pub fn new(file_id: FileId, options: ConvertOptions, now: DateTime<Utc>, retention: Duration) -> Self {
        Self {
            task_id: TaskId::new(),
            file_id,
            status: TaskStatus::Pending,
            options,
            created_at: now,
            started_at: None,
            completed_at: None,
            progress: 0,
            result_url: None,
            result_key: None,
            error_code: None,
            error_message: None,
            expires_at: now + retention,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Push the expiry forward after a read or write.
    pub fn touch(&mut self, now: DateTime<Utc>, retention: Duration) {
        self.expires_at = now + retention;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
