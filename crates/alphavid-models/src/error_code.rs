//! Failure codes written to FAILED task records.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy shared by every component that can fail a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorCode {
    /// Client input rejected before a task exists
    ValidationError,
    /// Referenced file or task record is missing or expired
    NotFound,
    /// Artifact backend fetch/put/delete failure
    StorageError,
    /// Engine non-zero exit, missing output or timeout
    TranscodeError,
    /// State machine guard violation
    InvalidTransition,
    /// Unexpected failure
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::StorageError => "StorageError",
            ErrorCode::TranscodeError => "TranscodeError",
            ErrorCode::InvalidTransition => "InvalidTransition",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// True for codes that point at a logic defect rather than an expected failure.
    pub fn is_defect(&self) -> bool {
        matches!(self, ErrorCode::InvalidTransition | ErrorCode::InternalError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
