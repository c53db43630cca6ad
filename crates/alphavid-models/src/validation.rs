//! Client input rejection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a submission was refused before any task record was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ValidationCode {
    /// File larger than the configured size limit
    #[serde(rename = "LIMIT_EXCEEDED_SIZE")]
    LimitExceededSize,
    /// Too many files in one batch
    #[serde(rename = "LIMIT_EXCEEDED_COUNT")]
    LimitExceededCount,
    /// Clip longer than the configured duration limit
    #[serde(rename = "LIMIT_EXCEEDED_DURATION")]
    LimitExceededDuration,
    /// Extension not in the allow-list
    #[serde(rename = "UNSUPPORTED_FORMAT")]
    UnsupportedFormat,
    /// File metadata missing or unreadable
    #[serde(rename = "INVALID_FILE")]
    InvalidFile,
    /// Conversion options out of range
    #[serde(rename = "INVALID_OPTIONS")]
    InvalidOptions,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::LimitExceededSize => "LIMIT_EXCEEDED_SIZE",
            ValidationCode::LimitExceededCount => "LIMIT_EXCEEDED_COUNT",
            ValidationCode::LimitExceededDuration => "LIMIT_EXCEEDED_DURATION",
            ValidationCode::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            ValidationCode::InvalidFile => "INVALID_FILE",
            ValidationCode::InvalidOptions => "INVALID_OPTIONS",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected client input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
