//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running the engine.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Engine binary not found: {0}")]
    EngineNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Engine produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Failures worth another attempt under an explicit retry policy.
    ///
    /// Timeouts are excluded: a run that hit the wall clock once will hit it again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaError::FfmpegFailed { .. } | MediaError::MissingOutput(_))
    }

    /// Captured diagnostic output, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}
