//! Worker error types.

use alphavid_media::MediaError;
use alphavid_models::{ErrorCode, FileId, TransitionError, ValidationError};
use alphavid_store::StoreError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Longest stderr excerpt copied into a task's error message.
const STDERR_EXCERPT_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File {0} has no stored artifact")]
    MissingStorageKey(FileId),

    #[error("Raw artifact not found at {0}")]
    RawArtifactMissing(String),

    #[error("Job exceeded time limit of {0} seconds")]
    JobTimeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] alphavid_storage::StorageError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] alphavid_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Position in the task error taxonomy.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            WorkerError::NotFound(_) => ErrorCode::NotFound,
            WorkerError::MissingStorageKey(_)
            | WorkerError::RawArtifactMissing(_)
            | WorkerError::Storage(_) => ErrorCode::StorageError,
            WorkerError::Validation(_) => ErrorCode::ValidationError,
            WorkerError::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            WorkerError::Store(StoreError::InvalidTransition(_)) => ErrorCode::InvalidTransition,
            WorkerError::Media(MediaError::Cancelled) => ErrorCode::InternalError,
            WorkerError::Media(_) => ErrorCode::TranscodeError,
            WorkerError::JobTimeout(_)
            | WorkerError::Internal(_)
            | WorkerError::Store(_)
            | WorkerError::Queue(_)
            | WorkerError::Io(_) => ErrorCode::InternalError,
        }
    }

    /// True when the failure points at a logic defect rather than an expected failure.
    pub fn is_defect(&self) -> bool {
        self.error_code().is_defect()
    }

    /// Code written to the FAILED record. Defects are recorded as `InternalError`.
    pub fn terminal_code(&self) -> ErrorCode {
        if self.is_defect() {
            ErrorCode::InternalError
        } else {
            self.error_code()
        }
    }

    /// Client-facing message for the FAILED record.
    pub fn failure_message(&self) -> String {
        match self {
            WorkerError::Media(MediaError::Timeout(_)) => "processing timeout".to_string(),
            WorkerError::JobTimeout(_) => "job time limit exceeded".to_string(),
            WorkerError::Media(err @ MediaError::FfmpegFailed { .. }) => match err.stderr() {
                Some(stderr) if !stderr.trim().is_empty() => {
                    format!("{}: {}", err, excerpt(stderr.trim()))
                }
                _ => err.to_string(),
            },
            other => other.to_string(),
        }
    }

    /// A concurrent delivery of the same job already finalized the task.
    pub fn is_superseded(&self) -> bool {
        matches!(
            self,
            WorkerError::Store(StoreError::InvalidTransition(TransitionError::FromTerminal { .. }))
        )
    }
}

/// Trailing part of `text`, cut on a char boundary.
fn excerpt(text: &str) -> &str {
    let count = text.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        return text;
    }
    let skip = count - STDERR_EXCERPT_CHARS;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
