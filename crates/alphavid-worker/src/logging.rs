//! Structured job logging utilities.

use alphavid_models::{FileId, TaskId};
use tracing::{error, info, warn, Span};

/// Job logger for structured logging with consistent formatting.
///
/// Every lifecycle event of one job carries the same `task_id`, `file_id`
/// and `operation` fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    task_id: String,
    file_id: String,
    operation: String,
}

impl JobLogger {
    pub fn new(task_id: &TaskId, file_id: &FileId, operation: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            file_id: file_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            file_id = %self.file_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, progress: u8, message: &str) {
        info!(
            task_id = %self.task_id,
            file_id = %self.file_id,
            operation = %self.operation,
            progress,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            file_id = %self.file_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            task_id = %self.task_id,
            file_id = %self.file_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            file_id = %self.file_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            task_id = %self.task_id,
            file_id = %self.file_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let task_id = TaskId::new();
        let logger = JobLogger::new(&task_id, &FileId::from("f1"), "convert");

        assert_eq!(logger.task_id(), task_id.to_string());
        assert_eq!(logger.operation(), "convert");
    }
}
