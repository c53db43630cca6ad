//! Queue message for one conversion.

use alphavid_models::{ConvertOptions, FileId, TaskId};
use serde::{Deserialize, Serialize};

/// `{taskId, fileId, options}` delivered at-least-once to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertJob {
    pub task_id: TaskId,
    pub file_id: FileId,
    pub options: ConvertOptions,
}

impl ConvertJob {
    pub fn new(task_id: TaskId, file_id: FileId, options: ConvertOptions) -> Self {
        Self {
            task_id,
            file_id,
            options,
        }
    }

    /// Get the idempotency key for this job.
    pub fn idempotency_key(&self) -> String {
        format!("convert:{}", self.task_id)
    }
}
