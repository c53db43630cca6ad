//! Record store interface.

use async_trait::async_trait;

use alphavid_models::{
    ConvertOptions, ErrorCode, FileId, FileRecord, NewFile, TaskId, TaskRecord, TaskStatus,
    TaskTransition,
};

use crate::error::StoreResult;

/// Durable file and task records with sliding expiry.
///
/// Every read and write pushes the record's expiry to at least the configured
/// retention from now. Task updates are atomic: the transition is applied to
/// the latest stored state, and concurrent updates never overwrite each other.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new file record (no storage key yet).
    async fn create_file(&self, file: NewFile) -> StoreResult<FileRecord>;

    /// `None` if absent or expired.
    async fn get_file(&self, file_id: &FileId) -> StoreResult<Option<FileRecord>>;

    /// Record where the raw artifact lives. Setting the same key again is a no-op;
    /// a different key is rejected as a conflict.
    async fn set_file_storage_key(&self, file_id: &FileId, key: &str) -> StoreResult<FileRecord>;

    /// Create a PENDING task for an existing file.
    async fn create_task(&self, file_id: &FileId, options: &ConvertOptions) -> StoreResult<TaskId>;

    /// `None` if absent or expired.
    async fn get_task(&self, task_id: &TaskId) -> StoreResult<Option<TaskRecord>>;

    /// Apply `transition` atomically to the stored task.
    async fn update_task(&self, task_id: &TaskId, transition: TaskTransition) -> StoreResult<TaskRecord>;

    /// All live tasks currently in `status`.
    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>>;

    /// Remove records created before now minus the retention window.
    async fn sweep_expired(&self) -> StoreResult<usize>;

    async fn mark_running(&self, task_id: &TaskId, progress: u8) -> StoreResult<TaskRecord> {
        self.update_task(task_id, TaskTransition::Run { progress }).await
    }

    async fn mark_success(
        &self,
        task_id: &TaskId,
        result_url: String,
        result_key: String,
    ) -> StoreResult<TaskRecord> {
        self.update_task(task_id, TaskTransition::Succeed { result_url, result_key })
            .await
    }

    async fn mark_failed(
        &self,
        task_id: &TaskId,
        code: ErrorCode,
        message: String,
    ) -> StoreResult<TaskRecord> {
        self.update_task(task_id, TaskTransition::Fail { code, message }).await
    }
}
