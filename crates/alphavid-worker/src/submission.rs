//! Submission service used by the request-handling layer.
//!
//! Composes upload limits, the record store, the storage gateway and the
//! queue: register an upload, submit conversions for a batch of files and
//! look up batch status.

use std::path::Path;
use std::sync::Arc;

use alphavid_models::{
    ConvertOptions, ErrorCode, FileId, FileRecord, NewFile, TaskId, TaskRecord, UploadLimits,
};
use alphavid_queue::{ConvertJob, JobQueue, QueueResult};
use alphavid_storage::{storage_key, KeyPrefix, StorageGateway};
use alphavid_store::RecordStore;
use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::Serialize;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Destination for conversion jobs.
#[async_trait]
pub trait JobSink: Send + Sync {
    /// Enqueue `job`, returning the broker's message id.
    async fn enqueue(&self, job: &ConvertJob) -> QueueResult<String>;
}

#[async_trait]
impl JobSink for JobQueue {
    async fn enqueue(&self, job: &ConvertJob) -> QueueResult<String> {
        JobQueue::enqueue(self, job).await
    }
}

/// Per-id result of a batch status lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskLookup {
    Found(TaskRecord),
    #[serde(rename_all = "camelCase")]
    Missing { task_id: TaskId, error: ErrorCode },
}

impl TaskLookup {
    pub fn task(&self) -> Option<&TaskRecord> {
        match self {
            TaskLookup::Found(task) => Some(task),
            TaskLookup::Missing { .. } => None,
        }
    }
}

pub struct Submission {
    limits: UploadLimits,
    store: Arc<dyn RecordStore>,
    storage: Arc<StorageGateway>,
    jobs: Arc<dyn JobSink>,
}

impl Submission {
    pub fn new(
        limits: UploadLimits,
        store: Arc<dyn RecordStore>,
        storage: Arc<StorageGateway>,
        jobs: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            limits,
            store,
            storage,
            jobs,
        }
    }

    /// Validate an upload, record it and store the raw artifact.
    ///
    /// The returned record has `storage_key` set.
    pub async fn register_upload(
        &self,
        source: impl AsRef<Path>,
        name: &str,
        size: u64,
        duration: f64,
    ) -> WorkerResult<FileRecord> {
        let file = NewFile::new(name, size, duration);
        self.limits.check_file(&file)?;
        let extension = file
            .extension()
            .ok_or_else(|| WorkerError::internal("validated file has no extension"))?;

        let record = self.store.create_file(file).await?;
        let key = storage_key(
            KeyPrefix::Raw,
            record.file_id.as_str(),
            &extension,
            record.uploaded_at,
        );
        self.storage.put_file(source, &key).await?;
        let record = self.store.set_file_storage_key(&record.file_id, &key).await?;

        info!(file_id = %record.file_id, key = %key, "Registered upload");
        Ok(record)
    }

    /// Create and enqueue one task per file, all with the same options.
    ///
    /// Every file is checked before any task is created.
    pub async fn submit(&self, file_ids: &[FileId], options: &ConvertOptions) -> WorkerResult<Vec<TaskId>> {
        self.limits.check_batch(file_ids.len())?;
        options.check()?;

        for file_id in file_ids {
            if self.store.get_file(file_id).await?.is_none() {
                return Err(WorkerError::not_found(format!("file {}", file_id)));
            }
        }

        let mut task_ids = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            let task_id = self.store.create_task(file_id, options).await?;
            let job = ConvertJob::new(task_id.clone(), file_id.clone(), options.clone());
            self.jobs.enqueue(&job).await?;
            info!(task_id = %task_id, file_id = %file_id, "Submitted conversion");
            task_ids.push(task_id);
        }

        Ok(task_ids)
    }

    /// Current record for each id, or a `NotFound` marker.
    pub async fn batch_status(&self, task_ids: &[TaskId]) -> WorkerResult<Vec<TaskLookup>> {
        let store = &self.store;
        let records = try_join_all(task_ids.iter().map(|id| store.get_task(id))).await?;

        Ok(task_ids
            .iter()
            .zip(records)
            .map(|(task_id, record)| match record {
                Some(task) => TaskLookup::Found(task),
                None => TaskLookup::Missing {
                    task_id: task_id.clone(),
                    error: ErrorCode::NotFound,
                },
            })
            .collect())
    }
}
