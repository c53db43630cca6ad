//! In-process record store.
//!
//! Same semantics as the Redis store: sliding expiry on every access, task
//! updates applied under the map lock so they are serialized per store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use alphavid_models::{
    ConvertOptions, FileId, FileRecord, NewFile, TaskId, TaskRecord, TaskStatus, TaskTransition,
};

use crate::config::chrono_retention;
use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::store::RecordStore;

#[derive(Default)]
struct Records {
    files: HashMap<FileId, FileRecord>,
    tasks: HashMap<TaskId, TaskRecord>,
}

/// Record store backed by process memory.
pub struct MemoryRecordStore {
    retention: chrono::Duration,
    records: Mutex<Records>,
}

impl MemoryRecordStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: chrono_retention(retention),
            records: Mutex::new(Records::default()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_file(&self, file: NewFile) -> StoreResult<FileRecord> {
        let record = FileRecord::new(file, Utc::now(), self.retention);
        let mut records = self.records.lock().await;
        records.files.insert(record.file_id.clone(), record.clone());
        debug!(file_id = %record.file_id, "Created file record");
        Ok(record)
    }

    async fn get_file(&self, file_id: &FileId) -> StoreResult<Option<FileRecord>> {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        if let Some(record) = records.files.get_mut(file_id) {
            if !record.is_expired(now) {
                record.touch(now, self.retention);
                return Ok(Some(record.clone()));
            }
        }

        records.files.remove(file_id);
        Ok(None)
    }

    async fn set_file_storage_key(&self, file_id: &FileId, key: &str) -> StoreResult<FileRecord> {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        let record = records
            .files
            .get_mut(file_id)
            .filter(|r| !r.is_expired(now))
            .ok_or_else(|| StoreError::not_found(format!("file:{file_id}")))?;

        if let Some(existing) = &record.storage_key {
            if existing != key {
                return Err(StoreError::conflict(format!(
                    "file:{file_id} already stored at {existing}"
                )));
            }
        }
        record.storage_key = Some(key.to_string());
        record.touch(now, self.retention);
        Ok(record.clone())
    }

    async fn create_task(&self, file_id: &FileId, options: &ConvertOptions) -> StoreResult<TaskId> {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        let file = records
            .files
            .get_mut(file_id)
            .filter(|r| !r.is_expired(now))
            .ok_or_else(|| StoreError::not_found(format!("file:{file_id}")))?;
        file.touch(now, self.retention);

        let record = TaskRecord::new(file_id.clone(), options.clone(), now, self.retention);
        let task_id = record.task_id.clone();
        records.tasks.insert(task_id.clone(), record);

        debug!(task_id = %task_id, file_id = %file_id, "Created task record");
        Ok(task_id)
    }

    async fn get_task(&self, task_id: &TaskId) -> StoreResult<Option<TaskRecord>> {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        if let Some(record) = records.tasks.get_mut(task_id) {
            if !record.is_expired(now) {
                record.touch(now, self.retention);
                return Ok(Some(record.clone()));
            }
        }

        records.tasks.remove(task_id);
        Ok(None)
    }

    async fn update_task(&self, task_id: &TaskId, transition: TaskTransition) -> StoreResult<TaskRecord> {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        let current = records
            .tasks
            .get(task_id)
            .filter(|r| !r.is_expired(now))
            .ok_or_else(|| StoreError::not_found(format!("task:{task_id}")))?;

        let mut next = current.apply_transition(&transition, now)?;
        next.touch(now, self.retention);
        records.tasks.insert(task_id.clone(), next.clone());

        Ok(next)
    }

    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
        let now = Utc::now();
        let records = self.records.lock().await;

        let mut tasks: Vec<TaskRecord> = records
            .tasks
            .values()
            .filter(|r| r.status == status && !r.is_expired(now))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let cutoff = now - self.retention;
        let mut records = self.records.lock().await;

        let files_before = records.files.len();
        records
            .files
            .retain(|_, r| r.uploaded_at >= cutoff && !r.is_expired(now));
        let files = files_before - records.files.len();

        let tasks_before = records.tasks.len();
        records
            .tasks
            .retain(|_, r| r.created_at >= cutoff && !r.is_expired(now));
        let tasks = tasks_before - records.tasks.len();

        metrics::record_swept("file", files);
        metrics::record_swept("task", tasks);
        Ok(files + tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphavid_models::{ErrorCode, TransitionError};
    use std::sync::Arc;

    fn store() -> MemoryRecordStore {
        MemoryRecordStore::new(Duration::from_secs(3600))
    }

    async fn file_with_task(store: &MemoryRecordStore) -> (FileRecord, TaskId) {
        let file = store.create_file(NewFile::new("clip.mp4", 1024, 3.0)).await.unwrap();
        let task_id = store
            .create_task(&file.file_id, &ConvertOptions::default())
            .await
            .unwrap();
        (file, task_id)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = store();
        let (file, task_id) = file_with_task(&store).await;

        let fetched = store.get_file(&file.file_id).await.unwrap().unwrap();
        assert_eq!(fetched.name, file.name);
        assert_eq!(fetched.size, file.size);
        assert_eq!(fetched.uploaded_at, file.uploaded_at);

        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.file_id, file.file_id);
        assert_eq!(task.options, ConvertOptions::default());
    }

    #[tokio::test]
    async fn test_create_task_requires_file() {
        let store = store();
        let err = store
            .create_task(&FileId::new(), &ConvertOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_storage_key_set_once() {
        let store = store();
        let file = store.create_file(NewFile::new("a.mp4", 1, 1.0)).await.unwrap();

        store.set_file_storage_key(&file.file_id, "raw/k.mp4").await.unwrap();
        store.set_file_storage_key(&file.file_id, "raw/k.mp4").await.unwrap();
        assert!(matches!(
            store.set_file_storage_key(&file.file_id, "raw/other.mp4").await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_records_are_not_found() {
        let store = MemoryRecordStore::new(Duration::from_millis(50));
        let (file, task_id) = file_with_task(&store).await;

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get_file(&file.file_id).await.unwrap().is_none());
        assert!(store.get_task(&task_id).await.unwrap().is_none());
        assert!(store.mark_running(&task_id, 10).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reads_slide_expiry() {
        let store = MemoryRecordStore::new(Duration::from_millis(200));
        let (_, task_id) = file_with_task(&store).await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(store.get_task(&task_id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_lifecycle_through_wrappers() {
        let store = store();
        let (_, task_id) = file_with_task(&store).await;

        let running = store.mark_running(&task_id, 10).await.unwrap();
        assert!(running.started_at.is_some());

        let done = store
            .mark_success(&task_id, "/data/out.webm".into(), "processed/out.webm".into())
            .await
            .unwrap();
        assert_eq!(done.progress, 100);

        let err = store
            .mark_failed(&task_id, ErrorCode::InternalError, "late".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition(TransitionError::FromTerminal { .. })
        ));

        let stored = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
        assert!(stored.error_code.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_clobber() {
        let store = Arc::new(store());
        let (_, task_id) = file_with_task(&store).await;
        store.mark_running(&task_id, 1).await.unwrap();

        let mut handles = Vec::new();
        for p in 2..60u8 {
            let store = store.clone();
            let task_id = task_id.clone();
            handles.push(tokio::spawn(async move {
                store.mark_running(&task_id, p).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let task = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.progress, 59);
    }

    #[tokio::test]
    async fn test_list_and_sweep() {
        let store = MemoryRecordStore::new(Duration::from_millis(50));
        let (_, a) = file_with_task(&store).await;
        let (_, _b) = file_with_task(&store).await;
        store.mark_running(&a, 10).await.unwrap();

        let running = store.list_by_status(TaskStatus::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].task_id, a);
        assert_eq!(store.list_by_status(TaskStatus::Pending).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.sweep_expired().await.unwrap(), 4);
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_records_inside_retention() {
        let store = MemoryRecordStore::new(Duration::from_millis(600));
        let (old_file, old_task) = file_with_task(&store).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        // Reads keep the old records alive past their creation window.
        assert!(store.get_file(&old_file.file_id).await.unwrap().is_some());
        assert!(store.get_task(&old_task).await.unwrap().is_some());
        let (fresh_file, fresh_task) = file_with_task(&store).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.sweep_expired().await.unwrap(), 2);

        assert!(store.get_file(&old_file.file_id).await.unwrap().is_none());
        assert!(store.get_task(&old_task).await.unwrap().is_none());
        assert!(store.get_file(&fresh_file.file_id).await.unwrap().is_some());
        assert!(store.get_task(&fresh_task).await.unwrap().is_some());
    }
}
