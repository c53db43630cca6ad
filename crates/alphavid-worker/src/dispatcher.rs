//! Worker dispatcher: drives one task from PENDING to a terminal state.
//!
//! Per job: mark RUNNING, resolve the raw artifact, fetch it into a scoped
//! workspace, run the engine with estimated progress, upload the output to
//! its deterministic key and mark SUCCESS. Any failure becomes exactly one
//! FAILED write. The workspace is a [`tempfile::TempDir`] owned by the job
//! future, so it is removed on every exit path, including the whole-job
//! time limit dropping the future.

use std::path::Path;
use std::sync::Arc;

use alphavid_media::{
    output_file_name, EngineRun, FfmpegCommand, FfmpegRunner, MediaError, MediaResult,
    TranscodeSpec, OUTPUT_EXTENSION,
};
use alphavid_models::{ErrorCode, TaskId, TaskRecord, TaskStatus};
use alphavid_queue::ConvertJob;
use alphavid_storage::{storage_key, KeyPrefix, StorageError, StorageGateway};
use alphavid_store::{RecordStore, StoreError};
use tokio::sync::mpsc;
use tracing::{debug, Instrument};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::retry_async;

/// Progress checkpoints around the estimated engine window.
pub const PROGRESS_STARTED: u8 = 10;
pub const PROGRESS_FETCHED: u8 = 30;
pub const PROGRESS_TRANSCODED: u8 = 85;
pub const PROGRESS_UPLOADED: u8 = 95;

const PROGRESS_CHANNEL_CAPACITY: usize = 16;

/// How a dispatched job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// SUCCESS was written.
    Succeeded,
    /// FAILED was written with this code, or the task record no longer exists.
    Failed(ErrorCode),
    /// The task was already terminal; another delivery finished it.
    Skipped,
}

/// Runs conversion jobs against explicitly injected store and storage.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    storage: Arc<StorageGateway>,
    runner: FfmpegRunner,
    config: WorkerConfig,
}

impl Dispatcher {
    pub fn new(config: WorkerConfig, store: Arc<dyn RecordStore>, storage: Arc<StorageGateway>) -> Self {
        Self {
            runner: config.runner(),
            store,
            storage,
            config,
        }
    }

    /// Run `job` to a terminal state.
    ///
    /// Returns `Err` only when the terminal write itself could not be
    /// persisted; the job should then stay pending for redelivery.
    pub async fn dispatch(&self, job: &ConvertJob) -> WorkerResult<JobOutcome> {
        let logger = JobLogger::new(&job.task_id, &job.file_id, "convert");
        let span = logger.create_span();
        self.dispatch_logged(job, &logger).instrument(span).await
    }

    async fn dispatch_logged(&self, job: &ConvertJob, logger: &JobLogger) -> WorkerResult<JobOutcome> {
        if let Some(task) = self.store.get_task(&job.task_id).await? {
            if task.is_terminal() {
                logger.log_warning(&format!("task already {}, skipping delivery", task.status));
                return Ok(JobOutcome::Skipped);
            }
        }

        logger.log_start("converting");

        let limit = self.config.job_timeout;
        let result = match tokio::time::timeout(limit, self.process(job, logger)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::JobTimeout(limit.as_secs())),
        };

        match result {
            Ok(()) => {
                metrics::record_job_completed(TaskStatus::Success);
                logger.log_completion("task succeeded");
                Ok(JobOutcome::Succeeded)
            }
            Err(e) if e.is_superseded() => {
                logger.log_warning("task finalized by another delivery");
                Ok(JobOutcome::Skipped)
            }
            Err(e) => self.finalize_failure(job, logger, e).await,
        }
    }

    async fn process(&self, job: &ConvertJob, logger: &JobLogger) -> WorkerResult<()> {
        let task_id = &job.task_id;
        let task = self.advance(task_id, logger, PROGRESS_STARTED, "running").await?;

        let file = self
            .store
            .get_file(&job.file_id)
            .await?
            .ok_or_else(|| WorkerError::not_found(format!("file {}", job.file_id)))?;
        let raw_key = file
            .storage_key
            .clone()
            .ok_or_else(|| WorkerError::MissingStorageKey(file.file_id.clone()))?;

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let workspace = tempfile::Builder::new()
            .prefix("alphavid-job-")
            .tempdir_in(&self.config.work_dir)?;

        let extension = file.extension().unwrap_or_else(|| "mp4".to_string());
        let input = workspace.path().join(format!("input.{extension}"));
        self.fetch_raw(&raw_key, &input).await?;
        self.advance(task_id, logger, PROGRESS_FETCHED, "raw artifact fetched").await?;

        let output = workspace.path().join(output_file_name(task_id.as_str()));
        let command = TranscodeSpec::from_options(&job.options).to_command(&input, &output);
        let run = self.transcode(task_id, &command).await?;
        debug!(elapsed_ms = run.elapsed.as_millis() as u64, "Engine run finished");
        self.advance(task_id, logger, PROGRESS_TRANSCODED, "engine finished").await?;

        let result_key = storage_key(
            KeyPrefix::Processed,
            task_id.as_str(),
            OUTPUT_EXTENSION,
            task.created_at,
        );
        self.upload(&output, &result_key).await?;
        self.advance(task_id, logger, PROGRESS_UPLOADED, "artifact uploaded").await?;

        let result_url = self.storage.url_for(&result_key).await?;
        self.store.mark_success(task_id, result_url, result_key).await?;

        Ok(())
    }

    async fn advance(
        &self,
        task_id: &TaskId,
        logger: &JobLogger,
        progress: u8,
        message: &str,
    ) -> WorkerResult<TaskRecord> {
        let record = self.store.mark_running(task_id, progress).await?;
        logger.log_progress(record.progress, message);
        Ok(record)
    }

    async fn fetch_raw(&self, key: &str, dest: &Path) -> WorkerResult<()> {
        let storage = &self.storage;
        let found = retry_async(
            &self.config.storage_retry,
            "raw download",
            StorageError::is_transient,
            move || storage.get(key, dest),
        )
        .await?;

        if !found {
            return Err(WorkerError::RawArtifactMissing(key.to_string()));
        }
        Ok(())
    }

    async fn upload(&self, path: &Path, key: &str) -> WorkerResult<String> {
        let storage = &self.storage;
        let location = retry_async(
            &self.config.storage_retry,
            "artifact upload",
            StorageError::is_transient,
            move || storage.put_file(path, key),
        )
        .await?;
        Ok(location)
    }

    async fn transcode(&self, task_id: &TaskId, command: &FfmpegCommand) -> WorkerResult<EngineRun> {
        let run = retry_async(
            &self.config.engine_retry,
            "engine run",
            MediaError::is_retryable,
            move || self.run_engine(task_id, command),
        )
        .await?;
        Ok(run)
    }

    /// One engine run with its progress forwarder. Both finish before this returns.
    async fn run_engine(&self, task_id: &TaskId, command: &FfmpegCommand) -> MediaResult<EngineRun> {
        let (tx, mut rx) = mpsc::channel::<u8>(PROGRESS_CHANNEL_CAPACITY);
        let store = &self.store;

        let forward = async move {
            while let Some(progress) = rx.recv().await {
                if let Err(e) = store.mark_running(task_id, progress).await {
                    debug!(progress, "Progress update not applied: {}", e);
                }
            }
        };

        let (result, ()) = tokio::join!(
            self.runner.run(command, self.config.estimator(), tx),
            forward
        );
        result
    }

    async fn finalize_failure(
        &self,
        job: &ConvertJob,
        logger: &JobLogger,
        err: WorkerError,
    ) -> WorkerResult<JobOutcome> {
        let code = err.terminal_code();
        if err.is_defect() {
            logger.log_error(&format!("{} [{}]", err, err.error_code()));
            metrics::record_job_defect(err.error_code());
        } else {
            logger.log_warning(&format!("{} [{}]", err, code));
        }

        match self.store.mark_failed(&job.task_id, code, err.failure_message()).await {
            Ok(_) => {
                metrics::record_job_completed(TaskStatus::Failed);
                Ok(JobOutcome::Failed(code))
            }
            Err(StoreError::NotFound(_)) => {
                logger.log_warning("task record missing, nothing to finalize");
                Ok(JobOutcome::Failed(code))
            }
            Err(e) => {
                let e = WorkerError::from(e);
                if e.is_superseded() {
                    Ok(JobOutcome::Skipped)
                } else {
                    Err(e)
                }
            }
        }
    }
}
