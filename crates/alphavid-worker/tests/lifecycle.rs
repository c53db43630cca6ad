//! End-to-end dispatcher scenarios against stub engines.
//!
//! Each test wires the in-process record store and the local storage
//! backend into a dispatcher whose engine binary is a small shell script.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use alphavid_models::{ConvertOptions, ErrorCode, FileId, NewFile, TaskId, TaskRecord, TaskStatus};
use alphavid_queue::ConvertJob;
use alphavid_storage::{storage_key, KeyPrefix, StorageConfig, StorageGateway};
use alphavid_store::{MemoryRecordStore, RecordStore};
use alphavid_worker::{Dispatcher, JobOutcome, RetryPolicy, WorkerConfig};
use tempfile::TempDir;

const ARTIFACT: &[u8] = b"alpha-webm";

/// Writes the fixed artifact to the last argument (the output path).
const WRITES_OUTPUT: &str = "for last; do :; done\nprintf 'alpha-webm' > \"$last\"";

struct Harness {
    dir: TempDir,
    store: Arc<MemoryRecordStore>,
    storage: Arc<StorageGateway>,
}

impl Harness {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let storage = StorageGateway::from_config(&StorageConfig::local(dir.path().join("storage")))
            .await
            .unwrap();
        Self {
            dir,
            store: Arc::new(MemoryRecordStore::new(Duration::from_secs(3600))),
            storage: Arc::new(storage),
        }
    }

    fn engine(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn config(&self, engine: &Path) -> WorkerConfig {
        WorkerConfig {
            ffmpeg_path: engine.to_string_lossy().into_owned(),
            work_dir: self.work_dir(),
            progress_tick: Duration::from_millis(20),
            ..WorkerConfig::default()
        }
    }

    fn dispatcher(&self, config: WorkerConfig) -> Dispatcher {
        Dispatcher::new(config, self.store.clone(), Arc::clone(&self.storage))
    }

    /// File with a stored raw artifact plus a PENDING task for it.
    async fn uploaded_task(&self, options: &ConvertOptions) -> ConvertJob {
        let file = self
            .store
            .create_file(NewFile::new("clip.mp4", 3, 2.0))
            .await
            .unwrap();
        let key = storage_key(KeyPrefix::Raw, file.file_id.as_str(), "mp4", file.uploaded_at);
        self.storage.put(b"raw", &key).await.unwrap();
        self.store.set_file_storage_key(&file.file_id, &key).await.unwrap();

        let task_id = self.store.create_task(&file.file_id, options).await.unwrap();
        ConvertJob::new(task_id, file.file_id, options.clone())
    }

    async fn task(&self, task_id: &TaskId) -> TaskRecord {
        self.store.get_task(task_id).await.unwrap().unwrap()
    }

    fn workspaces_left(&self) -> usize {
        std::fs::read_dir(self.work_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn assert_failed(task: &TaskRecord, code: ErrorCode) {
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_code, Some(code));
    assert!(task.error_message.is_some());
    assert!(task.result_url.is_none());
    assert!(task.result_key.is_none());
    assert!(task.progress < 100);
    assert!(task.completed_at.is_some());
}

fn scenario_options() -> ConvertOptions {
    ConvertOptions {
        color: "#000000".parse().unwrap(),
        tolerance: 10.0,
        feather: 0.5,
        edge_enhancement: true,
        morphology_iterations: 1,
        ..ConvertOptions::default()
    }
}

#[tokio::test]
async fn test_successful_conversion() {
    let h = Harness::new().await;
    let engine = h.engine("engine-ok", &format!("sleep 1\n{}", WRITES_OUTPUT));
    let dispatcher = h.dispatcher(h.config(&engine));
    let job = h.uploaded_task(&scenario_options()).await;

    let store = h.store.clone();
    let task_id = job.task_id.clone();
    let poller = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let task = store.get_task(&task_id).await.unwrap().unwrap();
            seen.push(task.progress);
            if task.is_terminal() {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let outcome = dispatcher.dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Succeeded);

    let seen = poller.await.unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", seen);
    assert!(seen.iter().any(|p| (41..=80).contains(p)), "no estimated progress: {:?}", seen);
    assert_eq!(seen.last(), Some(&100));

    let task = h.task(&job.task_id).await;
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.progress, 100);
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    assert!(task.error_code.is_none());
    assert!(task.error_message.is_none());

    let key = task.result_key.clone().unwrap();
    assert_eq!(
        key,
        storage_key(KeyPrefix::Processed, job.task_id.as_str(), "webm", task.created_at)
    );
    assert_eq!(task.result_url, Some(h.storage.url_for(&key).await.unwrap()));

    let fetched = h.dir.path().join("fetched.webm");
    assert!(h.storage.get(&key, &fetched).await.unwrap());
    assert_eq!(std::fs::read(fetched).unwrap(), ARTIFACT);
    assert_eq!(h.workspaces_left(), 0);
}

#[tokio::test]
async fn test_engine_failure_carries_diagnostics() {
    let h = Harness::new().await;
    let engine = h.engine("engine-fail", "echo boom >&2\nexit 1");
    let dispatcher = h.dispatcher(h.config(&engine));
    let job = h.uploaded_task(&scenario_options()).await;

    let outcome = dispatcher.dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed(ErrorCode::TranscodeError));

    let task = h.task(&job.task_id).await;
    assert_failed(&task, ErrorCode::TranscodeError);
    assert!(task.error_message.unwrap().contains("boom"));
    assert_eq!(h.workspaces_left(), 0);
}

#[tokio::test]
async fn test_engine_exit_without_output_is_transcode_error() {
    let h = Harness::new().await;
    let engine = h.engine("engine-silent", "exit 0");
    let dispatcher = h.dispatcher(h.config(&engine));
    let job = h.uploaded_task(&scenario_options()).await;

    let outcome = dispatcher.dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed(ErrorCode::TranscodeError));
    assert_failed(&h.task(&job.task_id).await, ErrorCode::TranscodeError);
}

#[tokio::test]
async fn test_engine_timeout_kills_process() {
    let h = Harness::new().await;
    let pid_file = h.dir.path().join("engine.pid");
    let engine = h.engine(
        "engine-hang",
        &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
    );
    let config = WorkerConfig {
        engine_timeout: Duration::from_secs(1),
        ..h.config(&engine)
    };
    let dispatcher = h.dispatcher(config);
    let job = h.uploaded_task(&scenario_options()).await;

    let started = std::time::Instant::now();
    let outcome = dispatcher.dispatch(&job).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome, JobOutcome::Failed(ErrorCode::TranscodeError));

    let task = h.task(&job.task_id).await;
    assert_failed(&task, ErrorCode::TranscodeError);
    assert_eq!(task.error_message.as_deref(), Some("processing timeout"));

    // Estimator stopped with the engine: nothing moves after the terminal write
    tokio::time::sleep(Duration::from_millis(100)).await;
    let later = h.task(&job.task_id).await;
    assert_eq!(later.progress, task.progress);
    assert_eq!(later.status, TaskStatus::Failed);

    #[cfg(target_os = "linux")]
    {
        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_dir = PathBuf::from(format!("/proc/{}", pid.trim()));
        assert!(!proc_dir.exists(), "engine process {} still alive", pid.trim());
    }

    assert_eq!(h.workspaces_left(), 0);
}

#[tokio::test]
async fn test_missing_storage_key_skips_engine() {
    let h = Harness::new().await;
    let marker = h.dir.path().join("engine-ran");
    let engine = h.engine("engine-marker", &format!("touch '{}'", marker.display()));
    let dispatcher = h.dispatcher(h.config(&engine));

    let file = h
        .store
        .create_file(NewFile::new("clip.mp4", 3, 2.0))
        .await
        .unwrap();
    let options = scenario_options();
    let task_id = h.store.create_task(&file.file_id, &options).await.unwrap();
    let job = ConvertJob::new(task_id.clone(), file.file_id, options);

    let outcome = dispatcher.dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed(ErrorCode::StorageError));
    assert_failed(&h.task(&task_id).await, ErrorCode::StorageError);
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_concurrent_redeliveries_converge() {
    let h = Harness::new().await;
    let engine = h.engine("engine-ok", WRITES_OUTPUT);
    let first = h.dispatcher(h.config(&engine));
    let second = h.dispatcher(h.config(&engine));
    let job = h.uploaded_task(&scenario_options()).await;

    let (a, b) = tokio::join!(first.dispatch(&job), second.dispatch(&job));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, JobOutcome::Skipped));
    assert_eq!(outcomes, vec![JobOutcome::Succeeded, JobOutcome::Skipped]);

    let task = h.task(&job.task_id).await;
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.progress, 100);
    let key = task.result_key.clone().unwrap();
    assert_eq!(
        key,
        storage_key(KeyPrefix::Processed, job.task_id.as_str(), "webm", task.created_at)
    );
    let fetched = h.dir.path().join("fetched.webm");
    assert!(h.storage.get(&key, &fetched).await.unwrap());
    assert_eq!(std::fs::read(&fetched).unwrap(), ARTIFACT);

    // A later redelivery leaves the finished record untouched
    assert_eq!(first.dispatch(&job).await.unwrap(), JobOutcome::Skipped);
    let again = h.task(&job.task_id).await;
    assert_eq!(again.status, task.status);
    assert_eq!(again.result_url, task.result_url);
    assert_eq!(again.completed_at, task.completed_at);
    assert_eq!(h.workspaces_left(), 0);
}

#[tokio::test]
async fn test_engine_retry_policy() {
    let h = Harness::new().await;
    let flag = h.dir.path().join("failed-once");
    let body = format!(
        "if [ -f '{flag}' ]; then\n{ok}\nelse\ntouch '{flag}'\necho flaky >&2\nexit 1\nfi",
        flag = flag.display(),
        ok = WRITES_OUTPUT
    );
    let engine = h.engine("engine-flaky", &body);

    // Default policy makes a single attempt
    let job = h.uploaded_task(&scenario_options()).await;
    let outcome = h.dispatcher(h.config(&engine)).dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed(ErrorCode::TranscodeError));

    std::fs::remove_file(&flag).unwrap();
    let config = WorkerConfig {
        engine_retry: RetryPolicy::new(1, Duration::from_millis(10)),
        ..h.config(&engine)
    };
    let job = h.uploaded_task(&scenario_options()).await;
    let outcome = h.dispatcher(config).dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Succeeded);
    assert_eq!(h.task(&job.task_id).await.progress, 100);
}

#[tokio::test]
async fn test_job_time_limit() {
    let h = Harness::new().await;
    let engine = h.engine("engine-hang", "exec sleep 30");
    let config = WorkerConfig {
        engine_timeout: Duration::from_secs(30),
        job_timeout: Duration::from_secs(1),
        ..h.config(&engine)
    };
    let dispatcher = h.dispatcher(config);
    let job = h.uploaded_task(&scenario_options()).await;

    let outcome = dispatcher.dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed(ErrorCode::InternalError));

    let task = h.task(&job.task_id).await;
    assert_failed(&task, ErrorCode::InternalError);
    assert_eq!(task.error_message.as_deref(), Some("job time limit exceeded"));
    assert_eq!(h.workspaces_left(), 0);
}

#[tokio::test]
async fn test_unknown_file_id_fails_not_found() {
    let h = Harness::new().await;
    let engine = h.engine("engine-ok", WRITES_OUTPUT);
    let dispatcher = h.dispatcher(h.config(&engine));
    let job = h.uploaded_task(&scenario_options()).await;
    let job = ConvertJob::new(job.task_id, FileId::new(), job.options);

    let outcome = dispatcher.dispatch(&job).await.unwrap();
    assert_eq!(outcome, JobOutcome::Failed(ErrorCode::NotFound));
    assert_failed(&h.task(&job.task_id).await, ErrorCode::NotFound);
}
