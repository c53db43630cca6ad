//! Redis-backed record store.
//!
//! Records are JSON strings under `alphavid:file:{id}` and
//! `alphavid:task:{id}` with a native TTL. Reads use `GETEX` so polling keeps a record alive. Updates are a
//! compare-and-set on the raw stored value: the new value is written only if
//! nobody else wrote in between, otherwise the read-modify-write is retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use serde_json::Value;
use tracing::{debug, info, warn};

use alphavid_models::{
    ConvertOptions, FileId, FileRecord, NewFile, TaskId, TaskRecord, TaskStatus, TaskTransition,
};

use crate::config::{chrono_retention, ttl_secs, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::store::RecordStore;

const FILE_PREFIX: &str = "alphavid:file:";
const TASK_PREFIX: &str = "alphavid:task:";

/// Attempts before an update gives up with `Conflict`.
const MAX_UPDATE_ATTEMPTS: u32 = 8;

/// Linear backoff base between update attempts (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 10;

/// Keys fetched per SCAN round trip.
const SCAN_COUNT: usize = 200;

/// KEYS[1] record key; ARGV[1] expected value, ARGV[2] new value, ARGV[3] TTL.
/// Returns 1 on swap, 0 on mismatch, -1 if the key is gone.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
return 1
"#;

/// KEYS[1] record key; ARGV[1] expected value. Deletes only if unchanged.
const CAD_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn file_key(file_id: &FileId) -> String {
    format!("{FILE_PREFIX}{file_id}")
}

fn task_key(task_id: &TaskId) -> String {
    format!("{TASK_PREFIX}{task_id}")
}

/// Outcome of one CAS attempt.
enum Swap<T> {
    Done(T),
    Retry,
}

/// Record store backed by Redis.
#[derive(Clone)]
pub struct RedisRecordStore {
    conn: MultiplexedConnection,
    retention: Duration,
    cas: Script,
    cad: Script,
}

impl RedisRecordStore {
    /// Connect using `config`.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected record store to Redis");
        Ok(Self::with_connection(conn, config.retention))
    }

    /// Create from environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        Self::connect(&StoreConfig::from_env()).await
    }

    pub fn with_connection(conn: MultiplexedConnection, retention: Duration) -> Self {
        Self {
            conn,
            retention,
            cas: Script::new(CAS_SCRIPT),
            cad: Script::new(CAD_SCRIPT),
        }
    }

    fn ttl(&self) -> u64 {
        ttl_secs(self.retention)
    }

    async fn put_new(&self, key: &str, json: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("EX")
            .arg(self.ttl())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Read and refresh TTL.
    async fn get_touch(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GETEX")
            .arg(key)
            .arg("EX")
            .arg(self.ttl())
            .query_async(&mut conn)
            .await?;
        Ok(raw)
    }

    /// Read-modify-write with compare-and-set, retried on conflicts.
    async fn update_json<T, F>(&self, key: &str, mut apply: F) -> StoreResult<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send,
        F: FnMut(T) -> StoreResult<T> + Send,
    {
        for attempt in 0..MAX_UPDATE_ATTEMPTS {
            let mut conn = self.conn.clone();
            let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            let raw = raw.ok_or_else(|| StoreError::not_found(key))?;

            let next = apply(serde_json::from_str(&raw)?)?;
            let json = serde_json::to_string(&next)?;

            let swapped: i64 = self
                .cas
                .key(key)
                .arg(&raw)
                .arg(&json)
                .arg(self.ttl())
                .invoke_async(&mut conn)
                .await?;

            let outcome = match swapped {
                1 => Swap::Done(next),
                -1 => return Err(StoreError::not_found(key)),
                _ => Swap::Retry,
            };

            match outcome {
                Swap::Done(next) => return Ok(next),
                Swap::Retry => {
                    metrics::record_cas_conflict();
                    debug!(key = %key, attempt = attempt + 1, "Record changed concurrently, retrying");
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * (attempt as u64 + 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }

        warn!(key = %key, attempts = MAX_UPDATE_ATTEMPTS, "Record update failed after retries");
        Err(StoreError::conflict(key))
    }

    /// Collect all keys matching `pattern`.
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    /// Raw values for `keys` without touching TTLs. Missing keys are skipped.
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<(String, String)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut out = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(SCAN_COUNT) {
            let mut cmd = redis::cmd("MGET");
            for key in chunk {
                cmd.arg(key);
            }
            let values: Vec<Option<String>> = cmd.query_async(&mut conn).await?;
            out.extend(
                chunk
                    .iter()
                    .cloned()
                    .zip(values)
                    .filter_map(|(k, v)| v.map(|v| (k, v))),
            );
        }

        Ok(out)
    }

    /// Delete records under `prefix` whose `field` timestamp is before `cutoff`.
    async fn sweep_prefix(&self, prefix: &str, field: &str, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let keys = self.scan_keys(&format!("{prefix}*")).await?;
        let mut conn = self.conn.clone();
        let mut removed = 0;

        for (key, raw) in self.mget(&keys).await? {
            let created = serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| v.get(field).and_then(Value::as_str).map(str::to_owned))
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let Some(created) = created else {
                warn!(key = %key, "Skipping unreadable record during sweep");
                continue;
            };

            if created < cutoff {
                let deleted: i64 = self.cad.key(&key).arg(&raw).invoke_async(&mut conn).await?;
                removed += deleted as usize;
            }
        }

        Ok(removed)
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn create_file(&self, file: NewFile) -> StoreResult<FileRecord> {
        let record = FileRecord::new(file, Utc::now(), chrono_retention(self.retention));
        self.put_new(&file_key(&record.file_id), &serde_json::to_string(&record)?)
            .await?;
        debug!(file_id = %record.file_id, "Created file record");
        Ok(record)
    }

    async fn get_file(&self, file_id: &FileId) -> StoreResult<Option<FileRecord>> {
        let Some(raw) = self.get_touch(&file_key(file_id)).await? else {
            return Ok(None);
        };
        let mut record: FileRecord = serde_json::from_str(&raw)?;
        record.touch(Utc::now(), chrono_retention(self.retention));
        Ok(Some(record))
    }

    async fn set_file_storage_key(&self, file_id: &FileId, key: &str) -> StoreResult<FileRecord> {
        let retention = chrono_retention(self.retention);
        let record_key = file_key(file_id);

        self.update_json(&record_key, |mut record: FileRecord| {
            if let Some(existing) = &record.storage_key {
                if existing != key {
                    return Err(StoreError::conflict(format!(
                        "{record_key} already stored at {existing}"
                    )));
                }
            }
            record.storage_key = Some(key.to_string());
            record.touch(Utc::now(), retention);
            Ok(record)
        })
        .await
    }

    async fn create_task(&self, file_id: &FileId, options: &ConvertOptions) -> StoreResult<TaskId> {
        if self.get_touch(&file_key(file_id)).await?.is_none() {
            return Err(StoreError::not_found(file_key(file_id)));
        }

        let record = TaskRecord::new(
            file_id.clone(),
            options.clone(),
            Utc::now(),
            chrono_retention(self.retention),
        );
        self.put_new(&task_key(&record.task_id), &serde_json::to_string(&record)?)
            .await?;

        debug!(task_id = %record.task_id, file_id = %file_id, "Created task record");
        Ok(record.task_id)
    }

    async fn get_task(&self, task_id: &TaskId) -> StoreResult<Option<TaskRecord>> {
        let Some(raw) = self.get_touch(&task_key(task_id)).await? else {
            return Ok(None);
        };
        let mut record: TaskRecord = serde_json::from_str(&raw)?;
        record.touch(Utc::now(), chrono_retention(self.retention));
        Ok(Some(record))
    }

    async fn update_task(&self, task_id: &TaskId, transition: TaskTransition) -> StoreResult<TaskRecord> {
        let retention = chrono_retention(self.retention);

        self.update_json(&task_key(task_id), |current: TaskRecord| {
            let now = Utc::now();
            let mut next = current.apply_transition(&transition, now)?;
            next.touch(now, retention);
            Ok(next)
        })
        .await
    }

    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
        let keys = self.scan_keys(&format!("{TASK_PREFIX}*")).await?;
        let mut tasks = Vec::new();

        for (key, raw) in self.mget(&keys).await? {
            match serde_json::from_str::<TaskRecord>(&raw) {
                Ok(record) if record.status == status => tasks.push(record),
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable task record"),
            }
        }

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn sweep_expired(&self) -> StoreResult<usize> {
        let cutoff = Utc::now() - chrono_retention(self.retention);

        let files = self.sweep_prefix(FILE_PREFIX, "uploadedAt", cutoff).await?;
        let tasks = self.sweep_prefix(TASK_PREFIX, "createdAt", cutoff).await?;

        metrics::record_swept("file", files);
        metrics::record_swept("task", tasks);

        if files + tasks > 0 {
            info!(files, tasks, "Swept expired records");
        }
        Ok(files + tasks)
    }
}
