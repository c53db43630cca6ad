//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alphavid_media::{FfmpegRunner, ProgressEstimator};

use crate::retry::RetryPolicy;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Engine binary name or path
    pub ffmpeg_path: String,
    /// Hard wall clock for one engine run
    pub engine_timeout: Duration,
    /// Whole-job limit, download through terminal write
    pub job_timeout: Duration,
    /// Concurrent jobs per process
    pub slots: usize,
    /// Parent directory for per-job workspaces
    pub work_dir: PathBuf,
    /// Estimator tick interval
    pub progress_tick: Duration,
    pub progress_step: u8,
    pub progress_start: u8,
    pub progress_end: u8,
    pub engine_retry: RetryPolicy,
    pub storage_retry: RetryPolicy,
    /// How often the expiry sweep runs
    pub sweep_interval: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            engine_timeout: Duration::from_secs(300),
            job_timeout: Duration::from_secs(600),
            slots: 1,
            work_dir: std::env::temp_dir().join("alphavid"),
            progress_tick: Duration::from_millis(500),
            progress_step: 2,
            progress_start: 40,
            progress_end: 80,
            engine_retry: RetryPolicy::none(),
            storage_retry: RetryPolicy::none(),
            sweep_interval: Duration::from_secs(3600),
            claim_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry_base = env_parse::<u64>("RETRY_BASE_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.engine_retry.base_delay);

        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            engine_timeout: env_parse("ENGINE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_timeout),
            job_timeout: env_parse("WORKER_JOB_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            slots: env_parse::<usize>("WORKER_SLOTS")
                .unwrap_or(defaults.slots)
                .max(1),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            progress_tick: env_parse("PROGRESS_TICK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.progress_tick),
            progress_step: env_parse("PROGRESS_STEP").unwrap_or(defaults.progress_step),
            progress_start: env_parse("PROGRESS_START").unwrap_or(defaults.progress_start),
            progress_end: env_parse("PROGRESS_END").unwrap_or(defaults.progress_end),
            engine_retry: RetryPolicy::new(env_parse("ENGINE_MAX_RETRIES").unwrap_or(0), retry_base),
            storage_retry: RetryPolicy::new(env_parse("STORAGE_MAX_RETRIES").unwrap_or(0), retry_base),
            sweep_interval: env_parse("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    /// Fresh estimator for one engine run.
    pub fn estimator(&self) -> ProgressEstimator {
        ProgressEstimator::new(
            self.progress_start,
            self.progress_end,
            self.progress_step,
            self.progress_tick,
        )
    }

    pub fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new(self.ffmpeg_path.clone()).with_timeout(self.engine_timeout.as_secs().max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.slots, 1);
        assert_eq!(config.engine_timeout, Duration::from_secs(300));
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert_eq!(config.engine_retry.max_retries, 0);
        assert_eq!(config.storage_retry.max_retries, 0);

        let estimator = config.estimator();
        assert_eq!(estimator.start(), 40);
        assert_eq!(estimator.end(), 80);
        assert_eq!(config.runner().timeout_secs(), 300);
    }

    #[test]
    fn test_zero_progress_tick_yields_usable_estimator() {
        let config = WorkerConfig {
            progress_tick: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.estimator().tick() > Duration::ZERO);
    }
}
