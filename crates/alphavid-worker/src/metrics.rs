//! Worker metrics.
//!
//! Defects (guard violations, unexpected failures) get their own counter so
//! operators can alert on them separately from expected job failures.

use alphavid_models::{ErrorCode, TaskStatus};
use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "alphavid_jobs_completed_total";
    pub const JOB_DEFECTS_TOTAL: &str = "alphavid_job_defects_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "alphavid_jobs_dead_lettered_total";
}

/// Record a job that reached a terminal state.
pub fn record_job_completed(status: TaskStatus) {
    counter!(names::JOBS_COMPLETED_TOTAL, "status" => status.as_str()).increment(1);
}

/// Record a failure caused by a logic defect.
pub fn record_job_defect(code: ErrorCode) {
    counter!(names::JOB_DEFECTS_TOTAL, "code" => code.as_str()).increment(1);
}

pub fn record_dead_lettered() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}
