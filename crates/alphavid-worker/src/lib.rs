//! Chroma-key conversion worker.
//!
//! This crate provides:
//! - The dispatcher that drives one task to a terminal state
//! - The executor loop over the job queue, with orphan claiming and expiry sweeps
//! - The submission service used by the request layer
//! - Explicit retry policy, structured job logging and metrics

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod submission;

pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, JobOutcome};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use retry::{retry_async, RetryPolicy};
pub use submission::{JobSink, Submission, TaskLookup};
