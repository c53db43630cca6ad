//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job enqueueing via Redis Streams with per-task dedup
//! - Consumer-group delivery with redelivery of orphaned jobs
//! - Retry counting and a dead letter stream

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::ConvertJob;
pub use queue::{JobQueue, QueueConfig};
