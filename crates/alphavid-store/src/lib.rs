//! File and task record store.
//!
//! This crate provides:
//! - The [`RecordStore`] interface with sliding expiry
//! - A Redis implementation with compare-and-set task updates
//! - An in-process implementation with identical semantics

pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryRecordStore;
pub use redis_store::RedisRecordStore;
pub use store::RecordStore;
