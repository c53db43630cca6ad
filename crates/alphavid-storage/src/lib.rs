//! Artifact storage gateway.
//!
//! This crate provides:
//! - One gateway over local filesystem, S3 and MinIO backends
//! - The `{prefix}/{yyyy}/{mm}/{dd}/{id}.{ext}` key layout
//! - Presigned URL generation for remote backends

pub mod config;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod local;
pub mod s3;

pub use config::{S3Settings, StorageConfig, StorageProvider};
pub use error::{StorageError, StorageResult};
pub use gateway::StorageGateway;
pub use keys::{storage_key, KeyPrefix};
pub use local::LocalStorage;
pub use s3::S3Storage;
