//! Uniform artifact interface over the configured backend.

use std::path::Path;

use tracing::info;

use crate::config::{StorageConfig, StorageProvider};
use crate::error::{StorageError, StorageResult};
use crate::local::LocalStorage;
use crate::s3::S3Storage;

/// Storage gateway, one variant per backend.
///
/// The variant is fixed at construction from [`StorageConfig`]; callers only
/// see the shared operations below.
#[derive(Debug, Clone)]
pub enum StorageGateway {
    Local(LocalStorage),
    S3Compatible(S3Storage),
    MinioCompatible(S3Storage),
}

impl StorageGateway {
    /// Build the backend named by `config.provider`.
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let gateway = match config.provider {
            StorageProvider::Local => StorageGateway::Local(LocalStorage::new(&config.local_root)),
            StorageProvider::S3 => {
                let settings = config
                    .remote
                    .as_ref()
                    .ok_or_else(|| StorageError::config_error("S3 settings missing"))?;
                StorageGateway::S3Compatible(S3Storage::new(settings, "s3", config.url_ttl).await?)
            }
            StorageProvider::Minio => {
                let settings = config
                    .remote
                    .as_ref()
                    .ok_or_else(|| StorageError::config_error("MinIO settings missing"))?;
                StorageGateway::MinioCompatible(S3Storage::new(settings, "minio", config.url_ttl).await?)
            }
        };

        info!(backend = gateway.backend_name(), "Storage gateway ready");
        Ok(gateway)
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::from_config(&StorageConfig::from_env()?).await
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageGateway::Local(_) => "local",
            StorageGateway::S3Compatible(_) => "s3",
            StorageGateway::MinioCompatible(_) => "minio",
        }
    }

    /// Store a file under `key`, returning its location descriptor.
    pub async fn put_file(&self, path: impl AsRef<Path>, key: &str) -> StorageResult<String> {
        match self {
            StorageGateway::Local(s) => s.put_file(path, key).await,
            StorageGateway::S3Compatible(s) | StorageGateway::MinioCompatible(s) => {
                s.put_file(path, key).await
            }
        }
    }

    /// Store bytes under `key`, returning its location descriptor.
    pub async fn put(&self, data: &[u8], key: &str) -> StorageResult<String> {
        match self {
            StorageGateway::Local(s) => s.put_bytes(data, key).await,
            StorageGateway::S3Compatible(s) | StorageGateway::MinioCompatible(s) => {
                s.put_bytes(data, key).await
            }
        }
    }

    /// Fetch `key` into `dest`. `Ok(false)` means the key does not exist.
    pub async fn get(&self, key: &str, dest: impl AsRef<Path>) -> StorageResult<bool> {
        match self {
            StorageGateway::Local(s) => s.get(key, dest).await,
            StorageGateway::S3Compatible(s) | StorageGateway::MinioCompatible(s) => {
                s.get(key, dest).await
            }
        }
    }

    /// Remove `key`. `Ok(false)` means it did not exist.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        match self {
            StorageGateway::Local(s) => s.delete(key).await,
            StorageGateway::S3Compatible(s) | StorageGateway::MinioCompatible(s) => s.delete(key).await,
        }
    }

    /// Consumer-facing URL for `key`.
    pub async fn url_for(&self, key: &str) -> StorageResult<String> {
        match self {
            StorageGateway::Local(s) => s.location(key),
            StorageGateway::S3Compatible(s) | StorageGateway::MinioCompatible(s) => Ok(s.url_for(key).await),
        }
    }
}
