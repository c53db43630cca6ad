//! Storage backend configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// Which backend variant to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProvider {
    Local,
    S3,
    Minio,
}

impl FromStr for StorageProvider {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageProvider::Local),
            "s3" => Ok(StorageProvider::S3),
            "minio" => Ok(StorageProvider::Minio),
            other => Err(StorageError::config_error(format!(
                "Unknown STORAGE_PROVIDER '{other}' (expected local, s3 or minio)"
            ))),
        }
    }
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Custom endpoint; `None` uses AWS
    pub endpoint_url: Option<String>,
    /// Static credentials; `None` falls back to the default provider chain
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: String,
    pub region: String,
    pub force_path_style: bool,
    /// Create the bucket at startup if it does not exist
    pub ensure_bucket: bool,
}

impl S3Settings {
    /// Load from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `S3_REGION`,
    /// `S3_BUCKET` and `S3_ENDPOINT_URL`.
    pub fn s3_from_env() -> Self {
        let endpoint_url = env_opt("S3_ENDPOINT_URL");
        Self {
            force_path_style: endpoint_url.is_some(),
            endpoint_url,
            access_key_id: env_opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_opt("AWS_SECRET_ACCESS_KEY"),
            bucket: env_or("S3_BUCKET", "alphavid-converter"),
            region: env_or("S3_REGION", "us-east-1"),
            ensure_bucket: false,
        }
    }

    /// Load from `MINIO_ENDPOINT`, `MINIO_ACCESS_KEY`, `MINIO_SECRET_KEY`,
    /// `MINIO_SECURE` and `S3_BUCKET`.
    pub fn minio_from_env() -> Self {
        let endpoint = env_or("MINIO_ENDPOINT", "localhost:9000");
        let secure = std::env::var("MINIO_SECURE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        let scheme = if secure { "https" } else { "http" };

        Self {
            endpoint_url: Some(format!("{scheme}://{endpoint}")),
            access_key_id: Some(env_or("MINIO_ACCESS_KEY", "minioadmin")),
            secret_access_key: Some(env_or("MINIO_SECRET_KEY", "minioadmin")),
            bucket: env_or("S3_BUCKET", "alphavid-converter"),
            region: env_or("S3_REGION", "us-east-1"),
            force_path_style: true,
            ensure_bucket: true,
        }
    }
}

/// Storage gateway configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// Root directory for the local backend
    pub local_root: PathBuf,
    /// Settings for the S3 or MinIO backend; ignored for local
    pub remote: Option<S3Settings>,
    /// Lifetime of presigned URLs
    pub url_ttl: Duration,
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let provider: StorageProvider = env_or("STORAGE_PROVIDER", "local").parse()?;

        let remote = match provider {
            StorageProvider::Local => None,
            StorageProvider::S3 => Some(S3Settings::s3_from_env()),
            StorageProvider::Minio => Some(S3Settings::minio_from_env()),
        };

        let url_ttl_secs = std::env::var("STORAGE_URL_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);

        Ok(Self {
            provider,
            local_root: PathBuf::from(env_or("LOCAL_STORAGE_ROOT", "./data")),
            remote,
            url_ttl: Duration::from_secs(url_ttl_secs),
        })
    }

    /// Local backend rooted at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            provider: StorageProvider::Local,
            local_root: root.into(),
            remote: None,
            url_ttl: Duration::from_secs(3600),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("local".parse::<StorageProvider>().unwrap(), StorageProvider::Local);
        assert_eq!(" S3 ".parse::<StorageProvider>().unwrap(), StorageProvider::S3);
        assert_eq!("MinIO".parse::<StorageProvider>().unwrap(), StorageProvider::Minio);
        assert!(matches!(
            "gcs".parse::<StorageProvider>(),
            Err(StorageError::ConfigError(_))
        ));
    }

    #[test]
    fn test_local_config() {
        let config = StorageConfig::local("/tmp/alphavid");
        assert_eq!(config.provider, StorageProvider::Local);
        assert!(config.remote.is_none());
        assert_eq!(config.url_ttl, Duration::from_secs(3600));
    }
}
