//! S3-compatible backend (AWS S3 and MinIO).

use std::path::Path;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use tracing::{debug, info, warn};

use crate::config::S3Settings;
use crate::error::{StorageError, StorageResult};

/// Bucket-backed object storage.
#[derive(Clone, Debug)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    /// Scheme of location descriptors (`s3` or `minio`)
    scheme: &'static str,
    url_ttl: Duration,
}

impl S3Storage {
    /// Create a client from settings. `scheme` names the location descriptors.
    pub async fn new(settings: &S3Settings, scheme: &'static str, url_ttl: Duration) -> StorageResult<Self> {
        let mut builder = match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(key), Some(secret)) => {
                let credentials = Credentials::new(key, secret, None, None, scheme);
                Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            }
            _ => {
                let shared: SdkConfig = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(settings.region.clone()))
                    .load()
                    .await;
                Builder::from(&shared)
            }
        };

        builder = builder
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.force_path_style);

        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let storage = Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
            scheme,
            url_ttl,
        };

        if settings.ensure_bucket {
            storage.ensure_bucket().await?;
        }

        Ok(storage)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Location descriptor: `{scheme}://{bucket}/{key}`.
    pub fn location(&self, key: &str) -> String {
        location(self.scheme, &self.bucket, key)
    }

    async fn ensure_bucket(&self) -> StorageResult<()> {
        if self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
        {
            return Ok(());
        }

        info!("Creating bucket {}", self.bucket);
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::config_error(format!("Failed to create bucket {}: {}", self.bucket, e)))?;
        Ok(())
    }

    /// Upload a file.
    pub async fn put_file(&self, path: impl AsRef<Path>, key: &str) -> StorageResult<String> {
        let path = path.as_ref();
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(key))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(self.location(key))
    }

    /// Upload bytes.
    pub async fn put_bytes(&self, data: &[u8], key: &str) -> StorageResult<String> {
        debug!("Uploading {} bytes to {}", data.len(), key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .content_type(content_type_for(key))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(self.location(key))
    }

    /// Download `key` to `dest`. Returns `false` if the key does not exist.
    pub async fn get(&self, key: &str, dest: impl AsRef<Path>) -> StorageResult<bool> {
        let dest = dest.as_ref();
        debug!("Downloading {} to {}", key, dest.display());

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                debug!("Key {} not found in {}", key, self.bucket);
                return Ok(false);
            }
            Err(e) => return Err(StorageError::download_failed(e.to_string())),
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| StorageError::download_failed(format!("Failed to write file: {}", e)))?;

        info!("Downloaded {} to {}", key, dest.display());
        Ok(true)
    }

    /// Check if an object exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::AwsSdk(e.to_string())),
        }
    }

    /// Delete an object. Returns `false` if it did not exist.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        if !self.exists(key).await? {
            return Ok(false);
        }

        debug!("Deleting {}", key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(true)
    }

    /// Generate a presigned URL for GET.
    pub async fn presign_get(&self, key: &str) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(self.url_ttl)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Presigned URL, falling back to the location descriptor.
    pub async fn url_for(&self, key: &str) -> String {
        match self.presign_get(key).await {
            Ok(url) => url,
            Err(e) => {
                warn!("Presign failed for {}, using location: {}", key, e);
                self.location(key)
            }
        }
    }
}

fn location(scheme: &str, bucket: &str, key: &str) -> String {
    format!("{scheme}://{bucket}/{key}")
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("webm") => "video/webm",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}
