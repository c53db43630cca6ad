//! Local filesystem backend.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::keys::validate_key;

/// Objects stored as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute-or-root-relative path of `key`.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Location descriptor for a stored key: its filesystem path.
    pub fn location(&self, key: &str) -> StorageResult<String> {
        Ok(self.path_for(key)?.to_string_lossy().to_string())
    }

    /// Copy `src` to `key`. The destination is replaced atomically.
    pub async fn put_file(&self, src: impl AsRef<Path>, key: &str) -> StorageResult<String> {
        let src = src.as_ref();
        let dest = self.path_for(key)?;
        debug!("Storing {} at {}", src.display(), dest.display());

        let tmp = self.staging_path(&dest).await?;
        if let Err(e) = fs::copy(src, &tmp).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::upload_failed(format!(
                "Failed to copy {}: {}",
                src.display(),
                e
            )));
        }
        self.commit(&tmp, &dest).await?;

        info!("Stored {} at {}", src.display(), key);
        self.location(key)
    }

    /// Write `data` to `key`. The destination is replaced atomically.
    pub async fn put_bytes(&self, data: &[u8], key: &str) -> StorageResult<String> {
        let dest = self.path_for(key)?;
        debug!("Storing {} bytes at {}", data.len(), dest.display());

        let tmp = self.staging_path(&dest).await?;
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::upload_failed(e.to_string()));
        }
        self.commit(&tmp, &dest).await?;

        self.location(key)
    }

    /// Copy `key` to `dest`. Returns `false` if the key does not exist.
    pub async fn get(&self, key: &str, dest: impl AsRef<Path>) -> StorageResult<bool> {
        let src = self.path_for(key)?;
        let dest = dest.as_ref();

        if !fs::try_exists(&src).await? {
            debug!("Key {} not found under {}", key, self.root.display());
            return Ok(false);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(&src, dest).await.map_err(|e| {
            StorageError::download_failed(format!("Failed to copy {}: {}", src.display(), e))
        })?;

        debug!("Fetched {} to {}", key, dest.display());
        Ok(true)
    }

    /// Remove `key`. Returns `false` if it did not exist.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    // Unique sibling of `dest` so concurrent writers never share a temp file.
    async fn staging_path(&self, dest: &Path) -> StorageResult<PathBuf> {
        let parent = dest
            .parent()
            .ok_or_else(|| StorageError::invalid_key(dest.to_string_lossy()))?;
        fs::create_dir_all(parent).await?;

        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4())))
    }

    async fn commit(&self, tmp: &Path, dest: &Path) -> StorageResult<()> {
        if let Err(e) = fs::rename(tmp, dest).await {
            let _ = fs::remove_file(tmp).await;
            return Err(StorageError::upload_failed(format!(
                "Failed to move into place {}: {}",
                dest.display(),
                e
            )));
        }
        Ok(())
    }
}
