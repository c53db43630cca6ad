//! Upload limits enforced before any record is created.

use crate::file::NewFile;
use crate::validation::{ValidationCode, ValidationError};

/// Size, batch, duration and format limits for uploads.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadLimits {
    pub max_file_size_bytes: u64,
    pub max_files_per_batch: usize,
    pub max_duration_secs: f64,
    /// Lowercase, without the dot
    pub allowed_exts: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024,
            max_files_per_batch: 10,
            max_duration_secs: 30.0,
            allowed_exts: vec!["mp4".into(), "mov".into(), "webm".into()],
        }
    }
}

impl UploadLimits {
    /// Load from `MAX_FILE_SIZE_MB`, `MAX_FILES_PER_BATCH`,
    /// `MAX_DURATION_SECONDS` and `ALLOWED_EXTS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_file_size_bytes = std::env::var("MAX_FILE_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(defaults.max_file_size_bytes);

        let max_files_per_batch = std::env::var("MAX_FILES_PER_BATCH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_files_per_batch);

        let max_duration_secs = std::env::var("MAX_DURATION_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_duration_secs);

        let allowed_exts = std::env::var("ALLOWED_EXTS")
            .ok()
            .map(|s| parse_exts(&s))
            .filter(|exts| !exts.is_empty())
            .unwrap_or(defaults.allowed_exts);

        Self {
            max_file_size_bytes,
            max_files_per_batch,
            max_duration_secs,
            allowed_exts,
        }
    }

    pub fn check_extension(&self, name: &str) -> Result<(), ValidationError> {
        let file = NewFile::new(name, 0, 0.0);
        match file.extension() {
            Some(ext) if self.allowed_exts.iter().any(|e| *e == ext) => Ok(()),
            _ => Err(ValidationError::new(
                ValidationCode::UnsupportedFormat,
                format!(
                    "Unsupported file format. Allowed: {}",
                    self.allowed_exts.join(", ")
                ),
            )),
        }
    }

    pub fn check_size(&self, size: u64) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::new(ValidationCode::InvalidFile, "File is empty"));
        }
        if size > self.max_file_size_bytes {
            return Err(ValidationError::new(
                ValidationCode::LimitExceededSize,
                format!(
                    "File too large ({} bytes). Maximum size: {}MB",
                    size,
                    self.max_file_size_bytes / (1024 * 1024)
                ),
            ));
        }
        Ok(())
    }

    pub fn check_duration(&self, duration: f64) -> Result<(), ValidationError> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(ValidationError::new(
                ValidationCode::InvalidFile,
                "Unable to determine video duration",
            ));
        }
        if duration > self.max_duration_secs {
            return Err(ValidationError::new(
                ValidationCode::LimitExceededDuration,
                format!(
                    "Video too long ({:.1}s). Maximum duration: {}s",
                    duration, self.max_duration_secs
                ),
            ));
        }
        Ok(())
    }

    pub fn check_batch(&self, count: usize) -> Result<(), ValidationError> {
        if count == 0 {
            return Err(ValidationError::new(ValidationCode::InvalidFile, "No files provided"));
        }
        if count > self.max_files_per_batch {
            return Err(ValidationError::new(
                ValidationCode::LimitExceededCount,
                format!(
                    "Too many files ({}). Maximum files per batch: {}",
                    count, self.max_files_per_batch
                ),
            ));
        }
        Ok(())
    }

    /// All per-file checks.
    pub fn check_file(&self, file: &NewFile) -> Result<(), ValidationError> {
        self.check_extension(&file.name)?;
        self.check_size(file.size)?;
        self.check_duration(file.duration)
    }
}

fn parse_exts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
