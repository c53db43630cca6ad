//! Record store configuration.

use std::time::Duration;

/// Record store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Sliding expiry applied on every read and write
    pub retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

impl StoreConfig {
    /// Create config from `REDIS_URL` and `FILE_RETENTION_HOURS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            retention: std::env::var("FILE_RETENTION_HOURS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|h| *h > 0)
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or(defaults.retention),
        }
    }
}

/// Retention as a chrono duration for record timestamps.
pub(crate) fn chrono_retention(retention: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(retention.as_millis().min(i64::MAX as u128) as i64)
}

/// Retention as whole seconds for native TTLs (at least 1).
pub(crate) fn ttl_secs(retention: Duration) -> u64 {
    retention.as_secs().max(1)
}
