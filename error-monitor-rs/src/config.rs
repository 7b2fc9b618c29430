//! # Subsystem Configuration
//!
//! Typed configuration for the pipeline, broker, and storage, with
//! defaults matching the documented behavior and an override layer read
//! from a `config::Config` under the `error_monitor.*` keys.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" or "postgres"
    pub backend: String,
    /// Connection string, required for the postgres backend
    pub connection_string: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            connection_string: None,
        }
    }
}

/// Configuration for the whole subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Rolling window within which repeated occurrences of one
    /// fingerprint merge into a single record
    pub dedup_window: Duration,
    /// Maximum events per flush batch
    pub batch_size: usize,
    /// Maximum time to wait before flushing a partial batch, measured
    /// from the first unflushed event
    pub batch_delay: Duration,
    /// Capacity of the ingestion queue; overflow drops events
    pub queue_capacity: usize,
    /// Suppression window for repeated alerts with the same
    /// category+message cooldown key
    pub cooldown: Duration,
    /// Maximum number of pending notifications the broker retains
    pub retention_cap: usize,
    /// Per-subscriber outbound frame buffer
    pub subscriber_buffer: usize,
    /// Storage backend for the dedup store
    pub storage: StorageConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(24 * 60 * 60),
            batch_size: 10,
            batch_delay: Duration::from_secs(5),
            queue_capacity: 1024,
            cooldown: Duration::from_secs(5 * 60),
            retention_cap: 100,
            subscriber_buffer: 64,
            storage: StorageConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Dedup window as a chrono duration, for timestamp arithmetic
    pub fn dedup_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.dedup_window)
            .unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}

impl TryFrom<config::Config> for MonitorConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        // Start with defaults and override from config where present.
        let mut base = MonitorConfig::default();

        if let Ok(secs) = cfg.get::<u64>("error_monitor.dedup_window_secs") {
            base.dedup_window = Duration::from_secs(secs);
        }
        if let Ok(batch_size) = cfg.get::<usize>("error_monitor.batch_size") {
            base.batch_size = batch_size;
        }
        if let Ok(secs) = cfg.get::<u64>("error_monitor.batch_delay_secs") {
            base.batch_delay = Duration::from_secs(secs);
        }
        if let Ok(capacity) = cfg.get::<usize>("error_monitor.queue_capacity") {
            base.queue_capacity = capacity;
        }
        if let Ok(secs) = cfg.get::<u64>("error_monitor.cooldown_secs") {
            base.cooldown = Duration::from_secs(secs);
        }
        if let Ok(cap) = cfg.get::<usize>("error_monitor.retention_cap") {
            base.retention_cap = cap;
        }
        if let Ok(buffer) = cfg.get::<usize>("error_monitor.subscriber_buffer") {
            base.subscriber_buffer = buffer;
        }
        if let Ok(backend) = cfg.get::<String>("error_monitor.storage.backend") {
            base.storage.backend = backend;
        }
        if let Ok(url) = cfg.get::<String>("error_monitor.storage.connection_string") {
            base.storage.connection_string = Some(url);
        }

        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_behavior() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.batch_delay, Duration::from_secs(5));
        assert_eq!(cfg.dedup_window, Duration::from_secs(86_400));
        assert_eq!(cfg.cooldown, Duration::from_secs(300));
        assert_eq!(cfg.retention_cap, 100);
        assert_eq!(cfg.storage.backend, "memory");
    }

    #[test]
    fn test_overrides_from_config() {
        let source = config::Config::builder()
            .set_override("error_monitor.batch_size", 25i64)
            .unwrap()
            .set_override("error_monitor.cooldown_secs", 60i64)
            .unwrap()
            .set_override("error_monitor.storage.backend", "postgres")
            .unwrap()
            .build()
            .unwrap();

        let cfg = MonitorConfig::try_from(source).unwrap();
        assert_eq!(cfg.batch_size, 25);
        assert_eq!(cfg.cooldown, Duration::from_secs(60));
        assert_eq!(cfg.storage.backend, "postgres");
        // untouched fields keep their defaults
        assert_eq!(cfg.retention_cap, 100);
    }
}
