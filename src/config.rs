//! Configuration for bronze-store
//!
//! Centralized configuration with sensible defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BronzeError, Result};

/// Main configuration for a BronzeStore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all sources
    /// Internal structure:
    ///   {data_dir}/
    ///     └── {source}/
    ///           └── {YYYYMMDD}/   (records, archive, manifest)
    pub data_dir: PathBuf,

    /// Explicit base directory per source, overriding `{data_dir}/{source}`
    pub source_dirs: HashMap<String, PathBuf>,

    // -------------------------------------------------------------------------
    // Lock Configuration
    // -------------------------------------------------------------------------
    /// How long a manifest or archive lock acquisition may wait (milliseconds)
    pub lock_timeout_ms: u64,

    /// Sleep between lock attempts (milliseconds)
    pub lock_poll_interval_ms: u64,

    // -------------------------------------------------------------------------
    // Compression Configuration
    // -------------------------------------------------------------------------
    /// Delete loose record files once the archive has been verified
    pub delete_sources_after_verify: bool,

    /// Default for `force` when callers compress with the configured default
    pub force_recompress: bool,

    /// Gzip level for member streams (0-9)
    pub compression_level: u32,

    /// Worker threads used when compressing several dates at once
    pub compression_workers: usize,

    // -------------------------------------------------------------------------
    // Health Check Configuration
    // -------------------------------------------------------------------------
    /// Free space below which the health check warns (bytes)
    pub low_disk_warn_bytes: u64,

    /// Free space below which the health check reports an error (bytes)
    pub low_disk_error_bytes: u64,
}

const GIB: u64 = 1024 * 1024 * 1024;

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./bronze_data"),
            source_dirs: HashMap::new(),
            lock_timeout_ms: 30_000,
            lock_poll_interval_ms: 25,
            delete_sources_after_verify: true,
            force_recompress: false,
            compression_level: 6,
            compression_workers: 4,
            low_disk_warn_bytes: 5 * GIB,
            low_disk_error_bytes: GIB,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }

    /// Reject settings the engine cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(BronzeError::Config("data_dir must not be empty".to_string()));
        }
        if self.compression_level > 9 {
            return Err(BronzeError::Config(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.compression_workers == 0 {
            return Err(BronzeError::Config(
                "compression_workers must be at least 1".to_string(),
            ));
        }
        if self.low_disk_error_bytes > self.low_disk_warn_bytes {
            return Err(BronzeError::Config(format!(
                "low_disk_error_bytes ({}) exceeds low_disk_warn_bytes ({})",
                self.low_disk_error_bytes, self.low_disk_warn_bytes
            )));
        }
        for (source, dir) in &self.source_dirs {
            if dir.as_os_str().is_empty() {
                return Err(BronzeError::Config(format!(
                    "empty base directory configured for source {}",
                    source
                )));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all sources)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Store one source somewhere other than `{data_dir}/{source}`
    pub fn source_dir(mut self, source: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.config
            .source_dirs
            .insert(source.into().to_ascii_lowercase(), path.into());
        self
    }

    /// Set the lock acquisition timeout (in milliseconds)
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    /// Set the lock polling interval (in milliseconds)
    pub fn lock_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.lock_poll_interval_ms = ms;
        self
    }

    /// Keep or delete loose files after a verified compression
    pub fn delete_sources_after_verify(mut self, delete: bool) -> Self {
        self.config.delete_sources_after_verify = delete;
        self
    }

    pub fn force_recompress(mut self, force: bool) -> Self {
        self.config.force_recompress = force;
        self
    }

    /// Set the gzip level (0-9)
    pub fn compression_level(mut self, level: u32) -> Self {
        self.config.compression_level = level;
        self
    }

    pub fn compression_workers(mut self, workers: usize) -> Self {
        self.config.compression_workers = workers;
        self
    }

    /// Set the free-space thresholds used by the health check (bytes)
    pub fn low_disk_thresholds(mut self, warn_bytes: u64, error_bytes: u64) -> Self {
        self.config.low_disk_warn_bytes = warn_bytes;
        self.config.low_disk_error_bytes = error_bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
