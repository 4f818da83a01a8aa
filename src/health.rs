//! Pre-flight health checks
//!
//! Run before a scrape session to catch the conditions that would later
//! surface as `StorageWrite` failures or lock timeouts:
//!
//! | check               | error when                   | warning when                |
//! |---------------------|------------------------------|-----------------------------|
//! | disk space          | free < `low_disk_error_bytes`| free < `low_disk_warn_bytes`|
//! | write permission    | probe write or remove fails  |                             |
//! | directory structure | `data_dir` missing           | a source override missing   |
//! | file locking        | lock file cannot be opened   | lock busy                   |
//!
//! Any error makes the report `unhealthy`; otherwise any warning makes it
//! `warning`.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::fsutil;
use crate::lock::{FileLock, LockError};

const PROBE_FILENAME: &str = ".health_probe";
const LOCK_FILENAME: &str = ".health.lock";

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

/// Overall verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn new(check: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            check,
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    fn from_checks(checks: Vec<CheckResult>) -> Self {
        let status = if checks.iter().any(|c| c.status == CheckStatus::Error) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == CheckStatus::Warning) {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            checked_at: Utc::now(),
            checks,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == name)
    }
}

/// Run every check against the configured directories
pub fn run(config: &Config) -> HealthReport {
    let data_dir = config.data_dir.as_path();
    let checks = vec![
        disk_space(data_dir, config),
        write_permission(data_dir),
        directory_structure(config),
        file_locking(data_dir),
    ];
    let report = HealthReport::from_checks(checks);

    match report.status {
        HealthStatus::Healthy => tracing::info!("Health check passed for {}", data_dir.display()),
        HealthStatus::Warning => tracing::warn!(
            "Health check for {}: {} warning(s)",
            data_dir.display(),
            report.count(CheckStatus::Warning)
        ),
        HealthStatus::Unhealthy => tracing::error!(
            "Health check for {}: {} error(s)",
            data_dir.display(),
            report.count(CheckStatus::Error)
        ),
    }
    report
}

fn disk_space(data_dir: &Path, config: &Config) -> CheckResult {
    const NAME: &str = "disk_space";
    let (free, total) = match (fs2::available_space(data_dir), fs2::total_space(data_dir)) {
        (Ok(free), Ok(total)) => (free, total),
        (Err(e), _) | (_, Err(e)) => {
            return CheckResult::new(NAME, CheckStatus::Error, format!("failed to check: {}", e))
        }
    };

    let gib = |bytes: u64| bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    let used_pct = if total > 0 {
        (total.saturating_sub(free)) as f64 * 100.0 / total as f64
    } else {
        0.0
    };
    let message = format!("{:.1} GB free ({:.1}% used)", gib(free), used_pct);

    let status = if free < config.low_disk_error_bytes {
        CheckStatus::Error
    } else if free < config.low_disk_warn_bytes {
        CheckStatus::Warning
    } else {
        CheckStatus::Ok
    };
    CheckResult::new(NAME, status, message)
}

fn write_permission(data_dir: &Path) -> CheckResult {
    const NAME: &str = "write_permission";
    let probe = data_dir.join(PROBE_FILENAME);
    let written = fsutil::write_atomic_bytes(&probe, b"ok")
        .and_then(|()| fsutil::remove_if_exists(&probe).map(|_| ()));
    match written {
        Ok(()) => CheckResult::new(NAME, CheckStatus::Ok, "can write to the data directory"),
        Err(e) => CheckResult::new(
            NAME,
            CheckStatus::Error,
            format!("cannot write to {}: {}", data_dir.display(), e),
        ),
    }
}

fn directory_structure(config: &Config) -> CheckResult {
    const NAME: &str = "directory_structure";
    if !config.data_dir.is_dir() {
        return CheckResult::new(
            NAME,
            CheckStatus::Error,
            format!("data directory {} is missing", config.data_dir.display()),
        );
    }

    let mut missing: Vec<&str> = config
        .source_dirs
        .iter()
        .filter(|(_, dir)| !dir.is_dir())
        .map(|(source, _)| source.as_str())
        .collect();
    if missing.is_empty() {
        return CheckResult::new(NAME, CheckStatus::Ok, "all configured directories exist");
    }
    missing.sort_unstable();
    CheckResult::new(
        NAME,
        CheckStatus::Warning,
        format!(
            "{} source director(ies) missing, created on first write: {}",
            missing.len(),
            missing.join(", ")
        ),
    )
}

fn file_locking(data_dir: &Path) -> CheckResult {
    const NAME: &str = "file_locking";
    // acquiring would otherwise create the data directory
    if !data_dir.is_dir() {
        return CheckResult::new(NAME, CheckStatus::Error, "no data directory to lock in");
    }
    let path = data_dir.join(LOCK_FILENAME);
    match FileLock::acquire(&path, Duration::ZERO, Duration::from_millis(1)) {
        Ok(_lock) => CheckResult::new(NAME, CheckStatus::Ok, "advisory locks available"),
        Err(LockError::Timeout { .. }) => CheckResult::new(
            NAME,
            CheckStatus::Warning,
            "health lock is held by another process",
        ),
        Err(LockError::Io(e)) => {
            CheckResult::new(NAME, CheckStatus::Error, format!("locking failed: {}", e))
        }
    }
}
