//! Manifest Manager
//!
//! Reads, locks, mutates and atomically rewrites `manifest.json`.
//!
//! ## Concurrency
//! Every mutation runs as lock → read → apply → recompute stats → atomic
//! write → unlock, with the lock scoped to one `(source, date)`. Readers
//! never lock; the atomic rename guarantees they see a whole manifest.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{BronzeError, Result};
use crate::fsutil;
use crate::keys::{EntityId, RecordDate, Source};
use crate::layout::Layout;
use crate::lock::{FileLock, LockError};

use super::{BatchReport, DateInventory, EntryStatus, Manifest, Outcome};

/// Owner of every manifest file under the layout
pub struct ManifestManager {
    layout: Layout,
    lock_timeout: Duration,
    lock_poll: Duration,
    /// Used to rebuild manifests that fail to parse
    inventory: Arc<dyn DateInventory>,
}

/// Result of reading a manifest file without a lock
enum Loaded {
    Missing,
    Parsed(Manifest),
    Corrupt(String),
}

impl ManifestManager {
    pub fn new(config: &Config, layout: Layout, inventory: Arc<dyn DateInventory>) -> Self {
        Self {
            layout,
            lock_timeout: config.lock_timeout(),
            lock_poll: config.lock_poll_interval(),
            inventory,
        }
    }

    // =========================================================================
    // Status updates
    // =========================================================================

    /// Record one outcome
    pub fn mark(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
        status: EntryStatus,
    ) -> Result<BatchReport> {
        self.mark_batch(source, date, &[Outcome::new(id.clone(), status)])
    }

    /// Record many outcomes under a single lock cycle
    ///
    /// Outcomes refused by the state machine are listed in the report and
    /// logged; they do not fail the batch.
    pub fn mark_batch(
        &self,
        source: &Source,
        date: &RecordDate,
        outcomes: &[Outcome],
    ) -> Result<BatchReport> {
        if outcomes.is_empty() {
            let manifest = self.get_manifest(source, date)?;
            return Ok(BatchReport {
                applied: 0,
                rejected: Vec::new(),
                stats: manifest.stats,
            });
        }

        let (applied, rejected, stats) = self.update(source, date, |manifest, now| {
            let mut applied = 0;
            let mut rejected = Vec::new();
            for outcome in outcomes {
                if manifest.apply(outcome, now) {
                    applied += 1;
                } else {
                    rejected.push(outcome.entity_id.clone());
                }
            }
            (applied, rejected)
        })
        .map(|(manifest, (applied, rejected))| (applied, rejected, manifest.stats))?;

        if !rejected.is_empty() {
            tracing::warn!(
                "{}/{}: {} outcome(s) would move captured entries backwards, skipped: {:?}",
                source,
                date,
                rejected.len(),
                rejected
            );
        }
        tracing::debug!(
            "{}/{}: applied {} outcome(s), {}/{} stored",
            source,
            date,
            applied,
            stats.files_stored,
            stats.files_stored + stats.files_missing
        );

        Ok(BatchReport {
            applied,
            rejected,
            stats,
        })
    }

    /// Merge the ids found by a discovery phase into `expected_ids`
    pub fn register_expected(
        &self,
        source: &Source,
        date: &RecordDate,
        ids: &[EntityId],
    ) -> Result<Manifest> {
        let (manifest, added) = self.update(source, date, |m, now| m.register_expected(ids, now))?;
        tracing::info!(
            "{}/{}: registered {} new expected id(s), {} total",
            source,
            date,
            added,
            manifest.expected_ids.len()
        );
        Ok(manifest)
    }

    /// Mark a caller-named phase complete or incomplete
    pub fn mark_phase(
        &self,
        source: &Source,
        date: &RecordDate,
        phase: &str,
        complete: bool,
    ) -> Result<Manifest> {
        let phase = phase.trim();
        if phase.is_empty() {
            return Err(BronzeError::InvalidPhase(phase.to_string()));
        }
        self.update(source, date, |m, now| m.set_phase(phase, complete, now))
            .map(|(manifest, _)| manifest)
    }

    /// Reset the given entries to pending so they can be captured again
    pub fn force_recapture(
        &self,
        source: &Source,
        date: &RecordDate,
        ids: &[EntityId],
    ) -> Result<Manifest> {
        let (manifest, reset) = self.update(source, date, |m, now| m.reset_entries(ids, now))?;
        tracing::info!("{}/{}: reset {} entry(ies) to pending", source, date, reset);
        Ok(manifest)
    }

    /// Replace the manifest with a fresh one that keeps only expected ids
    pub fn begin_recapture(&self, source: &Source, date: &RecordDate) -> Result<Manifest> {
        let (manifest, _) = self.update(source, date, |m, _| {
            *m = m.superseded();
        })?;
        tracing::info!(
            "{}/{}: manifest superseded for forced re-capture ({} expected)",
            source,
            date,
            manifest.expected_ids.len()
        );
        Ok(manifest)
    }

    /// Reconcile the manifest with the files on disk
    ///
    /// Found records become captured (with their stored size); captured
    /// entries whose files are gone drop back to pending. Expected ids and
    /// phases survive.
    pub fn rebuild(&self, source: &Source, date: &RecordDate) -> Result<Manifest> {
        let found = self.inventory.inventory(source, date)?;
        let (manifest, lost) = self.update(source, date, |m, now| {
            let on_disk: std::collections::BTreeSet<&EntityId> =
                found.iter().map(|s| &s.entity_id).collect();

            let lost: Vec<EntityId> = m
                .ids_with_status(EntryStatus::Captured)
                .into_iter()
                .filter(|id| !on_disk.contains(id))
                .collect();
            m.reset_entries(lost.iter(), now);

            for stored in &found {
                let outcome = Outcome {
                    captured_at: stored.captured_at,
                    ..Outcome::captured(stored.entity_id.clone(), stored.size_bytes)
                };
                m.apply(&outcome, now);
            }
            lost.len()
        })?;

        if lost > 0 {
            tracing::warn!(
                "{}/{}: {} captured entry(ies) had no file on disk, reset to pending",
                source,
                date,
                lost
            );
        }
        Ok(manifest)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Snapshot of the manifest, without locking
    ///
    /// A missing manifest reads as empty. A corrupt one is reconstructed in
    /// memory (flagged via `recovery`) and persisted by the next write.
    pub fn get_manifest(&self, source: &Source, date: &RecordDate) -> Result<Manifest> {
        let path = self.layout.manifest_path(source, date);
        let mut manifest = match self.read(source, date, &path)? {
            Loaded::Missing => Manifest::new(source.clone(), *date),
            Loaded::Parsed(manifest) => manifest,
            Loaded::Corrupt(reason) => self.recover(source, date, &path, reason)?,
        };
        manifest.refresh_stats();
        Ok(manifest)
    }

    pub fn manifest_exists(&self, source: &Source, date: &RecordDate) -> bool {
        self.layout.manifest_path(source, date).is_file()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Locked read-modify-write; returns the written manifest and the
    /// closure's result
    fn update<T, F>(&self, source: &Source, date: &RecordDate, mutate: F) -> Result<(Manifest, T)>
    where
        F: FnOnce(&mut Manifest, DateTime<Utc>) -> T,
    {
        let dir = self.layout.date_dir(source, date);
        fs::create_dir_all(&dir).map_err(|e| BronzeError::write(&dir, e))?;

        let _lock = self.lock(source, date)?;

        let path = self.layout.manifest_path(source, date);
        let mut manifest = match self.read(source, date, &path)? {
            Loaded::Missing => {
                tracing::info!("{}/{}: creating manifest", source, date);
                Manifest::new(source.clone(), *date)
            }
            Loaded::Parsed(manifest) => manifest,
            Loaded::Corrupt(reason) => self.recover(source, date, &path, reason)?,
        };

        let now = Utc::now();
        let out = mutate(&mut manifest, now);
        manifest.updated_at = now;
        manifest.refresh_stats();

        self.write(&path, &manifest)?;
        Ok((manifest, out))
    }

    fn lock(&self, source: &Source, date: &RecordDate) -> Result<FileLock> {
        let path = self.layout.manifest_lock_path(source, date);
        FileLock::acquire(&path, self.lock_timeout, self.lock_poll).map_err(|e| match e {
            LockError::Timeout { path, waited } => {
                tracing::error!(
                    "{}/{}: manifest lock not acquired within {} ms",
                    source,
                    date,
                    waited.as_millis()
                );
                BronzeError::LockTimeout {
                    path,
                    waited_ms: waited.as_millis() as u64,
                }
            }
            LockError::Io(cause) => BronzeError::write(&path, cause),
        })
    }

    fn read(&self, source: &Source, date: &RecordDate, path: &Path) -> Result<Loaded> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Loaded::Missing),
            Err(e) => return Err(BronzeError::read(path, e)),
        };

        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(manifest) if manifest.source == *source && manifest.date == *date => {
                Ok(Loaded::Parsed(manifest))
            }
            Ok(manifest) => Ok(Loaded::Corrupt(format!(
                "manifest belongs to {}/{}",
                manifest.source, manifest.date
            ))),
            Err(e) => Ok(Loaded::Corrupt(e.to_string())),
        }
    }

    fn recover(
        &self,
        source: &Source,
        date: &RecordDate,
        path: &Path,
        reason: String,
    ) -> Result<Manifest> {
        tracing::warn!(
            "{}/{}: manifest unreadable ({}), rebuilding from stored files",
            source,
            date,
            reason
        );
        let found = self
            .inventory
            .inventory(source, date)
            .map_err(|scan| BronzeError::ManifestCorrupt {
                path: path.to_path_buf(),
                reason: format!("{}; rebuild scan failed: {}", reason, scan),
            })?;

        tracing::warn!(
            "{}/{}: rebuilt manifest from {} stored file(s)",
            source,
            date,
            found.len()
        );
        Ok(Manifest::reconstructed(
            source.clone(),
            *date,
            &found,
            reason,
        ))
    }

    fn write(&self, path: &Path, manifest: &Manifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)
            .map_err(|e| BronzeError::Serialization(e.to_string()))?;
        fsutil::write_atomic_bytes(path, &bytes).map_err(|e| BronzeError::write(path, e))
    }
}
