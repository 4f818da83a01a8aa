//! Storage Facade
//!
//! Composes the record store, manifest manager and archival engine behind
//! one handle.
//!
//! ## Usage
//! ```text
//! scraper:  put ─► put ─► ... ─► mark_batch          (one lock cycle)
//! session:  compress / compress_dates
//! loader:   get_manifest ─► get / exists
//! ```
//!
//! `BronzeStore` is `Send + Sync`; share it with `Arc` rather than
//! opening one per thread.

use std::fs;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use crossbeam::channel;

use crate::archive::{ArchivalEngine, CompressionResult};
use crate::config::Config;
use crate::error::{BronzeError, Result};
use crate::health::{self, HealthReport};
use crate::keys::{EntityId, RecordDate, Source};
use crate::layout::Layout;
use crate::manifest::{
    BatchReport, EntryStatus, Manifest, ManifestManager, Outcome, StoredEntity,
};
use crate::record::{Location, RecordStore};

/// The raw-record store
pub struct BronzeStore {
    config: Config,
    layout: Layout,
    records: RecordStore,
    archives: Arc<ArchivalEngine>,
    manifests: ManifestManager,
}

impl BronzeStore {
    /// Open a store rooted at `config.data_dir`
    ///
    /// Validates the configuration and creates the data directory; every
    /// other directory is created lazily on first write.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)
            .map_err(|e| BronzeError::write(&config.data_dir, e))?;

        let layout = Layout::new(&config);
        let records = RecordStore::new(layout.clone());
        let archives = Arc::new(ArchivalEngine::new(&config, layout.clone()));
        let manifests = ManifestManager::new(&config, layout.clone(), archives.clone());

        tracing::info!(
            "Opened bronze store at {} (lock timeout {} ms)",
            config.data_dir.display(),
            config.lock_timeout_ms
        );

        Ok(Self {
            config,
            layout,
            records,
            archives,
            manifests,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn archives(&self) -> &ArchivalEngine {
        &self.archives
    }

    /// Disk space, write permission, directory and lock checks
    pub fn health_check(&self) -> HealthReport {
        health::run(&self.config)
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Store one payload atomically; does not touch the manifest
    pub fn put(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
        payload: &[u8],
    ) -> Result<Location> {
        self.records.put(source, date, id, payload)
    }

    /// Payload from whichever tier holds it
    pub fn get(&self, source: &Source, date: &RecordDate, id: &EntityId) -> Result<Option<Bytes>> {
        self.archives.get(source, date, id)
    }

    pub fn exists(&self, source: &Source, date: &RecordDate, id: &EntityId) -> Result<bool> {
        self.archives.exists(source, date, id)
    }

    pub fn locate(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
    ) -> Result<Option<Location>> {
        self.archives.locate(source, date, id)
    }

    // =========================================================================
    // Manifest
    // =========================================================================

    pub fn mark(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
        status: EntryStatus,
    ) -> Result<BatchReport> {
        self.mark_batch(source, date, &[Outcome::new(id.clone(), status)])
    }

    /// Record a session's outcomes in one lock cycle
    ///
    /// Captured outcomes without a size get it from the stored file, looked
    /// up before the lock is taken.
    pub fn mark_batch(
        &self,
        source: &Source,
        date: &RecordDate,
        outcomes: &[Outcome],
    ) -> Result<BatchReport> {
        let mut filled = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let mut outcome = outcome.clone();
            if outcome.status == EntryStatus::Captured && outcome.size_bytes.is_none() {
                if let Some(location) = self.locate(source, date, &outcome.entity_id)? {
                    outcome.size_bytes = Some(location.size_bytes);
                    outcome.captured_at = outcome.captured_at.or(location.captured_at);
                }
            }
            filled.push(outcome);
        }
        self.manifests.mark_batch(source, date, &filled)
    }

    pub fn register_expected(
        &self,
        source: &Source,
        date: &RecordDate,
        ids: &[EntityId],
    ) -> Result<Manifest> {
        self.manifests.register_expected(source, date, ids)
    }

    pub fn mark_phase(
        &self,
        source: &Source,
        date: &RecordDate,
        phase: &str,
        complete: bool,
    ) -> Result<Manifest> {
        self.manifests.mark_phase(source, date, phase, complete)
    }

    pub fn force_recapture(
        &self,
        source: &Source,
        date: &RecordDate,
        ids: &[EntityId],
    ) -> Result<Manifest> {
        self.manifests.force_recapture(source, date, ids)
    }

    pub fn begin_recapture(&self, source: &Source, date: &RecordDate) -> Result<Manifest> {
        self.manifests.begin_recapture(source, date)
    }

    pub fn get_manifest(&self, source: &Source, date: &RecordDate) -> Result<Manifest> {
        self.manifests.get_manifest(source, date)
    }

    pub fn rebuild_manifest(&self, source: &Source, date: &RecordDate) -> Result<Manifest> {
        self.manifests.rebuild(source, date)
    }

    // =========================================================================
    // Archival
    // =========================================================================

    pub fn compress(&self, source: &Source, date: &RecordDate, force: bool) -> CompressionResult {
        self.archives.compress(source, date, force)
    }

    /// Compress with the configured `force_recompress` default
    pub fn compress_default(&self, source: &Source, date: &RecordDate) -> CompressionResult {
        self.compress(source, date, self.config.force_recompress)
    }

    /// Compress, overriding whether loose inputs are deleted afterwards
    pub fn compress_with(
        &self,
        source: &Source,
        date: &RecordDate,
        force: bool,
        delete_sources: bool,
    ) -> CompressionResult {
        self.archives.compress_with(source, date, force, delete_sources)
    }

    /// Compress several dates in parallel
    ///
    /// Dates are independent, so each worker takes the next date off a
    /// shared queue. Results come back sorted by date.
    pub fn compress_dates(
        &self,
        source: &Source,
        dates: &[RecordDate],
        force: bool,
    ) -> Vec<(RecordDate, CompressionResult)> {
        let workers = self.config.compression_workers.min(dates.len()).max(1);
        let (task_tx, task_rx) = channel::unbounded::<RecordDate>();
        let (result_tx, result_rx) = channel::unbounded();

        for date in dates {
            // receiver is alive until the scope ends
            let _ = task_tx.send(*date);
        }
        drop(task_tx);

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let archives = &self.archives;
                scope.spawn(move || {
                    for date in task_rx.iter() {
                        tracing::debug!("worker {} compressing {}/{}", worker_id, source, date);
                        let result = archives.compress(source, &date, force);
                        if result_tx.send((date, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<(RecordDate, CompressionResult)> = result_rx.iter().collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::info!(
            "{}: compressed {} date(s) with {} worker(s)",
            source,
            results.len(),
            workers
        );
        results
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Every date directory of a source, oldest first
    pub fn list_dates(&self, source: &Source) -> Result<Vec<RecordDate>> {
        let dir = self.layout.source_dir(source);
        self.layout
            .list_dates(source)
            .map_err(|e| BronzeError::read(&dir, e))
    }

    /// Every entity stored for a date, across tiers
    pub fn list_entities(&self, source: &Source, date: &RecordDate) -> Result<Vec<StoredEntity>> {
        self.archives.list(source, date)
    }
}
