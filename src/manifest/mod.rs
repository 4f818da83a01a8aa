//! Manifest Module
//!
//! Per-`(source, date)` progress ledger.
//!
//! ## Responsibilities
//! - Track expected entity ids, per-entity capture status and named phases
//! - Serialize concurrent updates through an advisory lock
//! - Rebuild itself from the files on disk when the JSON is corrupt
//!
//! ## Entry State Machine
//! ```text
//!            ┌──────────── retry ────────────┐
//!            ▼                               │
//!        pending ──────► failed ─────────────┘
//!            │              │
//!            │              └── retry succeeded ──┐
//!            ▼                                    ▼
//!        captured ◄───────────────────────────────┘
//!            │
//!            └── only via force_recapture / begin_recapture ──► pending
//! ```
//!
//! `stats` is a cache: it is recomputed from `entries` and `expected_ids`
//! on every read and before every write.

mod manager;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::keys::{EntityId, RecordDate, Source};
use crate::layout::Tier;

pub use manager::ManifestManager;

// =============================================================================
// Entry Types
// =============================================================================

/// Capture status of one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Captured,
    Failed,
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "captured" => Ok(Self::Captured),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown status {:?}", other)),
        }
    }
}

/// Manifest entry for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub status: EntryStatus,
    pub captured_at: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
    /// Capture attempts that ended in `captured` or `failed`
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl EntryRecord {
    fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: EntryStatus::Pending,
            captured_at: None,
            size_bytes: None,
            attempts: 0,
            last_error: None,
            updated_at: now,
        }
    }
}

/// Completion state of a caller-named phase ("discovery", "odds", ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub complete: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Derived aggregate, never trusted from disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestStats {
    pub files_stored: usize,
    pub files_missing: usize,
    pub total_size_bytes: u64,
    pub completion_percentage: f64,
}

/// Set when a manifest was reconstructed from the files on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub recovered_at: DateTime<Utc>,
    pub reason: String,
    pub files_found: usize,
}

// =============================================================================
// Outcomes
// =============================================================================

/// One capture result, as accumulated by a scraper during a session
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub entity_id: EntityId,
    pub status: EntryStatus,
    pub size_bytes: Option<u64>,
    pub captured_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Outcome {
    pub fn new(entity_id: EntityId, status: EntryStatus) -> Self {
        Self {
            entity_id,
            status,
            size_bytes: None,
            captured_at: None,
            error: None,
        }
    }

    pub fn captured(entity_id: EntityId, size_bytes: u64) -> Self {
        Self {
            size_bytes: Some(size_bytes),
            ..Self::new(entity_id, EntryStatus::Captured)
        }
    }

    pub fn failed(entity_id: EntityId, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(entity_id, EntryStatus::Failed)
        }
    }

    pub fn pending(entity_id: EntityId) -> Self {
        Self::new(entity_id, EntryStatus::Pending)
    }
}

impl From<(EntityId, EntryStatus)> for Outcome {
    fn from((entity_id, status): (EntityId, EntryStatus)) -> Self {
        Self::new(entity_id, status)
    }
}

/// What a `mark_batch` call did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub applied: usize,
    /// Outcomes refused by the state machine (e.g. captured → failed)
    pub rejected: Vec<EntityId>,
    pub stats: ManifestStats,
}

// =============================================================================
// Inventory seam
// =============================================================================

/// A record found on disk, in whichever tier holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEntity {
    pub entity_id: EntityId,
    pub tier: Tier,
    pub size_bytes: u64,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Lists what is actually stored for a date; used to rebuild manifests
pub trait DateInventory: Send + Sync {
    fn inventory(&self, source: &Source, date: &RecordDate) -> Result<Vec<StoredEntity>>;
}

// =============================================================================
// Manifest
// =============================================================================

/// Progress ledger for one `(source, date)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub source: Source,
    pub date: RecordDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub expected_ids: BTreeSet<EntityId>,
    #[serde(default)]
    pub entries: BTreeMap<EntityId, EntryRecord>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseState>,
    #[serde(default)]
    pub stats: ManifestStats,
    #[serde(default)]
    pub recovery: Option<Recovery>,
}

impl Manifest {
    /// Empty manifest, as created lazily on the first write of a date
    pub fn new(source: Source, date: RecordDate) -> Self {
        let now = Utc::now();
        Self {
            source,
            date,
            created_at: now,
            updated_at: now,
            expected_ids: BTreeSet::new(),
            entries: BTreeMap::new(),
            phases: BTreeMap::new(),
            stats: ManifestStats::default(),
            recovery: None,
        }
    }

    /// Manifest derived purely from what is on disk
    pub fn reconstructed(
        source: Source,
        date: RecordDate,
        found: &[StoredEntity],
        reason: impl Into<String>,
    ) -> Self {
        let mut manifest = Self::new(source, date);
        let now = manifest.created_at;
        for stored in found {
            manifest.expected_ids.insert(stored.entity_id.clone());
            manifest
                .entries
                .insert(stored.entity_id.clone(), captured_entry(stored, now));
        }
        manifest.recovery = Some(Recovery {
            recovered_at: now,
            reason: reason.into(),
            files_found: found.len(),
        });
        manifest.refresh_stats();
        manifest
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Apply one outcome; returns false if the state machine refused it
    pub fn apply(&mut self, outcome: &Outcome, now: DateTime<Utc>) -> bool {
        let entry = self
            .entries
            .entry(outcome.entity_id.clone())
            .or_insert_with(|| EntryRecord::pending(now));

        match (entry.status, outcome.status) {
            (EntryStatus::Captured, EntryStatus::Pending)
            | (EntryStatus::Captured, EntryStatus::Failed) => return false,
            (_, EntryStatus::Captured) => {
                entry.status = EntryStatus::Captured;
                entry.captured_at = Some(outcome.captured_at.unwrap_or(now));
                entry.size_bytes = outcome.size_bytes.or(entry.size_bytes);
                entry.attempts += 1;
                entry.last_error = None;
            }
            (_, EntryStatus::Failed) => {
                entry.status = EntryStatus::Failed;
                entry.attempts += 1;
                entry.last_error = outcome.error.clone();
            }
            (_, EntryStatus::Pending) => {
                entry.status = EntryStatus::Pending;
            }
        }
        entry.updated_at = now;
        true
    }

    /// Add discovered ids; returns how many were new
    pub fn register_expected<'a, I>(&mut self, ids: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = &'a EntityId>,
    {
        let mut added = 0;
        for id in ids {
            if self.expected_ids.insert(id.clone()) {
                added += 1;
            }
            self.entries
                .entry(id.clone())
                .or_insert_with(|| EntryRecord::pending(now));
        }
        added
    }

    pub fn set_phase(&mut self, phase: &str, complete: bool, now: DateTime<Utc>) {
        self.phases.insert(
            phase.to_string(),
            PhaseState {
                complete,
                completed_at: complete.then_some(now),
            },
        );
    }

    /// Push entries back to pending so they can be captured again
    pub fn reset_entries<'a, I>(&mut self, ids: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = &'a EntityId>,
    {
        let mut reset = 0;
        for id in ids {
            let entry = self
                .entries
                .entry(id.clone())
                .or_insert_with(|| EntryRecord::pending(now));
            if entry.status != EntryStatus::Pending {
                reset += 1;
            }
            entry.status = EntryStatus::Pending;
            entry.captured_at = None;
            entry.size_bytes = None;
            entry.last_error = None;
            entry.updated_at = now;
        }
        reset
    }

    /// Fresh manifest that keeps only the discovery result
    pub fn superseded(&self) -> Self {
        let mut next = Self::new(self.source.clone(), self.date);
        let now = next.created_at;
        next.register_expected(self.expected_ids.iter(), now);
        next.refresh_stats();
        next
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Recompute `stats` from entries and expected ids
    pub fn refresh_stats(&mut self) {
        self.stats = self.compute_stats();
    }

    pub fn compute_stats(&self) -> ManifestStats {
        let universe: BTreeSet<&EntityId> =
            self.expected_ids.iter().chain(self.entries.keys()).collect();

        let mut stats = ManifestStats::default();
        for entry in self.entries.values() {
            if entry.status == EntryStatus::Captured {
                stats.files_stored += 1;
                stats.total_size_bytes += entry.size_bytes.unwrap_or(0);
            }
        }
        stats.files_missing = universe.len() - stats.files_stored;
        stats.completion_percentage = if universe.is_empty() {
            0.0
        } else {
            let pct = stats.files_stored as f64 / universe.len() as f64 * 100.0;
            (pct * 100.0).round() / 100.0
        };
        stats
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn status_of(&self, id: &EntityId) -> Option<EntryStatus> {
        self.entries.get(id).map(|e| e.status)
    }

    pub fn ids_with_status(&self, status: EntryStatus) -> Vec<EntityId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.status == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Expected ids that have no entry at all or are not yet captured
    pub fn outstanding(&self) -> Vec<EntityId> {
        self.expected_ids
            .iter()
            .filter(|id| self.status_of(id) != Some(EntryStatus::Captured))
            .cloned()
            .collect()
    }

    pub fn phase_complete(&self, phase: &str) -> bool {
        self.phases.get(phase).map(|p| p.complete).unwrap_or(false)
    }
}

fn captured_entry(stored: &StoredEntity, now: DateTime<Utc>) -> EntryRecord {
    EntryRecord {
        status: EntryStatus::Captured,
        captured_at: stored.captured_at.or(Some(now)),
        size_bytes: Some(stored.size_bytes),
        attempts: 1,
        last_error: None,
        updated_at: now,
    }
}
