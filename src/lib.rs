//! # bronze-store
//!
//! Durable storage for raw scraped records (the "bronze layer") with:
//! - Atomic temp-file + rename writes, so no partial record survives a crash
//! - A per-date manifest serialized by an advisory lock (no lost updates)
//! - Verified tar/gzip archival that deletes originals only after checking
//! - Transparent reads across loose, compressed and archived tiers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        BronzeStore                           │
//! │            put · get · mark_batch · compress · ...           │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        │                      │                      │
//!        ▼                      ▼                      ▼
//! ┌─────────────┐       ┌───────────────┐      ┌───────────────┐
//! │ RecordStore │       │ManifestManager│◄─────│ ArchivalEngine│
//! │   (loose)   │       │ (.manifest.   │ scan │ (tar + gzip,  │
//! └──────┬──────┘       │   lock)       │      │  MemberCache) │
//!        │              └───────┬───────┘      └───────┬───────┘
//!        └──────────────┬───────┴──────────────────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │ fsutil · lock   │
//!              │ layout · keys   │
//!              └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use bronze_store::{BronzeStore, Config, EntityId, Outcome, RecordDate, Source};
//!
//! # fn main() -> bronze_store::Result<()> {
//! let store = BronzeStore::open(Config::builder().data_dir("./bronze").build())?;
//! let source = Source::new("fotmob")?;
//! let date = RecordDate::parse("2024-01-15")?;
//! let id = EntityId::new("4193851")?;
//!
//! let location = store.put(&source, &date, &id, br#"{"home":2,"away":1}"#)?;
//! store.mark_batch(&source, &date, &[Outcome::captured(id.clone(), location.size_bytes)])?;
//!
//! let result = store.compress(&source, &date, false);
//! assert!(store.get(&source, &date, &id)?.is_some());
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod keys;
pub mod layout;
pub mod fsutil;
pub mod lock;

pub mod record;
pub mod manifest;
pub mod archive;
pub mod health;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BronzeError, Result};
pub use config::Config;
pub use keys::{EntityId, RecordDate, Source};
pub use layout::Tier;
pub use record::Location;
pub use manifest::{BatchReport, EntryStatus, Manifest, ManifestStats, Outcome, StoredEntity};
pub use archive::{CompressionResult, CompressionStatus};
pub use health::{CheckStatus, HealthReport, HealthStatus};
pub use store::BronzeStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of bronze-store
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
