//! Raw Record Store Module
//!
//! Durable, atomic read/write of one payload per `(source, date, entity_id)`.
//!
//! ## Responsibilities
//! - Validate keys before any path is built
//! - Write payloads through temp-file + rename
//! - Read the uncompressed loose tier
//!
//! Compressed and archived tiers are resolved by the archival engine; the
//! storage facade composes the two.

mod store;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::layout::Tier;

pub use store::RecordStore;
pub(crate) use store::{modified_at, stat_location};

/// Where a record lives on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    /// File holding the record (the archive itself for archived records)
    pub path: PathBuf,
    pub tier: Tier,
    /// Bytes on disk: raw size for loose files, compressed size otherwise
    pub size_bytes: u64,
    /// Modification time of the record (or of its archive member)
    pub captured_at: Option<DateTime<Utc>>,
}
