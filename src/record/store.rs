//! Record Store
//!
//! Writes and reads individual loose record files.

use std::fs;
use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{BronzeError, Result};
use crate::fsutil;
use crate::keys::{EntityId, RecordDate, Source};
use crate::layout::{Layout, Tier};

use super::Location;

/// Loose-tier record storage
///
/// Stateless apart from the layout: every call resolves its own paths, so
/// one instance can be shared freely across threads.
#[derive(Debug, Clone)]
pub struct RecordStore {
    layout: Layout,
}

impl RecordStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Store a payload atomically
    ///
    /// Steps:
    /// 1. Reject empty payloads
    /// 2. Create the date directory
    /// 3. Write + fsync a temp file beside the destination
    /// 4. Rename over `{id}.json`
    /// 5. Drop any standalone `{id}.json.gz` left from an earlier capture
    ///
    /// A `.json.gz` shadows the `.json` on lookup, so failing to remove a
    /// stale one fails the put. A crash between steps 4 and 5 leaves the
    /// previous capture visible until the put is retried.
    ///
    /// The manifest is not touched; progress is recorded separately via
    /// `mark_batch`.
    pub fn put(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
        payload: &[u8],
    ) -> Result<Location> {
        if payload.is_empty() {
            return Err(BronzeError::EmptyPayload);
        }

        let dir = self.layout.date_dir(source, date);
        fs::create_dir_all(&dir).map_err(|e| BronzeError::write(&dir, e))?;

        let path = self.layout.record_path(source, date, id);
        fsutil::write_atomic(&path, |w| w.write_all(payload))
            .map_err(|e| BronzeError::write(&path, e))?;

        let stale = self.layout.compressed_path(source, date, id);
        if fsutil::remove_if_exists(&stale).map_err(|e| BronzeError::write(&stale, e))? {
            tracing::debug!("Removed superseded {}", stale.display());
        }

        let metadata = fs::metadata(&path).map_err(|e| BronzeError::read(&path, e))?;
        tracing::debug!(
            "Stored {}/{}/{} ({} bytes)",
            source,
            date,
            id,
            metadata.len()
        );

        Ok(Location {
            path,
            tier: Tier::Loose,
            size_bytes: metadata.len(),
            captured_at: modified_at(&metadata),
        })
    }

    /// Read the uncompressed loose file, if there is one
    pub fn read_loose(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
    ) -> Result<Option<Bytes>> {
        let path = self.layout.record_path(source, date, id);
        match fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BronzeError::read(&path, e)),
        }
    }

    pub fn loose_path(&self, source: &Source, date: &RecordDate, id: &EntityId) -> PathBuf {
        self.layout.record_path(source, date, id)
    }

    pub fn loose_exists(&self, source: &Source, date: &RecordDate, id: &EntityId) -> bool {
        self.layout.record_path(source, date, id).is_file()
    }

    /// Location of the loose file, if present
    pub fn locate_loose(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
    ) -> Result<Option<Location>> {
        let path = self.layout.record_path(source, date, id);
        stat_location(path, Tier::Loose)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

/// `Location` for an existing file, `None` if it is missing
pub(crate) fn stat_location(path: PathBuf, tier: Tier) -> Result<Option<Location>> {
    match fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => Ok(Some(Location {
            captured_at: modified_at(&metadata),
            size_bytes: metadata.len(),
            path,
            tier,
        })),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BronzeError::read(&path, e)),
    }
}

pub(crate) fn modified_at(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}
