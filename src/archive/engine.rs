//! Archival Engine
//!
//! Compresses a date directory into a verified archive and performs
//! tiered lookups across all three storage tiers.
//!
//! ## Compression Flow
//! ```text
//! lock .archive.lock
//!   │
//!   ├─ archive exists, !force ───────────────► already_compressed
//!   ├─ no loose files ───────────────────────► no_files
//!   ▼
//! gzip members → temp tar ─► verify ─✗─► drop temp ─► error
//!                              │
//!                              ✓
//!                              ▼
//!                rename over {date}.tar ─► invalidate cache
//!                              │
//!                              ▼
//!                   delete loose inputs (if configured)
//! ```
//!
//! Among the loose tiers a `.json.gz` shadows a `.json` of the same id,
//! both on lookup and when choosing what to archive. Inputs are deleted
//! only while they still match the signature they had when read, so a
//! re-scrape that lands mid-compression survives.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;

use crate::config::Config;
use crate::error::{BronzeError, Result};
use crate::fsutil::{self, FileSignature};
use crate::keys::{EntityId, RecordDate, Source};
use crate::layout::{Layout, LooseFile, Tier};
use crate::lock::{FileLock, LockError};
use crate::manifest::{DateInventory, StoredEntity};
use crate::record::{modified_at, stat_location, Location};

use super::builder::ArchiveBuilder;
use super::cache::MemberCache;
use super::reader::{self, ArchiveReader};
use super::{gunzip, CompressionResult};

/// Builds archives and resolves records across tiers
pub struct ArchivalEngine {
    layout: Layout,
    cache: MemberCache,
    level: Compression,
    delete_sources: bool,
    lock_timeout: Duration,
    lock_poll: Duration,
}

impl ArchivalEngine {
    pub fn new(config: &Config, layout: Layout) -> Self {
        Self {
            layout,
            cache: MemberCache::new(),
            level: Compression::new(config.compression_level),
            delete_sources: config.delete_sources_after_verify,
            lock_timeout: config.lock_timeout(),
            lock_poll: config.lock_poll_interval(),
        }
    }

    pub fn cache(&self) -> &MemberCache {
        &self.cache
    }

    // =========================================================================
    // Compression
    // =========================================================================

    /// Bundle the loose files of one date into `{date}.tar`
    ///
    /// Never fails: every error is reported through the result's status.
    pub fn compress(&self, source: &Source, date: &RecordDate, force: bool) -> CompressionResult {
        self.compress_with(source, date, force, self.delete_sources)
    }

    /// [`compress`](Self::compress) with an explicit delete-after-verify choice
    pub fn compress_with(
        &self,
        source: &Source,
        date: &RecordDate,
        force: bool,
        delete_sources: bool,
    ) -> CompressionResult {
        let archive_path = self.layout.archive_path(source, date);
        match self.try_compress(source, date, force, delete_sources) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("{}/{}: compression failed: {}", source, date, e);
                CompressionResult::failed(&archive_path, e.to_string())
            }
        }
    }

    fn try_compress(
        &self,
        source: &Source,
        date: &RecordDate,
        force: bool,
        delete_sources: bool,
    ) -> Result<CompressionResult> {
        let dir = self.layout.date_dir(source, date);
        let archive_path = self.layout.archive_path(source, date);
        if !dir.is_dir() {
            return Ok(CompressionResult::no_files(&archive_path));
        }

        let _lock = self.lock(source, date)?;

        let archive_exists = archive_path.is_file();
        if archive_exists && !force {
            tracing::debug!("{}/{}: already compressed", source, date);
            return Ok(CompressionResult::already_compressed(&archive_path));
        }

        let loose = self
            .layout
            .list_loose(source, date)
            .map_err(|e| BronzeError::read(&dir, e))?;
        if loose.is_empty() {
            if archive_exists {
                return Ok(CompressionResult::already_compressed(&archive_path));
            }
            return Ok(CompressionResult::no_files(&archive_path));
        }

        let mut builder = ArchiveBuilder::create(&archive_path, self.level)
            .map_err(|e| BronzeError::write(&archive_path, e))?;
        let mut bytes_before = 0u64;

        let mut inputs = Vec::with_capacity(loose.len());
        for file in loose {
            let (input, data) = self.read_input(source, date, file)?;
            bytes_before += data.len() as u64;
            let mtime = input.signature.mtime_secs();
            let added = match input.file.tier {
                Tier::Compressed => builder.add_gzip(&input.file.entity_id, &data, mtime),
                _ => builder.add_raw(&input.file.entity_id, &data, mtime),
            };
            added.map_err(|e| BronzeError::write(&archive_path, e))?;
            inputs.push(input);
        }

        let carried = if archive_exists {
            self.carry_members(&archive_path, &inputs, &mut builder, &mut bytes_before)?
        } else {
            0
        };

        let files = builder.member_count();
        let (temp, expected) = builder
            .finish()
            .map_err(|e| BronzeError::write(&archive_path, e))?;

        if let Err(reason) = reader::verify(temp.path(), &expected) {
            // temp is removed on drop; loose files stay
            return Err(BronzeError::ArchiveVerification {
                path: archive_path,
                reason,
            });
        }

        fsutil::commit(temp, &archive_path).map_err(|e| BronzeError::write(&archive_path, e))?;
        self.cache.invalidate(&archive_path);

        let bytes_after = fs::metadata(&archive_path)
            .map(|m| m.len())
            .map_err(|e| BronzeError::read(&archive_path, e))?;

        if delete_sources {
            self.delete_inputs(&inputs);
        }

        let result = CompressionResult::success(&archive_path, files, bytes_before, bytes_after);
        tracing::info!(
            "{}/{}: archived {} records ({} carried over), {} -> {} bytes ({:.1}% saved)",
            source,
            date,
            files,
            carried,
            bytes_before,
            bytes_after,
            result.saved_pct
        );
        Ok(result)
    }

    /// Copy members of the existing archive that no loose file supersedes
    fn carry_members(
        &self,
        archive_path: &Path,
        inputs: &[ArchivedInput],
        builder: &mut ArchiveBuilder,
        bytes_before: &mut u64,
    ) -> Result<usize> {
        let existing =
            ArchiveReader::open(archive_path).map_err(|e| BronzeError::read(archive_path, e))?;

        let mut carried = 0;
        for id in existing.ids() {
            if inputs.iter().any(|input| input.file.entity_id == id) {
                continue;
            }
            let Some(entry) = existing.entry(&id).copied() else {
                continue;
            };
            let gz = existing
                .read_gzip(&id)
                .map_err(|e| BronzeError::read(archive_path, e))?
                .unwrap_or_default();
            let mtime = entry.mtime.map(|t| t.timestamp().max(0) as u64).unwrap_or(0);
            builder
                .add_gzip(&id, &gz, mtime)
                .map_err(|e| BronzeError::read(archive_path, e))?;
            *bytes_before += entry.size;
            carried += 1;
        }
        Ok(carried)
    }

    /// Read one loose input and remember what it looked like
    fn read_input(
        &self,
        source: &Source,
        date: &RecordDate,
        file: LooseFile,
    ) -> Result<(ArchivedInput, Vec<u8>)> {
        let (data, signature) =
            fsutil::read_with_signature(&file.path).map_err(|e| BronzeError::read(&file.path, e))?;

        let shadowed = if file.tier == Tier::Compressed {
            let json = self.layout.record_path(source, date, &file.entity_id);
            FileSignature::current(&json)
                .map_err(|e| BronzeError::read(&json, e))?
                .map(|sig| (json, sig))
        } else {
            None
        };

        Ok((
            ArchivedInput {
                file,
                signature,
                shadowed,
            },
            data,
        ))
    }

    fn delete_inputs(&self, inputs: &[ArchivedInput]) {
        let mut removed = 0;
        let mut kept = 0;
        for input in inputs {
            match fsutil::remove_if_unchanged(&input.file.path, input.signature) {
                Ok(true) => removed += 1,
                Ok(false) => kept += 1,
                Err(e) => {
                    kept += 1;
                    tracing::warn!("Could not delete {}: {}", input.file.path.display(), e);
                }
            }
            if let Some((path, signature)) = &input.shadowed {
                if let Err(e) = fsutil::remove_if_unchanged(path, *signature) {
                    tracing::warn!("Could not delete {}: {}", path.display(), e);
                }
            }
        }
        tracing::debug!("Deleted {} archived source files, kept {}", removed, kept);
    }

    fn lock(&self, source: &Source, date: &RecordDate) -> Result<FileLock> {
        let path = self.layout.archive_lock_path(source, date);
        FileLock::acquire(&path, self.lock_timeout, self.lock_poll).map_err(|e| match e {
            LockError::Timeout { path, waited } => BronzeError::LockTimeout {
                path,
                waited_ms: waited.as_millis() as u64,
            },
            LockError::Io(cause) => BronzeError::write(&path, cause),
        })
    }

    // =========================================================================
    // Tiered lookup
    // =========================================================================

    /// Payload of a record from whichever tier holds it
    pub fn get(&self, source: &Source, date: &RecordDate, id: &EntityId) -> Result<Option<Bytes>> {
        let archive_path = self.layout.archive_path(source, date);
        if let Some(archive) = self.archive(&archive_path)? {
            if let Some(payload) = archive
                .read(id)
                .map_err(|e| BronzeError::read(&archive_path, e))?
            {
                return Ok(Some(Bytes::from(payload)));
            }
        }

        let gz_path = self.layout.compressed_path(source, date, id);
        if let Some(gz) = read_optional(&gz_path)? {
            let payload = gunzip(&gz).map_err(|e| BronzeError::read(&gz_path, e))?;
            return Ok(Some(Bytes::from(payload)));
        }

        let path = self.layout.record_path(source, date, id);
        Ok(read_optional(&path)?.map(Bytes::from))
    }

    pub fn exists(&self, source: &Source, date: &RecordDate, id: &EntityId) -> Result<bool> {
        let archive_path = self.layout.archive_path(source, date);
        if let Some(archive) = self.archive(&archive_path)? {
            if archive.contains(id) {
                return Ok(true);
            }
        }
        Ok(self.layout.compressed_path(source, date, id).is_file()
            || self.layout.record_path(source, date, id).is_file())
    }

    pub fn locate(
        &self,
        source: &Source,
        date: &RecordDate,
        id: &EntityId,
    ) -> Result<Option<Location>> {
        let archive_path = self.layout.archive_path(source, date);
        if let Some(archive) = self.archive(&archive_path)? {
            if let Some(entry) = archive.entry(id) {
                return Ok(Some(Location {
                    path: archive_path,
                    tier: Tier::Archive,
                    size_bytes: entry.size,
                    captured_at: entry.mtime,
                }));
            }
        }

        if let Some(location) =
            stat_location(self.layout.compressed_path(source, date, id), Tier::Compressed)?
        {
            return Ok(Some(location));
        }
        stat_location(self.layout.record_path(source, date, id), Tier::Loose)
    }

    /// Every entity stored for a date, sorted by id
    ///
    /// Where an id is in several tiers the one a lookup would hit is
    /// reported.
    pub fn list(&self, source: &Source, date: &RecordDate) -> Result<Vec<StoredEntity>> {
        let dir = self.layout.date_dir(source, date);
        let mut found: BTreeMap<EntityId, StoredEntity> = BTreeMap::new();

        let loose = self
            .layout
            .list_loose(source, date)
            .map_err(|e| BronzeError::read(&dir, e))?;
        for hit in loose {
            let metadata = match fs::metadata(&hit.path) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BronzeError::read(&hit.path, e)),
            };
            found.insert(
                hit.entity_id.clone(),
                StoredEntity {
                    entity_id: hit.entity_id,
                    tier: hit.tier,
                    size_bytes: metadata.len(),
                    captured_at: modified_at(&metadata),
                },
            );
        }

        let archive_path = self.layout.archive_path(source, date);
        if let Some(archive) = self.archive(&archive_path)? {
            for (id, entry) in archive.entries() {
                found.insert(
                    id.clone(),
                    StoredEntity {
                        entity_id: id.clone(),
                        tier: Tier::Archive,
                        size_bytes: entry.size,
                        captured_at: entry.mtime,
                    },
                );
            }
        }

        Ok(found.into_values().collect())
    }

    fn archive(&self, path: &Path) -> Result<Option<std::sync::Arc<ArchiveReader>>> {
        self.cache
            .reader(path)
            .map_err(|e| BronzeError::read(path, e))
    }
}

impl DateInventory for ArchivalEngine {
    fn inventory(&self, source: &Source, date: &RecordDate) -> Result<Vec<StoredEntity>> {
        self.list(source, date)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BronzeError::read(path, e)),
    }
}

/// A loose file as it was when its bytes went into the archive
struct ArchivedInput {
    file: LooseFile,
    signature: FileSignature,
    /// `.json` hidden behind this `.json.gz`, as seen at read time
    shadowed: Option<(PathBuf, FileSignature)>,
}
