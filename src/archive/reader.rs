//! Archive Reader
//!
//! Opens a date archive and serves members via an in-memory index of
//! data offsets.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::keys::EntityId;
use crate::layout::parse_member_name;

use super::{digest_gzip, gunzip, MemberDigest};

/// Where one member's gzip bytes sit inside the tar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberEntry {
    /// Byte offset of the member data from the start of the archive
    pub offset: u64,
    /// Compressed (stored) size
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

/// Reader for a date archive
///
/// The index is built with one sequential pass over the tar headers.
/// Member reads open the file, seek and read exactly `size` bytes, so a
/// reader holds no file handle and can be shared between threads.
#[derive(Debug)]
pub struct ArchiveReader {
    path: PathBuf,
    members: HashMap<EntityId, MemberEntry>,
}

impl ArchiveReader {
    /// Open an archive and index its members
    ///
    /// Entries that are not `{id}.json.gz` regular files are skipped.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let mut archive = tar::Archive::new(BufReader::new(file));

        let mut members = HashMap::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry.path()?.to_string_lossy().into_owned();
            let Some(id) = parse_member_name(&name) else {
                tracing::warn!("Ignoring foreign member {:?} in {}", name, path.display());
                continue;
            };

            let mtime = entry
                .header()
                .mtime()
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));
            members.insert(
                id,
                MemberEntry {
                    offset: entry.raw_file_position(),
                    size: entry.size(),
                    mtime,
                },
            );
        }

        tracing::debug!("Indexed {} members of {}", members.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            members,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.members.contains_key(id)
    }

    pub fn entry(&self, id: &EntityId) -> Option<&MemberEntry> {
        self.members.get(id)
    }

    /// Member ids in sorted order
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.members.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn entries(&self) -> impl Iterator<Item = (&EntityId, &MemberEntry)> {
        self.members.iter()
    }

    /// Stored gzip bytes of a member
    pub fn read_gzip(&self, id: &EntityId) -> io::Result<Option<Vec<u8>>> {
        let Some(entry) = self.members.get(id) else {
            return Ok(None);
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut gz = vec![0u8; entry.size as usize];
        file.read_exact(&mut gz)?;
        Ok(Some(gz))
    }

    /// Decompressed payload of a member
    pub fn read(&self, id: &EntityId) -> io::Result<Option<Vec<u8>>> {
        match self.read_gzip(id)? {
            Some(gz) => gunzip(&gz).map(Some),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Re-read a finished archive and check it against what was written
///
/// Checks, in one pass:
/// - every member decodes and matches its expected length and CRC32
/// - no member is unexpected or duplicated
/// - no expected member is missing (so the counts agree)
///
/// Returns the member count, or a description of the first mismatch.
pub fn verify(path: &Path, expected: &BTreeMap<String, MemberDigest>) -> Result<usize, String> {
    let file = File::open(path).map_err(|e| format!("cannot reopen archive: {}", e))?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    let entries = archive
        .entries()
        .map_err(|e| format!("cannot read archive: {}", e))?;

    let mut seen = BTreeSet::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("corrupt tar header: {}", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| format!("unreadable member name: {}", e))?
            .to_string_lossy()
            .into_owned();

        let Some(want) = expected.get(&name) else {
            return Err(format!("unexpected member {}", name));
        };
        if !seen.insert(name.clone()) {
            return Err(format!("duplicate member {}", name));
        }

        let mut gz = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut gz)
            .map_err(|e| format!("truncated member {}: {}", name, e))?;
        let got = digest_gzip(&gz).map_err(|e| format!("member {} does not decode: {}", name, e))?;
        if got != *want {
            return Err(format!(
                "member {} decodes to {} bytes (crc {:08x}), expected {} bytes (crc {:08x})",
                name, got.len, got.crc32, want.len, want.crc32
            ));
        }
    }

    if seen.len() != expected.len() {
        let missing: Vec<&String> = expected.keys().filter(|k| !seen.contains(*k)).collect();
        return Err(format!(
            "archive holds {} of {} members, missing {:?}",
            seen.len(),
            expected.len(),
            missing
        ));
    }
    Ok(seen.len())
}
