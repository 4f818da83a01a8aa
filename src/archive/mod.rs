//! Archive Module
//!
//! Bundles a finished date directory into a single `{YYYYMMDD}.tar` of
//! gzip members and serves records back out of it.
//!
//! ## Archive Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ tar header  "1001.json.gz"                   │
//! │ gzip stream (payload of entity 1001)         │
//! ├──────────────────────────────────────────────┤
//! │ tar header  "1002.json.gz"                   │
//! │ gzip stream                                  │
//! ├──────────────────────────────────────────────┤
//! │ ...                                          │
//! ├──────────────────────────────────────────────┤
//! │ two zero blocks                              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Members are plain gzip files, so `tar -xf` + `gunzip` recovers every
//! record without this crate.
//!
//! ## Lookup Order
//! archive member → `{id}.json.gz` → `{id}.json`

mod builder;
mod cache;
mod engine;
mod reader;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;

pub use builder::ArchiveBuilder;
pub use cache::MemberCache;
pub use engine::ArchivalEngine;
pub use reader::{ArchiveReader, MemberEntry};

// =============================================================================
// Compression Result
// =============================================================================

/// Outcome class of a `compress` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStatus {
    Success,
    AlreadyCompressed,
    NoFiles,
    Error,
}

/// Summary of a `compress` call; failures are reported here, not as `Err`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionResult {
    pub status: CompressionStatus,
    pub files_compressed: usize,
    /// On-disk size of every input (loose files plus carried members)
    pub bytes_before: u64,
    /// Size of the archive written
    pub bytes_after: u64,
    /// Negative when gzip framing outweighs the savings on tiny records
    pub saved_bytes: i64,
    pub saved_pct: f64,
    pub archive_path: PathBuf,
    pub error: Option<String>,
}

impl CompressionResult {
    fn empty(status: CompressionStatus, archive_path: &Path) -> Self {
        Self {
            status,
            files_compressed: 0,
            bytes_before: 0,
            bytes_after: 0,
            saved_bytes: 0,
            saved_pct: 0.0,
            archive_path: archive_path.to_path_buf(),
            error: None,
        }
    }

    pub fn already_compressed(archive_path: &Path) -> Self {
        Self::empty(CompressionStatus::AlreadyCompressed, archive_path)
    }

    pub fn no_files(archive_path: &Path) -> Self {
        Self::empty(CompressionStatus::NoFiles, archive_path)
    }

    pub fn failed(archive_path: &Path, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(CompressionStatus::Error, archive_path)
        }
    }

    pub fn success(archive_path: &Path, files: usize, before: u64, after: u64) -> Self {
        let saved = before as i64 - after as i64;
        let pct = if before == 0 {
            0.0
        } else {
            (saved as f64 / before as f64 * 100.0 * 10.0).round() / 10.0
        };
        Self {
            status: CompressionStatus::Success,
            files_compressed: files,
            bytes_before: before,
            bytes_after: after,
            saved_bytes: saved,
            saved_pct: pct,
            archive_path: archive_path.to_path_buf(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CompressionStatus::Success
    }
}

// =============================================================================
// Member digests
// =============================================================================

/// Decompressed length and CRC32 of one member's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberDigest {
    pub len: u64,
    pub crc32: u32,
}

impl MemberDigest {
    pub fn of(payload: &[u8]) -> Self {
        Self {
            len: payload.len() as u64,
            crc32: crc32fast::hash(payload),
        }
    }
}

/// Write sink that only hashes and counts
#[derive(Default)]
struct DigestWriter {
    hasher: crc32fast::Hasher,
    len: u64,
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digest of the payload inside a gzip stream, without keeping it
pub(crate) fn digest_gzip(gz: &[u8]) -> io::Result<MemberDigest> {
    let mut sink = DigestWriter::default();
    io::copy(&mut GzDecoder::new(gz), &mut sink)?;
    Ok(MemberDigest {
        len: sink.len,
        crc32: sink.hasher.finalize(),
    })
}

pub(crate) fn gunzip(gz: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(gz.len() * 4);
    GzDecoder::new(gz).read_to_end(&mut out)?;
    Ok(out)
}
