//! Archive Builder
//!
//! Writes gzip members into a temp tar beside the final archive path.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::fsutil;
use crate::keys::EntityId;
use crate::layout::member_name;

use super::{digest_gzip, MemberDigest};

/// Builder for a new date archive
///
/// Nothing is visible at the destination until the caller verifies the
/// finished temp file and commits it with [`fsutil::commit`]. Dropping the
/// builder (or the returned temp file) removes the partial archive.
pub struct ArchiveBuilder {
    temp: NamedTempFile,
    tar: tar::Builder<BufWriter<File>>,
    level: Compression,
    /// member name → digest of the payload it must decode to
    expected: BTreeMap<String, MemberDigest>,
}

impl ArchiveBuilder {
    /// Start a temp archive next to `dest`
    pub fn create(dest: &Path, level: Compression) -> io::Result<Self> {
        let temp = fsutil::temp_beside(dest)?;
        let handle = temp.as_file().try_clone()?;
        let tar = tar::Builder::new(BufWriter::new(handle));

        Ok(Self {
            temp,
            tar,
            level,
            expected: BTreeMap::new(),
        })
    }

    /// Gzip an uncompressed payload and append it
    pub fn add_raw(&mut self, id: &EntityId, payload: &[u8], mtime: u64) -> io::Result<()> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 4), self.level);
        encoder.write_all(payload)?;
        let gz = encoder.finish()?;

        self.append(id, &gz, MemberDigest::of(payload), mtime)
    }

    /// Append an existing gzip stream as-is
    ///
    /// The stream is decoded once to learn the digest it must verify
    /// against; a stream that does not decode is refused here.
    pub fn add_gzip(&mut self, id: &EntityId, gz: &[u8], mtime: u64) -> io::Result<()> {
        let digest = digest_gzip(gz).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a valid gzip stream: {}", member_name(id), e),
            )
        })?;
        self.append(id, gz, digest, mtime)
    }

    pub fn member_count(&self) -> usize {
        self.expected.len()
    }

    /// Write the end-of-archive marker and flush
    ///
    /// Returns the temp file (still uncommitted) and what every member must
    /// decode to.
    pub fn finish(self) -> io::Result<(NamedTempFile, BTreeMap<String, MemberDigest>)> {
        let writer = self.tar.into_inner()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        Ok((self.temp, self.expected))
    }

    fn append(&mut self, id: &EntityId, gz: &[u8], digest: MemberDigest, mtime: u64) -> io::Result<()> {
        let name = member_name(id);
        if self.expected.contains_key(&name) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("duplicate archive member {}", name),
            ));
        }

        let mut header = tar::Header::new_gnu();
        header.set_size(gz.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        self.tar.append_data(&mut header, &name, gz)?;

        self.expected.insert(name, digest);
        Ok(())
    }
}
