//! Atomic file replacement
//!
//! Every durable write in the crate goes through [`write_atomic`]:
//!
//! 1. Create a temp file (`.{name}.XXXX.tmp`) in the destination directory
//! 2. Let the caller stream the content into it
//! 3. `fsync` the temp file
//! 4. Rename it over the destination
//! 5. `fsync` the directory (unix) so the rename itself survives power loss
//!
//! An observer sees either the previous file or the complete new one. If
//! anything fails before step 4 the temp file is removed on drop and the
//! destination is untouched.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::{Builder, NamedTempFile};

/// Create a temp file next to `dest` that will be cleaned up on drop
pub fn temp_beside(dest: &Path) -> io::Result<NamedTempFile> {
    let dir = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(".tmp")
        .tempfile_in(dir)
}

/// Flush, fsync and rename a finished temp file over `dest`
pub fn commit(temp: NamedTempFile, dest: &Path) -> io::Result<()> {
    temp.as_file().sync_all()?;
    temp.persist(dest).map_err(|e| e.error)?;
    if let Some(parent) = dest.parent() {
        sync_dir(parent);
    }
    Ok(())
}

/// Write `dest` atomically with content produced by `fill`
pub fn write_atomic<F>(dest: &Path, fill: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let temp = temp_beside(dest)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        fill(&mut writer)?;
        writer.flush()?;
    }
    commit(temp, dest)
}

/// Convenience wrapper for in-memory content
pub fn write_atomic_bytes(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic(dest, |w| w.write_all(bytes))
}

/// Best-effort directory fsync; a no-op where directories cannot be opened
pub fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

/// Identity of a file on disk: length, mtime, and inode on unix
///
/// A rename over the path changes the inode even when length and mtime
/// happen to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    len: u64,
    modified: Option<SystemTime>,
    inode: u64,
}

impl FileSignature {
    pub fn of(metadata: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let inode = {
            use std::os::unix::fs::MetadataExt;
            metadata.ino()
        };
        #[cfg(not(unix))]
        let inode = 0;

        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
            inode,
        }
    }

    /// Signature of whatever is at `path` now, `None` if nothing is
    pub fn current(path: &Path) -> io::Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(m) if m.is_file() => Ok(Some(Self::of(&m))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn size(&self) -> u64 {
        self.len
    }

    /// Modification time in whole seconds since the epoch, 0 if unknown
    pub fn mtime_secs(&self) -> u64 {
        self.modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Read a whole file together with the signature of the handle it was
/// read through
pub fn read_with_signature(path: &Path) -> io::Result<(Vec<u8>, FileSignature)> {
    let mut file = File::open(path)?;
    let signature = FileSignature::of(&file.metadata()?);
    let mut data = Vec::with_capacity(signature.len as usize);
    file.read_to_end(&mut data)?;
    Ok((data, signature))
}

/// Remove `path` only if it is still the file described by `expected`
///
/// Returns `Ok(false)` when the file is gone or has been replaced.
pub fn remove_if_unchanged(path: &Path, expected: FileSignature) -> io::Result<bool> {
    match FileSignature::current(path)? {
        Some(signature) if signature == expected => remove_if_exists(path),
        Some(_) => {
            tracing::warn!(
                "{} changed since it was archived; keeping it",
                path.display()
            );
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
