//! Member Cache
//!
//! Keeps one indexed [`ArchiveReader`] per archive path so repeated
//! lookups against the same date cost a single `stat`.
//!
//! ## Invalidation
//! Each entry remembers the signature (length, mtime, and inode on unix)
//! the archive had when it was indexed. A lookup whose `stat` disagrees
//! re-indexes, so an archive replaced by another process is picked up
//! without any explicit signal.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::fsutil::FileSignature;

use super::ArchiveReader;

struct CachedArchive {
    signature: FileSignature,
    reader: Arc<ArchiveReader>,
}

/// Process-wide archive index cache
///
/// ## Concurrency:
/// - Hits only take the read lock
/// - Indexing happens outside the lock; the write lock is held just to
///   swap the entry in
#[derive(Default)]
pub struct MemberCache {
    archives: RwLock<HashMap<PathBuf, CachedArchive>>,
}

impl MemberCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexed reader for the archive at `path`, or `None` if there is no
    /// archive
    pub fn reader(&self, path: &Path) -> io::Result<Option<Arc<ArchiveReader>>> {
        let metadata = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.invalidate(path);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let signature = FileSignature::of(&metadata);

        if let Some(cached) = self.archives.read().get(path) {
            if cached.signature == signature {
                return Ok(Some(Arc::clone(&cached.reader)));
            }
        }

        let reader = Arc::new(ArchiveReader::open(path)?);
        tracing::debug!(
            "Cached index for {} ({} members)",
            path.display(),
            reader.len()
        );
        self.archives.write().insert(
            path.to_path_buf(),
            CachedArchive {
                signature,
                reader: Arc::clone(&reader),
            },
        );
        Ok(Some(reader))
    }

    /// Forget the cached index for `path`
    pub fn invalidate(&self, path: &Path) {
        if self.archives.write().remove(path).is_some() {
            tracing::debug!("Invalidated cached index for {}", path.display());
        }
    }

    pub fn len(&self) -> usize {
        self.archives.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.read().is_empty()
    }

    pub fn clear(&self) {
        self.archives.write().clear();
    }
}
