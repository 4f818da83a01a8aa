//! On-disk layout
//!
//! Pure functions from record keys to paths. Nothing here touches the
//! filesystem except the directory listings at the bottom.
//!
//! ```text
//! {base}/{source}/
//!   └── {YYYYMMDD}/
//!         ├── {entity_id}.json        loose
//!         ├── {entity_id}.json.gz     loose, compressed
//!         ├── {YYYYMMDD}.tar          archive of .json.gz members
//!         ├── manifest.json
//!         ├── .manifest.lock
//!         └── .archive.lock
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::config::Config;
use crate::keys::{EntityId, RecordDate, Source};

pub const RECORD_EXT: &str = ".json";
pub const COMPRESSED_EXT: &str = ".json.gz";
pub const ARCHIVE_EXT: &str = ".tar";
pub const MANIFEST_FILENAME: &str = "manifest.json";
pub const MANIFEST_LOCK_FILENAME: &str = ".manifest.lock";
pub const ARCHIVE_LOCK_FILENAME: &str = ".archive.lock";

/// Which storage tier a record currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Archive,
    Compressed,
    Loose,
}

/// A record file found while listing a date directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LooseFile {
    pub entity_id: EntityId,
    pub path: PathBuf,
    pub tier: Tier,
}

/// Maps keys to paths for every source
#[derive(Debug, Clone)]
pub struct Layout {
    data_dir: PathBuf,
    source_dirs: HashMap<String, PathBuf>,
}

impl Layout {
    pub fn new(config: &Config) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            source_dirs: config.source_dirs.clone(),
        }
    }

    pub fn source_dir(&self, source: &Source) -> PathBuf {
        match self.source_dirs.get(source.as_str()) {
            Some(dir) => dir.clone(),
            None => self.data_dir.join(source.as_str()),
        }
    }

    pub fn date_dir(&self, source: &Source, date: &RecordDate) -> PathBuf {
        self.source_dir(source).join(date.compact())
    }

    pub fn record_path(&self, source: &Source, date: &RecordDate, id: &EntityId) -> PathBuf {
        self.date_dir(source, date)
            .join(format!("{}{}", id, RECORD_EXT))
    }

    pub fn compressed_path(&self, source: &Source, date: &RecordDate, id: &EntityId) -> PathBuf {
        self.date_dir(source, date)
            .join(format!("{}{}", id, COMPRESSED_EXT))
    }

    pub fn archive_path(&self, source: &Source, date: &RecordDate) -> PathBuf {
        self.date_dir(source, date)
            .join(format!("{}{}", date.compact(), ARCHIVE_EXT))
    }

    pub fn manifest_path(&self, source: &Source, date: &RecordDate) -> PathBuf {
        self.date_dir(source, date).join(MANIFEST_FILENAME)
    }

    pub fn manifest_lock_path(&self, source: &Source, date: &RecordDate) -> PathBuf {
        self.date_dir(source, date).join(MANIFEST_LOCK_FILENAME)
    }

    pub fn archive_lock_path(&self, source: &Source, date: &RecordDate) -> PathBuf {
        self.date_dir(source, date).join(ARCHIVE_LOCK_FILENAME)
    }

    // =========================================================================
    // Directory listings
    // =========================================================================

    /// All date directories of a source, oldest first
    pub fn list_dates(&self, source: &Source) -> io::Result<Vec<RecordDate>> {
        let dir = self.source_dir(source);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut dates = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(date) = entry
                .file_name()
                .to_str()
                .and_then(|name| RecordDate::parse(name).ok())
            {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Loose record files of one date, sorted by entity id.
    ///
    /// If an id exists both as `.json.gz` and `.json`, only the `.json.gz`
    /// is returned, the same file a tiered lookup hits.
    pub fn list_loose(&self, source: &Source, date: &RecordDate) -> io::Result<Vec<LooseFile>> {
        let dir = self.date_dir(source, date);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut found: HashMap<EntityId, LooseFile> = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((id, tier)) = parse_record_name(name) else { continue };

            let file = LooseFile {
                entity_id: id.clone(),
                path: entry.path(),
                tier,
            };
            match found.get(&id) {
                Some(existing) if existing.tier == Tier::Compressed => {}
                _ => {
                    found.insert(id, file);
                }
            }
        }

        let mut files: Vec<LooseFile> = found.into_values().collect();
        files.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(files)
    }
}

/// "123.json" → (123, Loose), "123.json.gz" → (123, Compressed)
///
/// Dot-files (temp files, locks) and the manifest never parse.
pub fn parse_record_name(name: &str) -> Option<(EntityId, Tier)> {
    if name.starts_with('.') || name == MANIFEST_FILENAME {
        return None;
    }
    let (stem, tier) = if let Some(stem) = name.strip_suffix(COMPRESSED_EXT) {
        (stem, Tier::Compressed)
    } else if let Some(stem) = name.strip_suffix(RECORD_EXT) {
        (stem, Tier::Loose)
    } else {
        return None;
    };
    EntityId::new(stem).ok().map(|id| (id, tier))
}

/// Archive member name for an entity: "{id}.json.gz"
pub fn member_name(id: &EntityId) -> String {
    format!("{}{}", id, COMPRESSED_EXT)
}

/// Inverse of [`member_name`]
pub fn parse_member_name(name: &str) -> Option<EntityId> {
    match parse_record_name(name) {
        Some((id, Tier::Compressed)) => Some(id),
        _ => None,
    }
}
