//! Tests for ArchivalEngine
//!
//! These tests verify:
//! - Compressed archives hold exactly the loose inputs
//! - Compression is idempotent without `force`
//! - Failed compression leaves originals untouched
//! - Tiered lookup order (archive → .json.gz → .json), shared by compress
//! - Forced recompression merges existing members
//! - Member cache invalidation when the archive is replaced

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use bronze_store::archive::ArchiveReader;
use bronze_store::lock::FileLock;
use bronze_store::{
    BronzeStore, CompressionStatus, Config, EntityId, RecordDate, Source, Tier,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .lock_timeout_ms(2_000)
        .lock_poll_interval_ms(5)
        .build()
}

fn setup_temp_store() -> (TempDir, BronzeStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = BronzeStore::open(config_for(temp_dir.path())).unwrap();
    (temp_dir, store)
}

fn keys() -> (Source, RecordDate) {
    (
        Source::new("aiscore").unwrap(),
        RecordDate::parse("20240301").unwrap(),
    )
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn payload(i: usize) -> Vec<u8> {
    format!("{{\"match\":{},\"events\":[{}]}}", i, "1,".repeat(i % 7) + "0").into_bytes()
}

fn put_many(store: &BronzeStore, source: &Source, date: &RecordDate, n: usize) {
    for i in 0..n {
        store.put(source, date, &id(&i.to_string()), &payload(i)).unwrap();
    }
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Compression Tests
// =============================================================================

#[test]
fn test_compress_archives_every_loose_file() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();
    put_many(&store, &source, &date, 25);

    let result = store.compress(&source, &date, false);
    assert_eq!(result.status, CompressionStatus::Success, "{:?}", result.error);
    assert_eq!(result.files_compressed, 25);
    assert!(result.bytes_before > 0);
    assert!(result.bytes_after > 0);

    let reader = ArchiveReader::open(&result.archive_path).unwrap();
    assert_eq!(reader.len(), 25);
    for i in 0..25 {
        assert_eq!(reader.read(&id(&i.to_string())).unwrap().unwrap(), payload(i));
    }

    // sources deleted, bookkeeping files kept
    let names = dir_entries(&store.layout().date_dir(&source, &date));
    assert_eq!(names, vec![".archive.lock", "20240301.tar"]);
}

#[test]
fn test_compress_is_idempotent() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();
    put_many(&store, &source, &date, 5);

    let first = store.compress(&source, &date, false);
    assert!(first.is_success());
    let before = fs::read(&first.archive_path).unwrap();

    let second = store.compress(&source, &date, false);
    assert_eq!(second.status, CompressionStatus::AlreadyCompressed);
    assert_eq!(fs::read(&second.archive_path).unwrap(), before);
}

#[test]
fn test_compress_without_files() {
    let (dir, store) = setup_temp_store();
    let (source, date) = keys();

    let result = store.compress(&source, &date, false);
    assert_eq!(result.status, CompressionStatus::NoFiles);
    // no directory is created for a date that never existed
    assert!(!dir.path().join("aiscore").exists());

    // a directory holding only a manifest has nothing to compress either
    store.register_expected(&source, &date, &[id("1")]).unwrap();
    let result = store.compress(&source, &date, false);
    assert_eq!(result.status, CompressionStatus::NoFiles);
}

#[test]
fn test_keep_sources_leaves_loose_files() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();
    put_many(&store, &source, &date, 3);

    let result = store.compress_with(&source, &date, false, false);
    assert!(result.is_success());
    for i in 0..3 {
        assert!(store.layout().record_path(&source, &date, &id(&i.to_string())).exists());
    }
    let location = store.locate(&source, &date, &id("0")).unwrap().unwrap();
    assert_eq!(location.tier, Tier::Archive);
}

#[test]
fn test_failed_compression_leaves_originals() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();
    put_many(&store, &source, &date, 3);

    // an undecodable standalone .json.gz aborts the run
    let bad = store.layout().compressed_path(&source, &date, &id("broken"));
    fs::write(&bad, b"this is not gzip").unwrap();

    let result = store.compress(&source, &date, false);
    assert_eq!(result.status, CompressionStatus::Error);
    assert!(result.error.is_some());

    let date_dir = store.layout().date_dir(&source, &date);
    let names = dir_entries(&date_dir);
    assert!(!names.iter().any(|n| n.ends_with(".tar")), "{:?}", names);
    assert!(!names.iter().any(|n| n.ends_with(".tmp")), "{:?}", names);
    for i in 0..3 {
        assert!(store.layout().record_path(&source, &date, &id(&i.to_string())).exists());
    }
    assert!(bad.exists());
}

#[test]
fn test_archive_lock_timeout_reports_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .lock_timeout_ms(100)
        .build();
    let store = BronzeStore::open(config).unwrap();
    let (source, date) = keys();
    put_many(&store, &source, &date, 2);

    let lock_path = store.layout().archive_lock_path(&source, &date);
    let _held =
        FileLock::acquire(&lock_path, Duration::from_secs(1), Duration::from_millis(5)).unwrap();

    let result = store.compress(&source, &date, false);
    assert_eq!(result.status, CompressionStatus::Error);
    let message = result.error.unwrap();
    assert!(message.contains(".archive.lock"), "{}", message);
    assert!(!message.contains("manifest"), "{}", message);
    assert!(store.layout().record_path(&source, &date, &id("0")).exists());
}

// =============================================================================
// Tiered Lookup Tests
// =============================================================================

#[test]
fn test_lookup_prefers_compressed_over_loose() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();

    store.put(&source, &date, &id("1"), b"loose").unwrap();
    let gz = store.layout().compressed_path(&source, &date, &id("1"));
    fs::write(&gz, gzip(b"compressed")).unwrap();

    assert_eq!(&store.get(&source, &date, &id("1")).unwrap().unwrap()[..], b"compressed");
    let location = store.locate(&source, &date, &id("1")).unwrap().unwrap();
    assert_eq!(location.tier, Tier::Compressed);
    let listed = store.list_entities(&source, &date).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].tier, Tier::Compressed);
}

#[test]
fn test_both_loose_copies_round_trip_through_compress() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();

    // what a crash between put's rename and its stale-gz removal leaves
    let json = store.layout().record_path(&source, &date, &id("1"));
    let gz = store.layout().compressed_path(&source, &date, &id("1"));
    fs::create_dir_all(json.parent().unwrap()).unwrap();
    fs::write(&gz, gzip(b"old")).unwrap();
    fs::write(&json, b"new").unwrap();

    let before = store.get(&source, &date, &id("1")).unwrap().unwrap();
    let result = store.compress(&source, &date, false);
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.files_compressed, 1);
    let after = store.get(&source, &date, &id("1")).unwrap().unwrap();

    assert_eq!(before, after);
    assert!(!gz.exists());
    assert!(!json.exists());
}

#[test]
fn test_compressed_only_record_is_found() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();

    let gz = store.layout().compressed_path(&source, &date, &id("7"));
    fs::create_dir_all(gz.parent().unwrap()).unwrap();
    fs::write(&gz, gzip(b"{\"seven\":7}")).unwrap();

    assert!(store.exists(&source, &date, &id("7")).unwrap());
    assert_eq!(&store.get(&source, &date, &id("7")).unwrap().unwrap()[..], b"{\"seven\":7}");

    // and it is archived as-is
    let result = store.compress(&source, &date, false);
    assert!(result.is_success());
    assert_eq!(&store.get(&source, &date, &id("7")).unwrap().unwrap()[..], b"{\"seven\":7}");
    assert!(!gz.exists());
}

#[test]
fn test_archive_shadows_later_rescrape_until_forced() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();

    store.put(&source, &date, &id("1"), b"old").unwrap();
    store.put(&source, &date, &id("2"), b"two").unwrap();
    assert!(store.compress(&source, &date, false).is_success());

    store.put(&source, &date, &id("1"), b"new").unwrap();
    assert_eq!(&store.get(&source, &date, &id("1")).unwrap().unwrap()[..], b"old");

    let result = store.compress(&source, &date, true);
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.files_compressed, 2);
    assert_eq!(&store.get(&source, &date, &id("1")).unwrap().unwrap()[..], b"new");
    assert_eq!(&store.get(&source, &date, &id("2")).unwrap().unwrap()[..], b"two");
}

#[test]
fn test_forced_recompression_merges_members() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();

    put_many(&store, &source, &date, 3);
    assert!(store.compress(&source, &date, false).is_success());

    store.put(&source, &date, &id("late"), b"arrived late").unwrap();
    let result = store.compress(&source, &date, true);
    assert!(result.is_success());
    assert_eq!(result.files_compressed, 4);

    let reader = ArchiveReader::open(&result.archive_path).unwrap();
    assert_eq!(reader.len(), 4);
    assert!(reader.contains(&id("late")));
}

#[test]
fn test_forced_without_new_files_is_noop() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();
    put_many(&store, &source, &date, 2);
    assert!(store.compress(&source, &date, false).is_success());

    let result = store.compress(&source, &date, true);
    assert_eq!(result.status, CompressionStatus::AlreadyCompressed);
}

#[test]
fn test_missing_everywhere() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();
    put_many(&store, &source, &date, 2);
    assert!(store.compress(&source, &date, false).is_success());

    let ghost = id("ghost");
    assert!(store.get(&source, &date, &ghost).unwrap().is_none());
    assert!(!store.exists(&source, &date, &ghost).unwrap());
    assert!(store.locate(&source, &date, &ghost).unwrap().is_none());
}

// =============================================================================
// Cache Tests
// =============================================================================

#[test]
fn test_cache_notices_archive_replaced_elsewhere() {
    let temp_dir = TempDir::new().unwrap();
    let reader_store = BronzeStore::open(config_for(temp_dir.path())).unwrap();
    let writer_store = BronzeStore::open(config_for(temp_dir.path())).unwrap();
    let (source, date) = keys();

    put_many(&writer_store, &source, &date, 2);
    assert!(writer_store.compress(&source, &date, false).is_success());

    // warm the reader's cache
    assert!(reader_store.exists(&source, &date, &id("0")).unwrap());
    assert!(!reader_store.exists(&source, &date, &id("extra")).unwrap());
    assert_eq!(reader_store.archives().cache().len(), 1);

    writer_store.put(&source, &date, &id("extra"), b"added").unwrap();
    assert!(writer_store.compress(&source, &date, true).is_success());

    assert!(reader_store.exists(&source, &date, &id("extra")).unwrap());
    assert_eq!(
        &reader_store.get(&source, &date, &id("extra")).unwrap().unwrap()[..],
        b"added"
    );
}

// =============================================================================
// Inventory Tests
// =============================================================================

#[test]
fn test_list_entities_spans_tiers() {
    let (_dir, store) = setup_temp_store();
    let (source, date) = keys();

    put_many(&store, &source, &date, 2);
    assert!(store.compress(&source, &date, false).is_success());
    store.put(&source, &date, &id("loose"), b"x").unwrap();

    let listed = store.list_entities(&source, &date).unwrap();
    let tiers: Vec<(String, Tier)> = listed
        .iter()
        .map(|s| (s.entity_id.to_string(), s.tier))
        .collect();
    assert_eq!(
        tiers,
        vec![
            ("0".to_string(), Tier::Archive),
            ("1".to_string(), Tier::Archive),
            ("loose".to_string(), Tier::Loose),
        ]
    );
}
