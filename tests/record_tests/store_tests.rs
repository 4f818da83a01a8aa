//! Tests for RecordStore
//!
//! These tests verify:
//! - Put/read round trip of opaque payloads
//! - Validation before any path is built
//! - Last write wins across re-scrapes and tiers
//! - Crash safety: no temp file is ever read as a record

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use bronze_store::layout::Layout;
use bronze_store::record::RecordStore;
use bronze_store::{BronzeError, Config, EntityId, RecordDate, Source, Tier};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_records() -> (TempDir, RecordStore) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    (temp_dir, RecordStore::new(Layout::new(&config)))
}

fn keys() -> (Source, RecordDate) {
    (
        Source::new("fotmob").unwrap(),
        RecordDate::parse("2024-01-15").unwrap(),
    )
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn tmp_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tmp"))
        .collect()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_put_then_read_is_byte_identical() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();
    let payload = b"{\"id\": 1001,  \"note\": \"whitespace is kept\"}\n";

    let location = records.put(&source, &date, &id("1001"), payload).unwrap();
    assert_eq!(location.tier, Tier::Loose);
    assert_eq!(location.size_bytes, payload.len() as u64);
    assert!(location.captured_at.is_some());
    assert!(location.path.ends_with("fotmob/20240115/1001.json"));

    let read = records.read_loose(&source, &date, &id("1001")).unwrap().unwrap();
    assert_eq!(&read[..], &payload[..]);
}

#[test]
fn test_binary_payload_is_stored_verbatim() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();
    let payload: Vec<u8> = (0..=255u8).collect();

    records.put(&source, &date, &id("bin"), &payload).unwrap();
    let read = records.read_loose(&source, &date, &id("bin")).unwrap().unwrap();
    assert_eq!(read.to_vec(), payload);
}

#[test]
fn test_missing_record_is_none() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();

    assert!(records.read_loose(&source, &date, &id("nope")).unwrap().is_none());
    assert!(records.locate_loose(&source, &date, &id("nope")).unwrap().is_none());
    assert!(!records.loose_exists(&source, &date, &id("nope")));
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_empty_payload_rejected_without_touching_disk() {
    let (dir, records) = setup_temp_records();
    let (source, date) = keys();

    let err = records.put(&source, &date, &id("1"), b"").unwrap_err();
    assert!(matches!(err, BronzeError::EmptyPayload));
    assert!(err.is_validation());
    assert!(!dir.path().join("fotmob").exists());
}

#[test]
fn test_unsafe_ids_never_reach_a_path() {
    for bad in ["../escape", "a/b", ".manifest.lock", ""] {
        let err = EntityId::new(bad).unwrap_err();
        assert!(matches!(err, BronzeError::InvalidEntityId(_)), "{:?}", bad);
    }
}

#[test]
fn test_manifest_name_is_not_a_record_id() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();

    for reserved in ["manifest", "MANIFEST"] {
        let err = reserved.parse::<EntityId>().unwrap_err();
        assert!(matches!(err, BronzeError::InvalidEntityId(_)), "{:?}", reserved);
    }

    // neighbours of the reserved name still get their own files
    let location = records.put(&source, &date, &id("manifest-2"), b"{}").unwrap();
    assert!(location.path.ends_with("20240115/manifest-2.json"));
    assert!(!records.layout().manifest_path(&source, &date).exists());
}

// =============================================================================
// Overwrite Tests
// =============================================================================

#[test]
fn test_rescrape_overwrites() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();

    records.put(&source, &date, &id("1"), b"first").unwrap();
    records.put(&source, &date, &id("1"), b"second version").unwrap();

    let read = records.read_loose(&source, &date, &id("1")).unwrap().unwrap();
    assert_eq!(&read[..], b"second version");
}

#[test]
fn test_put_removes_stale_compressed_copy() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();

    records.put(&source, &date, &id("1"), b"v1").unwrap();
    let gz = records.layout().compressed_path(&source, &date, &id("1"));
    fs::write(&gz, b"old gzip bytes").unwrap();

    records.put(&source, &date, &id("1"), b"v2").unwrap();
    assert!(!gz.exists());
}

// =============================================================================
// Crash Safety Tests
// =============================================================================

#[test]
fn test_no_temp_files_left_after_put() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();

    for i in 0..20 {
        records
            .put(&source, &date, &id(&i.to_string()), b"payload")
            .unwrap();
    }
    let date_dir = records.layout().date_dir(&source, &date);
    assert!(tmp_files(&date_dir).is_empty());
}

#[test]
fn test_interrupted_write_is_invisible() {
    let (_dir, records) = setup_temp_records();
    let (source, date) = keys();

    records.put(&source, &date, &id("1"), b"committed").unwrap();

    // A writer killed between write and rename leaves only its temp file
    let date_dir = records.layout().date_dir(&source, &date);
    fs::write(date_dir.join(".1.json.a8Xk2.tmp"), b"{\"half\": ").unwrap();
    fs::write(date_dir.join(".2.json.Zq91p.tmp"), b"{\"half\": ").unwrap();

    let read = records.read_loose(&source, &date, &id("1")).unwrap().unwrap();
    assert_eq!(&read[..], b"committed");
    assert!(records.read_loose(&source, &date, &id("2")).unwrap().is_none());

    let listed = records.layout().list_loose(&source, &date).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].entity_id, id("1"));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_puts_to_distinct_ids() {
    let (_dir, records) = setup_temp_records();
    let records = Arc::new(records);
    let (source, date) = keys();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let records = Arc::clone(&records);
            let (source, date) = (source.clone(), date);
            thread::spawn(move || {
                for i in 0..25 {
                    let payload = format!("{{\"thread\":{},\"i\":{}}}", t, i);
                    records
                        .put(&source, &date, &id(&format!("{}-{}", t, i)), payload.as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let listed = records.layout().list_loose(&source, &date).unwrap();
    assert_eq!(listed.len(), 200);
}
