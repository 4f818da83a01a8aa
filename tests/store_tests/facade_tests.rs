//! Tests for BronzeStore
//!
//! These tests verify:
//! - Round trip of payloads before and after compression
//! - A full scrape session with partial failures
//! - Parallel compression across dates
//! - Listings and configuration handling
//! - Health checks

use std::sync::Arc;
use std::thread;

use bronze_store::{
    BronzeError, BronzeStore, CheckStatus, CompressionStatus, Config, EntityId, EntryStatus,
    HealthStatus, Outcome, RecordDate, Source, Tier,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, BronzeStore) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .lock_timeout_ms(5_000)
        .lock_poll_interval_ms(2)
        .compression_workers(3)
        .build();
    let store = BronzeStore::open(config).unwrap();
    (temp_dir, store)
}

fn id(raw: &str) -> EntityId {
    EntityId::new(raw).unwrap()
}

fn fotmob() -> Source {
    Source::new("fotmob").unwrap()
}

fn day(raw: &str) -> RecordDate {
    RecordDate::parse(raw).unwrap()
}

fn assert_send_sync<T: Send + Sync>() {}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_store_is_shareable() {
    assert_send_sync::<BronzeStore>();
}

#[test]
fn test_round_trip_survives_compression() {
    let (_dir, store) = setup_temp_store();
    let source = fotmob();
    let date = day("2024-01-15");
    let payload = br#"{"home":"Arsenal","away":"Chelsea","score":[2,1]}"#;

    store.put(&source, &date, &id("4193851"), payload).unwrap();
    assert_eq!(&store.get(&source, &date, &id("4193851")).unwrap().unwrap()[..], payload);

    assert!(store.compress(&source, &date, false).is_success());
    assert_eq!(&store.get(&source, &date, &id("4193851")).unwrap().unwrap()[..], payload);

    let location = store.locate(&source, &date, &id("4193851")).unwrap().unwrap();
    assert_eq!(location.tier, Tier::Archive);
    assert!(location.path.ends_with("20240115/20240115.tar"));
}

#[test]
fn test_both_date_formats_address_the_same_day() {
    let (_dir, store) = setup_temp_store();
    let source = fotmob();

    store.put(&source, &day("2024-01-15"), &id("1"), b"x").unwrap();
    assert!(store.exists(&source, &day("20240115"), &id("1")).unwrap());
}

// =============================================================================
// Scrape Session Tests
// =============================================================================

#[test]
fn test_session_with_partial_failures() {
    let (_dir, store) = setup_temp_store();
    let source = fotmob();
    let date = day("20240115");
    let expected: Vec<EntityId> = (0..100).map(|i| id(&format!("{}", 5000 + i))).collect();

    store.register_expected(&source, &date, &expected).unwrap();
    store.mark_phase(&source, &date, "discovery", true).unwrap();

    let mut outcomes = Vec::new();
    for (i, entity) in expected.iter().enumerate() {
        if i % 10 == 9 {
            outcomes.push(Outcome::failed(entity.clone(), "HTTP 503"));
        } else {
            let body = format!("{{\"match\":{}}}", entity);
            store.put(&source, &date, entity, body.as_bytes()).unwrap();
            outcomes.push(Outcome::new(entity.clone(), EntryStatus::Captured));
        }
    }
    let report = store.mark_batch(&source, &date, &outcomes).unwrap();
    assert_eq!(report.applied, 100);
    assert_eq!(report.stats.files_stored, 90);
    assert_eq!(report.stats.files_missing, 10);
    assert_eq!(report.stats.completion_percentage, 90.0);

    let result = store.compress(&source, &date, false);
    assert_eq!(result.status, CompressionStatus::Success);
    assert_eq!(result.files_compressed, 90);

    for (i, entity) in expected.iter().enumerate() {
        let found = store.exists(&source, &date, entity).unwrap();
        assert_eq!(found, i % 10 != 9, "{}", entity);
    }
    let sample = store.get(&source, &date, &expected[0]).unwrap().unwrap();
    assert_eq!(&sample[..], b"{\"match\":5000}");

    // the manifest still describes the session after sources are gone
    let manifest = store.get_manifest(&source, &date).unwrap();
    assert_eq!(manifest.stats.files_stored, 90);
    assert_eq!(manifest.ids_with_status(EntryStatus::Failed).len(), 10);
    assert_eq!(manifest.outstanding().len(), 10);
    assert!(manifest.phase_complete("discovery"));
    assert!(manifest.stats.total_size_bytes > 0);
}

#[test]
fn test_concurrent_scrapers_share_one_date() {
    let (_dir, store) = setup_temp_store();
    let store = Arc::new(store);
    let source = fotmob();
    let date = day("20240201");

    let handles: Vec<_> = (0..10)
        .map(|t| {
            let store = Arc::clone(&store);
            let source = source.clone();
            thread::spawn(move || {
                let mut outcomes = Vec::new();
                for i in 0..10 {
                    let entity = id(&format!("{}-{}", t, i));
                    store.put(&source, &date, &entity, b"{}").unwrap();
                    outcomes.push(Outcome::new(entity, EntryStatus::Captured));
                }
                store.mark_batch(&source, &date, &outcomes).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let manifest = store.get_manifest(&source, &date).unwrap();
    assert_eq!(manifest.stats.files_stored, 100);
    assert_eq!(manifest.stats.total_size_bytes, 200);
}

// =============================================================================
// Parallel Compression Tests
// =============================================================================

#[test]
fn test_compress_dates_in_parallel() {
    let (_dir, store) = setup_temp_store();
    let source = fotmob();
    let dates: Vec<RecordDate> = (10..16).map(|d| day(&format!("202403{}", d))).collect();

    for date in &dates {
        for i in 0..5 {
            store.put(&source, date, &id(&i.to_string()), b"{\"x\":1}").unwrap();
        }
    }
    // one date already archived
    assert!(store.compress(&source, &dates[0], false).is_success());

    let listed = store.list_dates(&source).unwrap();
    assert_eq!(listed, dates);

    let results = store.compress_dates(&source, &listed, false);
    assert_eq!(results.len(), dates.len());
    let returned: Vec<RecordDate> = results.iter().map(|(d, _)| *d).collect();
    assert_eq!(returned, dates);

    assert_eq!(results[0].1.status, CompressionStatus::AlreadyCompressed);
    for (_, result) in &results[1..] {
        assert_eq!(result.status, CompressionStatus::Success);
        assert_eq!(result.files_compressed, 5);
    }
}

#[test]
fn test_compress_default_follows_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .force_recompress(true)
        .build();
    let store = BronzeStore::open(config).unwrap();
    let source = fotmob();
    let date = day("20240420");

    store.put(&source, &date, &id("1"), b"one").unwrap();
    assert!(store.compress_default(&source, &date).is_success());
    store.put(&source, &date, &id("2"), b"two").unwrap();

    let result = store.compress_default(&source, &date);
    assert_eq!(result.status, CompressionStatus::Success);
    assert_eq!(result.files_compressed, 2);
}

#[test]
fn test_compress_dates_empty_input() {
    let (_dir, store) = setup_temp_store();
    assert!(store.compress_dates(&fotmob(), &[], false).is_empty());
}

// =============================================================================
// Listing / Config Tests
// =============================================================================

#[test]
fn test_list_dates_skips_foreign_directories() {
    let (dir, store) = setup_temp_store();
    let source = fotmob();
    store.put(&source, &day("20240102"), &id("1"), b"x").unwrap();
    store.put(&source, &day("20240101"), &id("1"), b"x").unwrap();
    std::fs::create_dir_all(dir.path().join("fotmob").join("not-a-date")).unwrap();

    assert_eq!(
        store.list_dates(&source).unwrap(),
        vec![day("20240101"), day("20240102")]
    );
    assert!(store.list_dates(&Source::new("unknown").unwrap()).unwrap().is_empty());
}

#[test]
fn test_source_directory_override() {
    let data = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(data.path())
        .source_dir("aiscore", elsewhere.path())
        .build();
    let store = BronzeStore::open(config).unwrap();
    let source = Source::new("AiScore").unwrap();

    store.put(&source, &day("20240115"), &id("1"), b"x").unwrap();
    assert!(elsewhere.path().join("20240115").join("1.json").exists());
    assert!(!data.path().join("aiscore").exists());
}

#[test]
fn test_open_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(dir.path())
        .compression_workers(0)
        .build();
    assert!(matches!(BronzeStore::open(config), Err(BronzeError::Config(_))));
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[test]
fn test_health_check_on_fresh_store() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .low_disk_thresholds(0, 0)
        .build();
    let store = BronzeStore::open(config).unwrap();

    let report = store.health_check();
    assert_eq!(report.status, HealthStatus::Healthy, "{:?}", report.checks);
    assert!(report.is_healthy());

    // the checks leave nothing that looks like a source or record
    store.put(&fotmob(), &day("20240115"), &id("1"), b"x").unwrap();
    assert_eq!(store.list_dates(&fotmob()).unwrap(), vec![day("20240115")]);
}

#[test]
fn test_health_check_reports_missing_data_dir() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("bronze");
    let config = Config::builder()
        .data_dir(&data_dir)
        .low_disk_thresholds(0, 0)
        .build();
    let store = BronzeStore::open(config).unwrap();
    std::fs::remove_dir_all(&data_dir).unwrap();

    let report = store.health_check();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    for check in ["write_permission", "directory_structure", "file_locking"] {
        assert_eq!(report.check(check).unwrap().status, CheckStatus::Error, "{}", check);
    }
    // checking must not recreate the directory
    assert!(!data_dir.exists());
}

#[test]
fn test_health_report_serializes_snake_case() {
    let (_dir, store) = setup_temp_store();
    let json = serde_json::to_value(store.health_check()).unwrap();
    let status = json["status"].as_str().unwrap();
    assert!(["healthy", "warning", "unhealthy"].contains(&status));
    assert_eq!(json["checks"].as_array().unwrap().len(), 4);
}
