use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use harvest_core::CollectionRecord;
use harvest_engine::{CollectionStore, StoreError, StoreSettings};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn record(id: &str, status: &str) -> CollectionRecord {
    CollectionRecord::new(id, format!("https://t.me/nft/{id}"), status, Utc::now())
}

fn settings() -> StoreSettings {
    StoreSettings {
        backup: false,
        auto_flush_interval: Duration::from_secs(3600),
    }
}

fn seed(dir: &Path, name: &str, records: Vec<CollectionRecord>) {
    let mut store = CollectionStore::open_dir(dir, settings());
    store.upsert(name, records).unwrap();
    store.save_all().unwrap();
}

const LOOSE: &str = r#"{
  "collection_name": "loose",
  "total_gifts": 4,
  "processed_gifts": 4,
  "created_at": "2024-01-01T00:00:00Z",
  "last_updated": "2024-01-01T00:00:00Z",
  "gifts": [
    {"gift_id": "l-1", "url": "https://t.me/nft/l-1", "status": "active", "parsed_at": "2024-01-01T00:00:00Z"},
    {"gift_id": "l-1", "url": "https://t.me/nft/l-1", "status": "active", "parsed_at": "2024-01-01T00:00:00Z"},
    {"gift_id": "l-2", "url": "https://t.me/nft/l-2"},
    {"url": "https://t.me/nft/l-3", "status": "active", "parsed_at": "2024-01-01T00:00:00Z"}
  ]
}"#;

#[test]
fn merge_folds_sources_into_target() {
    let temp = TempDir::new().unwrap();
    seed(temp.path(), "a", vec![record("pepe-1", "active"), record("pepe-2", "active")]);
    seed(temp.path(), "b", vec![record("pepe-2", "deleted"), record("pepe-3", "active")]);

    let mut store = CollectionStore::open_dir(temp.path(), settings());
    let changed = store.merge("a", &["b".to_string(), "a".to_string()]).unwrap();
    assert_eq!(changed, 2);
    assert!(!store.is_dirty("a"));

    let mut reopened = CollectionStore::open_dir(temp.path(), settings());
    let merged = reopened.load("a").unwrap();
    assert_eq!(merged.len(), 3);
    let moved = merged.get("pepe-2").unwrap();
    assert_eq!(moved.status, "deleted");
    assert_eq!(moved.previous_status.as_deref(), Some("active"));
    assert_eq!(reopened.load("b").unwrap().len(), 2);
}

#[test]
fn merge_from_unknown_collection_is_refused() {
    let temp = TempDir::new().unwrap();
    seed(temp.path(), "a", vec![record("pepe-1", "active")]);

    let mut store = CollectionStore::open_dir(temp.path(), settings());
    let err = store.merge("a", &["ghost".to_string()]).unwrap_err();
    assert!(matches!(err, StoreError::Missing(name) if name == "ghost"));
    assert!(!temp.path().join("ghost.json").exists());
}

#[test]
fn integrity_check_covers_every_saved_collection() {
    let temp = TempDir::new().unwrap();
    seed(temp.path(), "clean", vec![record("c-1", "active")]);
    fs::write(temp.path().join("loose.json"), LOOSE).unwrap();
    fs::write(temp.path().join("torn.json"), "{\"gifts\": [").unwrap();

    let mut store = CollectionStore::open_dir(temp.path(), settings());
    let reports = store.check_integrity().unwrap();
    let names: Vec<&str> = reports.iter().map(|r| r.collection.as_str()).collect();
    assert_eq!(names, vec!["clean", "loose", "torn"]);

    assert_eq!(reports[0].issues(), 0);
    assert_eq!(reports[1].duplicate_ids, 1);
    assert_eq!(reports[1].missing_fields, 2);
    assert!(reports[2].error.is_some());
    assert_eq!(reports[2].issues(), 1);
}

#[test]
fn repair_keeps_a_snapshot_and_saves_the_fixed_collection() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("loose.json"), LOOSE).unwrap();

    let mut store = CollectionStore::open_dir(temp.path(), settings());
    let report = store.repair("loose", true).unwrap();
    assert_eq!(report.original, 4);
    assert_eq!(report.duplicates_removed, 2);
    assert_eq!(report.fields_fixed, 2);
    assert_eq!(report.remaining, 2);

    let snapshots: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("loose.") && name.ends_with(".backup"))
        .collect();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(
        fs::read_to_string(temp.path().join(&snapshots[0])).unwrap(),
        LOOSE
    );

    let mut reopened = CollectionStore::open_dir(temp.path(), settings());
    let fixed = reopened.load("loose").unwrap();
    assert_eq!(fixed.total(), 2);
    assert_eq!(fixed.get("l-2").unwrap().status, "active");
    assert!(fixed.get("l-2").unwrap().has_parse_time());
    assert!(reopened.check_integrity().unwrap().iter().all(|r| r.issues() == 0));
}

#[test]
fn repair_of_unknown_collection_is_refused() {
    let temp = TempDir::new().unwrap();
    let mut store = CollectionStore::open_dir(temp.path(), settings());
    assert!(matches!(
        store.repair("ghost", false),
        Err(StoreError::Missing(_))
    ));
}

#[test]
fn overview_sums_every_collection() {
    let temp = TempDir::new().unwrap();
    seed(temp.path(), "a", vec![record("a-1", "active"), record("a-2", "deleted")]);
    seed(temp.path(), "b", vec![record("b-1", "active"), record("b-2", "active")]);
    fs::write(temp.path().join("torn.json"), "{").unwrap();

    let mut store = CollectionStore::open_dir(temp.path(), settings());
    let overview = store.overview().unwrap();

    assert_eq!(overview.total_collections, 2);
    assert_eq!(overview.total_records, 4);
    assert_eq!(overview.total_active, 3);
    assert!((overview.overall_completion_rate - 75.0).abs() < 1e-9);
    assert_eq!(overview.status_summary.get("active"), Some(&3));
    assert_eq!(overview.status_summary.get("deleted"), Some(&1));
    assert_eq!(overview.collections["b"].total, 2);
}

#[test]
fn prune_backups_keeps_the_newest_copies() {
    let temp = TempDir::new().unwrap();
    let base = SystemTime::now() - Duration::from_secs(3600);
    for (i, name) in ["a.json.backup", "b.json.backup", "c.json.backup", "d.json.backup"]
        .iter()
        .enumerate()
    {
        let path = temp.path().join(name);
        fs::write(&path, "{}").unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(base + Duration::from_secs(60 * i as u64))
            .unwrap();
    }
    fs::write(temp.path().join("a.json"), "{}").unwrap();

    let store = CollectionStore::open_dir(temp.path(), settings());
    assert_eq!(store.prune_backups(2).unwrap(), 2);

    let mut left: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    left.sort();
    assert_eq!(left, vec!["a.json", "c.json.backup", "d.json.backup"]);
    assert_eq!(store.prune_backups(2).unwrap(), 0);
}
