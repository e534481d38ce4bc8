use std::fs;
use std::time::Duration;

use chrono::Utc;
use harvest_core::{CollectionRecord, UrlStatus};
use harvest_engine::{CollectionStore, Metadata, ResumeCache, StoreSettings};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tempfile::TempDir;

fn meta(collection: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("collection".into(), Value::from(collection));
    metadata
}

fn settings() -> StoreSettings {
    StoreSettings {
        backup: false,
        auto_flush_interval: Duration::from_secs(3600),
    }
}

#[test]
fn missing_directory_is_a_fresh_start() {
    let temp = TempDir::new().unwrap();
    let cache = ResumeCache::load(temp.path().join("cache"));
    assert!(cache.is_empty());
    assert!(!cache.is_degraded());
    assert!(!cache.is_dirty());
}

#[test]
fn flushed_state_is_loaded_back() {
    let temp = TempDir::new().unwrap();
    let mut cache = ResumeCache::load(temp.path());
    cache.mark_processed("https://t.me/nft/pepe-1", UrlStatus::Active, meta("pepe"));
    cache.mark_processed("https://t.me/nft/pepe-2", UrlStatus::Deleted, meta("pepe"));
    cache.update_collection_progress("pepe", 4, 2, 1, 1);
    assert!(cache.flush(false).unwrap());
    assert!(!cache.is_dirty());

    let listed = fs::read_to_string(temp.path().join("processed_urls.txt")).unwrap();
    assert_eq!(listed, "https://t.me/nft/pepe-1\nhttps://t.me/nft/pepe-2\n");

    let reloaded = ResumeCache::load(temp.path());
    assert!(!reloaded.is_degraded());
    assert_eq!(reloaded.len(), 2);
    assert_eq!(
        reloaded.status_of("https://t.me/nft/pepe-2").unwrap().status,
        UrlStatus::Deleted
    );
    let progress = reloaded.collection_progress("pepe").unwrap();
    assert_eq!(progress.total_urls, 4);
    assert_eq!(progress.completion_rate, 50.0);
    assert_eq!(reloaded.overall_progress().total_collections, 1);
}

#[test]
fn corrupt_status_map_degrades_instead_of_failing() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("url_status_cache.json"), "{\"trunc").unwrap();
    fs::write(temp.path().join("processed_urls.txt"), "https://t.me/nft/a-1\n").unwrap();

    let mut cache = ResumeCache::load(temp.path());
    assert!(cache.is_degraded());
    assert!(cache.is_processed("https://t.me/nft/a-1"));
    assert!(cache.status_of("https://t.me/nft/a-1").is_none());

    cache.mark_processed("https://t.me/nft/a-2", UrlStatus::Error, meta("a"));
    cache.flush(false).unwrap();
    let repaired = ResumeCache::load(temp.path());
    assert!(!repaired.is_degraded());
    assert_eq!(repaired.len(), 2);
}

#[test]
fn processed_set_is_union_of_list_and_status_map() {
    let temp = TempDir::new().unwrap();
    let mut cache = ResumeCache::load(temp.path());
    cache.mark_processed("https://t.me/nft/a-1", UrlStatus::Active, meta("a"));
    cache.flush(true).unwrap();
    fs::write(temp.path().join("processed_urls.txt"), "https://t.me/nft/a-9\n").unwrap();

    let reloaded = ResumeCache::load(temp.path());
    assert!(reloaded.is_processed("https://t.me/nft/a-1"));
    assert!(reloaded.is_processed("https://t.me/nft/a-9"));
}

#[test]
fn prune_drops_only_old_entries() {
    let temp = TempDir::new().unwrap();
    let mut cache = ResumeCache::new(temp.path());
    let now = Utc::now();
    cache.mark_processed_at("old", UrlStatus::Error, meta("a"), now - chrono::Duration::days(10));
    cache.mark_processed_at("new", UrlStatus::Active, meta("a"), now - chrono::Duration::hours(1));

    let pruned = cache.prune_older_than(chrono::Duration::days(7), now);

    assert_eq!(pruned, 1);
    assert!(!cache.is_processed("old"));
    assert!(cache.status_of("old").is_none());
    assert!(cache.is_processed("new"));
}

#[test]
fn failed_flush_keeps_the_cache_dirty() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("cache");
    fs::write(&blocker, "a file where the directory should be").unwrap();

    let mut cache = ResumeCache::new(&blocker);
    cache.mark_processed("u", UrlStatus::Active, meta("a"));
    assert!(cache.flush(false).is_err());
    assert!(cache.is_dirty());
}

#[test]
fn rebuild_restores_every_persisted_record() {
    let temp = TempDir::new().unwrap();
    let collections = temp.path().join("collections");
    let cache_dir = temp.path().join("cache");
    {
        let mut store = CollectionStore::open_dir(&collections, settings());
        let now = Utc::now();
        store
            .upsert(
                "pepe",
                [
                    CollectionRecord::new("pepe-1", "https://t.me/nft/pepe-1", "active", now),
                    CollectionRecord::new("pepe-2", "https://t.me/nft/pepe-2", "deleted", now),
                ],
            )
            .unwrap();
        store
            .upsert(
                "cap",
                [CollectionRecord::new("cap-1", "https://t.me/nft/cap-1", "private", now)],
            )
            .unwrap();
        store.save_all().unwrap();
    }
    fs::write(collections.join("broken.json"), "[").unwrap();

    let mut store = CollectionStore::open_dir(&collections, settings());
    let mut cache = ResumeCache::load(&cache_dir);
    let restored = cache.rebuild_from_store(&mut store).unwrap();

    assert_eq!(restored, 3);
    assert!(!cache.is_dirty());
    let reloaded = ResumeCache::load(&cache_dir);
    assert_eq!(reloaded.len(), 3);

    let active = reloaded.status_of("https://t.me/nft/pepe-1").unwrap();
    assert_eq!(active.status, UrlStatus::Active);
    assert_eq!(active.metadata["gift_id"], "pepe-1");
    assert_eq!(active.metadata["collection"], "pepe");
    assert!(active.metadata.contains_key("parsed_at"));

    assert_eq!(
        reloaded.status_of("https://t.me/nft/pepe-2").unwrap().status,
        UrlStatus::Deleted
    );
    let private = reloaded.status_of("https://t.me/nft/cap-1").unwrap();
    assert_eq!(private.status, UrlStatus::Active);
    assert_eq!(private.metadata["record_status"], "private");
}

#[test]
fn rebuild_counts_shared_urls_once() {
    let temp = TempDir::new().unwrap();
    let mut store = CollectionStore::open_dir(temp.path().join("collections"), settings());
    let now = Utc::now();
    let shared = "https://t.me/nft/pepe-1";
    store
        .upsert("a", [CollectionRecord::new("pepe-1", shared, "active", now)])
        .unwrap();
    store
        .upsert("b", [CollectionRecord::new("pepe-1", shared, "deleted", now)])
        .unwrap();
    store.save_all().unwrap();

    let mut cache = ResumeCache::new(temp.path().join("cache"));
    let restored = cache.rebuild_from_store(&mut store).unwrap();

    assert_eq!(restored, 1);
    assert_eq!(cache.len(), 1);
    let entry = cache.status_of(shared).unwrap();
    assert_eq!(entry.status, UrlStatus::Deleted);
    assert_eq!(entry.metadata["collection"], "b");
}

#[test]
fn report_groups_statuses_by_collection() {
    let temp = TempDir::new().unwrap();
    let mut cache = ResumeCache::new(temp.path());
    cache.mark_processed("a1", UrlStatus::Active, meta("a"));
    cache.mark_processed("a2", UrlStatus::Error, meta("a"));
    cache.mark_processed("b1", UrlStatus::Active, meta("b"));

    let report = cache.report();
    assert_eq!(report.stats.processed_urls, 3);
    assert_eq!(report.stats.status_breakdown[&UrlStatus::Active], 2);
    assert_eq!(report.by_collection["a"][&UrlStatus::Error], 1);
    assert_eq!(report.by_collection["b"].len(), 1);
}
