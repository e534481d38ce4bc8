use std::time::Duration;

use harvest_core::{CollectionResult, RunSummary, UrlStatus};

#[test]
fn collection_result_counts_by_status() {
    let mut result = CollectionResult::new("swords", 5, 0);
    for status in [
        UrlStatus::Active,
        UrlStatus::Active,
        UrlStatus::Deleted,
        UrlStatus::Error,
        UrlStatus::Active,
    ] {
        result.record(status);
    }
    result.set_duration(Duration::from_secs(2));

    assert_eq!(result.processed_urls, 5);
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 2);
    assert_eq!(result.status_counts[&UrlStatus::Active], 3);
    assert_eq!(result.success_rate(), 60.0);
    assert_eq!(result.urls_per_second(), 2.5);
}

#[test]
fn run_summary_aggregates_and_counts_failed_collections() {
    let mut ok = CollectionResult::new("a", 2, 1);
    ok.record(UrlStatus::Active);
    let broken = CollectionResult::failed("b", "url list missing");

    let mut summary = RunSummary::new(2);
    summary.push(ok);
    summary.push(broken);

    assert_eq!(summary.completed_collections, 1);
    assert_eq!(summary.failed_collections, 1);
    assert_eq!(summary.total_urls, 2);
    assert_eq!(summary.skipped_urls, 1);
    assert_eq!(summary.processed_urls, 1);
    assert_eq!(summary.status_counts[&UrlStatus::Active], 1);
    assert_eq!(summary.collections.len(), 2);
}
