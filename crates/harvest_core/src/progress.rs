use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `part / whole` in percent, `0.0` when `whole` is zero.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Point-in-time view of a running collection, handed to reporters.
///
/// `completion_rate` is measured against `total`, `success_rate` against
/// `processed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub collection: String,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub error: usize,
    pub completion_rate: f64,
    pub success_rate: f64,
    pub urls_per_second: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(
        collection: impl Into<String>,
        total: usize,
        success: usize,
        error: usize,
        elapsed: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let processed = success + error;
        let secs = elapsed.as_secs_f64();
        Self {
            collection: collection.into(),
            total,
            processed,
            success,
            error,
            completion_rate: percentage(processed, total),
            success_rate: percentage(success, processed),
            urls_per_second: if secs > 0.0 { processed as f64 / secs } else { 0.0 },
            timestamp,
        }
    }
}

/// Per-collection summary persisted by the resume cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionProgress {
    pub total_urls: usize,
    pub processed_urls: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub completion_rate: f64,
    pub success_rate: f64,
    pub last_updated: DateTime<Utc>,
}

impl CollectionProgress {
    pub fn new(
        total_urls: usize,
        processed_urls: usize,
        success_count: usize,
        error_count: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            total_urls,
            processed_urls,
            success_count,
            error_count,
            completion_rate: percentage(processed_urls, total_urls),
            success_rate: percentage(success_count, processed_urls),
            last_updated: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completion_rate >= 100.0
    }
}

/// Aggregate of every tracked collection's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallProgress {
    pub total_collections: usize,
    pub completed_collections: usize,
    pub total_urls: usize,
    pub processed_urls: usize,
    pub overall_completion_rate: f64,
}

impl OverallProgress {
    pub fn from_collections<'a, I>(progress: I) -> Self
    where
        I: IntoIterator<Item = &'a CollectionProgress>,
    {
        let mut overall = OverallProgress::default();
        for entry in progress {
            overall.total_collections += 1;
            overall.total_urls += entry.total_urls;
            overall.processed_urls += entry.processed_urls;
            if entry.is_complete() {
                overall.completed_collections += 1;
            }
        }
        overall.overall_completion_rate = percentage(overall.processed_urls, overall.total_urls);
        overall
    }
}
