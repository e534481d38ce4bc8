use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::progress::percentage;
use crate::status::UrlStatus;

/// Outcome of processing one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionResult {
    pub collection: String,
    pub total_urls: usize,
    pub skipped_urls: usize,
    pub processed_urls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub records_changed: usize,
    pub status_counts: BTreeMap<UrlStatus, usize>,
    pub duration_secs: f64,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl CollectionResult {
    pub fn new(collection: impl Into<String>, total_urls: usize, skipped_urls: usize) -> Self {
        Self {
            collection: collection.into(),
            total_urls,
            skipped_urls,
            ..Self::default()
        }
    }

    /// A collection that could not be processed at all.
    pub fn failed(collection: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn record(&mut self, status: UrlStatus) {
        self.processed_urls += 1;
        if status.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        *self.status_counts.entry(status).or_insert(0) += 1;
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Succeeded over processed, in percent.
    pub fn success_rate(&self) -> f64 {
        percentage(self.succeeded, self.processed_urls)
    }

    pub fn urls_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.processed_urls as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate of a multi-collection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_collections: usize,
    pub completed_collections: usize,
    pub failed_collections: usize,
    pub total_urls: usize,
    pub skipped_urls: usize,
    pub processed_urls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub status_counts: BTreeMap<UrlStatus, usize>,
    pub duration_secs: f64,
    pub cancelled: bool,
    pub collections: Vec<CollectionResult>,
}

impl RunSummary {
    pub fn new(total_collections: usize) -> Self {
        Self {
            total_collections,
            ..Self::default()
        }
    }

    pub fn push(&mut self, result: CollectionResult) {
        if result.is_error() {
            self.failed_collections += 1;
        } else {
            self.completed_collections += 1;
        }
        self.total_urls += result.total_urls;
        self.skipped_urls += result.skipped_urls;
        self.processed_urls += result.processed_urls;
        self.succeeded += result.succeeded;
        self.failed += result.failed;
        for (status, count) in &result.status_counts {
            *self.status_counts.entry(*status).or_insert(0) += count;
        }
        self.cancelled |= result.cancelled;
        self.collections.push(result);
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Succeeded over processed, in percent.
    pub fn success_rate(&self) -> f64 {
        percentage(self.succeeded, self.processed_urls)
    }
}
