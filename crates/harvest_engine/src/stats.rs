use std::sync::atomic::{AtomicU64, Ordering};

use harvest_core::percentage;
use serde::Serialize;

/// Counters updated by every fetch attempt.
#[derive(Debug, Default)]
pub struct FetchStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    not_found: AtomicU64,
    http_errors: AtomicU64,
    other_errors: AtomicU64,
    short_circuited: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FetchStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub not_found: u64,
    pub http_errors: u64,
    pub other_errors: u64,
    pub short_circuited: u64,
}

impl FetchStatsSnapshot {
    /// Successful over all issued requests (attempts), in percent.
    pub fn success_rate(&self) -> f64 {
        percentage(
            self.successful_requests as usize,
            self.total_requests as usize,
        )
    }
}

/// Expected time to fetch `remaining` URLs at `requests_per_second`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompletionEstimate {
    pub remaining: usize,
    pub requests_per_second: f64,
    pub seconds: f64,
}

impl CompletionEstimate {
    /// A non-positive rate is treated as one request per second.
    pub fn at_rate(remaining: usize, requests_per_second: f64) -> Self {
        let rate = if requests_per_second > 0.0 {
            requests_per_second
        } else {
            1.0
        };
        Self {
            remaining,
            requests_per_second: rate,
            seconds: remaining as f64 / rate,
        }
    }

    pub fn minutes(&self) -> f64 {
        self.seconds / 60.0
    }

    pub fn hours(&self) -> f64 {
        self.seconds / 3600.0
    }
}

impl FetchStats {
    pub(crate) fn request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn short_circuit(&self) {
        self.short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failure(&self, kind: &crate::FailureKind) {
        use crate::FailureKind;
        match kind {
            FailureKind::HttpStatus(404) => {
                self.not_found.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::HttpStatus(_) => {
                self.http_errors.fetch_add(1, Ordering::Relaxed);
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::Timeout => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
            FailureKind::Cancelled => {}
            _ => {
                self.other_errors.fetch_add(1, Ordering::Relaxed);
                self.failed_requests.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successful_requests,
            &self.failed_requests,
            &self.retries,
            &self.timeouts,
            &self.not_found,
            &self.http_errors,
            &self.other_errors,
            &self.short_circuited,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
