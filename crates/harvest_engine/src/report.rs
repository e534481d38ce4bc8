use std::sync::mpsc::Sender;
use std::time::Duration;

use harvest_core::{CollectionResult, ProgressSnapshot};
use harvest_logging::harvest_info;
use tokio::time::Instant;

use crate::pipeline::RunReport;

/// Observer of a running pipeline. Calls must return quickly and never fail
/// the run.
pub trait Reporter: Send + Sync {
    fn progress(&self, snapshot: &ProgressSnapshot);

    fn collection_finished(&self, _result: &CollectionResult) {}

    fn run_finished(&self, _report: &RunReport) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    Progress(ProgressSnapshot),
    CollectionFinished(CollectionResult),
    RunFinished(Box<RunReport>),
}

/// Forwards every event over a channel; a closed receiver is ignored.
pub struct ChannelReporter {
    tx: Sender<ReportEvent>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<ReportEvent>) -> Self {
        Self { tx }
    }
}

impl Reporter for ChannelReporter {
    fn progress(&self, snapshot: &ProgressSnapshot) {
        let _ = self.tx.send(ReportEvent::Progress(snapshot.clone()));
    }

    fn collection_finished(&self, result: &CollectionResult) {
        let _ = self.tx.send(ReportEvent::CollectionFinished(result.clone()));
    }

    fn run_finished(&self, report: &RunReport) {
        let _ = self.tx.send(ReportEvent::RunFinished(Box::new(report.clone())));
    }
}

/// Writes one log line per event.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn progress(&self, s: &ProgressSnapshot) {
        harvest_info!(
            "{}: {}/{} ({:.1}%), ok {} / failed {}, {:.1} urls/s",
            s.collection,
            s.processed,
            s.total,
            s.completion_rate,
            s.success,
            s.error,
            s.urls_per_second
        );
    }

    fn collection_finished(&self, r: &CollectionResult) {
        match &r.error {
            Some(err) => harvest_info!("{}: aborted: {}", r.collection, err),
            None => harvest_info!(
                "{}: {} processed, {} ok, {} failed, {} skipped, {} records changed in {:.1}s{}",
                r.collection,
                r.processed_urls,
                r.succeeded,
                r.failed,
                r.skipped_urls,
                r.records_changed,
                r.duration_secs,
                if r.cancelled { " (cancelled)" } else { "" }
            ),
        }
    }

    fn run_finished(&self, report: &RunReport) {
        let s = &report.summary;
        harvest_info!(
            "Run finished: {}/{} collections, {} URLs processed ({:.1}% ok), {} skipped, {} requests, {} retries in {:.1}s",
            s.completed_collections,
            s.total_collections,
            s.processed_urls,
            s.success_rate(),
            s.skipped_urls,
            report.fetch.total_requests,
            report.fetch.retries,
            s.duration_secs
        );
    }
}

#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn progress(&self, _snapshot: &ProgressSnapshot) {}
}

/// Lets progress through at most once per `interval`.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True on the first call and whenever `interval` has passed since the
    /// last `true`.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
