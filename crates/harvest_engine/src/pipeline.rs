use std::fs;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use harvest_core::{
    parse_collection_names, parse_url_list, CollectionResult, ProgressSnapshot, RunSummary,
    UrlStatus,
};
use harvest_logging::{harvest_debug, harvest_error, harvest_info, harvest_warn};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheError, CacheStats, Metadata, ResumeCache};
use crate::config::EngineConfig;
use crate::extract::{Extractor, GiftPageExtractor};
use crate::fetcher::RateLimitedFetcher;
use crate::report::{LogReporter, ProgressThrottle, Reporter};
use crate::stats::FetchStatsSnapshot;
use crate::store::{CollectionStore, StoreError};
use crate::{FetchError, FetchResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot read input {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot build HTTP client: {0}")]
    Client(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Everything known at the end of a multi-collection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub fetch: FetchStatsSnapshot,
    pub cache: CacheStats,
}

/// Drives collections through fetch, extract, upsert and mark.
///
/// The pipeline owns the store and the cache and is their only writer.
pub struct Pipeline {
    config: EngineConfig,
    fetcher: RateLimitedFetcher,
    extractor: Arc<dyn Extractor>,
    reporter: Arc<dyn Reporter>,
    store: CollectionStore,
    cache: ResumeCache,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: EngineConfig,
        fetcher: RateLimitedFetcher,
        extractor: Arc<dyn Extractor>,
        store: CollectionStore,
        cache: ResumeCache,
    ) -> Self {
        Self {
            config,
            fetcher,
            extractor,
            reporter: Arc::new(LogReporter),
            store,
            cache,
            cancel: CancellationToken::new(),
        }
    }

    /// HTTP fetcher, gift page extractor, JSON collections and the resume
    /// cache, all placed under the configured output directory.
    pub fn from_config(config: EngineConfig) -> Result<Self, PipelineError> {
        let fetcher = RateLimitedFetcher::with_reqwest(config.fetch.clone())?;
        let store = CollectionStore::open_dir(config.paths.collections_dir(), config.store.clone());
        let cache = ResumeCache::load(config.paths.cache_dir());
        Ok(Self::new(
            config,
            fetcher,
            Arc::new(GiftPageExtractor),
            store,
            cache,
        ))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn fetcher(&self) -> &RateLimitedFetcher {
        &self.fetcher
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CollectionStore {
        &mut self.store
    }

    pub fn cache(&self) -> &ResumeCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResumeCache {
        &mut self.cache
    }

    /// Processes every collection named in the collection list, one after
    /// another. A failing collection is recorded and the run moves on.
    ///
    /// The store and cache are always flushed before returning.
    pub async fn process_all_collections(&mut self, resume: bool) -> Result<RunReport, PipelineError> {
        let list = self.config.paths.collection_list();
        let names = parse_collection_names(&read_input(list)?);
        harvest_info!(
            "Starting run over {} collections (resume: {})",
            names.len(),
            resume
        );

        let started = Instant::now();
        let mut summary = RunSummary::new(names.len());
        for name in &names {
            if self.cancel.is_cancelled() {
                harvest_warn!("Cancelled; not starting {} or later collections", name);
                summary.cancelled = true;
                break;
            }
            let result = match self.process_collection(name, resume).await {
                Ok(result) => result,
                Err(err) => {
                    harvest_error!("Collection {} failed: {}", name, err);
                    let result = CollectionResult::failed(name.as_str(), err.to_string());
                    self.reporter.collection_finished(&result);
                    result
                }
            };
            summary.push(result);
        }

        if let Err(err) = self.flush_all() {
            harvest_error!("Final flush failed: {}", err);
        }
        summary.set_duration(started.elapsed());

        let report = RunReport {
            summary,
            fetch: self.fetcher.stats(),
            cache: self.cache.stats(),
        };
        self.reporter.run_finished(&report);
        Ok(report)
    }

    /// Fetches and ingests the URLs listed for `name`. With `resume`, URLs the
    /// cache already holds an outcome for are skipped.
    pub async fn process_collection(
        &mut self,
        name: &str,
        resume: bool,
    ) -> Result<CollectionResult, PipelineError> {
        let started = Instant::now();
        let prefix = &self.config.pipeline.url_prefix;
        let urls = parse_url_list(&read_input(self.config.paths.url_list(name))?, prefix);
        self.store.load(name)?;

        let pending = if resume {
            self.cache.filter_unprocessed(&urls)
        } else {
            urls.clone()
        };
        let mut result = CollectionResult::new(name, urls.len(), urls.len() - pending.len());
        harvest_info!(
            "{}: {} URLs, {} already processed, {} to fetch",
            name,
            urls.len(),
            result.skipped_urls,
            pending.len()
        );

        if !pending.is_empty() {
            let estimate = self.fetcher.estimate_completion(pending.len());
            harvest_info!(
                "{}: about {:.1} min at {:.1} req/s",
                name,
                estimate.minutes(),
                estimate.requests_per_second
            );
            self.run_batches(name, &pending, &mut result, started).await?;
        }

        self.finish_collection(name, &urls);
        result.set_duration(started.elapsed());
        self.reporter.collection_finished(&result);
        Ok(result)
    }

    async fn run_batches(
        &mut self,
        name: &str,
        pending: &[String],
        result: &mut CollectionResult,
        started: Instant,
    ) -> Result<(), PipelineError> {
        let settings = &self.config.pipeline;
        let mut throttle = ProgressThrottle::new(settings.progress_interval);
        let mut since_checkpoint = 0;

        for (index, batch) in pending.chunks(settings.batch_size.max(1)).enumerate() {
            if self.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            if index > 0 && !settings.batch_settle_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        result.cancelled = true;
                        break;
                    }
                    _ = sleep(settings.batch_settle_delay) => {}
                }
            }
            harvest_debug!("{}: batch {} with {} URLs", name, index + 1, batch.len());

            let mut results = self.fetcher.fetch_stream(batch, &self.cancel);
            while let Some(fetched) = results.next().await {
                let Some(ingested) = ingest(
                    fetched,
                    name,
                    self.extractor.as_ref(),
                    &mut self.store,
                    &mut self.cache,
                )?
                else {
                    result.cancelled = true;
                    continue;
                };
                result.record(ingested.status);
                result.records_changed += ingested.changed;

                since_checkpoint += 1;
                if since_checkpoint >= settings.checkpoint_interval {
                    since_checkpoint = 0;
                    checkpoint(name, &mut self.store, &mut self.cache);
                }

                if throttle.ready() {
                    self.reporter.progress(&ProgressSnapshot::new(
                        name,
                        pending.len(),
                        result.succeeded,
                        result.failed,
                        started.elapsed(),
                        Utc::now(),
                    ));
                }
            }
            drop(results);
            self.store.flush_due();
        }
        Ok(())
    }

    fn finish_collection(&mut self, name: &str, urls: &[String]) {
        if let Err(err) = self.store.save(name) {
            harvest_error!("Saving collection {} failed: {}", name, err);
        }

        let mut processed = 0;
        let mut success = 0;
        for url in urls {
            if let Some(entry) = self.cache.status_of(url) {
                processed += 1;
                if entry.status.is_success() {
                    success += 1;
                }
            }
        }
        self.cache
            .update_collection_progress(name, urls.len(), processed, success, processed - success);

        if let Err(err) = self.cache.flush(false) {
            harvest_error!("Flushing resume cache failed: {}", err);
        }
    }

    /// Saves every dirty collection and writes the cache unconditionally.
    /// Both are attempted even if the first fails.
    pub fn flush_all(&mut self) -> Result<(), PipelineError> {
        let store = self.store.save_all();
        let cache = self.cache.flush(true);
        store?;
        cache?;
        Ok(())
    }

    /// Recreates the resume cache from the persisted collections.
    pub fn rebuild_cache(&mut self) -> Result<usize, PipelineError> {
        Ok(self.cache.rebuild_from_store(&mut self.store)?)
    }

    /// Drops cache entries older than `max_age` and writes the cache.
    pub fn prune_cache(&mut self, max_age: chrono::Duration) -> Result<usize, PipelineError> {
        let pruned = self.cache.prune_older_than(max_age, Utc::now());
        self.cache.flush(false)?;
        Ok(pruned)
    }

    pub async fn health_check(&self, url: &str) -> bool {
        self.fetcher.health_check(url).await
    }
}

struct Ingested {
    status: UrlStatus,
    changed: usize,
}

/// Applies one fetch result to the store and cache. `None` means the URL
/// was cancelled and stays unprocessed.
fn ingest(
    fetched: FetchResult,
    collection: &str,
    extractor: &dyn Extractor,
    store: &mut CollectionStore,
    cache: &mut ResumeCache,
) -> Result<Option<Ingested>, PipelineError> {
    let url = fetched.url;
    let mut metadata = Metadata::new();
    metadata.insert("collection".into(), Value::from(collection));

    let output = match fetched.outcome {
        Ok(output) => output,
        Err(err) if err.is_cancelled() => return Ok(None),
        Err(err) => {
            let status = if err.is_not_found() {
                UrlStatus::Deleted
            } else {
                UrlStatus::Error
            };
            metadata.insert("error".into(), Value::from(err.to_string()));
            cache.mark_processed(&url, status, metadata);
            return Ok(Some(Ingested { status, changed: 0 }));
        }
    };

    let extracted = catch_unwind(AssertUnwindSafe(|| extractor.extract(&output.body, &url)));
    let record = match extracted {
        Ok(Some(record)) if extractor.is_valid(&record) => record,
        Ok(Some(_)) => return Ok(Some(parse_failed(cache, &url, metadata, "invalid record"))),
        Ok(None) => return Ok(Some(parse_failed(cache, &url, metadata, "no record"))),
        Err(_) => {
            harvest_error!("Extractor panicked on {}", url);
            return Ok(Some(parse_failed(cache, &url, metadata, "extractor panicked")));
        }
    };

    metadata.insert("gift_id".into(), Value::from(record.id.as_str()));
    let outcome = store.upsert(collection, [record])?;
    cache.mark_processed(&url, UrlStatus::Active, metadata);
    Ok(Some(Ingested {
        status: UrlStatus::Active,
        changed: outcome.changed(),
    }))
}

fn parse_failed(cache: &mut ResumeCache, url: &str, mut metadata: Metadata, reason: &str) -> Ingested {
    harvest_debug!("No usable record from {}: {}", url, reason);
    metadata.insert("reason".into(), Value::from(reason));
    cache.mark_processed(url, UrlStatus::ParseFailed, metadata);
    Ingested {
        status: UrlStatus::ParseFailed,
        changed: 0,
    }
}

fn checkpoint(collection: &str, store: &mut CollectionStore, cache: &mut ResumeCache) {
    if let Err(err) = store.save(collection) {
        harvest_error!("Checkpoint save of {} failed: {}", collection, err);
    }
    if let Err(err) = cache.flush(false) {
        harvest_error!("Checkpoint flush of resume cache failed: {}", err);
    }
    harvest_debug!("Checkpoint written for {}", collection);
}

fn read_input(path: PathBuf) -> Result<String, PipelineError> {
    fs::read_to_string(&path).map_err(|source| PipelineError::Input { path, source })
}
