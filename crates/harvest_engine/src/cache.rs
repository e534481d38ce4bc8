use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvest_core::{CollectionProgress, OverallProgress, UrlStatus};
use harvest_logging::{harvest_debug, harvest_info, harvest_warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};
use crate::store::{CollectionStore, StoreError};

const PROCESSED_LIST: &str = "processed_urls.txt";
const STATUS_MAP: &str = "url_status_cache.json";
const PROGRESS_MAP: &str = "progress.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Free-form facts recorded with an outcome (`gift_id`, `collection`, `error`, ...).
pub type Metadata = BTreeMap<String, Value>;

/// Terminal outcome remembered for one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedUrl {
    pub status: UrlStatus,
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub processed_urls: usize,
    pub tracked_statuses: usize,
    pub status_breakdown: BTreeMap<UrlStatus, usize>,
    pub collections: usize,
    pub degraded: bool,
    pub dirty: bool,
}

/// Breakdown of cached outcomes, overall and per collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheReport {
    pub stats: CacheStats,
    pub by_collection: BTreeMap<String, BTreeMap<UrlStatus, usize>>,
    pub overall: OverallProgress,
    pub progress: BTreeMap<String, CollectionProgress>,
}

/// Durable memory of which URLs already reached a terminal outcome, so a
/// resumed run skips them.
///
/// Three files live in the cache directory: `processed_urls.txt`,
/// `url_status_cache.json` and `progress.json`. The processed set is the
/// union of the list and the status map keys.
pub struct ResumeCache {
    writer: AtomicFileWriter,
    processed: HashSet<String>,
    statuses: HashMap<String, ProcessedUrl>,
    progress: BTreeMap<String, CollectionProgress>,
    dirty: bool,
    degraded: bool,
}

impl ResumeCache {
    /// Empty cache writing to `dir`; nothing is read.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
            processed: HashSet::new(),
            statuses: HashMap::new(),
            progress: BTreeMap::new(),
            dirty: false,
            degraded: false,
        }
    }

    /// Reads whatever cache files exist in `dir`.
    ///
    /// Never fails: a missing file is a fresh start, an unreadable one is
    /// logged and treated as empty, leaving the cache degraded.
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let mut cache = Self::new(dir);
        let dir = cache.writer.dir().to_path_buf();

        match read_optional(&dir.join(PROCESSED_LIST)) {
            Ok(Some(raw)) => {
                cache.processed = raw
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            Ok(None) => {}
            Err(err) => cache.degrade(PROCESSED_LIST, &err),
        }
        match read_json::<HashMap<String, ProcessedUrl>>(&dir.join(STATUS_MAP)) {
            Ok(Some(statuses)) => cache.statuses = statuses,
            Ok(None) => {}
            Err(err) => cache.degrade(STATUS_MAP, &err),
        }
        match read_json::<BTreeMap<String, CollectionProgress>>(&dir.join(PROGRESS_MAP)) {
            Ok(Some(progress)) => cache.progress = progress,
            Ok(None) => {}
            Err(err) => cache.degrade(PROGRESS_MAP, &err),
        }

        cache.processed.extend(cache.statuses.keys().cloned());
        if cache.processed.is_empty() {
            harvest_info!("No resume state in {}; starting fresh", dir.display());
        } else {
            harvest_info!(
                "Resume cache loaded: {} processed URLs, {} with status",
                cache.processed.len(),
                cache.statuses.len()
            );
        }
        cache
    }

    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    /// Some cache file could not be read at load time.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.processed.contains(url)
    }

    pub fn status_of(&self, url: &str) -> Option<&ProcessedUrl> {
        self.statuses.get(url)
    }

    pub fn mark_processed(&mut self, url: &str, status: UrlStatus, metadata: Metadata) {
        self.mark_processed_at(url, status, metadata, Utc::now());
    }

    /// Records `status` for `url` as of `at`, replacing any earlier entry.
    pub fn mark_processed_at(
        &mut self,
        url: &str,
        status: UrlStatus,
        metadata: Metadata,
        at: DateTime<Utc>,
    ) {
        self.processed.insert(url.to_string());
        self.statuses.insert(
            url.to_string(),
            ProcessedUrl {
                status,
                processed_at: at,
                metadata,
            },
        );
        self.dirty = true;
    }

    /// URLs not yet processed, in input order.
    pub fn filter_unprocessed(&self, urls: &[String]) -> Vec<String> {
        urls.iter()
            .filter(|url| !self.processed.contains(url.as_str()))
            .cloned()
            .collect()
    }

    /// Writes all three files. Without `force` a clean cache is left alone.
    ///
    /// Returns whether anything was written. On failure the cache stays dirty.
    pub fn flush(&mut self, force: bool) -> Result<bool, CacheError> {
        if !self.dirty && !force {
            return Ok(false);
        }

        let mut urls: Vec<&str> = self.processed.iter().map(String::as_str).collect();
        urls.sort_unstable();
        let mut list = urls.join("\n");
        if !list.is_empty() {
            list.push('\n');
        }
        let statuses: BTreeMap<&String, &ProcessedUrl> = self.statuses.iter().collect();
        let statuses = serde_json::to_string_pretty(&statuses)?;
        let progress = serde_json::to_string_pretty(&self.progress)?;

        self.writer.write(PROCESSED_LIST, &list)?;
        self.writer.write(STATUS_MAP, &statuses)?;
        self.writer.write(PROGRESS_MAP, &progress)?;

        self.dirty = false;
        harvest_debug!("Resume cache flushed: {} URLs", self.processed.len());
        Ok(true)
    }

    /// Forgets outcomes recorded before `now - max_age`. URLs listed without
    /// a status carry no timestamp and are kept.
    pub fn prune_older_than(&mut self, max_age: chrono::Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - max_age;
        let stale: Vec<String> = self
            .statuses
            .iter()
            .filter(|(_, entry)| entry.processed_at < cutoff)
            .map(|(url, _)| url.clone())
            .collect();
        for url in &stale {
            self.statuses.remove(url);
            self.processed.remove(url);
        }
        if !stale.is_empty() {
            self.dirty = true;
            harvest_info!("Pruned {} cache entries older than {}", stale.len(), cutoff);
        }
        stale.len()
    }

    /// Replaces URL state with one entry per record of every collection the
    /// store knows, then writes the cache. Unreadable collections are skipped.
    ///
    /// Returns the number of distinct URLs restored. A URL listed by two
    /// collections keeps the entry of the later one.
    pub fn rebuild_from_store(&mut self, store: &mut CollectionStore) -> Result<usize, CacheError> {
        self.processed.clear();
        self.statuses.clear();
        self.dirty = true;

        let now = Utc::now();
        for name in store.known_names()? {
            let collection = match store.load(&name) {
                Ok(collection) => collection,
                Err(err) => {
                    harvest_warn!("Skipping collection {} during cache rebuild: {}", name, err);
                    continue;
                }
            };
            for record in collection.records() {
                if record.url.is_empty() {
                    continue;
                }
                let mut metadata = Metadata::new();
                metadata.insert("gift_id".into(), Value::from(record.id.as_str()));
                metadata.insert("collection".into(), Value::from(name.as_str()));
                metadata.insert("parsed_at".into(), Value::from(record.parsed_at.to_rfc3339()));
                let status = UrlStatus::from_record_status(&record.status);
                if status.as_str() != record.status {
                    metadata.insert("record_status".into(), Value::from(record.status.as_str()));
                }
                self.mark_processed_at(&record.url, status, metadata, now);
            }
        }

        let restored = self.processed.len();
        self.flush(true)?;
        harvest_info!("Resume cache rebuilt from collections: {} URLs", restored);
        Ok(restored)
    }

    pub fn update_collection_progress(
        &mut self,
        collection: &str,
        total: usize,
        processed: usize,
        success: usize,
        error: usize,
    ) {
        self.progress.insert(
            collection.to_string(),
            CollectionProgress::new(total, processed, success, error, Utc::now()),
        );
        self.dirty = true;
    }

    pub fn collection_progress(&self, collection: &str) -> Option<&CollectionProgress> {
        self.progress.get(collection)
    }

    pub fn overall_progress(&self) -> OverallProgress {
        OverallProgress::from_collections(self.progress.values())
    }

    pub fn stats(&self) -> CacheStats {
        let mut status_breakdown = BTreeMap::new();
        for entry in self.statuses.values() {
            *status_breakdown.entry(entry.status).or_insert(0) += 1;
        }
        CacheStats {
            processed_urls: self.processed.len(),
            tracked_statuses: self.statuses.len(),
            status_breakdown,
            collections: self.progress.len(),
            degraded: self.degraded,
            dirty: self.dirty,
        }
    }

    pub fn report(&self) -> CacheReport {
        let mut by_collection: BTreeMap<String, BTreeMap<UrlStatus, usize>> = BTreeMap::new();
        for entry in self.statuses.values() {
            let collection = entry
                .metadata
                .get("collection")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            *by_collection
                .entry(collection.to_string())
                .or_default()
                .entry(entry.status)
                .or_insert(0) += 1;
        }
        CacheReport {
            stats: self.stats(),
            by_collection,
            overall: self.overall_progress(),
            progress: self.progress.clone(),
        }
    }

    fn degrade(&mut self, file: &str, err: &LoadError) {
        harvest_warn!("Ignoring unreadable cache file {}: {}; starting it empty", file, err);
        self.degraded = true;
    }
}

#[derive(Debug, Error)]
enum LoadError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

fn read_optional(path: &Path) -> Result<Option<String>, LoadError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LoadError> {
    match read_optional(path)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
