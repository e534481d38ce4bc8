use std::collections::hash_map::Entry as MapEntry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use harvest_core::{
    percentage, Collection, CollectionRecord, IntegrityReport, RepairReport, UpsertOutcome,
};
use harvest_logging::{harvest_debug, harvest_error, harvest_info, harvest_warn};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::StoreSettings;
use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection {name} is unreadable: {source}")]
    Corrupt {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode collection {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("backend refused to save {0}")]
    Rejected(String),
    #[error("collection {0} does not exist")]
    Missing(String),
}

/// Where collections live between runs.
pub trait CollectionBackend: Send + Sync {
    /// `Ok(None)` when the collection was never saved.
    fn load(&self, name: &str) -> Result<Option<Collection>, StoreError>;
    fn save(&self, collection: &Collection) -> Result<(), StoreError>;
    /// Names of every saved collection, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Copies the saved form of `name` aside under `label`. Backends with
    /// nowhere to put such a copy return `Ok(None)`.
    fn snapshot(&self, _name: &str, _label: &str) -> Result<Option<PathBuf>, StoreError> {
        Ok(None)
    }

    /// Deletes all but the `keep` newest backup copies. Returns how many
    /// were deleted.
    fn prune_backups(&self, _keep: usize) -> Result<usize, StoreError> {
        Ok(0)
    }
}

impl<B: CollectionBackend> CollectionBackend for Arc<B> {
    fn load(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        (**self).load(name)
    }

    fn save(&self, collection: &Collection) -> Result<(), StoreError> {
        (**self).save(collection)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        (**self).list()
    }

    fn snapshot(&self, name: &str, label: &str) -> Result<Option<PathBuf>, StoreError> {
        (**self).snapshot(name, label)
    }

    fn prune_backups(&self, keep: usize) -> Result<usize, StoreError> {
        (**self).prune_backups(keep)
    }
}

/// One pretty-printed `<name>.json` per collection in a directory.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    writer: AtomicFileWriter,
    backup: bool,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>, backup: bool) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
            backup,
        }
    }

    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir().join(format!("{name}.json"))
    }
}

impl CollectionBackend for JsonFileBackend {
    fn load(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let path = self.path_for(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let collection: Collection =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                name: name.to_string(),
                source,
            })?;
        Ok(Some(collection.reindexed()))
    }

    fn save(&self, collection: &Collection) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(collection).map_err(|source| StoreError::Encode {
            name: collection.name().to_string(),
            source,
        })?;
        let filename = format!("{}.json", collection.name());
        if self.backup {
            self.writer.write_with_backup(&filename, &json)?;
        } else {
            self.writer.write(&filename, &json)?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(self.dir()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// `<name>.<label>.backup` next to the live file.
    fn snapshot(&self, name: &str, label: &str) -> Result<Option<PathBuf>, StoreError> {
        let source = self.path_for(name);
        if !source.exists() {
            return Ok(None);
        }
        let target = self.dir().join(format!("{name}.{label}.backup"));
        fs::copy(&source, &target)?;
        Ok(Some(target))
    }

    /// Every `*.backup` file in the directory counts, oldest modification
    /// time first. A file that cannot be removed is logged and skipped.
    fn prune_backups(&self, keep: usize) -> Result<usize, StoreError> {
        let entries = match fs::read_dir(self.dir()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "backup") {
                backups.push((entry.metadata()?.modified()?, path));
            }
        }
        if backups.len() <= keep {
            return Ok(0);
        }
        backups.sort();

        let excess = backups.len() - keep;
        let mut removed = 0;
        for (_, path) in backups.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    harvest_info!("Removed old backup {}", path.display());
                    removed += 1;
                }
                Err(err) => harvest_error!("Failed to remove backup {}: {}", path.display(), err),
            }
        }
        Ok(removed)
    }
}

/// Keeps encoded collections in memory. Saves can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    saved: Mutex<BTreeMap<String, String>>,
    reject_saves: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_saves(&self, reject: bool) {
        self.reject_saves.store(reject, Ordering::Relaxed);
    }

    /// Raw encoded form of a saved collection.
    pub fn raw(&self, name: &str) -> Option<String> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Stores `raw` as if a previous run had saved it.
    pub fn insert_raw(&self, name: &str, raw: impl Into<String>) {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), raw.into());
    }
}

impl CollectionBackend for MemoryBackend {
    fn load(&self, name: &str) -> Result<Option<Collection>, StoreError> {
        let Some(raw) = self.raw(name) else {
            return Ok(None);
        };
        let collection: Collection =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                name: name.to_string(),
                source,
            })?;
        Ok(Some(collection.reindexed()))
    }

    fn save(&self, collection: &Collection) -> Result<(), StoreError> {
        if self.reject_saves.load(Ordering::Relaxed) {
            return Err(StoreError::Rejected(collection.name().to_string()));
        }
        let raw = serde_json::to_string(collection).map_err(|source| StoreError::Encode {
            name: collection.name().to_string(),
            source,
        })?;
        self.insert_raw(collection.name(), raw);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}

/// Summary of one collection for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection: String,
    pub total: usize,
    pub active: usize,
    pub completion_rate: f64,
    pub status_breakdown: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Totals across every persisted collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreOverview {
    pub total_collections: usize,
    pub total_records: usize,
    pub total_active: usize,
    pub overall_completion_rate: f64,
    pub status_summary: BTreeMap<String, usize>,
    pub collections: BTreeMap<String, CollectionStats>,
    pub generated_at: DateTime<Utc>,
}

struct Slot {
    collection: Collection,
    dirty: bool,
    last_saved: Instant,
}

impl Slot {
    fn clean(collection: Collection) -> Self {
        Self {
            collection,
            dirty: false,
            last_saved: Instant::now(),
        }
    }
}

/// Loaded collections keyed by name, written back through a [`CollectionBackend`].
///
/// Once loaded, the in-memory copy is authoritative; the backend only sees
/// complete snapshots of it.
pub struct CollectionStore {
    backend: Box<dyn CollectionBackend>,
    settings: StoreSettings,
    entries: HashMap<String, Slot>,
}

impl CollectionStore {
    pub fn new(backend: Box<dyn CollectionBackend>, settings: StoreSettings) -> Self {
        Self {
            backend,
            settings,
            entries: HashMap::new(),
        }
    }

    /// Store over `<dir>/<name>.json` files.
    pub fn open_dir(dir: impl Into<PathBuf>, settings: StoreSettings) -> Self {
        let backend = JsonFileBackend::new(dir, settings.backup);
        Self::new(Box::new(backend), settings)
    }

    /// Loads `name` once; later calls return the in-memory copy.
    ///
    /// A collection that was never saved starts as an empty skeleton and is
    /// written on the next save.
    pub fn load(&mut self, name: &str) -> Result<&Collection, StoreError> {
        Ok(&self.entry(name)?.collection)
    }

    pub fn get(&self, name: &str) -> Option<&Collection> {
        self.entries.get(name).map(|entry| &entry.collection)
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|entry| entry.dirty)
    }

    /// Merges `records` into `name`, then saves it if the auto-flush
    /// interval has passed since its last save.
    pub fn upsert<I>(&mut self, name: &str, records: I) -> Result<UpsertOutcome, StoreError>
    where
        I: IntoIterator<Item = CollectionRecord>,
    {
        let now = Utc::now();
        let interval = self.settings.auto_flush_interval;
        let entry = self.entry(name)?;
        let outcome = entry.collection.upsert(records, now);
        if outcome.changed() > 0 {
            entry.collection.touch(now);
            entry.dirty = true;
        }

        let due = entry.dirty && entry.last_saved.elapsed() >= interval;
        if due {
            if let Err(err) = self.save(name) {
                harvest_error!("Auto-save of collection {} failed: {}", name, err);
            }
        }
        Ok(outcome)
    }

    /// Writes `name` if it has unsaved changes. Returns whether it was written.
    ///
    /// On failure the collection stays dirty.
    pub fn save(&mut self, name: &str) -> Result<bool, StoreError> {
        let Some(entry) = self.entries.get_mut(name) else {
            return Ok(false);
        };
        if !entry.dirty {
            return Ok(false);
        }
        self.backend.save(&entry.collection)?;
        entry.dirty = false;
        entry.last_saved = Instant::now();
        harvest_debug!(
            "Saved collection {} ({} records)",
            name,
            entry.collection.len()
        );
        Ok(true)
    }

    /// Saves every dirty collection. All are attempted; the last error is
    /// returned if any failed.
    pub fn save_all(&mut self) -> Result<usize, StoreError> {
        let mut saved = 0;
        let mut last_error = None;
        for name in self.dirty_names() {
            match self.save(&name) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => {
                    harvest_error!("Failed to save collection {}: {}", name, err);
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(saved),
        }
    }

    /// Saves dirty collections whose last save is older than the auto-flush
    /// interval. Failures are logged and retried next time.
    pub fn flush_due(&mut self) -> usize {
        let interval = self.settings.auto_flush_interval;
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.dirty && entry.last_saved.elapsed() >= interval)
            .map(|(name, _)| name.clone())
            .collect();
        let mut saved = 0;
        for name in due {
            match self.save(&name) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => harvest_error!("Auto-save of collection {} failed: {}", name, err),
            }
        }
        saved
    }

    pub fn persisted_names(&self) -> Result<Vec<String>, StoreError> {
        self.backend.list()
    }

    /// Persisted and loaded collection names, sorted.
    pub fn known_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: BTreeSet<String> = self.persisted_names()?.into_iter().collect();
        names.extend(self.entries.keys().cloned());
        Ok(names.into_iter().collect())
    }

    pub fn collection_stats(&mut self, name: &str) -> Result<CollectionStats, StoreError> {
        let collection = self.load(name)?;
        Ok(CollectionStats {
            collection: collection.name().to_string(),
            total: collection.total(),
            active: collection.processed(),
            completion_rate: collection.completion_rate(),
            status_breakdown: collection.status_breakdown(),
            created_at: collection.created_at(),
            last_updated: collection.last_updated(),
        })
    }

    /// URLs of `name`'s records, optionally only those with `status`.
    pub fn export_urls(&mut self, name: &str, status: Option<&str>) -> Result<Vec<String>, StoreError> {
        let collection = self.load(name)?;
        let urls: Vec<String> = collection.urls(status).into_iter().map(str::to_string).collect();
        harvest_info!(
            "Exported {} URLs from {} (status filter: {})",
            urls.len(),
            name,
            status.unwrap_or("all")
        );
        Ok(urls)
    }

    /// Stats for every persisted collection plus their sums. A collection
    /// that cannot be read is logged and left out.
    pub fn overview(&mut self) -> Result<StoreOverview, StoreError> {
        let mut collections = BTreeMap::new();
        let mut status_summary: BTreeMap<String, usize> = BTreeMap::new();
        for name in self.persisted_names()? {
            match self.collection_stats(&name) {
                Ok(stats) => {
                    for (status, count) in &stats.status_breakdown {
                        *status_summary.entry(status.clone()).or_insert(0) += count;
                    }
                    collections.insert(name, stats);
                }
                Err(err) => harvest_error!("Leaving {} out of the overview: {}", name, err),
            }
        }
        let total_records = collections.values().map(|stats| stats.total).sum();
        let total_active = collections.values().map(|stats| stats.active).sum();
        Ok(StoreOverview {
            total_collections: collections.len(),
            total_records,
            total_active,
            overall_completion_rate: percentage(total_active, total_records),
            status_summary,
            collections,
            generated_at: Utc::now(),
        })
    }

    /// Upserts the records of every existing collection in `sources` into
    /// `target`, then saves `target`. Returns the records added or updated.
    pub fn merge(&mut self, target: &str, sources: &[String]) -> Result<usize, StoreError> {
        self.load(target)?;
        let mut changed = 0;
        for source in sources.iter().filter(|source| source.as_str() != target) {
            let records = self.existing(source)?.records().to_vec();
            let outcome = self.upsert(target, records)?;
            harvest_info!(
                "Merged {} records from {} into {}",
                outcome.changed(),
                source,
                target
            );
            changed += outcome.changed();
        }
        self.save(target)?;
        Ok(changed)
    }

    /// Integrity of every persisted collection. Unreadable files are
    /// reported rather than raised.
    pub fn check_integrity(&mut self) -> Result<Vec<IntegrityReport>, StoreError> {
        let mut reports = Vec::new();
        for name in self.persisted_names()? {
            let report = match self.load(&name) {
                Ok(collection) => collection.integrity(),
                Err(err) => IntegrityReport::unreadable(name.as_str(), err.to_string()),
            };
            if report.issues() > 0 {
                harvest_warn!("{}: {} integrity issue(s)", name, report.issues());
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Repairs `name` and saves it at once if anything changed. With
    /// `snapshot`, the saved file is first copied aside under a timestamp.
    pub fn repair(&mut self, name: &str, snapshot: bool) -> Result<RepairReport, StoreError> {
        let now = Utc::now();
        self.existing(name)?;
        if snapshot {
            let label = now.format("%Y%m%dT%H%M%S").to_string();
            if let Some(path) = self.backend.snapshot(name, &label)? {
                harvest_info!("Kept unrepaired {} at {}", name, path.display());
            }
        }

        let slot = self.entry(name)?;
        let report = slot.collection.repair(now);
        if report.changed() {
            slot.dirty = true;
        }
        self.save(name)?;
        harvest_info!(
            "Repaired {}: {} duplicates removed, {} fields fixed, {} records left",
            name,
            report.duplicates_removed,
            report.fields_fixed,
            report.remaining
        );
        Ok(report)
    }

    /// Keeps the `keep` newest backup copies and deletes the rest.
    pub fn prune_backups(&self, keep: usize) -> Result<usize, StoreError> {
        self.backend.prune_backups(keep)
    }

    fn dirty_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Like [`load`](Self::load), but a collection that was never saved is
    /// an error instead of a fresh skeleton.
    fn existing(&mut self, name: &str) -> Result<&Collection, StoreError> {
        if !self.entries.contains_key(name) {
            let Some(collection) = self.backend.load(name)? else {
                return Err(StoreError::Missing(name.to_string()));
            };
            self.entries.insert(name.to_string(), Slot::clean(collection));
        }
        self.load(name)
    }

    fn entry(&mut self, name: &str) -> Result<&mut Slot, StoreError> {
        match self.entries.entry(name.to_string()) {
            MapEntry::Occupied(occupied) => Ok(occupied.into_mut()),
            MapEntry::Vacant(vacant) => {
                let collection = match self.backend.load(name)? {
                    Some(collection) => {
                        harvest_debug!(
                            "Loaded collection {} with {} records",
                            name,
                            collection.len()
                        );
                        Slot::clean(collection)
                    }
                    None => {
                        harvest_info!("Creating new collection {}", name);
                        Slot {
                            dirty: true,
                            ..Slot::clean(Collection::new(name, Utc::now()))
                        }
                    }
                };
                Ok(vacant.insert(collection))
            }
        }
    }
}
