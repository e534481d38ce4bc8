use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progress::percentage;
use crate::record::CollectionRecord;

/// Counts produced by a single [`Collection::upsert`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records rejected because they carried no id.
    pub skipped: usize,
}

impl UpsertOutcome {
    pub fn changed(&self) -> usize {
        self.added + self.updated
    }
}

/// Problems found in one collection without modifying it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub collection: String,
    pub records: usize,
    /// Entries whose id repeated an earlier entry in the file.
    pub duplicate_ids: usize,
    /// Records with a blank `gift_id`, `url` or `status`.
    pub missing_fields: usize,
    /// Set when the collection could not be read at all.
    pub error: Option<String>,
}

impl IntegrityReport {
    pub fn unreadable(collection: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn issues(&self) -> usize {
        self.duplicate_ids + self.missing_fields + usize::from(self.error.is_some())
    }
}

/// What [`Collection::repair`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub original: usize,
    pub duplicates_removed: usize,
    pub fields_fixed: usize,
    pub remaining: usize,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.duplicates_removed > 0 || self.fields_fixed > 0
    }
}

/// A named, deduplicated set of records in append order.
///
/// The serialized shape is the collection file format:
/// `{collection_name, total_gifts, processed_gifts, created_at, last_updated, gifts}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    collection_name: String,
    total_gifts: usize,
    processed_gifts: usize,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    gifts: Vec<CollectionRecord>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    duplicates_on_load: usize,
}

impl Collection {
    /// Empty skeleton for a collection that has never been persisted.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            collection_name: name.into(),
            total_gifts: 0,
            processed_gifts: 0,
            created_at: now,
            last_updated: now,
            gifts: Vec::new(),
            index: HashMap::new(),
            duplicates_on_load: 0,
        }
    }

    /// Rebuilds the id index after deserialization.
    ///
    /// A file written by hand or by an older tool may repeat an id; the later
    /// entry wins and keeps the position of the first occurrence. The number
    /// of merged entries is kept for [`Collection::integrity`]. Records
    /// without an id stay in place but are not indexed.
    pub fn reindexed(mut self) -> Self {
        let mut index = HashMap::with_capacity(self.gifts.len());
        let mut unique: Vec<CollectionRecord> = Vec::with_capacity(self.gifts.len());
        let mut duplicates = 0;
        for record in self.gifts.drain(..) {
            if record.id.trim().is_empty() {
                unique.push(record);
                continue;
            }
            match index.get(&record.id) {
                Some(&pos) => {
                    unique[pos] = record;
                    duplicates += 1;
                }
                None => {
                    index.insert(record.id.clone(), unique.len());
                    unique.push(record);
                }
            }
        }
        self.gifts = unique;
        self.index = index;
        self.duplicates_on_load = duplicates;
        self.recompute_counters();
        self
    }

    pub fn name(&self) -> &str {
        &self.collection_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }

    pub fn total(&self) -> usize {
        self.total_gifts
    }

    /// Records whose status is `active`.
    pub fn processed(&self) -> usize {
        self.processed_gifts
    }

    pub fn len(&self) -> usize {
        self.gifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gifts.is_empty()
    }

    pub fn records(&self) -> &[CollectionRecord] {
        &self.gifts
    }

    pub fn get(&self, id: &str) -> Option<&CollectionRecord> {
        self.index.get(id).map(|&pos| &self.gifts[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Merges incoming records by id.
    ///
    /// Unseen ids are appended. A seen id is replaced only when its content
    /// differs; the replacement gets `updated_at = now` and inherits the stored
    /// status as `previous_status`. Identical records are left untouched.
    pub fn upsert<I>(&mut self, records: I, now: DateTime<Utc>) -> UpsertOutcome
    where
        I: IntoIterator<Item = CollectionRecord>,
    {
        let mut outcome = UpsertOutcome::default();
        for mut record in records {
            if record.id.trim().is_empty() {
                outcome.skipped += 1;
                continue;
            }
            match self.index.get(&record.id) {
                Some(&pos) => {
                    let existing = &self.gifts[pos];
                    if existing.same_content(&record) {
                        outcome.unchanged += 1;
                        continue;
                    }
                    record.updated_at = Some(now);
                    record.previous_status = Some(existing.status.clone());
                    self.gifts[pos] = record;
                    outcome.updated += 1;
                }
                None => {
                    self.index.insert(record.id.clone(), self.gifts.len());
                    self.gifts.push(record);
                    outcome.added += 1;
                }
            }
        }
        self.recompute_counters();
        outcome
    }

    pub fn recompute_counters(&mut self) {
        self.total_gifts = self.gifts.len();
        self.processed_gifts = self
            .gifts
            .iter()
            .filter(|record| record.status == "active")
            .count();
    }

    /// Record counts grouped by status.
    pub fn status_breakdown(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.gifts {
            *counts.entry(record.status.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Share of records that are `active`, in percent.
    pub fn completion_rate(&self) -> f64 {
        percentage(self.processed_gifts, self.total_gifts)
    }

    pub fn integrity(&self) -> IntegrityReport {
        IntegrityReport {
            collection: self.collection_name.clone(),
            records: self.gifts.len() + self.duplicates_on_load,
            duplicate_ids: self.duplicates_on_load,
            missing_fields: self
                .gifts
                .iter()
                .filter(|record| record.missing_required())
                .count(),
            error: None,
        }
    }

    /// Drops records without an id and forgets merged duplicates, then fills
    /// a missing `parsed_at` with `now` and a blank status with `active`.
    pub fn repair(&mut self, now: DateTime<Utc>) -> RepairReport {
        let original = self.gifts.len() + self.duplicates_on_load;
        let before = self.gifts.len();
        self.gifts.retain(|record| !record.id.trim().is_empty());
        let duplicates_removed = self.duplicates_on_load + (before - self.gifts.len());
        self.duplicates_on_load = 0;

        let mut fields_fixed = 0;
        for record in &mut self.gifts {
            if !record.has_parse_time() {
                record.parsed_at = now;
                fields_fixed += 1;
            }
            if record.status.trim().is_empty() {
                record.status = "active".to_string();
                fields_fixed += 1;
            }
        }

        self.index = self
            .gifts
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.id.clone(), pos))
            .collect();
        self.recompute_counters();
        let report = RepairReport {
            original,
            duplicates_removed,
            fields_fixed,
            remaining: self.gifts.len(),
        };
        if report.changed() {
            self.touch(now);
        }
        report
    }

    /// Source URLs of records, optionally restricted to one status.
    pub fn urls(&self, status: Option<&str>) -> Vec<&str> {
        self.gifts
            .iter()
            .filter(|record| status.map_or(true, |s| record.status == s))
            .map(|record| record.url.as_str())
            .collect()
    }
}
