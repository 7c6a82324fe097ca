//! Per-table in-memory entry store.
//!
//! The store is the only shared resource mutated from more than one logical
//! flow (incremental event application and resync snapshot swaps); both go
//! through the dispatcher's single-writer-per-table sequencing, so a plain
//! `RwLock` per table suffices and readers never block writers for long.
//! Reads are synchronous and non-blocking; no remote I/O happens here.

use crate::entry::{Entry, EntryKey, SnapshotFilter};
use crate::schema::{Schema, TableSchema};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Outcome of an upsert, reported to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Upsert {
    /// No entry existed under the key.
    Inserted,
    /// An entry existed and was replaced.
    Replaced(Arc<Entry>),
    /// An identical entry was already present; nothing changed.
    ///
    /// This happens routinely: a mutation's direct response and its
    /// confirming stream event both describe the same row, and the second
    /// application must be a no-op.
    Unchanged,
}

/// Mutable cache of one table's current entries, keyed by primary-key tuple.
///
/// Only the dispatcher writes to it; every other component observes it
/// read-only through [`snapshot`](TableCache::snapshot) or
/// [`get`](TableCache::get).
#[derive(Debug)]
pub struct TableCache {
    schema: Arc<TableSchema>,
    entries: RwLock<BTreeMap<EntryKey, Arc<Entry>>>,
}

impl TableCache {
    pub(crate) fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// The table's schema.
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// The table name.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Insert or replace the entry stored under `key`.
    pub(crate) fn upsert(&self, key: EntryKey, entry: Arc<Entry>) -> Upsert {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get(&key) {
            // Structural equality check so re-applied events do not churn.
            Some(current) if **current == *entry => Upsert::Unchanged,
            Some(current) => {
                let previous = Arc::clone(current);
                entries.insert(key, entry);
                Upsert::Replaced(previous)
            },
            None => {
                entries.insert(key, entry);
                Upsert::Inserted
            },
        }
    }

    /// Remove the entry stored under `key`, returning it if present.
    ///
    /// Removing an absent key is a no-op, not an error — deletes are
    /// idempotent.
    pub(crate) fn remove(&self, key: &EntryKey) -> Option<Arc<Entry>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key)
    }

    /// Replace the full contents in one swap (resync).
    pub(crate) fn swap(&self, contents: BTreeMap<EntryKey, Arc<Entry>>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *entries = contents;
    }

    /// Exact-key lookup.
    pub fn get(&self, key: &EntryKey) -> Option<Arc<Entry>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Immutable, key-ordered snapshot of the entries matching `filter`.
    pub fn snapshot(&self, filter: &SnapshotFilter) -> Vec<Arc<Entry>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(key, entry)| filter.matches(key, entry))
            .map(|(_, entry)| Arc::clone(entry))
            .collect()
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry (client stop).
    pub(crate) fn clear(&self) {
        self.swap(BTreeMap::new());
    }
}

/// All per-table caches of one client session.
///
/// Created eagerly for every schema table at connect time; the set of tables
/// is fixed for the session.
#[derive(Debug)]
pub struct EntryStore {
    tables: HashMap<String, Arc<TableCache>>,
}

impl EntryStore {
    /// Create one empty cache per schema table.
    pub(crate) fn new(schema: &Schema) -> Self {
        let tables = schema
            .table_names()
            .filter_map(|name| {
                schema
                    .table(name)
                    .map(|ts| (name.to_string(), Arc::new(TableCache::new(Arc::clone(ts)))))
            })
            .collect();
        Self { tables }
    }

    /// Look up one table's cache.
    pub fn table(&self, name: &str) -> Option<&Arc<TableCache>> {
        self.tables.get(name)
    }

    /// Iterate over all caches.
    pub fn tables(&self) -> impl Iterator<Item = &Arc<TableCache>> {
        self.tables.values()
    }

    /// Clear every table (client stop).
    pub(crate) fn clear(&self) {
        for cache in self.tables.values() {
            cache.clear();
        }
    }
}
