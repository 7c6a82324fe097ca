//! User-facing handle to one mirrored table.

use crate::entry::{Entry, EntryKey, SnapshotFilter};
use crate::mutation::{MutationBatch, RequestContext};
use crate::schema::TableSchema;
use crate::store::TableCache;
use crate::value::Value;
use std::sync::Arc;

/// A cheap, cloneable handle to one table's local mirror.
///
/// Reads are synchronous and served from memory; writes go through
/// [`batch`](Table::batch) and come back via the event stream.
#[derive(Clone)]
pub struct Table {
    cache: Arc<TableCache>,
    context: RequestContext,
}

impl Table {
    pub(crate) fn new(cache: Arc<TableCache>, context: RequestContext) -> Self {
        Self { cache, context }
    }

    /// The table name.
    pub fn name(&self) -> &str {
        self.cache.name()
    }

    /// The table's schema.
    pub fn schema(&self) -> &Arc<TableSchema> {
        self.cache.schema()
    }

    /// Exact lookup by full primary-key tuple, in primary-key field order.
    ///
    /// Returns `None` when no entry is cached under that key, including when
    /// the tuple has the wrong arity.
    pub fn get(&self, key: &[Value]) -> Option<Arc<Entry>> {
        if key.len() != self.cache.schema().key_len() {
            return None;
        }
        self.cache.get(&EntryKey(key.to_vec()))
    }

    /// Key-ordered snapshot of the entries matching `filter`.
    ///
    /// The snapshot is an independent copy of the current state; later
    /// events do not mutate it.
    pub fn snapshot(&self, filter: &SnapshotFilter) -> Vec<Arc<Entry>> {
        self.cache.snapshot(filter)
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True when the mirror holds no entries.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Start a new mutation batch against this table.
    pub fn batch(&self) -> MutationBatch {
        MutationBatch::new(Arc::clone(self.cache.schema()), self.context.clone())
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .field("entries", &self.len())
            .finish()
    }
}
