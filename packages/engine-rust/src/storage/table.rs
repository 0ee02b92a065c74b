//! In-memory record table backed by [`DashMap`].
//!
//! Provides concurrent read/write access without a table-wide lock. Writers
//! that need to update side structures atomically with a record go through
//! [`RecordTable::entry`], which holds the record's shard lock for as long as
//! the returned entry lives.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tidepool_core::RecordId;

use crate::storage::cursor::{FetchResult, IterationCursor};

/// Record storage keyed by [`RecordId`].
///
/// Reads clone the record out so no shard lock escapes the call.
pub struct RecordTable<T> {
    entries: DashMap<RecordId, T>,
}

impl<T: Clone> RecordTable<T> {
    /// Creates a new, empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Locks the shard holding `id` and returns its entry.
    ///
    /// The caller must not touch any other key of this table while the entry
    /// is alive: two keys can share a shard.
    pub fn entry(&self, id: RecordId) -> Entry<'_, RecordId, T> {
        self.entries.entry(id)
    }

    /// Retrieve a record by id, or `None` if not present.
    pub fn get(&self, id: RecordId) -> Option<T> {
        self.entries.get(&id).map(|r| r.value().clone())
    }

    /// Check if an id exists without cloning the record.
    pub fn contains(&self, id: RecordId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Return the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifiers of all entries at the time of the call.
    pub fn ids(&self) -> Vec<RecordId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Return a point-in-time snapshot of all entries.
    ///
    /// The snapshot is mutation-tolerant (concurrent modifications do not fail).
    pub fn snapshot(&self) -> Vec<(RecordId, T)> {
        self.entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Fetch up to `size` entries in ascending id order, starting after the
    /// cursor position.
    ///
    /// The cursor stores the last id returned rather than an offset, so
    /// records inserted or deleted between pages never shift later pages.
    pub fn fetch_entries(&self, cursor: &IterationCursor, size: usize) -> FetchResult<(RecordId, T)> {
        if cursor.finished {
            return FetchResult {
                items: Vec::new(),
                next_cursor: cursor.clone(),
            };
        }

        let after = cursor.resume_after();
        let mut remaining: Vec<(RecordId, T)> = self
            .entries
            .iter()
            .filter(|entry| match after {
                Some(a) => *entry.key() > a,
                None => true,
            })
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        remaining.sort_unstable_by_key(|(id, _)| *id);

        let finished = remaining.len() <= size;
        remaining.truncate(size);

        let next_cursor = match remaining.last() {
            Some((last, _)) => IterationCursor::after(*last, finished),
            None => IterationCursor {
                state: cursor.state.clone(),
                finished: true,
            },
        };

        FetchResult {
            items: remaining,
            next_cursor,
        }
    }
}

impl<T: Clone> Default for RecordTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
