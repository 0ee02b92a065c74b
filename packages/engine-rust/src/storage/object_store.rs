//! Object store: keyed record storage with a mandatory secondary index.
//!
//! [`ObjectStore`] coordinates the [`RecordTable`] with its
//! [`SecondaryIndex`] and any extra [`MutationObserver`]s. Every mutation
//! runs inside the record's entry lock, so index maintenance is atomic with
//! the write it accompanies while unrelated records mutate concurrently.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashSet;
use rand::Rng;
use tidepool_core::{Entity, IndexValue, IndexedField, RecordId};
use tracing::debug;

use crate::config::StoreConfig;
use crate::storage::cursor::{FetchResult, IterationCursor};
use crate::storage::error::StoreError;
use crate::storage::index::SecondaryIndex;
use crate::storage::mutation_observer::{CompositeMutationObserver, MutationObserver};
use crate::storage::table::RecordTable;

/// Repository for one entity type.
///
/// Lock order is always record shard, then index shard. Readers never hold
/// an index guard while reading records.
pub struct ObjectStore<T: Entity> {
    records: RecordTable<T>,
    index: SecondaryIndex,
    observer: CompositeMutationObserver<T>,
    /// Ids of deleted records; never handed out again by id generation.
    retired: DashSet<RecordId>,
    config: StoreConfig,
}

impl<T: Entity> ObjectStore<T> {
    /// Creates an empty store without extra observers.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self::with_observers(config, Vec::new())
    }

    /// Creates an empty store that notifies `observers` on every mutation,
    /// after the secondary index has been updated.
    #[must_use]
    pub fn with_observers(config: StoreConfig, observers: Vec<Arc<dyn MutationObserver<T>>>) -> Self {
        Self {
            records: RecordTable::new(),
            index: SecondaryIndex::new(),
            observer: CompositeMutationObserver::new(observers),
            retired: DashSet::new(),
            config,
        }
    }

    // --- Core CRUD ---

    /// Stores `record`, assigning a fresh identifier if it has none.
    ///
    /// Generated identifiers are unique for the lifetime of the store: ids
    /// of deleted records are never generated again. Caller-supplied ids
    /// are taken as given.
    ///
    /// Replaces any record with the same identifier and moves the id between
    /// index entries for every field whose value changed. Returns the stored
    /// record with its identifier populated.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidRecord`] if [`Entity::validate`] rejects the
    ///   record or its indexed field names are empty or duplicated.
    /// - [`StoreError::IdSpaceExhausted`] if no free id was found.
    pub fn put(&self, record: T) -> Result<T, StoreError> {
        record.validate().map_err(invalid::<T>)?;
        check_field_names::<T>(&record.indexed_fields())?;

        match record.id() {
            Some(id) => Ok(self.write(self.records.entry(id), id, record)),
            None => self.insert_with_generated_id(record),
        }
    }

    /// Returns the record stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such record exists.
    pub fn get(&self, id: RecordId) -> Result<T, StoreError> {
        self.records
            .get(id)
            .ok_or(StoreError::NotFound { kind: T::KIND, id })
    }

    /// Removes the record stored under `id` and prunes it from the index.
    ///
    /// Idempotent: returns `None` and changes nothing if the id is unknown.
    pub fn delete(&self, id: RecordId) -> Option<T> {
        let Entry::Occupied(occupied) = self.records.entry(id) else {
            return None;
        };
        self.index.on_remove(id, occupied.get());
        self.observer.on_remove(id, occupied.get());
        self.retired.insert(id);
        let removed = occupied.remove();
        debug!(kind = T::KIND, %id, "deleted record");
        Some(removed)
    }

    // --- Queries ---

    /// All live records whose indexed `field` equals `value`.
    ///
    /// Order is unspecified. Each candidate is re-checked against its
    /// current field value, so a record rewritten after the index lookup is
    /// only returned if it still matches.
    pub fn find_by_index(&self, field: &str, value: impl Into<IndexValue>) -> Vec<T> {
        let value = value.into();
        self.index
            .lookup(field, &value)
            .into_iter()
            .filter_map(|id| self.records.get(id))
            .filter(|record| {
                record
                    .indexed_fields()
                    .iter()
                    .any(|f| f.name == field && f.value == value)
            })
            .collect()
    }

    /// Every stored record (scan-all). Order is unspecified.
    pub fn find_all(&self) -> Vec<T> {
        self.records
            .snapshot()
            .into_iter()
            .map(|(_, record)| record)
            .collect()
    }

    /// Resolves a list of identifiers, skipping ids that are not stored.
    pub fn find_all_by_id(&self, ids: impl IntoIterator<Item = RecordId>) -> Vec<T> {
        ids.into_iter().filter_map(|id| self.records.get(id)).collect()
    }

    /// Fetch a page of records in ascending id order.
    pub fn fetch_page(&self, cursor: &IterationCursor, size: usize) -> FetchResult<(RecordId, T)> {
        self.records.fetch_entries(cursor, size)
    }

    /// Whether a record is stored under `id`.
    pub fn exists(&self, id: RecordId) -> bool {
        self.records.contains(id)
    }

    /// Number of stored records.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Number of distinct live values indexed for `field`.
    pub fn index_cardinality(&self, field: &str) -> usize {
        self.index.cardinality(field)
    }

    /// Deletes every record, one entry lock at a time, then fires
    /// `on_clear` on the extra observers. Returns the number deleted.
    ///
    /// Records written concurrently with the call may survive it.
    pub fn delete_all(&self) -> usize {
        let deleted = self
            .records
            .ids()
            .into_iter()
            .filter(|id| self.delete(*id).is_some())
            .count();
        self.observer.on_clear();
        debug!(kind = T::KIND, deleted, "deleted all records");
        deleted
    }

    // --- Internals ---

    fn insert_with_generated_id(&self, mut record: T) -> Result<T, StoreError> {
        let mut rng = rand::rng();
        for _ in 0..self.config.id_generation_attempts {
            let id = RecordId::from_random_bits(rng.random());
            if let Some(entry) = self.claim(id) {
                record.set_id(id);
                return Ok(self.write(entry, id, record));
            }
        }
        Err(StoreError::IdSpaceExhausted {
            kind: T::KIND,
            attempts: self.config.id_generation_attempts,
        })
    }

    /// Locks the vacant entry for a generated `id`, or `None` if the id is
    /// live or was used by a deleted record.
    fn claim(&self, id: RecordId) -> Option<Entry<'_, RecordId, T>> {
        match self.records.entry(id) {
            entry @ Entry::Vacant(_) if !self.retired.contains(&id) => Some(entry),
            _ => None,
        }
    }

    /// Writes `record` into the locked `entry` and updates the index and
    /// observers before the lock is released.
    fn write(&self, entry: Entry<'_, RecordId, T>, id: RecordId, record: T) -> T {
        match entry {
            Entry::Occupied(mut occupied) => {
                let old = occupied.insert(record.clone());
                self.index.on_put(id, &record, Some(&old));
                self.observer.on_put(id, &record, Some(&old));
                debug!(kind = T::KIND, %id, "replaced record");
            }
            Entry::Vacant(vacant) => {
                let stored = vacant.insert(record.clone());
                self.index.on_put(id, stored.value(), None);
                self.observer.on_put(id, stored.value(), None);
                debug!(kind = T::KIND, %id, "inserted record");
            }
        }
        record
    }
}

fn invalid<T: Entity>(reason: String) -> StoreError {
    StoreError::InvalidRecord {
        kind: T::KIND,
        reason,
    }
}

fn check_field_names<T: Entity>(fields: &[IndexedField]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields {
        if field.name.is_empty() {
            return Err(invalid::<T>("indexed field name must not be empty".to_string()));
        }
        if !seen.insert(field.name) {
            return Err(invalid::<T>(format!(
                "indexed field `{}` appears more than once",
                field.name
            )));
        }
    }
    Ok(())
}
