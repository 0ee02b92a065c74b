//! Secondary index: inverted mapping from indexed field values to record ids.
//!
//! The index is a mandatory sidecar of [`ObjectStore`](super::ObjectStore):
//! the store invokes it through [`MutationObserver`] while holding the
//! mutated record's entry lock, so the index can never disagree with the
//! table from a reader's point of view.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tidepool_core::{Entity, IndexValue, IndexedField, RecordId};

use super::mutation_observer::MutationObserver;

type FieldIndex = DashMap<IndexValue, HashSet<RecordId>>;

/// Inverted index over every indexed field of one entity type.
///
/// Two levels: field name, then value. Empty value sets are pruned eagerly
/// so [`cardinality`](Self::cardinality) reflects live values only.
#[derive(Default)]
pub struct SecondaryIndex {
    fields: DashMap<&'static str, FieldIndex>,
}

impl SecondaryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids currently indexed under `field = value`.
    pub fn lookup(&self, field: &str, value: &IndexValue) -> Vec<RecordId> {
        self.fields
            .get(field)
            .and_then(|values| values.get(value).map(|ids| ids.iter().copied().collect()))
            .unwrap_or_default()
    }

    /// Whether `id` is indexed under `field = value`.
    pub fn contains(&self, field: &str, value: &IndexValue, id: RecordId) -> bool {
        self.fields
            .get(field)
            .and_then(|values| values.get(value).map(|ids| ids.contains(&id)))
            .unwrap_or(false)
    }

    /// Number of distinct live values tracked for `field`.
    pub fn cardinality(&self, field: &str) -> usize {
        self.fields.get(field).map_or(0, |values| values.len())
    }

    /// Moves `id` from the entries of `old` to those of `new`.
    ///
    /// Fields whose value did not change are left untouched.
    pub fn replace(&self, id: RecordId, old: &[IndexedField], new: &[IndexedField]) {
        for stale in old.iter().filter(|f| !new.contains(f)) {
            self.remove_one(id, stale);
        }
        for fresh in new.iter().filter(|f| !old.contains(f)) {
            self.insert_one(id, fresh);
        }
    }

    /// Removes `id` from every entry listed in `fields`.
    pub fn remove(&self, id: RecordId, fields: &[IndexedField]) {
        for field in fields {
            self.remove_one(id, field);
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.fields.clear();
    }

    fn insert_one(&self, id: RecordId, field: &IndexedField) {
        // Known fields only need a shared lock on the outer map.
        if let Some(values) = self.fields.get(field.name) {
            values.entry(field.value.clone()).or_default().insert(id);
            return;
        }
        self.fields
            .entry(field.name)
            .or_default()
            .entry(field.value.clone())
            .or_default()
            .insert(id);
    }

    fn remove_one(&self, id: RecordId, field: &IndexedField) {
        let Some(values) = self.fields.get(field.name) else {
            return;
        };
        let entry = values.entry(field.value.clone());
        if let Entry::Occupied(mut ids) = entry {
            ids.get_mut().remove(&id);
            if ids.get().is_empty() {
                ids.remove();
            }
        }
    }
}

impl<T: Entity> MutationObserver<T> for SecondaryIndex {
    fn on_put(&self, id: RecordId, record: &T, old: Option<&T>) {
        let new_fields = record.indexed_fields();
        let old_fields = old.map(Entity::indexed_fields).unwrap_or_default();
        self.replace(id, &old_fields, &new_fields);
    }

    fn on_remove(&self, id: RecordId, record: &T) {
        self.remove(id, &record.indexed_fields());
    }

    fn on_clear(&self) {
        self.clear();
    }
}
