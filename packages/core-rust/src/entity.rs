//! The [`Entity`] trait: what the object store needs to know about a record type.

use crate::types::{IndexedField, RecordId};

/// A record type that can live in an object store.
///
/// Implementations expose their identifier and the fields the secondary
/// index should track. Records are replaced wholesale on every write, so
/// `indexed_fields` is always evaluated against a complete record.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Logical collection name, used for logging and diagnostics.
    const KIND: &'static str;

    /// Identifier of this record, or `None` if the store should assign one.
    fn id(&self) -> Option<RecordId>;

    /// Stores an assigned identifier into the record.
    fn set_id(&mut self, id: RecordId);

    /// Current values of every indexed field.
    ///
    /// Field names must be unique within one record.
    fn indexed_fields(&self) -> Vec<IndexedField>;

    /// Checks the record before it is stored.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason if the record is malformed.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}
