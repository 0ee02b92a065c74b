//! Mutation observer trait and composite implementation.
//!
//! Defines [`MutationObserver`] for reacting to record mutations within an
//! [`ObjectStore`](super::ObjectStore), and [`CompositeMutationObserver`]
//! which fans out notifications to multiple observers.

use std::sync::Arc;

use tidepool_core::RecordId;

/// Observer for record mutations within an `ObjectStore`.
///
/// Every callback runs while the store holds the mutated record's entry
/// lock, after the new state is in place. Readers therefore never see the
/// record without the observer's side effects or vice versa. Observers must
/// not call back into the same store.
///
/// Used as `Arc<dyn MutationObserver<T>>`.
pub trait MutationObserver<T>: Send + Sync {
    /// Called after a record is inserted (`old` is `None`) or replaced.
    fn on_put(&self, id: RecordId, record: &T, old: Option<&T>);

    /// Called after a record is removed.
    fn on_remove(&self, id: RecordId, record: &T);

    /// Called after all records are removed by `delete_all`.
    fn on_clear(&self);
}

/// Composite observer that fans out to multiple observers.
///
/// Iterates all registered observers for each notification method,
/// enabling multiple independent reactions to a single mutation event.
pub struct CompositeMutationObserver<T> {
    observers: Vec<Arc<dyn MutationObserver<T>>>,
}

impl<T> CompositeMutationObserver<T> {
    /// Creates a composite observer with the given list of observers.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn MutationObserver<T>>>) -> Self {
        Self { observers }
    }

    /// Adds an observer after construction.
    pub fn add(&mut self, observer: Arc<dyn MutationObserver<T>>) {
        self.observers.push(observer);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl<T> Default for CompositeMutationObserver<T> {
    fn default() -> Self {
        Self {
            observers: Vec::new(),
        }
    }
}

impl<T> MutationObserver<T> for CompositeMutationObserver<T> {
    fn on_put(&self, id: RecordId, record: &T, old: Option<&T>) {
        for observer in &self.observers {
            observer.on_put(id, record, old);
        }
    }

    fn on_remove(&self, id: RecordId, record: &T) {
        for observer in &self.observers {
            observer.on_remove(id, record);
        }
    }

    fn on_clear(&self) {
        for observer in &self.observers {
            observer.on_clear();
        }
    }
}
