//! Cursor-based iteration types for paging through a record table.

use tidepool_core::RecordId;

/// Opaque cursor for resumable iteration over stored records.
///
/// Implementations encode their internal position in the `state` field.
/// Consumers should treat `state` as opaque and only check `finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationCursor {
    /// Opaque state for the table to resume iteration.
    pub state: Vec<u8>,
    /// Whether iteration has completed (no more entries).
    pub finished: bool,
}

impl IterationCursor {
    /// Creates a cursor positioned at the beginning of the table.
    #[must_use]
    pub fn start() -> Self {
        Self {
            state: Vec::new(),
            finished: false,
        }
    }

    /// Cursor resuming strictly after `id`.
    pub(crate) fn after(id: RecordId, finished: bool) -> Self {
        Self {
            state: id.get().to_le_bytes().to_vec(),
            finished,
        }
    }

    /// Identifier the previous page ended on, or `None` at the start.
    ///
    /// Malformed state is treated as the start.
    pub(crate) fn resume_after(&self) -> Option<RecordId> {
        let bytes: [u8; 8] = self.state.as_slice().try_into().ok()?;
        RecordId::new(i64::from_le_bytes(bytes))
    }
}

/// Result of a cursor-based fetch operation.
///
/// Contains the fetched items and an updated cursor for the next call.
#[derive(Debug)]
pub struct FetchResult<T> {
    /// The fetched items.
    pub items: Vec<T>,
    /// Updated cursor for the next fetch call.
    pub next_cursor: IterationCursor,
}
