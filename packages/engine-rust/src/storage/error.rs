use tidepool_core::RecordId;

/// Errors returned by [`ObjectStore`](super::ObjectStore) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: RecordId },
    #[error("invalid {kind} record: {reason}")]
    InvalidRecord { kind: &'static str, reason: String },
    #[error("could not generate a free {kind} id after {attempts} attempts")]
    IdSpaceExhausted { kind: &'static str, attempts: u32 },
}
