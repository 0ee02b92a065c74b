use std::sync::Arc;

/// Errors returned by cache operations.
///
/// `Clone` so that one failed computation can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache computation failed: {0:#}")]
    ComputeFailure(Arc<anyhow::Error>),
    #[error("cache `{name}` is already registered with different key or value types")]
    TypeMismatch { name: String },
}
