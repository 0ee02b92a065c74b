use std::sync::Arc;

use super::message::SubscriptionHandle;

/// Errors returned by [`Broker::subscribe`](super::Broker::subscribe).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PubSubError {
    #[error("subscribe requires a running Tokio runtime")]
    NoRuntime,
    #[error("invalid topic pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Why a message did not reach a listener successfully.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("listener returned an error: {0}")]
    ListenerError(String),
    #[error("listener panicked: {0}")]
    ListenerPanicked(String),
    #[error("listener queue is full; message dropped")]
    QueueFull,
}

impl FailureReason {
    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ListenerError(_) => "error",
            Self::ListenerPanicked(_) => "panic",
            Self::QueueFull => "queue_full",
        }
    }
}

/// A delivery failure, broadcast on [`Broker::failures`](super::Broker::failures).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub subscription: SubscriptionHandle,
    pub topic: Arc<str>,
    pub pattern: Arc<str>,
    pub reason: FailureReason,
}
