use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// A published message as seen by one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published on.
    pub topic: Arc<str>,
    /// Pattern of the subscription that matched `topic`.
    pub pattern: Arc<str>,
    pub payload: Bytes,
    /// Wall-clock publish time in milliseconds since the Unix epoch.
    pub published_at_ms: u64,
}

impl Message {
    /// The payload as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Identifies one registration made with [`Broker::subscribe`](super::Broker::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub(crate) u64);

impl SubscriptionHandle {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(payload: &'static [u8]) -> Message {
        Message {
            topic: Arc::from("chat"),
            pattern: Arc::from("chat"),
            payload: Bytes::from_static(payload),
            published_at_ms: now_millis(),
        }
    }

    #[test]
    fn payload_str_decodes_utf8() {
        assert_eq!(message(b"Hello, world").payload_str(), Some("Hello, world"));
        assert_eq!(message(&[0xff, 0xfe]).payload_str(), None);
    }

    #[test]
    fn handle_display() {
        assert_eq!(SubscriptionHandle(7).to_string(), "sub-7");
        assert_eq!(SubscriptionHandle(7).get(), 7);
    }

    #[test]
    fn publish_time_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
