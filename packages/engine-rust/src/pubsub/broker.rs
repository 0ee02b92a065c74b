//! Subscription table and message fan-out.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tidepool_core::TopicPattern;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::config::PubSubConfig;

use super::error::{DeliveryFailure, FailureReason, PubSubError};
use super::listener::MessageListener;
use super::message::{now_millis, Message, SubscriptionHandle};

struct Subscription {
    pattern: TopicPattern,
    pattern_str: Arc<str>,
    tx: QueueSender,
}

/// Per-subscription delivery queue. Unbounded unless
/// [`PubSubConfig::listener_queue_capacity`] is set.
enum QueueSender {
    Bounded(mpsc::Sender<Message>),
    Unbounded(mpsc::UnboundedSender<Message>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

fn queue(capacity: Option<usize>) -> (QueueSender, QueueReceiver) {
    match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    }
}

impl QueueSender {
    fn try_send(&self, message: Message) -> Result<(), TrySendError<Message>> {
        match self {
            Self::Bounded(tx) => tx.try_send(message),
            Self::Unbounded(tx) => tx.send(message).map_err(|e| TrySendError::Closed(e.0)),
        }
    }
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Message> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// In-process topic broker.
///
/// `publish` snapshots the matching subscriptions under a read lock and
/// hands each one a copy of the message without waiting on any listener.
/// Listener failures never reach the publisher; they are logged, counted
/// and broadcast on [`failures`](Self::failures).
pub struct Broker {
    subscriptions: RwLock<HashMap<SubscriptionHandle, Arc<Subscription>>>,
    next_id: AtomicU64,
    failures: broadcast::Sender<DeliveryFailure>,
    config: PubSubConfig,
}

impl Broker {
    #[must_use]
    pub fn new(config: PubSubConfig) -> Self {
        let (failures, _) = broadcast::channel(config.failure_channel_capacity.max(1));
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            failures,
            config,
        }
    }

    /// Registers `listener` for every topic matching `pattern`.
    ///
    /// `*` matches any run of characters, separators included. The
    /// listener's delivery task is spawned on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`PubSubError::NoRuntime`] outside a Tokio runtime.
    /// - [`PubSubError::InvalidPattern`] for an empty pattern.
    pub fn subscribe<L: MessageListener>(
        &self,
        pattern: &str,
        listener: L,
    ) -> Result<SubscriptionHandle, PubSubError> {
        self.subscribe_arc(pattern, Arc::new(listener))
    }

    /// [`subscribe`](Self::subscribe) with a shared listener, so one listener
    /// can serve several patterns.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_arc(
        &self,
        pattern: &str,
        listener: Arc<dyn MessageListener>,
    ) -> Result<SubscriptionHandle, PubSubError> {
        let runtime = Handle::try_current().map_err(|_| PubSubError::NoRuntime)?;
        let compiled = TopicPattern::new(pattern).map_err(|e| PubSubError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: format!("{e:#}"),
        })?;

        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = queue(self.config.listener_queue_capacity);
        runtime.spawn(deliver(handle, listener, rx, self.failures.clone()));

        let subscription = Subscription {
            pattern: compiled,
            pattern_str: Arc::from(pattern),
            tx,
        };
        self.subscriptions
            .write()
            .insert(handle, Arc::new(subscription));
        debug!(subscription = %handle, pattern, "subscribed");
        Ok(handle)
    }

    /// Removes a subscription. Returns `false` if it was already removed.
    ///
    /// Messages already queued for the subscription are still delivered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let removed = self.subscriptions.write().remove(&handle).is_some();
        if removed {
            debug!(subscription = %handle, "unsubscribed");
        }
        removed
    }

    /// Publishes `payload` on `topic`.
    ///
    /// Returns the number of subscriptions the message was queued for.
    /// Only a subscription with a configured queue capacity can miss a
    /// message: when its queue is full it loses this one and gets a
    /// [`FailureReason::QueueFull`] report.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let targets: Vec<(SubscriptionHandle, Arc<Subscription>)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|(_, sub)| sub.pattern.matches(topic))
            .map(|(handle, sub)| (*handle, Arc::clone(sub)))
            .collect();

        let topic: Arc<str> = Arc::from(topic);
        let published_at_ms = now_millis();
        let mut queued = 0;
        for (handle, sub) in targets {
            let message = Message {
                topic: Arc::clone(&topic),
                pattern: Arc::clone(&sub.pattern_str),
                payload: payload.clone(),
                published_at_ms,
            };
            match sub.tx.try_send(message) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(message)) => report(
                    &self.failures,
                    DeliveryFailure {
                        subscription: handle,
                        topic: message.topic,
                        pattern: message.pattern,
                        reason: FailureReason::QueueFull,
                    },
                ),
                Err(TrySendError::Closed(_)) => {
                    debug!(subscription = %handle, "delivery task gone; message dropped");
                }
            }
        }

        metrics::counter!("tidepool_pubsub_published_total").increment(1);
        debug!(%topic, queued, "published");
        queued
    }

    /// Receiver for listener failures published after this call.
    pub fn failures(&self) -> broadcast::Receiver<DeliveryFailure> {
        self.failures.subscribe()
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Number of active subscriptions whose pattern contains a wildcard.
    pub fn pattern_subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| sub.pattern.is_glob())
            .count()
    }

    /// Number of active subscriptions that a publish on `topic` would reach.
    pub fn subscriptions_for(&self, topic: &str) -> usize {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| sub.pattern.matches(topic))
            .count()
    }

    /// Drops every subscription. Returns how many were removed.
    ///
    /// Delivery tasks finish once their queued messages are drained.
    pub fn shutdown(&self) -> usize {
        let dropped = std::mem::take(&mut *self.subscriptions.write()).len();
        debug!(dropped, "broker subscriptions dropped");
        dropped
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(PubSubConfig::default())
    }
}

/// Drains one subscription's queue into its listener until every sender is
/// gone.
async fn deliver(
    handle: SubscriptionHandle,
    listener: Arc<dyn MessageListener>,
    mut rx: QueueReceiver,
    failures: broadcast::Sender<DeliveryFailure>,
) {
    while let Some(message) = rx.recv().await {
        let outcome = AssertUnwindSafe(listener.on_message(&message))
            .catch_unwind()
            .await;
        let reason = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => FailureReason::ListenerError(format!("{err:#}")),
            Err(panic) => FailureReason::ListenerPanicked(panic_message(panic.as_ref())),
        };
        report(
            &failures,
            DeliveryFailure {
                subscription: handle,
                topic: message.topic,
                pattern: message.pattern,
                reason,
            },
        );
    }
    debug!(subscription = %handle, "delivery task finished");
}

fn report(failures: &broadcast::Sender<DeliveryFailure>, failure: DeliveryFailure) {
    warn!(
        subscription = %failure.subscription,
        topic = %failure.topic,
        pattern = %failure.pattern,
        reason = %failure.reason,
        "message delivery failed"
    );
    metrics::counter!(
        "tidepool_pubsub_delivery_failures_total",
        "reason" => failure.reason.kind()
    )
    .increment(1);
    // No receivers is fine.
    let _ = failures.send(failure);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::timeout;

    use super::*;

    /// Listener closure that forwards each payload into a channel.
    fn recorder() -> (
        impl Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
        UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = move |message: &Message| {
            tx.send(message.clone())?;
            Ok(())
        };
        (listener, rx)
    }

    async fn next(rx: &mut UnboundedReceiver<Message>) -> Message {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("listener dropped")
    }

    /// Fails if another message arrives. A closed channel counts as quiet:
    /// the listener is dropped once its subscription is gone.
    async fn assert_quiet(rx: &mut UnboundedReceiver<Message>) {
        if let Ok(Some(message)) = timeout(Duration::from_millis(50), rx.recv()).await {
            panic!("unexpected extra delivery on {}", message.topic);
        }
    }

    #[tokio::test]
    async fn two_listeners_each_receive_once() {
        let broker = Broker::default();
        let (first, mut first_rx) = recorder();
        let (second, mut second_rx) = recorder();
        broker.subscribe("chat", first).unwrap();
        broker.subscribe("chat", second).unwrap();

        assert_eq!(broker.publish("chat", "Hello, world"), 2);

        for rx in [&mut first_rx, &mut second_rx] {
            let message = next(rx).await;
            assert_eq!(message.payload_str(), Some("Hello, world"));
            assert_eq!(&*message.topic, "chat");
            assert_quiet(rx).await;
        }
    }

    #[tokio::test]
    async fn failing_listeners_do_not_affect_others() {
        let broker = Broker::default();
        let mut failures = broker.failures();

        let erroring = broker
            .subscribe("chat", |_: &Message| -> anyhow::Result<()> {
                anyhow::bail!("listener rejected message")
            })
            .unwrap();
        let panicking = broker
            .subscribe("chat", |_: &Message| -> anyhow::Result<()> { panic!("listener blew up") })
            .unwrap();
        let (healthy, mut rx) = recorder();
        broker.subscribe("chat", healthy).unwrap();

        assert_eq!(broker.publish("chat", "first"), 3);
        assert_eq!(broker.publish("chat", "second"), 3);

        assert_eq!(next(&mut rx).await.payload_str(), Some("first"));
        assert_eq!(next(&mut rx).await.payload_str(), Some("second"));

        let mut seen = Vec::new();
        for _ in 0..4 {
            let failure = timeout(Duration::from_secs(5), failures.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push((failure.subscription, failure.reason.kind()));
        }
        assert_eq!(seen.iter().filter(|f| *f == &(erroring, "error")).count(), 2);
        assert_eq!(seen.iter().filter(|f| *f == &(panicking, "panic")).count(), 2);
    }

    #[tokio::test]
    async fn glob_pattern_matches_and_reports_pattern() {
        let broker = Broker::default();
        let (listener, mut rx) = recorder();
        broker.subscribe("chat*", listener).unwrap();

        assert_eq!(broker.publish("chat", "a"), 1);
        assert_eq!(broker.publish("chat.room.1", "b"), 1);
        assert_eq!(broker.publish("news", "c"), 0);

        let first = next(&mut rx).await;
        assert_eq!(&*first.pattern, "chat*");
        assert_eq!(&*first.topic, "chat");
        assert_eq!(&*next(&mut rx).await.topic, "chat.room.1");
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn publish_without_subscribers_returns_zero() {
        let broker = Broker::default();
        assert_eq!(broker.publish("chat", Bytes::from_static(b"nobody")), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_deliveries() {
        let broker = Broker::default();
        let (listener, mut rx) = recorder();
        let handle = broker.subscribe("chat", listener).unwrap();

        broker.publish("chat", "before");
        assert_eq!(next(&mut rx).await.payload_str(), Some("before"));

        assert!(broker.unsubscribe(handle));
        assert!(!broker.unsubscribe(handle));
        assert_eq!(broker.publish("chat", "after"), 0);
        assert_quiet(&mut rx).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn queued_messages_survive_unsubscribe() {
        let broker = Broker::default();
        let (listener, mut rx) = recorder();
        let handle = broker.subscribe("chat", listener).unwrap();

        // Current-thread runtime: nothing is delivered until we yield.
        broker.publish("chat", "1");
        broker.publish("chat", "2");
        broker.unsubscribe(handle);

        assert_eq!(next(&mut rx).await.payload_str(), Some("1"));
        assert_eq!(next(&mut rx).await.payload_str(), Some("2"));
    }

    #[tokio::test]
    async fn burst_larger_than_any_queue_is_fully_delivered() {
        let broker = Broker::default();
        let (listener, mut rx) = recorder();
        broker.subscribe("chat", listener).unwrap();

        // Current-thread runtime: the whole burst is queued before delivery.
        for n in 0..1_000 {
            assert_eq!(broker.publish("chat", format!("m{n}")), 1);
        }
        for n in 0..1_000 {
            assert_eq!(next(&mut rx).await.payload_str(), Some(format!("m{n}").as_str()));
        }
        assert_quiet(&mut rx).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn publish_tolerates_concurrent_subscription_churn() {
        const MESSAGES: usize = 500;
        let broker = Arc::new(Broker::default());
        let (listener, mut rx) = recorder();
        broker.subscribe("chat*", listener).unwrap();

        let churn = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                for _ in 0..MESSAGES {
                    let handle = broker
                        .subscribe("chat*", |_: &Message| -> anyhow::Result<()> { Ok(()) })
                        .unwrap();
                    tokio::task::yield_now().await;
                    assert!(broker.unsubscribe(handle));
                }
            })
        };
        let publisher = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                for n in 0..MESSAGES {
                    assert!(broker.publish("chat.room", format!("m{n}")) >= 1);
                    tokio::task::yield_now().await;
                }
            })
        };
        churn.await.unwrap();
        publisher.await.unwrap();

        for n in 0..MESSAGES {
            assert_eq!(next(&mut rx).await.payload_str(), Some(format!("m{n}").as_str()));
        }
        assert_eq!(broker.subscription_count(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_and_reports() {
        let broker = Broker::new(PubSubConfig {
            listener_queue_capacity: Some(1),
            ..PubSubConfig::default()
        });
        let mut failures = broker.failures();
        let (listener, mut rx) = recorder();
        let handle = broker.subscribe("chat", listener).unwrap();

        assert_eq!(broker.publish("chat", "kept"), 1);
        assert_eq!(broker.publish("chat", "dropped"), 0);

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.subscription, handle);
        assert_eq!(failure.reason, FailureReason::QueueFull);

        assert_eq!(next(&mut rx).await.payload_str(), Some("kept"));
        assert_quiet(&mut rx).await;
    }

    struct Uppercase(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl MessageListener for Uppercase {
        async fn on_message(&self, message: &Message) -> anyhow::Result<()> {
            tokio::task::yield_now().await;
            let text = message
                .payload_str()
                .ok_or_else(|| anyhow::anyhow!("payload is not UTF-8"))?;
            self.0.send(text.to_uppercase())?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn shared_async_listener_serves_many_patterns() {
        let broker = Broker::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn MessageListener> = Arc::new(Uppercase(tx));
        broker.subscribe_arc("chat", Arc::clone(&listener)).unwrap();
        broker.subscribe_arc("news*", listener).unwrap();

        broker.publish("chat", "hi");
        broker.publish("news.sport", "goal");

        let mut got = vec![
            timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap(),
            timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap(),
        ];
        got.sort();
        assert_eq!(got, vec!["GOAL", "HI"]);
    }

    #[tokio::test]
    async fn counts_reflect_registrations() {
        let broker = Broker::default();
        let (a, _a_rx) = recorder();
        let (b, _b_rx) = recorder();
        let (c, _c_rx) = recorder();
        broker.subscribe("chat", a).unwrap();
        broker.subscribe("chat*", b).unwrap();
        broker.subscribe("*", c).unwrap();

        assert_eq!(broker.subscription_count(), 3);
        assert_eq!(broker.pattern_subscription_count(), 2);
        assert_eq!(broker.subscriptions_for("chat"), 3);
        assert_eq!(broker.subscriptions_for("chatter"), 2);
        assert_eq!(broker.subscriptions_for("news"), 1);

        assert_eq!(broker.shutdown(), 3);
        assert_eq!(broker.subscription_count(), 0);
        assert_eq!(broker.publish("chat", "gone"), 0);
    }

    #[tokio::test]
    async fn empty_pattern_is_invalid() {
        let broker = Broker::default();
        let (listener, _rx) = recorder();
        assert!(matches!(
            broker.subscribe("", listener),
            Err(PubSubError::InvalidPattern { .. })
        ));
        assert_eq!(broker.subscription_count(), 0);
    }

    #[test]
    fn subscribe_outside_runtime_fails() {
        let broker = Broker::default();
        let (listener, _rx) = recorder();
        assert_eq!(
            broker.subscribe("chat", listener),
            Err(PubSubError::NoRuntime)
        );
    }
}
