//! Background worker for periodic and on-demand maintenance.
//!
//! A [`BackgroundWorker`] owns one Tokio task that drains a bounded task
//! channel into a [`BackgroundRunnable`] and calls its `on_tick` hook on a
//! fixed interval. The cache expiry sweeper is the engine's only runnable.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Capacity of the task channel of every worker.
pub const WORKER_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Short name used in log events.
    fn name(&self) -> &'static str;

    /// Process a single submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker stops. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running background task.
///
/// Dropping the handle without calling [`stop`](Self::stop) closes the task
/// channel, which also ends the worker loop once pending tasks are drained.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker loop on the current Tokio runtime.
    ///
    /// `tick_interval` below one millisecond is raised to one millisecond.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(mut runnable: R, tick_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(WORKER_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = tick_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let name = runnable.name();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            debug!(worker = name, ?period, "background worker started");

            loop {
                tokio::select! {
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticker.tick() => runnable.on_tick().await,
                    _ = &mut shutdown_rx => break,
                }
            }

            runnable.shutdown().await;
            debug!(worker = name, "background worker stopped");
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queues a task, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("worker not running"))?;
        tx.send(task)
            .await
            .map_err(|_| anyhow::anyhow!("worker channel closed"))
    }

    /// Whether the worker loop is still alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals shutdown and waits for the worker loop to finish.
    ///
    /// Tasks still queued when the signal arrives are dropped. Calling
    /// `stop` twice is a no-op.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        runs: Arc<AtomicU32>,
        ticks: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    struct CountingRunnable(Counters);

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&mut self, _task: String) {
            self.0.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.0.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let counters = Counters::default();
        let mut worker =
            BackgroundWorker::start(CountingRunnable(counters.clone()), Duration::from_secs(60));

        worker.submit("sweep-1".to_string()).await.unwrap();
        worker.submit("sweep-2".to_string()).await.unwrap();
        worker.submit("sweep-3".to_string()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.runs.load(Ordering::SeqCst), 3);
        assert!(worker.is_running());

        worker.stop().await;
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_fires_on_interval() {
        let counters = Counters::default();
        let mut worker =
            BackgroundWorker::start(CountingRunnable(counters.clone()), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(105)).await;
        worker.stop().await;

        assert!(counters.ticks.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let mut worker =
            BackgroundWorker::start(CountingRunnable(Counters::default()), Duration::from_secs(60));
        worker.stop().await;
        worker.stop().await;

        assert!(worker.submit("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn zero_interval_does_not_panic() {
        let counters = Counters::default();
        let mut worker =
            BackgroundWorker::start(CountingRunnable(counters.clone()), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.stop().await;

        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }
}
