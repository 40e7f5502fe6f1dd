//! Cooperative shutdown primitives.
//!
//! [`ShutdownSignal`] coordinates shutdown across the server accept loop,
//! the hub supervisor, and the periodic background tasks. [`TaskTracker`]
//! counts live tasks so `stop(deadline)` can wait for them to drain.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// A signal that can be triggered once and awaited from many tasks.
///
/// Cloning shares the signal; all clones observe the trigger. Triggering is
/// idempotent.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            sender,
        }
    }

    /// Creates a signal that triggers on SIGTERM or SIGINT.
    ///
    /// # Panics
    ///
    /// Panics if OS signal handlers cannot be registered.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            wait_for_os_signal().await;
            trigger.trigger();
        });

        signal
    }

    /// Triggers the signal, waking all waiters. Safe to call repeatedly.
    pub fn trigger(&self) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.sender.send(());
        }
    }

    /// Returns `true` once the signal has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Waits until the signal triggers.
    ///
    /// Returns immediately if the signal was already triggered.
    pub async fn recv(&self) {
        // Subscribe before the triggered check: a trigger that lands after
        // the check sends to a subscription that already exists.
        let mut receiver = self.sender.subscribe();
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }
        let _ = receiver.recv().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, initiating shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to wait for ctrl-c");
        tracing::info!("received ctrl-c, initiating shutdown");
    }
}

/// Counts live tasks so shutdown can wait for them to finish.
///
/// Each task holds a [`TaskToken`]; dropping the token decrements the count
/// and wakes waiters when it reaches zero.
#[derive(Debug, Clone)]
pub struct TaskTracker {
    active: Arc<AtomicUsize>,
    notify: Arc<tokio::sync::Notify>,
}

impl TaskTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Acquires a token representing one live task.
    #[must_use]
    pub fn acquire(&self) -> TaskToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        TaskToken {
            active: Arc::clone(&self.active),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Returns the number of live tasks.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until every token has been dropped.
    ///
    /// Completes immediately if no tasks are live.
    pub async fn wait_idle(&self) {
        while self.active.load(Ordering::SeqCst) > 0 {
            self.notify.notified().await;
        }
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A token representing one live task.
#[derive(Debug)]
pub struct TaskToken {
    active: Arc<AtomicUsize>,
    notify: Arc<tokio::sync::Notify>,
}

impl Drop for TaskToken {
    fn drop(&mut self) {
        let prev = self.active.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());

        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn clones_share_state() {
        let a = ShutdownSignal::new();
        let b = a.clone();
        a.trigger();
        assert!(b.is_triggered());
    }

    #[tokio::test]
    async fn recv_completes_after_trigger() {
        let signal = ShutdownSignal::new();
        let trigger = signal.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .expect("recv should complete");
    }

    #[tokio::test]
    async fn recv_completes_immediately_when_already_triggered() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        tokio::time::timeout(Duration::from_millis(10), signal.recv())
            .await
            .expect("recv should complete immediately");
    }

    #[test]
    fn tracker_counts_tokens() {
        let tracker = TaskTracker::new();
        assert_eq!(tracker.active(), 0);

        let t1 = tracker.acquire();
        let t2 = tracker.acquire();
        assert_eq!(tracker.active(), 2);

        drop(t1);
        assert_eq!(tracker.active(), 1);
        drop(t2);
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn wait_idle_completes_when_tokens_drop() {
        let tracker = TaskTracker::new();
        let token = tracker.acquire();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(token);
        });

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait should complete")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn wait_idle_is_immediate_with_no_tasks() {
        let tracker = TaskTracker::new();
        tokio::time::timeout(Duration::from_millis(10), tracker.wait_idle())
            .await
            .expect("wait should complete immediately");
    }
}
