//! Fire-and-forget persistence writes
//!
//! Optimistic mutations (label, context, transcript, note flag, delete, user
//! settings) return as soon as the local store is updated. The network write
//! runs here, under a cancellation scope owned by the state container so a
//! logout can stop in-flight writes instead of leaking them.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl BackgroundTasks {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Token cancelled at teardown
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `task` in the background until it finishes or the scope is cancelled
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            debug!(task = name, "Background scope closed, write dropped");
            return;
        }
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = name, "Background write cancelled");
                }
                _ = task => {}
            }
        });
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every write spawned so far has finished
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel outstanding writes and wait for them to stop
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.flush().await;
    }
}
