//! Delayed relock tasks
//!
//! Every successful unlock schedules a detached relock that outlives the
//! triggering request. Tasks are tracked so shutdown can cancel the ones
//! still sleeping and wait for the ones already talking to hardware.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

#[derive(Debug)]
pub struct RelockScheduler {
    tracker: TaskTracker,
    token: CancellationToken,
    pending: Arc<AtomicUsize>,
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RelockScheduler {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            token,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `relock` after `delay` unless shutdown comes first.
    ///
    /// Returns `false` when the scheduler is already shut down.
    pub fn schedule<F, Fut>(&self, locker: i32, delay: Duration, relock: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return false;
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let guard = PendingGuard(self.pending.clone());
        let token = self.token.clone();

        self.tracker.spawn(async move {
            let _guard = guard;
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Relock of locker {locker} cancelled by shutdown");
                },
                _ = tokio::time::sleep(delay) => {
                    relock().await;
                },
            }
        });

        debug!("Relock of locker {locker} scheduled in {delay:?}");
        true
    }

    /// Relocks not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every relock scheduled so far has run
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel sleeping relocks and wait for running ones
    pub async fn shutdown(&self) {
        let cancelled = self.pending();
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Relock scheduler stopped ({cancelled} pending at shutdown)");
    }

    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }
}
