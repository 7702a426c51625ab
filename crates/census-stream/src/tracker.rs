//! In-flight dispatch tracking.
//!
//! The receive loop never waits for handlers. Each dispatch runs as a
//! tracked task; the loop reaps finished ones as it goes and drains the rest
//! on shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::dispatch::DispatchOutcome;
use crate::metrics;

/// Bounded set of dispatches in flight.
#[derive(Debug)]
pub struct DispatchTracker {
    tasks: JoinSet<DispatchOutcome>,
    limit: usize,
    outstanding: Arc<AtomicUsize>,
}

impl DispatchTracker {
    /// Tracker allowing at most `limit` dispatches in flight.
    pub fn new(limit: usize) -> Self {
        Self::with_counter(limit, Arc::new(AtomicUsize::new(0)))
    }

    /// Tracker publishing its in-flight count through `outstanding`.
    pub fn with_counter(limit: usize, outstanding: Arc<AtomicUsize>) -> Self {
        Self {
            tasks: JoinSet::new(),
            limit: limit.max(1),
            outstanding,
        }
    }

    /// Number of dispatches not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start tracking a dispatch, waiting for a slot when the tracker is full.
    pub async fn track<F>(&mut self, dispatch: F)
    where
        F: Future<Output = DispatchOutcome> + Send + 'static,
    {
        while self.tasks.len() >= self.limit {
            debug!(limit = self.limit, "Dispatch limit reached, waiting for a slot");
            match self.tasks.join_next().await {
                Some(result) => Self::log_result(result),
                None => break,
            }
        }
        self.tasks.spawn(dispatch);
        self.publish();
    }

    /// Reap one finished dispatch, if any. Never waits.
    pub fn reap_one(&mut self) -> bool {
        match self.tasks.try_join_next() {
            Some(result) => {
                Self::log_result(result);
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Wait for every dispatch, aborting whatever is left after `grace`.
    ///
    /// Returns the number of dispatches that were aborted.
    pub async fn drain(&mut self, grace: Duration) -> usize {
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next().await {
                Self::log_result(result);
            }
        })
        .await;

        let aborted = if drained.is_ok() {
            0
        } else {
            let remaining = self.tasks.len();
            warn!(
                remaining,
                grace_ms = grace.as_millis() as u64,
                "Dispatches still running after the shutdown grace period, aborting"
            );
            self.tasks.shutdown().await;
            remaining
        };
        self.publish();
        aborted
    }

    fn publish(&self) {
        let count = self.tasks.len();
        self.outstanding.store(count, Ordering::Relaxed);
        metrics::set_outstanding(count);
    }

    fn log_result(result: Result<DispatchOutcome, JoinError>) {
        match result {
            Ok(_) => {}
            Err(e) if e.is_cancelled() => debug!("Dispatch cancelled"),
            Err(e) => error!(error = %e, "Dispatch task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[tokio::test]
    async fn test_track_and_reap() {
        let mut tracker = DispatchTracker::new(4);
        assert!(tracker.is_empty());
        assert!(!tracker.reap_one());

        tracker.track(async { DispatchOutcome::NoHandlers }).await;
        assert_eq!(tracker.len(), 1);

        tokio::task::yield_now().await;
        while !tracker.reap_one() {
            tokio::task::yield_now().await;
        }
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_waits_for_slot() {
        let mut tracker = DispatchTracker::new(1);
        let first_done = Arc::new(AtomicBool::new(false));
        {
            let first_done = Arc::clone(&first_done);
            tracker
                .track(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    first_done.store(true, Ordering::SeqCst);
                    DispatchOutcome::NoHandlers
                })
                .await;
        }

        tracker.track(async { DispatchOutcome::NoHandlers }).await;
        assert!(first_done.load(Ordering::SeqCst));
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_within_grace() {
        let outstanding = Arc::new(AtomicUsize::new(0));
        let mut tracker = DispatchTracker::with_counter(8, Arc::clone(&outstanding));
        for ms in [10, 20, 30] {
            tracker
                .track(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    DispatchOutcome::NoHandlers
                })
                .await;
        }
        assert_eq!(outstanding.load(Ordering::Relaxed), 3);

        assert_eq!(tracker.drain(Duration::from_secs(1)).await, 0);
        assert!(tracker.is_empty());
        assert_eq!(outstanding.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_after_grace() {
        let mut tracker = DispatchTracker::new(8);
        tracker
            .track(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                DispatchOutcome::NoHandlers
            })
            .await;
        tracker.track(async { DispatchOutcome::NoHandlers }).await;

        assert_eq!(tracker.drain(Duration::from_millis(50)).await, 1);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_dispatch_is_logged_not_propagated() {
        async fn explode() -> DispatchOutcome {
            panic!("dispatch blew up");
        }

        let mut tracker = DispatchTracker::new(2);
        tracker.track(explode()).await;
        assert_eq!(tracker.drain(Duration::from_secs(1)).await, 0);
    }
}
