//! Event source bridge.
//!
//! Request handlers call [`EventBridge::submit`] after a progress change has
//! been persisted. The event goes into a bounded queue drained by the
//! push-stream broadcaster. A full queue drops the submitted event: a newer
//! progress update supersedes an undelivered older one, so the producer is
//! never slowed down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::metrics::BridgeMetrics;
use crate::models::ProgressUpdate;

/// Receiving end consumed by the push-stream delivery loop
pub type BridgeReceiver = mpsc::Receiver<ProgressUpdate>;

/// Result of a submit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Queued,
    /// Queue full, the submitted event was discarded
    Dropped,
    /// Broadcaster no longer running, the event was discarded
    Closed,
}

impl SubmitOutcome {
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued)
    }
}

#[derive(Debug, Default)]
struct BridgeCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of bridge statistics
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub capacity: usize,
    pub queued: usize,
    pub submitted: u64,
    pub dropped: u64,
}

#[derive(Clone)]
pub struct EventBridge {
    sender: mpsc::Sender<ProgressUpdate>,
    counters: Arc<BridgeCounters>,
}

impl EventBridge {
    /// Create the bridge and the receiver the broadcaster drains.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (rejected earlier by `Settings::validate`).
    pub fn new(capacity: usize) -> (Self, BridgeReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        let bridge = Self {
            sender,
            counters: Arc::new(BridgeCounters::default()),
        };
        (bridge, receiver)
    }

    /// Enqueue without blocking. Never fails from the caller's point of view.
    pub fn submit(&self, event: ProgressUpdate) -> SubmitOutcome {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        BridgeMetrics::record_submitted();

        match self.sender.try_send(event) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(event)) => {
                self.record_drop();
                tracing::warn!(
                    user_id = %event.user_id,
                    manga_id = %event.manga_id,
                    chapter = event.chapter,
                    capacity = self.sender.max_capacity(),
                    "Progress queue full, dropping event"
                );
                SubmitOutcome::Dropped
            }
            Err(TrySendError::Closed(event)) => {
                self.record_drop();
                tracing::warn!(
                    user_id = %event.user_id,
                    manga_id = %event.manga_id,
                    "Push-stream broadcaster is not running, dropping event"
                );
                SubmitOutcome::Closed
            }
        }
    }

    fn record_drop(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        BridgeMetrics::record_dropped();
    }

    pub fn stats(&self) -> BridgeStats {
        let capacity = self.sender.max_capacity();
        BridgeStats {
            capacity,
            queued: capacity - self.sender.capacity(),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::BRIDGE_DROPPED_TOTAL;

    fn update(chapter: i64) -> ProgressUpdate {
        ProgressUpdate::new("user-1", "berserk", chapter)
    }

    #[tokio::test]
    async fn test_overflow_drops_newest_and_keeps_the_rest() {
        let capacity = 3;
        let (bridge, mut rx) = EventBridge::new(capacity);

        for chapter in 1..=capacity as i64 {
            assert_eq!(bridge.submit(update(chapter)), SubmitOutcome::Queued);
        }
        // The counter is process-wide and other tests may drop concurrently
        let exported_before = BRIDGE_DROPPED_TOTAL.get();
        assert_eq!(bridge.submit(update(99)), SubmitOutcome::Dropped);
        assert!(BRIDGE_DROPPED_TOTAL.get() > exported_before);

        let stats = bridge.stats();
        assert_eq!(stats.submitted, 4);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.queued, capacity);

        drop(bridge);
        let mut delivered = Vec::new();
        while let Some(event) = rx.recv().await {
            delivered.push(event.chapter);
        }
        assert_eq!(delivered, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_submit_after_receiver_dropped_reports_closed() {
        let (bridge, rx) = EventBridge::new(4);
        drop(rx);

        assert_eq!(bridge.submit(update(1)), SubmitOutcome::Closed);
        assert_eq!(bridge.stats().dropped, 1);
    }

    #[test]
    fn test_draining_frees_capacity() {
        let (bridge, mut rx) = EventBridge::new(1);

        assert!(bridge.submit(update(1)).is_queued());
        assert!(!bridge.submit(update(2)).is_queued());

        let drained = tokio_test::block_on(rx.recv());
        assert_eq!(drained.map(|e| e.chapter), Some(1));
        assert!(bridge.submit(update(3)).is_queued());
        assert_eq!(bridge.stats().queued, 1);
    }
}
