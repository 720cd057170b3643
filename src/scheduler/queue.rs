//! In-memory FIFO backlog with run-completion tracking.
//!
//! The backlog holds every item that is waiting for a window slot. It also
//! owns the run's *outstanding* count: the number of items that have been
//! submitted but have not yet reached a terminal outcome, wherever they
//! currently live (queued, in flight, or sleeping before a retry).
//!
//! # Completion detection
//!
//! A run is done when the backlog is empty, the window is drained, and no
//! retry is about to be re-enqueued. All three collapse into a single
//! condition, `outstanding == 0`, because:
//!
//! - every queued item is outstanding,
//! - an in-flight item stays outstanding until its terminal outcome is
//!   settled (a retry is pushed back *before* anything is settled),
//! - an item sleeping before its retry is still outstanding.
//!
//! The count only changes under the backlog lock and is published through a
//! `watch` channel, so observers never see a half-updated state.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{watch, Notify};

use super::job::WorkItem;

#[derive(Debug, Default)]
struct BacklogState {
    items: VecDeque<WorkItem>,
    next_sequence: u64,
    outstanding: usize,
    closed: bool,
}

/// FIFO queue of items awaiting admission.
///
/// The dispatcher is the only consumer; producers are the run controller
/// (initial submission) and the retry path (re-enqueue at the tail).
#[derive(Debug)]
pub struct Backlog {
    state: Mutex<BacklogState>,
    /// Wakes the dispatcher when items arrive or the run drains.
    notify: Notify,
    outstanding_tx: watch::Sender<usize>,
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new()
    }
}

impl Backlog {
    /// Creates an empty backlog.
    pub fn new() -> Self {
        let (outstanding_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(BacklogState::default()),
            notify: Notify::new(),
            outstanding_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BacklogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Submits a new item, assigning its sequence number.
    ///
    /// Returns the assigned sequence number, or `None` if the backlog has been
    /// closed (the item is dropped).
    pub fn push_new(&self, mut item: WorkItem) -> Option<u64> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        item.sequence = sequence;
        state.items.push_back(item);
        state.outstanding += 1;
        self.outstanding_tx.send_replace(state.outstanding);
        drop(state);

        self.notify.notify_one();
        Some(sequence)
    }

    /// Submits a batch of new items in order.
    ///
    /// Returns the number of items accepted.
    pub fn extend(&self, items: impl IntoIterator<Item = WorkItem>) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }

        let mut accepted = 0;
        for mut item in items {
            item.sequence = state.next_sequence;
            state.next_sequence += 1;
            state.items.push_back(item);
            accepted += 1;
        }
        state.outstanding += accepted;
        self.outstanding_tx.send_replace(state.outstanding);
        drop(state);

        if accepted > 0 {
            self.notify.notify_one();
        }
        accepted
    }

    /// Puts a failed item back at the tail for another attempt.
    ///
    /// The item keeps its original sequence number. Returns the item back if
    /// the backlog is closed, so the caller can account for it.
    pub fn requeue(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Removes and returns the head of the queue.
    pub fn pop(&self) -> Option<WorkItem> {
        self.lock().items.pop_front()
    }

    /// Marks one outstanding item as terminal.
    pub fn settle(&self) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        let drained = state.outstanding == 0;
        self.outstanding_tx.send_replace(state.outstanding);
        drop(state);

        if drained {
            self.notify.notify_one();
        }
    }

    /// Closes the backlog and returns every item still queued.
    ///
    /// Drained items are settled immediately; the caller is responsible for
    /// reporting them. Further pushes and requeues are refused.
    pub fn close(&self) -> Vec<WorkItem> {
        let mut state = self.lock();
        state.closed = true;
        let drained: Vec<WorkItem> = state.items.drain(..).collect();
        state.outstanding = state.outstanding.saturating_sub(drained.len());
        self.outstanding_tx.send_replace(state.outstanding);
        drop(state);

        self.notify.notify_one();
        drained
    }

    /// Suspends until the backlog has at least one item, or returns `false`
    /// once there is nothing left to wait for (run drained or backlog closed).
    pub async fn wait_for_work(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.lock();
                if !state.items.is_empty() {
                    return true;
                }
                if state.closed || state.outstanding == 0 {
                    return false;
                }
            }
            notified.await;
        }
    }

    /// Suspends until every submitted item has reached a terminal outcome.
    pub async fn wait_drained(&self) {
        let mut rx = self.outstanding_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|outstanding| *outstanding == 0).await;
    }

    /// Returns a receiver that observes the outstanding count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.outstanding_tx.subscribe()
    }

    /// Number of items waiting in the queue.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items that have not reached a terminal outcome.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Returns whether the backlog has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn item(id: &str) -> WorkItem {
        WorkItem::new(id, json!({ "id": id }))
    }

    #[test]
    fn test_push_assigns_monotonic_sequence() {
        let backlog = Backlog::new();

        assert_eq!(backlog.push_new(item("a")), Some(0));
        assert_eq!(backlog.push_new(item("b")), Some(1));
        assert_eq!(backlog.extend(vec![item("c"), item("d")]), 2);

        let sequences: Vec<u64> = std::iter::from_fn(|| backlog.pop())
            .map(|i| i.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(backlog.outstanding(), 4);
    }

    #[test]
    fn test_requeue_goes_to_tail_and_keeps_sequence() {
        let backlog = Backlog::new();
        backlog.extend(vec![item("a"), item("b"), item("c")]);

        let mut first = backlog.pop().expect("head");
        first.record_failure("transient");
        backlog.requeue(first).expect("open backlog accepts requeue");

        let order: Vec<(String, u64)> = std::iter::from_fn(|| backlog.pop())
            .map(|i| (i.id, i.sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                ("b".to_string(), 1),
                ("c".to_string(), 2),
                ("a".to_string(), 0)
            ]
        );
        // Requeue does not count as a new submission.
        assert_eq!(backlog.outstanding(), 3);
    }

    #[test]
    fn test_settle_decrements_outstanding() {
        let backlog = Backlog::new();
        backlog.extend(vec![item("a"), item("b")]);
        let rx = backlog.subscribe();

        backlog.pop();
        backlog.settle();
        assert_eq!(*rx.borrow(), 1);

        backlog.pop();
        backlog.settle();
        assert_eq!(*rx.borrow(), 0);
        assert_eq!(backlog.outstanding(), 0);
    }

    #[test]
    fn test_close_drains_and_refuses_new_work() {
        let backlog = Backlog::new();
        backlog.extend(vec![item("a"), item("b"), item("c")]);
        let in_flight = backlog.pop().expect("head");

        let drained = backlog.close();
        assert_eq!(drained.len(), 2);
        assert!(backlog.is_closed());
        // The popped item is still outstanding.
        assert_eq!(backlog.outstanding(), 1);

        assert_eq!(backlog.push_new(item("d")), None);
        let rejected = backlog.requeue(in_flight).unwrap_err();
        assert_eq!(rejected.id, "a");
    }

    #[tokio::test]
    async fn test_wait_for_work_wakes_on_push() {
        let backlog = Arc::new(Backlog::new());
        backlog.push_new(item("a"));
        let held = backlog.pop().expect("head");

        let waiter = {
            let backlog = Arc::clone(&backlog);
            tokio::spawn(async move { backlog.wait_for_work().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        backlog.requeue(held).expect("requeue");

        let has_work = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("task should not panic");
        assert!(has_work);
    }

    #[tokio::test]
    async fn test_wait_for_work_returns_false_when_drained() {
        let backlog = Backlog::new();
        assert!(!backlog.wait_for_work().await);

        backlog.push_new(item("a"));
        backlog.pop();
        backlog.settle();
        assert!(!backlog.wait_for_work().await);
    }

    #[tokio::test]
    async fn test_wait_drained_completes_after_last_settle() {
        let backlog = Arc::new(Backlog::new());
        backlog.extend(vec![item("a"), item("b")]);

        let waiter = {
            let backlog = Arc::clone(&backlog);
            tokio::spawn(async move { backlog.wait_drained().await })
        };

        backlog.pop();
        backlog.settle();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        backlog.pop();
        backlog.settle();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("drain should be observed")
            .expect("task should not panic");
    }
}
