//! Completion tracking and throughput estimation.
//!
//! Counters are plain atomics so status snapshots can be taken at any time
//! without pausing dispatch. Terminal events also stamp a timestamp into a
//! trailing window that backs the throughput estimate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::job::{ItemResult, ItemStatus};
use super::retry::AttemptOutcome;

/// Shared per-run counters.
#[derive(Debug)]
pub struct CompletionTracker {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    unprocessed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    started_at: Instant,
    throughput_window: Duration,
    recent: Mutex<VecDeque<Instant>>,
    results: Mutex<Vec<ItemResult>>,
}

impl CompletionTracker {
    /// Creates a tracker whose clock starts now.
    pub fn new(throughput_window: Duration) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            unprocessed: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            started_at: Instant::now(),
            throughput_window,
            recent: Mutex::new(VecDeque::new()),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Records `count` newly submitted items.
    pub fn record_submitted(&self, count: u64) {
        self.submitted.fetch_add(count, Ordering::SeqCst);
    }

    /// Records that an attempt was handed to the executor.
    pub fn record_attempt_started(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    /// Records how an attempt ended.
    pub fn record_attempt(&self, outcome: &AttemptOutcome) {
        if matches!(outcome, AttemptOutcome::TimedOut(_)) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Records that a failed item was scheduled for another attempt.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a terminal outcome and keeps the item's result.
    pub fn record_terminal(&self, result: ItemResult) {
        let counter = match result.status {
            ItemStatus::Succeeded => &self.succeeded,
            ItemStatus::Failed => &self.failed,
            ItemStatus::Cancelled => &self.cancelled,
            ItemStatus::Unprocessed => &self.unprocessed,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if matches!(result.status, ItemStatus::Succeeded | ItemStatus::Failed) {
            let now = Instant::now();
            let mut recent = lock(&self.recent);
            recent.push_back(now);
            prune(&mut recent, now, self.throughput_window);
        }

        lock(&self.results).push(result);
    }

    /// Completions per second over the trailing window (or over the whole
    /// run while it is younger than the window).
    pub fn throughput(&self) -> f64 {
        let now = Instant::now();
        let span = now
            .duration_since(self.started_at)
            .min(self.throughput_window);
        if span.is_zero() {
            return 0.0;
        }

        let mut recent = lock(&self.recent);
        prune(&mut recent, now, self.throughput_window);
        recent.len() as f64 / span.as_secs_f64()
    }

    /// Completions per second averaged over the whole run so far.
    pub fn average_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.succeeded() + self.failed()) as f64 / elapsed
    }

    /// Time since the tracker was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn unprocessed(&self) -> u64 {
        self.unprocessed.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::SeqCst)
    }

    /// Takes every recorded result, ordered by submission sequence.
    pub fn take_results(&self) -> Vec<ItemResult> {
        let mut results = std::mem::take(&mut *lock(&self.results));
        results.sort_by_key(|r| r.sequence);
        results
    }

    /// Builds a point-in-time status snapshot.
    pub fn snapshot(
        &self,
        in_flight: usize,
        backlog_depth: usize,
        concurrency: usize,
    ) -> StatusSnapshot {
        StatusSnapshot {
            in_flight,
            backlog_depth,
            concurrency,
            submitted: self.submitted(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            cancelled: self.cancelled(),
            retried: self.retries(),
            attempts: self.attempts(),
            timeouts: self.timeouts(),
            elapsed_secs: self.elapsed().as_secs_f64(),
            throughput_per_sec: self.throughput(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn prune(recent: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = recent.front() {
        if now.duration_since(oldest) > window {
            recent.pop_front();
        } else {
            break;
        }
    }
}

/// Read-only view of a run for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Attempts currently outstanding with the executor.
    pub in_flight: usize,
    /// Items waiting for a window slot.
    pub backlog_depth: usize,
    /// Configured window size.
    pub concurrency: usize,
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Number of re-enqueues performed.
    pub retried: u64,
    /// Number of attempts started.
    pub attempts: u64,
    pub timeouts: u64,
    pub elapsed_secs: f64,
    /// Completions per second over the trailing window.
    pub throughput_per_sec: f64,
}

impl StatusSnapshot {
    /// Window utilisation as a percentage.
    pub fn utilization_percent(&self) -> f64 {
        if self.concurrency == 0 {
            return 0.0;
        }
        (self.in_flight as f64 / self.concurrency as f64) * 100.0
    }
}
