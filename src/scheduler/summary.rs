//! Final report of a run.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{ItemResult, ItemStatus};

/// Aggregate outcome of one run, finalized when the run terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Identifier of the run (also attached to its log lines).
    pub run_id: Uuid,
    /// Configured window size.
    pub concurrency: usize,
    pub submitted: u64,
    pub succeeded: u64,
    /// Items whose retry budget was exhausted.
    pub failed: u64,
    /// Admitted items dropped because the run was cancelled.
    pub cancelled: u64,
    /// Items never admitted because the run was cancelled.
    pub unprocessed: u64,
    /// Attempts made against the executor (>= items that were admitted).
    pub attempts: u64,
    /// Re-enqueues performed.
    pub retries: u64,
    /// Attempts that hit the request deadline.
    pub timeouts: u64,
    /// Highest window occupancy observed.
    pub peak_in_flight: usize,
    pub elapsed_secs: f64,
    /// Terminal completions per second over the whole run.
    pub throughput_per_sec: f64,
    /// Whether the run was stopped by a cancellation signal.
    pub was_cancelled: bool,
    /// Per-item results ordered by submission sequence.
    pub items: Vec<ItemResult>,
}

impl RunSummary {
    /// Wall time of the run.
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs)
    }

    /// Items that ended with an exhausted retry budget.
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.with_status(ItemStatus::Failed)
    }

    /// Items with the given terminal status.
    pub fn with_status(&self, status: ItemStatus) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(move |r| r.status == status)
    }

    /// Looks up the result for an item.
    pub fn item(&self, id: &str) -> Option<&ItemResult> {
        self.items.iter().find(|r| r.item_id == id)
    }

    /// Returns whether every submitted item is accounted for exactly once.
    pub fn is_balanced(&self) -> bool {
        self.succeeded + self.failed + self.cancelled + self.unprocessed == self.submitted
            && self.items.len() as u64 == self.submitted
    }

    /// Success rate over items that reached success or exhaustion.
    pub fn success_rate(&self) -> f64 {
        let finished = self.succeeded + self.failed;
        if finished == 0 {
            return 0.0;
        }
        (self.succeeded as f64 / finished as f64) * 100.0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} ({} slots)", self.run_id, self.concurrency)?;
        writeln!(
            f,
            "  submitted: {}  succeeded: {}  failed: {}  cancelled: {}  unprocessed: {}",
            self.submitted, self.succeeded, self.failed, self.cancelled, self.unprocessed
        )?;
        writeln!(
            f,
            "  attempts: {}  retries: {}  timeouts: {}  peak in-flight: {}",
            self.attempts, self.retries, self.timeouts, self.peak_in_flight
        )?;
        writeln!(
            f,
            "  elapsed: {:.2}s  throughput: {:.2}/s  success rate: {:.1}%",
            self.elapsed_secs,
            self.throughput_per_sec,
            self.success_rate()
        )?;

        for failure in self.failures() {
            writeln!(
                f,
                "  FAILED {} after {} attempts: {}",
                failure.item_id,
                failure.attempts,
                failure.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        if self.cancelled > 0 {
            let ids: Vec<&str> = self
                .with_status(ItemStatus::Cancelled)
                .map(|r| r.item_id.as_str())
                .collect();
            writeln!(f, "  cancelled: {}", ids.join(", "))?;
        }
        if self.unprocessed > 0 {
            writeln!(f, "  {} items left unprocessed", self.unprocessed)?;
        }
        Ok(())
    }
}
