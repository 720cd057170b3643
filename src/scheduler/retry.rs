//! Retry decisions for completed attempts.
//!
//! Failed items go back to the *tail* of the backlog, behind every item that
//! is already waiting. Fresh items and retries therefore interleave in arrival
//! order, and a persistently failing item cannot monopolise the window by
//! retrying in a tight loop.

use std::time::Duration;

use super::config::RunConfig;
use super::job::{ItemResult, WorkItem};
use crate::executor::ExecOutcome;

/// How a single attempt ended, from the dispatcher's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The executor reported success.
    Success(serde_json::Value),
    /// The executor reported an explicit failure.
    Failure(String),
    /// No response arrived before the request deadline.
    TimedOut(Duration),
    /// The executor is unusable; the run must stop.
    Fatal(String),
}

impl AttemptOutcome {
    /// Label used for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success(_) => "success",
            AttemptOutcome::Failure(_) => "failure",
            AttemptOutcome::TimedOut(_) => "timeout",
            AttemptOutcome::Fatal(_) => "fatal",
        }
    }
}

impl From<ExecOutcome> for AttemptOutcome {
    fn from(outcome: ExecOutcome) -> Self {
        match outcome {
            ExecOutcome::Success(value) => AttemptOutcome::Success(value),
            ExecOutcome::Failure(reason) => AttemptOutcome::Failure(reason),
            ExecOutcome::Fatal(reason) => AttemptOutcome::Fatal(reason),
        }
    }
}

/// What to do with an item after an attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Terminal success.
    Succeeded(ItemResult),
    /// Transient failure with budget left; re-enqueue the item.
    Retry(WorkItem),
    /// Budget spent; terminal failure.
    Exhausted(ItemResult),
    /// Infrastructure fault; stop the run. The item carries the fault as its
    /// last error.
    Abort { item: WorkItem, reason: String },
}

/// Applies the per-item attempt budget.
#[derive(Debug, Clone)]
pub struct RetryManager {
    max_attempts: u32,
    retry_delay: Duration,
}

impl RetryManager {
    /// Creates a manager allowing `max_attempts` attempts per item.
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
        }
    }

    /// Creates a manager from a run configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay)
    }

    /// Attempt budget per item.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause before a retry is re-enqueued.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Interprets the outcome of an attempt on `item`.
    pub fn decide(&self, mut item: WorkItem, outcome: AttemptOutcome) -> RetryDecision {
        let reason = match outcome {
            AttemptOutcome::Success(output) => {
                return RetryDecision::Succeeded(ItemResult::success(&item, output));
            }
            AttemptOutcome::Fatal(reason) => {
                item.record_failure(reason.clone());
                return RetryDecision::Abort { item, reason };
            }
            AttemptOutcome::Failure(reason) => reason,
            AttemptOutcome::TimedOut(after) => format!("Request timeout after {:?}", after),
        };

        item.record_failure(reason);
        if item.should_retry(self.max_attempts) {
            RetryDecision::Retry(item)
        } else {
            RetryDecision::Exhausted(ItemResult::exhausted(&item))
        }
    }
}
