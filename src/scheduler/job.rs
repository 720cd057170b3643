//! Work item definitions for the dispatcher.
//!
//! This module defines the core types that flow through a run:
//!
//! - `WorkItem`: A unit of work waiting in the backlog or in flight
//! - `ItemStatus`: Terminal status of an item once the run is done with it
//! - `ItemResult`: Per-item record kept in the run summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single point of work to be pushed through the remote executor.
///
/// Items are moved, never shared: at any moment an item is owned by the
/// backlog, by the task running its current attempt, or by the outcome
/// ledger once it is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier supplied by the caller.
    pub id: String,
    /// Opaque payload forwarded to the executor untouched.
    pub payload: serde_json::Value,
    /// Number of attempts that have failed so far.
    pub attempts: u32,
    /// Submission sequence number, assigned by the backlog on first enqueue.
    pub sequence: u64,
    /// When the most recent attempt was started.
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Reason the most recent attempt failed.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkItem {
    /// Creates a fresh item with no attempt history.
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            attempts: 0,
            sequence: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// One-based number of the attempt that is about to run (or running).
    pub fn attempt_number(&self) -> u32 {
        self.attempts + 1
    }

    /// Stamps the start of a new attempt.
    pub fn begin_attempt(&mut self) {
        self.last_attempt_at = Some(Utc::now());
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(reason.into());
    }

    /// Returns whether another attempt fits in a budget of `max_attempts`.
    pub fn should_retry(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// Returns how many attempts are left in a budget of `max_attempts`.
    pub fn remaining_attempts(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.attempts)
    }
}

/// Terminal status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// The executor reported success.
    Succeeded,
    /// Every attempt in the retry budget failed or timed out.
    Failed,
    /// The item was admitted but the run was cancelled before it could finish
    /// (its last attempt failed and no retry was scheduled).
    Cancelled,
    /// The run was cancelled before the item was ever admitted.
    Unprocessed,
}

impl ItemStatus {
    /// Label used for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Failed => "failed",
            ItemStatus::Cancelled => "cancelled",
            ItemStatus::Unprocessed => "unprocessed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Record of what happened to one item over the course of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    /// ID of the item.
    pub item_id: String,
    /// Submission sequence number of the item.
    pub sequence: u64,
    /// Final status.
    pub status: ItemStatus,
    /// Number of attempts actually made against the executor.
    pub attempts: u32,
    /// Last failure reason, if any attempt failed.
    pub error: Option<String>,
    /// Result returned by the executor on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// When the item reached its terminal status.
    pub completed_at: DateTime<Utc>,
}

impl ItemResult {
    /// Creates a success record. `item.attempts` counts earlier failures only.
    pub fn success(item: &WorkItem, output: serde_json::Value) -> Self {
        Self {
            item_id: item.id.clone(),
            sequence: item.sequence,
            status: ItemStatus::Succeeded,
            attempts: item.attempts + 1,
            error: item.last_error.clone(),
            output: Some(output),
            completed_at: Utc::now(),
        }
    }

    /// Creates a record for an item whose retry budget is spent.
    pub fn exhausted(item: &WorkItem) -> Self {
        Self {
            item_id: item.id.clone(),
            sequence: item.sequence,
            status: ItemStatus::Failed,
            attempts: item.attempts,
            error: item.last_error.clone(),
            output: None,
            completed_at: Utc::now(),
        }
    }

    /// Creates a record for an admitted item dropped by cancellation.
    pub fn cancelled(item: &WorkItem) -> Self {
        Self {
            item_id: item.id.clone(),
            sequence: item.sequence,
            status: ItemStatus::Cancelled,
            attempts: item.attempts,
            error: item.last_error.clone(),
            output: None,
            completed_at: Utc::now(),
        }
    }

    /// Creates a record for an item that never left the backlog.
    pub fn unprocessed(item: &WorkItem) -> Self {
        Self {
            item_id: item.id.clone(),
            sequence: item.sequence,
            status: ItemStatus::Unprocessed,
            attempts: item.attempts,
            error: item.last_error.clone(),
            output: None,
            completed_at: Utc::now(),
        }
    }

    /// Returns whether the item completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Succeeded
    }
}
