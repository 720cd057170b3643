//! Remote executor boundary.
//!
//! The dispatcher hands each admitted item to a `RemoteExecutor` and only
//! looks at the coarse outcome. Deadlines are enforced by the dispatcher, so
//! implementations may take as long as they like; a response that arrives
//! after the deadline is dropped unseen.

pub mod http;

use async_trait::async_trait;

use crate::scheduler::WorkItem;

pub use http::{HttpExecutor, HttpExecutorConfig};

/// Outcome of a single attempt as reported by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// The remote operation succeeded.
    Success(serde_json::Value),
    /// The remote operation failed; the item may be retried.
    Failure(String),
    /// The executor cannot do any work at all (for example, the service is
    /// unreachable). Aborts the whole run.
    Fatal(String),
}

impl ExecOutcome {
    /// Creates a failure outcome.
    pub fn failure(reason: impl Into<String>) -> Self {
        ExecOutcome::Failure(reason.into())
    }

    /// Returns whether the attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecOutcome::Success(_))
    }
}

/// Performs the slow operation for one item.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs one attempt for `item`. `item.attempt_number()` is the one-based
    /// attempt being made.
    async fn execute(&self, item: &WorkItem) -> ExecOutcome;
}
