//! Error types for pointflow operations.
//!
//! Per-item failures (remote errors, timeouts) are not errors at this level:
//! they are absorbed by the retry path and reported in the run summary. The
//! types here cover what can stop a run or a surrounding command:
//! - Run-level aborts (bad configuration, unusable executor)
//! - Remote executor setup and health checks
//! - Loading points from disk

use thiserror::Error;

use crate::scheduler::{ConfigError, RunSummary};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    /// The executor reported a fatal fault. `summary` accounts for every
    /// item up to the point the run stopped.
    #[error("Remote executor unavailable: {reason}")]
    ExecutorUnavailable {
        reason: String,
        summary: Box<RunSummary>,
    },

    #[error("Run task failed: {0}")]
    TaskFailed(String),
}

impl FlowError {
    /// Summary of the items handled before the run was aborted, if any.
    pub fn partial_summary(&self) -> Option<&RunSummary> {
        match self {
            FlowError::ExecutorUnavailable { summary, .. } => Some(summary.as_ref()),
            _ => None,
        }
    }
}

/// Errors from setting up or probing a remote executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Service unreachable: {0}")]
    Unreachable(String),

    #[error("Service reported unhealthy status {code}")]
    Unhealthy { code: u16 },
}

/// Errors that can occur while loading points.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Point at line {line} has no usable 'id' field")]
    MissingId { line: usize },

    #[error("Point at line {line} is not a JSON object")]
    NotAnObject { line: usize },

    #[error("Invalid JSON at line {line}: {source}")]
    InvalidJson {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {field} '{value}' at line {line}")]
    InvalidField {
        line: usize,
        field: String,
        value: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_error_from_config() {
        let err: FlowError = ConfigError::ValidationFailed("concurrency".to_string()).into();
        assert!(err.to_string().contains("Invalid run configuration"));
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_error_display() {
        let err = ExecutorError::Unhealthy { code: 503 };
        assert!(err.to_string().contains("503"));

        let err = LoadError::MissingId { line: 4 };
        assert!(err.to_string().contains("line 4"));

    }
}
