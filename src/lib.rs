//! pointflow: request-level flow control for a batch compute service.
//!
//! This library keeps a fixed number of requests in flight against a remote
//! executor, retries failed or timed-out items from the tail of a FIFO
//! backlog, and reports a per-item summary once every item is settled.

pub mod cli;
pub mod error;
pub mod executor;
pub mod loader;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use error::{ExecutorError, FlowError, LoadError};
pub use executor::{ExecOutcome, RemoteExecutor};
pub use scheduler::{RunConfig, RunController, RunHandle, RunSummary, WorkItem};
