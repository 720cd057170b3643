//! Flow control, retry and dispatch for a batch of work items.
//!
//! This module keeps a fixed number of requests outstanding against a remote
//! executor until every item has reached a terminal outcome:
//!
//! - **Backlog**: FIFO of items waiting for a slot; retries go to the tail
//! - **ConcurrencyWindow**: at most N attempts in flight, refilled as soon as
//!   any attempt finishes
//! - **RetryManager**: per-item attempt budget
//! - **CompletionTracker**: counters, per-item results and throughput
//! - **RunController**: one run's lifecycle, cancellation and status
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐
//!    │   Backlog    │◄──────────── retry (tail) ───────────┐
//!    └──────┬───────┘                                      │
//!           │ pop head                                     │
//!    ┌──────▼───────┐   slot    ┌─────────┐        ┌──────┴───────┐
//!    │  Dispatcher  │──────────►│ Attempt │───────►│ RetryManager │
//!    └──────────────┘           │  (x N)  │        └──────┬───────┘
//!           ▲                   └────┬────┘               │ terminal
//!           │ slot freed             │                    ▼
//!    ┌──────┴───────┐                │          ┌──────────────────┐
//!    │    Window    │◄───────────────┘          │ CompletionTracker│
//!    └──────────────┘                           └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use pointflow::executor::{HttpExecutor, HttpExecutorConfig};
//! use pointflow::scheduler::{RunConfig, RunController, WorkItem};
//! use std::sync::Arc;
//!
//! let executor = HttpExecutor::new(HttpExecutorConfig::new("http://localhost:8000/process"))?;
//! let controller = RunController::new(Arc::new(executor));
//!
//! let items = vec![WorkItem::new("p-1", serde_json::json!({"value": 1}))];
//! let run = controller.start(items, &RunConfig::new(50))?;
//!
//! let handle = run.handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.cancel();
//! });
//!
//! let summary = run.wait().await?;
//! println!("{summary}");
//! ```

pub mod config;
pub mod controller;
mod dispatcher;
pub mod job;
pub mod queue;
pub mod retry;
pub mod summary;
pub mod tracker;
pub mod window;

// Re-export main types for convenience
pub use config::{ConfigError, RunConfig};
pub use controller::{ActiveRun, RunController, RunHandle};
pub use job::{ItemResult, ItemStatus, WorkItem};
pub use queue::Backlog;
pub use retry::{AttemptOutcome, RetryDecision, RetryManager};
pub use summary::RunSummary;
pub use tracker::{CompletionTracker, StatusSnapshot};
pub use window::{ConcurrencyWindow, WindowSlot};
