//! Run controller: ties the backlog, window, dispatcher and tracker together
//! for one run, and exposes cancellation and status while the run is live.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::config::RunConfig;
use super::dispatcher::{leftover_result, DispatchExit, Dispatcher, RunContext};
use super::job::WorkItem;
use super::summary::RunSummary;
use super::tracker::StatusSnapshot;
use crate::error::FlowError;
use crate::executor::RemoteExecutor;
use crate::metrics::{FlowMetrics, MetricsCollector};

/// Starts runs against a remote executor.
///
/// Every run gets fresh state, so the same controller can be used for
/// back-to-back runs (for example from a periodic scheduler).
#[derive(Clone)]
pub struct RunController {
    executor: Arc<dyn RemoteExecutor>,
    metrics: Option<Arc<FlowMetrics>>,
}

impl RunController {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            metrics: None,
        }
    }

    /// Records attempt and item metrics into `metrics` for every run.
    pub fn with_metrics(mut self, metrics: Arc<FlowMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Processes `items` to completion and returns the summary.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Config` before anything is dispatched if the
    /// configuration is invalid, and `FlowError::ExecutorUnavailable` if the
    /// executor reported a fatal condition. The latter carries the summary of
    /// everything that was settled before the run stopped.
    pub async fn run(
        &self,
        items: Vec<WorkItem>,
        config: &RunConfig,
    ) -> Result<RunSummary, FlowError> {
        self.start(items, config)?.wait().await
    }

    /// Starts a run in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, items: Vec<WorkItem>, config: &RunConfig) -> Result<ActiveRun, FlowError> {
        config.validate()?;

        let metrics = match &self.metrics {
            Some(metrics) => MetricsCollector::new(Arc::clone(metrics)),
            None => MetricsCollector::disabled(),
        };
        let ctx = Arc::new(RunContext::new(config.clone(), metrics));

        let submitted = ctx.backlog.extend(items);
        ctx.tracker.record_submitted(submitted as u64);
        ctx.metrics.set_occupancy(0, ctx.backlog.len());

        info!(
            run_id = %ctx.run_id,
            submitted = submitted,
            concurrency = config.concurrency,
            request_timeout = ?config.request_timeout,
            max_retries = config.max_retries,
            "Starting run"
        );

        let handle = RunHandle {
            ctx: Arc::clone(&ctx),
        };
        let join = tokio::spawn(drive(ctx, Arc::clone(&self.executor)));

        Ok(ActiveRun { handle, join })
    }
}

/// A run in progress.
pub struct ActiveRun {
    handle: RunHandle,
    join: JoinHandle<Result<RunSummary, FlowError>>,
}

impl ActiveRun {
    /// Returns a handle that can cancel or observe this run.
    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Waits for the run to terminate.
    pub async fn wait(self) -> Result<RunSummary, FlowError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(FlowError::TaskFailed(e.to_string())),
        }
    }
}

/// Cancels or observes a live run. Cheap to clone.
#[derive(Clone)]
pub struct RunHandle {
    ctx: Arc<RunContext>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id
    }

    /// Stops admitting new attempts.
    ///
    /// Attempts already in flight run to completion or timeout; retries are
    /// no longer scheduled and items still in the backlog are reported as
    /// unprocessed. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        if !self.ctx.cancel.is_cancelled() {
            info!(run_id = %self.ctx.run_id, "Cancellation requested");
        }
        self.ctx.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    /// Current counts and rates.
    pub fn status(&self) -> StatusSnapshot {
        status_of(&self.ctx)
    }
}

fn status_of(ctx: &RunContext) -> StatusSnapshot {
    ctx.tracker.snapshot(
        ctx.window.occupied(),
        ctx.backlog.len(),
        ctx.window.capacity(),
    )
}

async fn drive(
    ctx: Arc<RunContext>,
    executor: Arc<dyn RemoteExecutor>,
) -> Result<RunSummary, FlowError> {
    let stop_progress = CancellationToken::new();
    let progress = spawn_progress_reporter(Arc::clone(&ctx), stop_progress.clone());

    let exit = Dispatcher::new(Arc::clone(&ctx), executor).run().await;

    stop_progress.cancel();
    if let Err(e) = progress.await {
        warn!(run_id = %ctx.run_id, error = %e, "Progress reporter failed");
    }

    ctx.window.close();
    if exit == DispatchExit::Stopped {
        let leftover = ctx.backlog.close();
        if !leftover.is_empty() {
            warn!(
                run_id = %ctx.run_id,
                count = leftover.len(),
                "Run stopped with items still in the backlog"
            );
        }
        // `close` already released these items from the outstanding count.
        for item in &leftover {
            let result = leftover_result(item);
            ctx.metrics.record_terminal(result.status);
            ctx.tracker.record_terminal(result);
        }
    }
    ctx.backlog.wait_drained().await;
    ctx.metrics
        .set_occupancy(ctx.window.occupied(), ctx.backlog.len());

    let summary = summarize(&ctx);
    if let Some(reason) = ctx.abort_reason() {
        error!(
            run_id = %ctx.run_id,
            error = %reason,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Run aborted"
        );
        return Err(FlowError::ExecutorUnavailable {
            reason,
            summary: Box::new(summary),
        });
    }

    info!(
        run_id = %summary.run_id,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        unprocessed = summary.unprocessed,
        retries = summary.retries,
        elapsed_secs = summary.elapsed_secs,
        "Run finished"
    );
    Ok(summary)
}

fn summarize(ctx: &RunContext) -> RunSummary {
    let tracker = &ctx.tracker;
    RunSummary {
        run_id: ctx.run_id,
        concurrency: ctx.window.capacity(),
        submitted: tracker.submitted(),
        succeeded: tracker.succeeded(),
        failed: tracker.failed(),
        cancelled: tracker.cancelled(),
        unprocessed: tracker.unprocessed(),
        attempts: tracker.attempts(),
        retries: tracker.retries(),
        timeouts: tracker.timeouts(),
        peak_in_flight: ctx.window.peak(),
        elapsed_secs: tracker.elapsed().as_secs_f64(),
        throughput_per_sec: tracker.average_throughput(),
        was_cancelled: ctx.cancel.is_cancelled() && ctx.abort_reason().is_none(),
        items: tracker.take_results(),
    }
}

fn spawn_progress_reporter(ctx: Arc<RunContext>, stop: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ctx.config.progress_interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let status = status_of(&ctx);
                    info!(
                        run_id = %ctx.run_id,
                        in_flight = status.in_flight,
                        remaining = status.backlog_depth,
                        retries = status.retried,
                        succeeded = status.succeeded,
                        failed = status.failed,
                        throughput_per_sec = status.throughput_per_sec,
                        "Progress"
                    );
                }
            }
        }
    })
}
