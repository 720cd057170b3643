//! Dispatcher: drains the backlog at the rate the window allows.
//!
//! The dispatcher is a single loop that waits for work, waits for a window
//! slot, pops the backlog head, and spawns an attempt task that owns both the
//! slot and the item. Each attempt task:
//!
//! 1. runs the executor under the request deadline,
//! 2. frees its slot as soon as the executor returns or the deadline fires,
//! 3. hands the outcome to the retry manager, which either settles the item
//!    or pushes it back to the backlog tail.
//!
//! When the run is cancelled the loop stops admitting, then waits for every
//! attempt task to finish before returning.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::RunConfig;
use super::job::{ItemResult, WorkItem};
use super::queue::Backlog;
use super::retry::{AttemptOutcome, RetryDecision, RetryManager};
use super::tracker::CompletionTracker;
use super::window::{ConcurrencyWindow, WindowSlot};
use crate::executor::RemoteExecutor;
use crate::metrics::MetricsCollector;

/// All mutable state belonging to one run.
///
/// A fresh context is built for every run and shared by `Arc` between the
/// controller, the dispatcher, every attempt task, and any `RunHandle`.
pub(crate) struct RunContext {
    pub(crate) run_id: Uuid,
    pub(crate) config: RunConfig,
    pub(crate) backlog: Backlog,
    pub(crate) window: ConcurrencyWindow,
    pub(crate) tracker: CompletionTracker,
    pub(crate) retry: RetryManager,
    pub(crate) metrics: MetricsCollector,
    pub(crate) cancel: CancellationToken,
    abort_reason: Mutex<Option<String>>,
}

impl RunContext {
    pub(crate) fn new(config: RunConfig, metrics: MetricsCollector) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            backlog: Backlog::new(),
            window: ConcurrencyWindow::new(config.concurrency),
            tracker: CompletionTracker::new(config.throughput_window),
            retry: RetryManager::from_config(&config),
            metrics,
            cancel: CancellationToken::new(),
            abort_reason: Mutex::new(None),
            config,
        }
    }

    /// Stops the run because the executor is unusable. The first reason wins.
    pub(crate) fn abort(&self, reason: String) {
        let mut slot = self.abort_reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.cancel.cancel();
    }

    pub(crate) fn abort_reason(&self) -> Option<String> {
        self.abort_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Records a terminal result and releases the item from the run.
    pub(crate) fn finish(&self, result: ItemResult) {
        self.metrics.record_terminal(result.status);
        self.tracker.record_terminal(result);
        // Settle last: once outstanding hits zero the controller may read
        // the tracker.
        self.backlog.settle();
        self.metrics
            .set_occupancy(self.window.occupied(), self.backlog.len());
    }
}

/// Why the dispatch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchExit {
    /// Every submitted item reached a terminal outcome.
    Drained,
    /// The run was cancelled or aborted; the backlog may still hold items.
    Stopped,
}

pub(crate) struct Dispatcher {
    ctx: Arc<RunContext>,
    executor: Arc<dyn RemoteExecutor>,
    attempts: JoinSet<()>,
}

impl Dispatcher {
    pub(crate) fn new(ctx: Arc<RunContext>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            ctx,
            executor,
            attempts: JoinSet::new(),
        }
    }

    /// Main dispatch loop.
    pub(crate) async fn run(mut self) -> DispatchExit {
        let run_id = self.ctx.run_id;
        debug!(run_id = %run_id, "Dispatcher started");

        let exit = loop {
            while let Some(joined) = self.attempts.try_join_next() {
                log_join_result(run_id, joined);
            }

            let has_work = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break DispatchExit::Stopped,
                has_work = self.ctx.backlog.wait_for_work() => has_work,
            };
            if !has_work {
                if self.ctx.backlog.is_closed() {
                    break DispatchExit::Stopped;
                }
                break DispatchExit::Drained;
            }

            let slot = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break DispatchExit::Stopped,
                slot = self.ctx.window.acquire() => match slot {
                    Some(slot) => slot,
                    None => break DispatchExit::Stopped,
                },
            };

            // Only this loop pops, so the head we waited for is still there
            // unless the backlog was closed in the meantime.
            let Some(item) = self.ctx.backlog.pop() else {
                continue;
            };
            self.spawn_attempt(slot, item);
        };

        if exit == DispatchExit::Stopped {
            info!(
                run_id = %run_id,
                in_flight = self.ctx.window.occupied(),
                "Dispatch stopped, waiting for outstanding requests"
            );
        }

        while let Some(joined) = self.attempts.join_next().await {
            log_join_result(run_id, joined);
        }

        debug!(run_id = %run_id, exit = ?exit, "Dispatcher stopped");
        exit
    }

    fn spawn_attempt(&mut self, slot: WindowSlot, mut item: WorkItem) {
        item.begin_attempt();
        self.ctx.tracker.record_attempt_started();
        self.ctx
            .metrics
            .set_occupancy(self.ctx.window.occupied(), self.ctx.backlog.len());

        debug!(
            run_id = %self.ctx.run_id,
            item_id = %item.id,
            sequence = item.sequence,
            attempt = item.attempt_number(),
            in_flight = self.ctx.window.occupied(),
            "Dispatching item"
        );

        let ctx = Arc::clone(&self.ctx);
        let executor = Arc::clone(&self.executor);
        self.attempts
            .spawn(run_attempt(ctx, executor, slot, item));
    }
}

fn log_join_result(run_id: Uuid, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(run_id = %run_id, error = %e, "Attempt task failed");
    }
}

/// Settles an item if its attempt task unwinds before reaching an outcome,
/// so a panicking executor cannot wedge the run.
struct SettleGuard {
    ctx: Arc<RunContext>,
    pending: Option<ItemResult>,
}

impl SettleGuard {
    fn new(ctx: &Arc<RunContext>, item: &WorkItem) -> Self {
        let mut abandoned = item.clone();
        abandoned.record_failure("Attempt task terminated unexpectedly");
        Self {
            ctx: Arc::clone(ctx),
            pending: Some(ItemResult::exhausted(&abandoned)),
        }
    }

    fn disarm(mut self) {
        self.pending = None;
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(result) = self.pending.take() {
            self.ctx.finish(result);
        }
    }
}

async fn run_attempt(
    ctx: Arc<RunContext>,
    executor: Arc<dyn RemoteExecutor>,
    slot: WindowSlot,
    item: WorkItem,
) {
    let guard = SettleGuard::new(&ctx, &item);
    let timeout = ctx.config.request_timeout;
    let started = Instant::now();

    // On timeout the executor future is dropped, discarding any late answer.
    let outcome = match tokio::time::timeout(timeout, executor.execute(&item)).await {
        Ok(outcome) => AttemptOutcome::from(outcome),
        Err(_) => AttemptOutcome::TimedOut(timeout),
    };
    let duration = started.elapsed();

    drop(slot);
    ctx.tracker.record_attempt(&outcome);
    ctx.metrics
        .record_attempt(outcome.as_label(), duration.as_secs_f64());

    if let AttemptOutcome::TimedOut(after) = &outcome {
        warn!(
            run_id = %ctx.run_id,
            item_id = %item.id,
            attempt = item.attempt_number(),
            timeout = ?after,
            "Request timed out"
        );
    }

    complete_attempt(&ctx, item, outcome).await;
    guard.disarm();
}

async fn complete_attempt(ctx: &Arc<RunContext>, item: WorkItem, outcome: AttemptOutcome) {
    match ctx.retry.decide(item, outcome) {
        RetryDecision::Succeeded(result) => {
            debug!(
                run_id = %ctx.run_id,
                item_id = %result.item_id,
                attempts = result.attempts,
                "Item processed successfully"
            );
            ctx.finish(result);
        }
        RetryDecision::Exhausted(result) => {
            error!(
                run_id = %ctx.run_id,
                item_id = %result.item_id,
                attempts = result.attempts,
                error = ?result.error,
                "Max retries exceeded, giving up"
            );
            ctx.finish(result);
        }
        RetryDecision::Abort { item, reason } => {
            error!(
                run_id = %ctx.run_id,
                item_id = %item.id,
                error = %reason,
                "Remote executor unavailable, aborting run"
            );
            ctx.abort(reason);
            ctx.finish(ItemResult::cancelled(&item));
        }
        RetryDecision::Retry(item) => schedule_retry(ctx, item).await,
    }
}

async fn schedule_retry(ctx: &Arc<RunContext>, item: WorkItem) {
    if ctx.cancel.is_cancelled() {
        ctx.finish(ItemResult::cancelled(&item));
        return;
    }

    let delay = ctx.retry.retry_delay();
    if !delay.is_zero() {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                ctx.finish(ItemResult::cancelled(&item));
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    warn!(
        run_id = %ctx.run_id,
        item_id = %item.id,
        failed_attempts = item.attempts,
        remaining_attempts = item.remaining_attempts(ctx.retry.max_attempts()),
        error = ?item.last_error,
        "Attempt failed, requeueing for retry"
    );

    match ctx.backlog.requeue(item) {
        Ok(()) => ctx.tracker.record_retry(),
        Err(item) => ctx.finish(ItemResult::cancelled(&item)),
    }
}

/// Terminal status for an item found in the backlog when a run stops.
pub(crate) fn leftover_result(item: &WorkItem) -> ItemResult {
    if item.attempts > 0 {
        ItemResult::cancelled(item)
    } else {
        ItemResult::unprocessed(item)
    }
}
