//! End-to-end flow-control scenarios driven by scripted executors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pointflow::scheduler::{ItemStatus, RunConfig, RunController, WorkItem};
use pointflow::{ExecOutcome, FlowError, RemoteExecutor};
use serde_json::json;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    /// Never answers; only the request deadline ends the attempt.
    Hang,
    /// Fails the first `n` attempts, then succeeds.
    FailTimes(u32),
    /// Answers successfully, but only after the given delay.
    SlowSucceed(Duration),
    Fatal,
}

/// Executor whose answers are scripted per item id.
struct ScriptedExecutor {
    delay: Duration,
    default: Behavior,
    overrides: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    fn new(default: Behavior, delay: Duration) -> Self {
        Self {
            delay,
            default,
            overrides: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn with(mut self, id: &str, behavior: Behavior) -> Self {
        self.overrides.insert(id.to_string(), behavior);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, item: &WorkItem) -> ExecOutcome {
        self.calls.lock().unwrap().push(item.id.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self
            .overrides
            .get(&item.id)
            .copied()
            .unwrap_or(self.default);

        match behavior {
            Behavior::Succeed => ExecOutcome::Success(json!({"id": item.id})),
            Behavior::Fail => ExecOutcome::failure("Simulated processing failure"),
            Behavior::Hang => std::future::pending().await,
            Behavior::FailTimes(n) if item.attempts < n => {
                ExecOutcome::failure(format!("failure {}", item.attempts + 1))
            }
            Behavior::FailTimes(_) => ExecOutcome::Success(json!({"id": item.id})),
            Behavior::SlowSucceed(delay) => {
                tokio::time::sleep(delay).await;
                ExecOutcome::Success(json!({"id": item.id}))
            }
            Behavior::Fatal => ExecOutcome::Fatal("connection refused".to_string()),
        }
    }
}

fn items(ids: &[&str]) -> Vec<WorkItem> {
    ids.iter()
        .map(|id| WorkItem::new(*id, json!({"id": id})))
        .collect()
}

fn numbered(count: usize) -> Vec<WorkItem> {
    (0..count)
        .map(|i| WorkItem::new(format!("p-{i}"), json!({"value": i})))
        .collect()
}

fn ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("p-{i}")).collect()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_window_of_two_processes_five_items() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Succeed,
        Duration::from_millis(20),
    ));
    let controller = RunController::new(executor.clone());

    let summary = controller
        .run(numbered(5), &RunConfig::new(2))
        .await
        .expect("run");

    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.attempts, 5);
    assert!(summary.peak_in_flight <= 2);
    assert!(executor.peak() <= 2);
    assert!(summary.is_balanced());
    assert_eq!(executor.calls(), ids(5));
}

#[tokio::test]
async fn test_item_that_always_times_out_fails_after_budget() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Hang, Duration::ZERO));
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(3)
        .with_request_timeout(Duration::from_millis(40))
        .with_max_retries(3);

    let summary = controller.run(items(&["slow"]), &config).await.expect("run");

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.timeouts, 3);
    assert_eq!(summary.retries, 2);

    let result = summary.item("slow").expect("result");
    assert_eq!(result.status, ItemStatus::Failed);
    assert_eq!(result.attempts, 3);
    assert!(result
        .error
        .as_deref()
        .is_some_and(|e| e.contains("timeout")));
    assert_eq!(executor.calls().len(), 3);
}

#[tokio::test]
async fn test_failing_item_does_not_block_the_next() {
    let executor = Arc::new(
        ScriptedExecutor::new(Behavior::Succeed, Duration::ZERO).with("one", Behavior::Fail),
    );
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(1).with_max_retries(2);

    let summary = controller
        .run(items(&["one", "two"]), &config)
        .await
        .expect("run");

    assert_eq!(executor.calls(), vec!["one", "two", "one"]);
    assert_eq!(summary.item("two").map(|r| r.status), Some(ItemStatus::Succeeded));

    let failed = summary.item("one").expect("result");
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.error.as_deref(), Some("Simulated processing failure"));
    assert_eq!(summary.failures().count(), 1);
}

#[tokio::test]
async fn test_cancel_stops_admission_and_reports_unprocessed() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Succeed,
        Duration::from_millis(200),
    ));
    let controller = RunController::new(executor.clone());
    let run = controller
        .start(numbered(10), &RunConfig::new(4))
        .expect("start");
    let handle = run.handle();

    wait_for(|| handle.status().in_flight == 4).await;
    handle.cancel();

    let summary = run.wait().await.expect("run");

    assert!(summary.was_cancelled);
    assert_eq!(executor.calls().len(), 4);
    assert_eq!(summary.succeeded + summary.cancelled, 4);
    assert_eq!(summary.unprocessed, 6);
    assert!(summary.is_balanced());
    assert_eq!(
        summary
            .with_status(ItemStatus::Unprocessed)
            .map(|r| r.item_id.clone())
            .collect::<Vec<_>>(),
        (4..10).map(|i| format!("p-{i}")).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_cancel_withholds_retries_of_in_flight_failures() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Fail,
        Duration::from_millis(100),
    ));
    let controller = RunController::new(executor.clone());
    let run = controller
        .start(numbered(10), &RunConfig::new(4))
        .expect("start");
    let handle = run.handle();

    wait_for(|| handle.status().in_flight == 4).await;
    handle.cancel();
    handle.cancel();

    let summary = run.wait().await.expect("run");

    assert_eq!(executor.calls().len(), 4);
    assert_eq!(summary.cancelled, 4);
    assert_eq!(summary.unprocessed, 6);
    assert_eq!(summary.retries, 0);
    assert!(summary.is_balanced());
}

#[tokio::test]
async fn test_admission_is_fifo() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::ZERO));
    let controller = RunController::new(executor.clone());

    controller
        .run(numbered(8), &RunConfig::new(1))
        .await
        .expect("run");

    assert_eq!(executor.calls(), ids(8));
}

#[tokio::test]
async fn test_in_flight_never_exceeds_window() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::FailTimes(1),
        Duration::from_millis(5),
    ));
    let controller = RunController::new(executor.clone());

    let summary = controller
        .run(numbered(40), &RunConfig::new(5))
        .await
        .expect("run");

    assert_eq!(summary.succeeded, 40);
    assert_eq!(summary.attempts, 80);
    assert_eq!(summary.retries, 40);
    assert!(summary.peak_in_flight <= 5);
    assert!(executor.peak() <= 5);
}

#[tokio::test]
async fn test_success_after_failures_stays_within_budget() {
    let executor = Arc::new(
        ScriptedExecutor::new(Behavior::Succeed, Duration::ZERO)
            .with("recovers", Behavior::FailTimes(2))
            .with("gives-up", Behavior::FailTimes(3)),
    );
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(2).with_max_retries(3);

    let summary = controller
        .run(items(&["recovers", "gives-up"]), &config)
        .await
        .expect("run");

    let recovered = summary.item("recovers").expect("result");
    assert_eq!(recovered.status, ItemStatus::Succeeded);
    assert_eq!(recovered.attempts, 3);

    let exhausted = summary.item("gives-up").expect("result");
    assert_eq!(exhausted.status, ItemStatus::Failed);
    assert_eq!(exhausted.attempts, 3);
    assert_eq!(exhausted.error.as_deref(), Some("failure 3"));
}

#[tokio::test]
async fn test_reruns_are_independent() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::ZERO));
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(3);

    let first = controller.run(numbered(12), &config).await.expect("first");
    let second = controller.run(numbered(12), &config).await.expect("second");

    assert_eq!(first.succeeded, 12);
    assert_eq!(second.succeeded, 12);
    assert_eq!(second.attempts, 12);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_invalid_config_dispatches_nothing() {
    let executor = Arc::new(ScriptedExecutor::new(Behavior::Succeed, Duration::ZERO));
    let controller = RunController::new(executor.clone());

    let zero_budget = RunConfig::new(2).with_max_retries(0);
    let zero_timeout = RunConfig::new(2).with_request_timeout(Duration::ZERO);

    assert!(matches!(
        controller.run(numbered(3), &zero_budget).await,
        Err(FlowError::Config(_))
    ));
    assert!(matches!(
        controller.run(numbered(3), &zero_timeout).await,
        Err(FlowError::Config(_))
    ));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_fatal_outcome_aborts_run() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::Fatal,
        Duration::from_millis(5),
    ));
    let controller = RunController::new(executor.clone());

    let result = controller.run(numbered(20), &RunConfig::new(2)).await;

    match result {
        Err(FlowError::ExecutorUnavailable { reason, summary }) => {
            assert!(reason.contains("connection refused"));
            assert!(summary.is_balanced());
            assert!(!summary.was_cancelled);
        }
        other => panic!("expected abort, got {:?}", other.map(|s| s.succeeded)),
    }
    assert!(executor.calls().len() <= 2);
}

#[tokio::test]
async fn test_abort_keeps_settled_results() {
    let executor = Arc::new(
        ScriptedExecutor::new(Behavior::Succeed, Duration::ZERO)
            .with("b", Behavior::Fail)
            .with("c", Behavior::Fatal),
    );
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(1).with_max_retries(1);

    let err = controller
        .run(items(&["a", "b", "c"]), &config)
        .await
        .expect_err("run should abort");
    let summary = err.partial_summary().expect("abort carries a summary");

    assert_eq!(summary.submitted, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.is_balanced());
    assert_eq!(summary.item("a").map(|r| r.status), Some(ItemStatus::Succeeded));

    let exhausted = summary.item("b").expect("exhausted item is reported");
    assert_eq!(exhausted.status, ItemStatus::Failed);
    assert_eq!(exhausted.attempts, 1);
    assert_eq!(
        exhausted.error.as_deref(),
        Some("Simulated processing failure")
    );
    assert_eq!(summary.item("c").map(|r| r.status), Some(ItemStatus::Cancelled));
    assert_eq!(executor.calls(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_late_response_is_discarded() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::SlowSucceed(Duration::from_millis(300)),
        Duration::ZERO,
    ));
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(1)
        .with_request_timeout(Duration::from_millis(30))
        .with_max_retries(1);

    let summary = controller.run(items(&["late"]), &config).await.expect("run");

    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.timeouts, 1);
}

#[tokio::test]
async fn test_retry_delay_is_applied() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::FailTimes(1),
        Duration::ZERO,
    ));
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(1).with_retry_delay(Duration::from_millis(100));

    let started = Instant::now();
    let summary = controller.run(items(&["a"]), &config).await.expect("run");

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(summary.item("a").map(|r| r.attempts), Some(2));
}

#[tokio::test]
async fn test_cancel_interrupts_retry_delay() {
    let executor = Arc::new(ScriptedExecutor::new(
        Behavior::FailTimes(1),
        Duration::ZERO,
    ));
    let controller = RunController::new(executor.clone());
    let config = RunConfig::new(1).with_retry_delay(Duration::from_secs(30));

    let started = Instant::now();
    let run = controller.start(items(&["a"]), &config).expect("start");
    let handle = run.handle();

    wait_for(|| handle.status().attempts == 1 && handle.status().in_flight == 0).await;
    handle.cancel();
    let summary = run.wait().await.expect("run");

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.cancelled, 1);
    assert_eq!(executor.calls().len(), 1);
    assert!(handle.is_cancelled());
}
