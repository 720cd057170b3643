//! CLI command definitions for pointflow.
//!
//! Three commands are provided:
//! - `run`: push a file of points through the service once
//! - `schedule`: repeat that run on a fixed interval
//! - `check`: query the service's health endpoint

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::executor::http::DEFAULT_SERVICE_URL;
use crate::error::FlowError;
use crate::executor::{HttpExecutor, HttpExecutorConfig};
use crate::loader::load_points;
use crate::metrics::FlowMetrics;
use crate::scheduler::{RunConfig, RunController, RunSummary, WorkItem};

/// Default pause between scheduled runs (15 minutes).
const DEFAULT_INTERVAL_SECS: u64 = 900;

/// Request-level flow control for a batch compute service.
#[derive(Parser)]
#[command(name = "pointflow")]
#[command(about = "Push points through a compute service with a fixed number of requests in flight")]
#[command(version)]
#[command(
    long_about = "pointflow keeps a fixed number of requests outstanding against a compute service, \
retrying failed or timed-out points until each one succeeds or runs out of attempts.\n\n\
Example usage:\n  pointflow run --input points.jsonl --url http://localhost:8000/process --concurrency 50"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Process every point in a file once.
    Run(RunArgs),

    /// Process the same points repeatedly on a fixed interval.
    Schedule(ScheduleArgs),

    /// Check that the compute service is reachable and healthy.
    Check(CheckArgs),
}

/// Options shared by `run` and `schedule`.
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Points file: CSV with a header row, a JSON array or JSON Lines; each point needs an `id`.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Processing endpoint of the compute service.
    #[arg(short, long, env = "POINTFLOW_URL", default_value = DEFAULT_SERVICE_URL)]
    pub url: String,

    /// Number of requests kept in flight (overrides POINTFLOW_CONCURRENCY).
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Attempts allowed per point before it is reported as failed.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Pause before a failed point is requeued, in milliseconds.
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Only load the first N points.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Write Prometheus metrics to this file after each run.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Keep retrying points even if the service cannot be reached at all.
    #[arg(long)]
    pub no_fail_fast: bool,
}

/// Arguments for `pointflow schedule`.
#[derive(Parser, Debug)]
pub struct ScheduleArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Seconds between the start of consecutive runs.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Stop after this many runs.
    #[arg(long)]
    pub cycles: Option<u64>,
}

/// Arguments for `pointflow check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Processing endpoint of the compute service.
    #[arg(short, long, env = "POINTFLOW_URL", default_value = DEFAULT_SERVICE_URL)]
    pub url: String,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_once_command(args).await,
        Commands::Schedule(args) => run_schedule_command(args).await,
        Commands::Check(args) => run_check_command(args).await,
    }
}

impl RunArgs {
    /// Run configuration from the environment, overridden by flags.
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config =
            RunConfig::from_env().context("Invalid POINTFLOW_* environment configuration")?;

        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(max_retries) = self.max_retries {
            config = config.with_max_retries(max_retries);
        }
        if let Some(millis) = self.retry_delay_ms {
            config = config.with_retry_delay(Duration::from_millis(millis));
        }

        config.validate().context("Invalid run options")?;
        Ok(config)
    }

    fn controller(&self) -> anyhow::Result<(RunController, Arc<FlowMetrics>)> {
        let executor = HttpExecutor::new(
            HttpExecutorConfig::new(&self.url).with_fail_fast_on_connect(!self.no_fail_fast),
        )
        .with_context(|| format!("Failed to create executor for {}", self.url))?;

        let metrics = Arc::new(FlowMetrics::new().context("Failed to register metrics")?);
        let controller =
            RunController::new(Arc::new(executor)).with_metrics(Arc::clone(&metrics));
        Ok((controller, metrics))
    }
}

/// Cancels `shutdown` on the first Ctrl-C.
fn spawn_ctrl_c_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight requests finish");
            shutdown.cancel();
        }
    });
}

async fn run_once_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.run_config()?;
    let (controller, metrics) = args.controller()?;
    let points = load_points(&args.input, args.limit)
        .await
        .with_context(|| format!("Failed to load points from {}", args.input.display()))?;

    let shutdown = CancellationToken::new();
    spawn_ctrl_c_listener(shutdown.clone());

    let result = execute_run(&controller, points, &config, &shutdown).await;
    let summary = settle(result, &args, &metrics).await?;

    if summary.failed > 0 {
        warn!(failed = summary.failed, "Some points could not be processed");
    }
    Ok(())
}

async fn run_schedule_command(args: ScheduleArgs) -> anyhow::Result<()> {
    if args.interval_secs == 0 {
        anyhow::bail!("--interval-secs must be greater than 0");
    }
    let interval = Duration::from_secs(args.interval_secs);
    let config = args.run.run_config()?;
    let (controller, metrics) = args.run.controller()?;
    let points = load_points(&args.run.input, args.run.limit)
        .await
        .with_context(|| format!("Failed to load points from {}", args.run.input.display()))?;

    let shutdown = CancellationToken::new();
    spawn_ctrl_c_listener(shutdown.clone());

    info!(
        interval_secs = args.interval_secs,
        points = points.len(),
        "Scheduler started"
    );

    let mut cycle: u64 = 0;
    loop {
        cycle += 1;
        let started = Instant::now();
        info!(cycle = cycle, "Starting scheduled run");

        let result = execute_run(&controller, points.clone(), &config, &shutdown).await;
        if let Err(e) = settle(result, &args.run, &metrics).await {
            error!(cycle = cycle, error = %e, "Scheduled run failed");
        }

        if shutdown.is_cancelled() || args.cycles.is_some_and(|max| cycle >= max) {
            break;
        }

        let elapsed = started.elapsed();
        let Some(wait) = interval.checked_sub(elapsed).filter(|w| !w.is_zero()) else {
            warn!(
                elapsed_secs = elapsed.as_secs_f64(),
                interval_secs = args.interval_secs,
                "Run took longer than the interval, starting next run immediately"
            );
            continue;
        };

        info!(wait_secs = wait.as_secs_f64(), "Waiting for next run");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!(cycles = cycle, "Scheduler stopped");
    Ok(())
}

async fn run_check_command(args: CheckArgs) -> anyhow::Result<()> {
    let executor = HttpExecutor::new(HttpExecutorConfig::new(&args.url))
        .with_context(|| format!("Failed to create executor for {}", args.url))?;
    info!(url = %executor.url(), "Checking service health");

    let health = executor
        .health()
        .await
        .with_context(|| format!("Health check failed for {}", args.url))?;

    let json_output =
        serde_json::to_string_pretty(&health).context("Failed to serialize health response")?;
    println!("{}", json_output);
    Ok(())
}

/// Runs `points` to completion, cancelling the run if `shutdown` fires.
async fn execute_run(
    controller: &RunController,
    points: Vec<WorkItem>,
    config: &RunConfig,
    shutdown: &CancellationToken,
) -> Result<RunSummary, FlowError> {
    let run = controller.start(points, config)?;
    let handle = run.handle();

    let stop = CancellationToken::new();
    let watcher = {
        let shutdown = shutdown.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => handle.cancel(),
                _ = stop.cancelled() => {}
            }
        })
    };

    let result = run.wait().await;
    stop.cancel();
    let _ = watcher.await;

    result
}

/// Reports a finished run. An aborted run still reports everything it
/// settled before the error is returned.
async fn settle(
    result: Result<RunSummary, FlowError>,
    args: &RunArgs,
    metrics: &FlowMetrics,
) -> anyhow::Result<RunSummary> {
    let settled = match &result {
        Ok(summary) => Some(summary),
        Err(e) => e.partial_summary(),
    };
    if let Some(summary) = settled {
        report(summary, args.json)?;
        write_metrics(args.metrics_file.as_deref(), metrics).await?;
    }
    Ok(result?)
}

fn report(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        let json_output =
            serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;
        println!("{}", json_output);
    } else {
        print!("{}", summary);
    }
    Ok(())
}

async fn write_metrics(path: Option<&Path>, metrics: &FlowMetrics) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    tokio::fs::write(path, metrics.export())
        .await
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    info!(path = %path.display(), "Metrics written");
    Ok(())
}
