//! Prometheus metrics registration and export.
//!
//! Unlike a process-wide registry, every `FlowMetrics` owns its own
//! `Registry`, so concurrent runs (and tests) never share counters.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Prometheus metrics for the dispatcher.
#[derive(Clone)]
pub struct FlowMetrics {
    registry: Registry,
    /// Terminal outcomes, labeled by outcome.
    pub items_total: IntCounterVec,
    /// Attempt results, labeled by result (success, failure, timeout, fatal).
    pub attempts_total: CounterVec,
    /// Attempts currently outstanding.
    pub in_flight: Gauge,
    /// Items waiting for a window slot.
    pub backlog_depth: Gauge,
    /// Duration of individual attempts in seconds.
    pub request_duration: Histogram,
}

impl FlowMetrics {
    /// Creates and registers all metrics.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if metric registration fails.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let items_total = IntCounterVec::new(
            Opts::new("pointflow_items_total", "Items that reached a terminal outcome"),
            &["outcome"],
        )?;

        let attempts_total = CounterVec::new(
            Opts::new("pointflow_attempts_total", "Attempts made against the executor"),
            &["result"],
        )?;

        let in_flight = Gauge::new("pointflow_in_flight", "Attempts currently outstanding")?;

        let backlog_depth = Gauge::new(
            "pointflow_backlog_depth",
            "Items waiting for a window slot",
        )?;

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pointflow_request_duration_seconds",
                "Duration of individual attempts in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 15.0, 30.0]),
        )?;

        registry.register(Box::new(items_total.clone()))?;
        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;
        registry.register(Box::new(backlog_depth.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        tracing::debug!("Prometheus metrics initialized");

        Ok(Self {
            registry,
            items_total,
            attempts_total,
            in_flight,
            backlog_depth,
            request_duration,
        })
    }

    /// Exports all metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}\n", e);
        }

        String::from_utf8(buffer)
            .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
    }
}
