//! Metric recording helpers used by the dispatcher.
//!
//! `MetricsCollector` wraps an optional `FlowMetrics`. Without one attached
//! every call is a no-op, so the run loop records unconditionally.

use std::sync::Arc;

use super::prometheus::FlowMetrics;
use crate::scheduler::ItemStatus;

/// Records dispatcher events into Prometheus metrics, if configured.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Option<Arc<FlowMetrics>>,
}

impl MetricsCollector {
    /// Creates a collector that records into `metrics`.
    pub fn new(metrics: Arc<FlowMetrics>) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    /// Creates a collector that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Record the end of one attempt.
    ///
    /// # Arguments
    ///
    /// * `result` - Attempt result label (e.g., "success", "timeout")
    /// * `duration_secs` - Time the attempt spent outstanding
    pub fn record_attempt(&self, result: &str, duration_secs: f64) {
        if let Some(metrics) = &self.metrics {
            metrics.attempts_total.with_label_values(&[result]).inc();
            metrics.request_duration.observe(duration_secs);
        }

        tracing::trace!(
            result = result,
            duration_secs = duration_secs,
            "Recorded attempt metric"
        );
    }

    /// Record an item reaching a terminal status.
    pub fn record_terminal(&self, status: ItemStatus) {
        if let Some(metrics) = &self.metrics {
            metrics
                .items_total
                .with_label_values(&[status.as_label()])
                .inc();
        }
    }

    /// Update the in-flight and backlog gauges.
    pub fn set_occupancy(&self, in_flight: usize, backlog_depth: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.in_flight.set(in_flight as f64);
            metrics.backlog_depth.set(backlog_depth as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_collector_is_noop() {
        let collector = MetricsCollector::disabled();
        collector.record_attempt("success", 0.5);
        collector.record_terminal(ItemStatus::Succeeded);
        collector.set_occupancy(1, 2);
    }

    #[test]
    fn test_collector_records() {
        let metrics = Arc::new(FlowMetrics::new().expect("registry"));
        let collector = MetricsCollector::new(Arc::clone(&metrics));

        collector.record_attempt("timeout", 15.0);
        collector.record_attempt("success", 2.0);
        collector.record_terminal(ItemStatus::Failed);
        collector.set_occupancy(4, 6);

        assert_eq!(
            metrics.attempts_total.with_label_values(&["timeout"]).get(),
            1.0
        );
        assert_eq!(metrics.items_total.with_label_values(&["failed"]).get(), 1);
        assert_eq!(metrics.in_flight.get(), 4.0);
        assert_eq!(metrics.backlog_depth.get(), 6.0);
        assert_eq!(metrics.request_duration.get_sample_count(), 2);
    }
}
