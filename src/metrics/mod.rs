//! Metrics module for Prometheus-based monitoring.
//!
//! # Example
//!
//! ```ignore
//! use pointflow::metrics::{FlowMetrics, MetricsCollector};
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(FlowMetrics::new()?);
//! let collector = MetricsCollector::new(Arc::clone(&metrics));
//!
//! collector.record_attempt("success", 2.1);
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = metrics.export();
//! ```

pub mod collectors;
pub mod prometheus;

pub use self::collectors::MetricsCollector;
pub use self::prometheus::FlowMetrics;
