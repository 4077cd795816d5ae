//! Metering module
//!
//! Provides usage collection from the metrics backend:
//! - MetricsSource: range-query capability (Prometheus over HTTP in production)
//! - UsageCollector: per-window, per-workspace normalized usage

pub mod collector;
pub mod prometheus;
pub mod source;

pub use collector::{QuerySet, UsageCollector, UsageReport};
pub use prometheus::PrometheusClient;
pub use source::{last_sample, MetricsSource, RangeSeries};
