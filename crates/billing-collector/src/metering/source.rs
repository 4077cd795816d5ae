//! Metrics source contract
//!
//! A range query returns a list of series, each a label set plus
//! `(timestamp, value)` samples ordered by time.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use billing_common::QueryError;
use chrono::{DateTime, Utc};

/// One time series from a range query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeSeries {
    /// Series labels
    pub labels: HashMap<String, String>,
    /// `(unix timestamp, value)` pairs in time order
    pub samples: Vec<(f64, f64)>,
}

impl RangeSeries {
    /// Series with a single `namespace` label
    pub fn for_namespace(namespace: impl Into<String>, samples: Vec<(f64, f64)>) -> Self {
        Self {
            labels: HashMap::from([("namespace".to_string(), namespace.into())]),
            samples,
        }
    }

    /// Value of the `namespace` label
    pub fn namespace(&self) -> Option<&str> {
        self.labels.get("namespace").map(String::as_str)
    }
}

/// Range-query capability of a metrics backend
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Evaluate `query` over `[start, end]` at `step` resolution
    async fn range_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<RangeSeries>, QueryError>;
}

/// Reduce a series to one value for the window: the final sample wins and
/// every earlier sample is ignored. `None` when the series has no samples.
pub fn last_sample(series: &RangeSeries) -> Option<f64> {
    series.samples.last().map(|(_, value)| *value)
}
