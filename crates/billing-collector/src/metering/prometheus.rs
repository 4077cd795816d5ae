//! Prometheus HTTP API client
//!
//! Implements [`MetricsSource`] over `GET /api/v1/query_range`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use billing_common::{BillingError, QueryError, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::source::{MetricsSource, RangeSeries};

/// Longest error body kept in a [`QueryError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Prometheus query API client
#[derive(Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<MatrixSeries>,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusClient {
    /// Create a client for the Prometheus server at `base_url`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn query_range_url(&self) -> String {
        format!("{}/api/v1/query_range", self.base_url)
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    #[instrument(skip_all, fields(start = %start, end = %end))]
    async fn range_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> std::result::Result<Vec<RangeSeries>, QueryError> {
        let params = [
            ("query", query.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("step", step.as_secs().to_string()),
        ];

        let response = self
            .client
            .get(self.query_range_url())
            .query(&params)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;
        let series = decode_matrix(&bytes)?;

        debug!(series = series.len(), "Range query returned");
        Ok(series)
    }
}

/// Decode a `query_range` response body into series
fn decode_matrix(body: &[u8]) -> std::result::Result<Vec<RangeSeries>, QueryError> {
    let response: QueryResponse =
        serde_json::from_slice(body).map_err(|e| QueryError::Malformed(e.to_string()))?;

    if response.status != "success" {
        return Err(QueryError::Backend {
            error_type: response.error_type.unwrap_or_else(|| "unknown".to_string()),
            message: response.error.unwrap_or_default(),
        });
    }

    let data = response
        .data
        .ok_or_else(|| QueryError::Malformed("missing data field".to_string()))?;
    if data.result_type != "matrix" {
        return Err(QueryError::Malformed(format!(
            "expected matrix result, got {}",
            data.result_type
        )));
    }

    data.result
        .into_iter()
        .map(|series| {
            let samples = series
                .values
                .into_iter()
                .map(|(ts, raw)| {
                    raw.parse::<f64>()
                        .map(|value| (ts, value))
                        .map_err(|_| QueryError::Malformed(format!("invalid sample value {raw:?}")))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(RangeSeries {
                labels: series.metric,
                samples,
            })
        })
        .collect()
}
