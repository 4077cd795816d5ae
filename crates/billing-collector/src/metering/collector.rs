//! Usage collector
//!
//! Turns one billing window into normalized per-workspace usage:
//! - one range query per resource kind, scoped to workspace namespaces
//! - each series reduced to its last sample
//! - raw values converted to CPU-seconds / GB-seconds for the window

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use billing_common::{QueryError, ResourceKind, TimeWindow, UsageSample, WorkspaceUsage};
use tracing::{debug, info, instrument, warn};

use super::source::{last_sample, MetricsSource};

/// PromQL templates for each resource kind, bound to a namespace prefix
#[derive(Debug, Clone)]
pub struct QuerySet {
    namespace_prefix: String,
}

impl QuerySet {
    pub fn new(namespace_prefix: impl Into<String>) -> Self {
        Self {
            namespace_prefix: namespace_prefix.into(),
        }
    }

    /// Query for `kind` over a window of `window_secs`
    pub fn query(&self, kind: ResourceKind, window_secs: i64) -> String {
        let selector = format!("namespace=~\"{}.*\"", prefix_pattern(&self.namespace_prefix));
        match kind {
            ResourceKind::Cpu => format!(
                "sum by (namespace)(increase(container_cpu_usage_seconds_total{{{selector}}}[{window_secs}s]))"
            ),
            ResourceKind::Mem => format!(
                "sum by (namespace)(avg_over_time(container_memory_usage_bytes{{{selector}}}[{window_secs}s]))"
            ),
            ResourceKind::RequestedCpu => Self::requested(&selector, "cpu", window_secs),
            ResourceKind::RequestedMem => Self::requested(&selector, "memory", window_secs),
        }
    }

    /// Reserved resources, counted only for pods in the Running phase
    fn requested(selector: &str, resource: &str, window_secs: i64) -> String {
        format!(
            "sum by (namespace)(avg_over_time(kube_pod_container_resource_requests{{{selector},resource=\"{resource}\"}}[{window_secs}s]) \
             * on(namespace, pod) group_left() (kube_pod_status_phase{{phase=\"Running\"}} == 1))"
        )
    }
}

/// Prefix as a literal regex inside a double-quoted PromQL string
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        // Regex escapes are doubled for the string literal
        match c {
            '\\' => pattern.push_str(r"\\\\"),
            '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' => {
                pattern.push_str(r"\\");
                pattern.push(c);
            }
            '"' => pattern.push_str(r#"\""#),
            _ => pattern.push(c),
        }
    }
    pattern
}

/// Normalized usage of every workspace seen in one window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UsageReport {
    /// Usage keyed by raw namespace, in lexical order
    pub workspaces: BTreeMap<String, WorkspaceUsage>,
}

impl UsageReport {
    /// Usage of one workspace, if it appeared in any query
    pub fn get(&self, namespace: &str) -> Option<&WorkspaceUsage> {
        self.workspaces.get(namespace)
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    /// Every measurement as a flat list
    pub fn samples(&self) -> Vec<UsageSample> {
        self.workspaces
            .iter()
            .flat_map(|(namespace, usage)| usage.samples(namespace))
            .collect()
    }
}

/// Queries the metrics backend for usage over a window
pub struct UsageCollector {
    source: Arc<dyn MetricsSource>,
    queries: QuerySet,
}

impl UsageCollector {
    /// Create a collector for namespaces starting with `namespace_prefix`
    pub fn new(source: Arc<dyn MetricsSource>, namespace_prefix: impl Into<String>) -> Self {
        Self {
            source,
            queries: QuerySet::new(namespace_prefix),
        }
    }

    /// Query templates in use
    pub fn queries(&self) -> &QuerySet {
        &self.queries
    }

    /// Collect normalized usage for `window`.
    ///
    /// Workspaces missing from a kind's result get no entry for that kind.
    /// Any query failure fails the whole window.
    #[instrument(skip_all, fields(window = %window))]
    pub async fn collect_usage(&self, window: &TimeWindow) -> Result<UsageReport, QueryError> {
        let window_secs = window.length_secs();
        let step = Duration::from_secs(window_secs.max(1) as u64);
        let mut report = UsageReport::default();

        for kind in ResourceKind::ALL {
            let query = self.queries.query(kind, window_secs);
            let series = self
                .source
                .range_query(&query, window.start, window.end, step)
                .await?;

            debug!(kind = %kind, series = series.len(), "Collected series");

            for entry in &series {
                let Some(namespace) = entry.namespace() else {
                    warn!(kind = %kind, labels = ?entry.labels, "Series without namespace label skipped");
                    continue;
                };
                let raw = last_sample(entry).unwrap_or(0.0);
                report
                    .workspaces
                    .entry(namespace.to_string())
                    .or_default()
                    .insert(kind, kind.normalize(raw, window_secs as f64));
            }
        }

        info!(workspaces = report.len(), "Collected usage");
        Ok(report)
    }
}
