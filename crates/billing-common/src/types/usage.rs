//! Usage Types - normalized resource consumption per workspace
//!
//! Every quantity here is already integrated over its window:
//! - CPU families are in CPU-seconds
//! - Memory families are in GB-seconds (GiB, base 2)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::BYTES_PER_GIB;

/// Resource families queried from the metrics backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU actually consumed (CPU-seconds)
    Cpu,
    /// Memory actually held, averaged over the window (bytes)
    Mem,
    /// CPU reserved by running pods, averaged over the window (cores)
    RequestedCpu,
    /// Memory reserved by running pods, averaged over the window (bytes)
    RequestedMem,
}

impl ResourceKind {
    /// All kinds, in query order
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Cpu,
        ResourceKind::Mem,
        ResourceKind::RequestedCpu,
        ResourceKind::RequestedMem,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Mem => "mem",
            ResourceKind::RequestedCpu => "requested_cpu",
            ResourceKind::RequestedMem => "requested_mem",
        }
    }

    /// Convert a raw backend value for a window of `window_secs` into the
    /// normalized quantity for this kind.
    pub fn normalize(&self, raw: f64, window_secs: f64) -> f64 {
        match self {
            ResourceKind::Cpu => raw,
            ResourceKind::Mem | ResourceKind::RequestedMem => {
                bytes_avg_to_gb_seconds(raw, window_secs)
            }
            ResourceKind::RequestedCpu => cores_avg_to_cpu_seconds(raw, window_secs),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert an average byte count held for `window_secs` into GB-seconds
pub fn bytes_avg_to_gb_seconds(avg_bytes: f64, window_secs: f64) -> f64 {
    (avg_bytes * window_secs) / BYTES_PER_GIB
}

/// Convert an average core count held for `window_secs` into CPU-seconds
pub fn cores_avg_to_cpu_seconds(avg_cores: f64, window_secs: f64) -> f64 {
    avg_cores * window_secs
}

/// A single normalized measurement for one window and one workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// Raw workspace namespace (prefix not stripped)
    pub workspace: String,
    /// Resource family
    pub resource_kind: ResourceKind,
    /// Normalized quantity
    pub quantity: f64,
}

/// Normalized usage of one workspace over one window, keyed by resource kind.
///
/// Kinds the backend returned nothing for are absent; [`WorkspaceUsage::get`]
/// reads them as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceUsage {
    quantities: BTreeMap<ResourceKind, f64>,
}

impl WorkspaceUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a quantity, replacing any earlier value for the kind
    pub fn insert(&mut self, kind: ResourceKind, quantity: f64) {
        self.quantities.insert(kind, quantity);
    }

    /// Builder-style insert
    pub fn with(mut self, kind: ResourceKind, quantity: f64) -> Self {
        self.insert(kind, quantity);
        self
    }

    /// Quantity for a kind, zero when absent
    pub fn get(&self, kind: ResourceKind) -> f64 {
        self.quantities.get(&kind).copied().unwrap_or(0.0)
    }

    /// Quantity for a kind, `None` when the backend returned nothing
    pub fn observed(&self, kind: ResourceKind) -> Option<f64> {
        self.quantities.get(&kind).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    /// Flatten into samples for `workspace`
    pub fn samples(&self, workspace: &str) -> Vec<UsageSample> {
        self.quantities
            .iter()
            .map(|(kind, quantity)| UsageSample {
                workspace: workspace.to_string(),
                resource_kind: *kind,
                quantity: *quantity,
            })
            .collect()
    }
}

impl FromIterator<(ResourceKind, f64)> for WorkspaceUsage {
    fn from_iter<I: IntoIterator<Item = (ResourceKind, f64)>>(iter: I) -> Self {
        Self {
            quantities: iter.into_iter().collect(),
        }
    }
}
