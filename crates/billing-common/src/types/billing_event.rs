//! Billing Event - the record published once per (workspace, sku, window)
//!
//! The `id` is derived deterministically from its inputs, so republishing a
//! window after a restart yields byte-identical events that downstream
//! consumers can deduplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::time_window::TimeWindow;

/// Billing line-item codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Sku {
    /// CPU time, in CPU-seconds
    #[serde(rename = "cpu-seconds")]
    CpuSeconds,
    /// Memory held over time, in GB-seconds
    #[serde(rename = "memory-gb-seconds")]
    MemoryGbSeconds,
}

impl Sku {
    pub const ALL: [Sku; 2] = [Sku::CpuSeconds, Sku::MemoryGbSeconds];

    /// Wire code
    pub fn code(&self) -> &'static str {
        match self {
            Sku::CpuSeconds => "cpu-seconds",
            Sku::MemoryGbSeconds => "memory-gb-seconds",
        }
    }
}

impl std::fmt::Display for Sku {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Billing event wire record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEvent {
    /// Deterministic event ID (UUID v5)
    pub id: Uuid,
    /// Window start, ISO-8601 with `Z` suffix
    #[serde(with = "iso_utc")]
    pub event_start: DateTime<Utc>,
    /// Window end, ISO-8601 with `Z` suffix
    #[serde(with = "iso_utc")]
    pub event_end: DateTime<Utc>,
    /// Line-item code
    pub sku: Sku,
    /// Always absent; users are not tracked by this system
    pub user: Option<String>,
    /// Workspace display name (namespace prefix stripped)
    pub workspace: String,
    /// Billable quantity, rounded to 6 decimal places
    pub quantity: f64,
}

impl BillingEvent {
    /// The window this event bills for
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.event_start,
            end: self.event_end,
        }
    }

    /// JSON wire encoding
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Round to 6 decimal places
pub fn round_quantity(quantity: f64) -> f64 {
    (quantity * 1e6).round() / 1e6
}

mod iso_utc {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::time_window::{format_iso_utc, parse_iso_timestamp};

    pub fn serialize<S: Serializer>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_iso_utc(*instant))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_iso_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
