//! # Billing Common
//!
//! Shared types, errors, and unit conversions for the workspace billing
//! collector.
//!
//! ## Core Types
//!
//! - [`TimeWindow`]: half-open `[start, end)` billing window
//! - [`ResourceKind`]/[`WorkspaceUsage`]: normalized usage per workspace
//! - [`Sku`]/[`BillingEvent`]: the published billing record
//!
//! ## Units
//!
//! ```text
//! cpu-seconds       = CPU-seconds used, or avg cores reserved × window seconds
//! memory-gb-seconds = avg bytes × window seconds / 2^30
//! ```

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{BillingError, InputError, PublishError, QueryError, Result};
pub use types::{
    billing_event::{round_quantity, BillingEvent, Sku},
    time_window::{format_iso_utc, parse_iso_timestamp, truncate_to_seconds, TimeWindow},
    usage::{
        bytes_avg_to_gb_seconds, cores_avg_to_cpu_seconds, ResourceKind, UsageSample,
        WorkspaceUsage,
    },
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bytes in one GiB
pub const BYTES_PER_GIB: f64 = 1_073_741_824.0;

/// Default window length in seconds
pub const DEFAULT_SCRAPE_INTERVAL_SECS: u64 = 300;

/// Default safety margin before a window is considered fully aggregated
pub const DEFAULT_COMPLETENESS_DELAY_SECS: u64 = 60;

/// Default lookback for normal-mode starts (1 hour)
pub const DEFAULT_LOOKBACK_SECS: u64 = 3600;

/// Default workspace namespace prefix
pub const DEFAULT_WORKSPACE_PREFIX: &str = "ws-";
