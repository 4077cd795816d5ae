//! Billing policy: reservation plus overage
//!
//! ```text
//! billable = max(actual, requested)
//! ```
//!
//! Reserved-but-idle capacity is billed at the reservation; usage above the
//! reservation is billed at actual.

use billing_common::{ResourceKind, Sku, WorkspaceUsage};
use serde::{Deserialize, Serialize};

/// Billable quantities for one workspace in one window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BillableUsage {
    pub cpu_seconds: f64,
    pub memory_gb_seconds: f64,
}

impl BillableUsage {
    /// Quantity for a sku
    pub fn quantity(&self, sku: Sku) -> f64 {
        match sku {
            Sku::CpuSeconds => self.cpu_seconds,
            Sku::MemoryGbSeconds => self.memory_gb_seconds,
        }
    }

    /// Line items worth an event, cpu first. Zero means "do not emit".
    pub fn line_items(&self) -> impl Iterator<Item = (Sku, f64)> + '_ {
        Sku::ALL
            .into_iter()
            .map(|sku| (sku, self.quantity(sku)))
            .filter(|(_, quantity)| *quantity != 0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_seconds == 0.0 && self.memory_gb_seconds == 0.0
    }
}

/// Reconciles observed usage into billable quantities
pub trait BillingPolicy: Send + Sync {
    fn reconcile(&self, usage: &WorkspaceUsage) -> BillableUsage;
}

/// Bills the larger of actual and reserved usage per resource family
#[derive(Debug, Default, Clone, Copy)]
pub struct ReservationPolicy;

impl BillingPolicy for ReservationPolicy {
    fn reconcile(&self, usage: &WorkspaceUsage) -> BillableUsage {
        BillableUsage {
            cpu_seconds: usage
                .get(ResourceKind::Cpu)
                .max(usage.get(ResourceKind::RequestedCpu)),
            memory_gb_seconds: usage
                .get(ResourceKind::Mem)
                .max(usage.get(ResourceKind::RequestedMem)),
        }
    }
}
