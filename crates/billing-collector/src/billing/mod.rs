//! Billing module
//!
//! - BillingPolicy: reconciles actual vs. reserved usage into billable quantities
//! - BillingEventFactory: deterministic, idempotent billing events

pub mod event_factory;
pub mod policy;

pub use event_factory::{event_id, BillingEventFactory};
pub use policy::{BillableUsage, BillingPolicy, ReservationPolicy};
