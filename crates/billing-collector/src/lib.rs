//! # Billing Collector
//!
//! Turns workspace resource usage into billing events.
//!
//! ## Pipeline
//!
//! ```text
//! Prometheus -> UsageCollector -> BillingPolicy -> BillingEventFactory -> Dispatcher -> NATS
//! ```
//!
//! - Windows are fixed-length and contiguous, processed strictly in order
//! - Billable quantity is `max(actual, requested)` per resource family
//! - Event ids are UUID v5, so replaying a window reproduces the same ids
//! - Recovery mode backfills from an explicit start and exits once caught up

pub mod billing;
pub mod config;
pub mod dispatch;
pub mod metering;
pub mod scheduler;
pub mod telemetry;

pub use billing::{BillingEventFactory, BillingPolicy, ReservationPolicy};
pub use config::{BillingConfig, LogFormat};
pub use dispatch::{DeadLetterSink, Dispatcher, EventPublisher, NatsPublisher, RetryConfig};
pub use metering::{MetricsSource, PrometheusClient, UsageCollector};
pub use scheduler::{RunOutcome, RunSummary, TimeGridScheduler, WindowReport};
