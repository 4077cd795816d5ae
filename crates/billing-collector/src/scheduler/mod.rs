//! Time-grid scheduler
//!
//! Owns the billing loop. Each cycle:
//! 1. waits until `next_run_time + interval <= now - completeness_delay`
//! 2. collects usage for `[next_run_time, next_run_time + interval)`
//! 3. reconciles it through the billing policy
//! 4. builds and dispatches one event per non-zero sku per workspace
//! 5. advances `next_run_time` by one interval
//!
//! In recovery mode the loop ends once `next_run_time` reaches
//! `now - completeness_delay`; backlog windows are drained without sleeping.

pub mod clock;
pub mod state;

pub use clock::{Clock, SystemClock, TokioClock};
pub use state::ScheduleState;

use std::future::Future;
use std::sync::Arc;

use billing_common::{Result, TimeWindow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::billing::{BillingEventFactory, BillingPolicy, ReservationPolicy};
use crate::config::BillingConfig;
use crate::dispatch::{DeadLetterSink, DispatchOutcome, Dispatcher, EventPublisher, RetryConfig};
use crate::metering::{MetricsSource, UsageCollector};

/// What one processed window produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub window: TimeWindow,
    /// Workspaces with any usage data
    pub workspaces: usize,
    /// Events accepted by the publisher
    pub dispatched: usize,
    /// Events handed to the dead-letter sink
    pub dead_lettered: usize,
    /// Line items dropped because the quantity was not finite
    pub skipped: usize,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Recovery run reached near-real-time
    CaughtUp,
    /// Shutdown was requested
    Interrupted,
}

/// Totals for a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub windows_processed: u64,
    pub events_dispatched: u64,
    pub events_dead_lettered: u64,
    /// Last window fully processed
    pub last_window: Option<TimeWindow>,
}

#[derive(Debug, Default)]
struct RunTotals {
    windows_processed: u64,
    events_dispatched: u64,
    events_dead_lettered: u64,
    last_window: Option<TimeWindow>,
}

impl RunTotals {
    fn record(&mut self, report: &WindowReport) {
        self.windows_processed += 1;
        self.events_dispatched += report.dispatched as u64;
        self.events_dead_lettered += report.dead_lettered as u64;
        self.last_window = Some(report.window);
    }

    fn finish(self, outcome: RunOutcome) -> RunSummary {
        RunSummary {
            outcome,
            windows_processed: self.windows_processed,
            events_dispatched: self.events_dispatched,
            events_dead_lettered: self.events_dead_lettered,
            last_window: self.last_window,
        }
    }
}

/// Sequential, time-grid-aligned billing loop
pub struct TimeGridScheduler {
    interval: Duration,
    completeness_delay: Duration,
    collector: UsageCollector,
    policy: Arc<dyn BillingPolicy>,
    factory: BillingEventFactory,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    state: ScheduleState,
}

impl TimeGridScheduler {
    /// Create a scheduler on the system clock.
    ///
    /// `start` selects recovery mode; without it the run starts
    /// `default_lookback` ago and never ends on its own.
    pub fn new(
        config: &BillingConfig,
        start: Option<DateTime<Utc>>,
        source: Arc<dyn MetricsSource>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self::with_clock(config, start, source, publisher, Arc::new(SystemClock))
    }

    /// Create a scheduler on an explicit clock
    pub fn with_clock(
        config: &BillingConfig,
        start: Option<DateTime<Utc>>,
        source: Arc<dyn MetricsSource>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = ScheduleState::initial(start, clock.now(), config.default_lookback());
        let prefix = config.workspace_namespace_prefix.as_str();

        Self {
            interval: config.scrape_interval(),
            completeness_delay: config.completeness_delay(),
            collector: UsageCollector::new(source, prefix),
            policy: Arc::new(ReservationPolicy),
            factory: BillingEventFactory::new(prefix),
            dispatcher: Dispatcher::new(publisher).with_retry(config.retry_config()),
            clock,
            state,
        }
    }

    /// Replace the billing policy
    pub fn with_policy(mut self, policy: Arc<dyn BillingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the publish retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.dispatcher = self.dispatcher.with_retry(retry);
        self
    }

    /// Replace the dead-letter sink
    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dispatcher = self.dispatcher.with_dead_letter(sink);
        self
    }

    /// Current cursor
    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Run until caught up (recovery mode) or forever (normal mode)
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.run_until(std::future::pending()).await
    }

    /// Run until caught up, a fatal error, or `shutdown` completes.
    ///
    /// On shutdown nothing is rolled back: a window interrupted mid-dispatch
    /// is simply not advanced past and its events may be sent again later
    /// with the same ids.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut totals = RunTotals::default();

        info!(
            next_run_time = %self.state.next_run_time,
            recovery_mode = self.state.recovery_mode,
            interval_secs = self.interval.num_seconds(),
            completeness_delay_secs = self.completeness_delay.num_seconds(),
            "Billing scheduler started"
        );

        loop {
            let current_time = self.clock.now() - self.completeness_delay;

            if let Some(wait) = self.state.wait_time(self.interval, current_time) {
                debug!(
                    next_run_time = %self.state.next_run_time,
                    wait_secs = wait.as_secs_f64(),
                    "Window not complete yet, sleeping"
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => continue,
                    _ = &mut shutdown => {
                        info!(next_run_time = %self.state.next_run_time, "Shutdown requested while waiting");
                        return Ok(totals.finish(RunOutcome::Interrupted));
                    }
                }
            }

            let window = self.state.window(self.interval);
            let report = tokio::select! {
                result = self.process_window(&window) => match result {
                    Ok(report) => report,
                    Err(e) => {
                        error!(window = %window, error = %e, "Billing window failed");
                        return Err(e);
                    }
                },
                _ = &mut shutdown => {
                    warn!(window = %window, "Shutdown requested mid-window; it will be reprocessed on restart");
                    return Ok(totals.finish(RunOutcome::Interrupted));
                }
            };

            totals.record(&report);
            self.state.advance(self.interval);

            if self.state.is_caught_up(self.clock.now(), self.completeness_delay) {
                info!(
                    windows = totals.windows_processed,
                    events = totals.events_dispatched,
                    next_run_time = %self.state.next_run_time,
                    "Recovery run caught up"
                );
                return Ok(totals.finish(RunOutcome::CaughtUp));
            }
        }
    }

    /// Collect, reconcile and dispatch one window
    #[instrument(skip_all, fields(window = %window))]
    pub async fn process_window(&self, window: &TimeWindow) -> Result<WindowReport> {
        let usage = self.collector.collect_usage(window).await?;
        let mut report = WindowReport {
            window: *window,
            workspaces: usage.len(),
            dispatched: 0,
            dead_lettered: 0,
            skipped: 0,
        };

        for (namespace, workspace_usage) in &usage.workspaces {
            let billable = self.policy.reconcile(workspace_usage);

            for (sku, quantity) in billable.line_items() {
                if !quantity.is_finite() {
                    warn!(namespace = %namespace, sku = %sku, quantity, "Non-finite quantity not billed");
                    report.skipped += 1;
                    continue;
                }

                let event = self.factory.make_event(namespace, sku, quantity, window);
                match self.dispatcher.dispatch(&event).await? {
                    DispatchOutcome::Published => report.dispatched += 1,
                    DispatchOutcome::DeadLettered(_) => report.dead_lettered += 1,
                }
            }
        }

        info!(
            workspaces = report.workspaces,
            dispatched = report.dispatched,
            dead_lettered = report.dead_lettered,
            "Billing window processed"
        );
        Ok(report)
    }

    /// Flush and close the publisher
    pub async fn close(&self) -> Result<()> {
        self.dispatcher.close().await?;
        Ok(())
    }
}
