//! End-to-end scheduler runs against in-memory metrics and publisher fakes,
//! driven by a paused tokio clock.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use billing_collector::billing::{event_id, BillableUsage, BillingPolicy};
use billing_collector::config::BillingConfig;
use billing_collector::dispatch::{DeadLetterSink, EventPublisher, RetryConfig};
use billing_collector::metering::{MetricsSource, RangeSeries};
use billing_collector::scheduler::{RunOutcome, TimeGridScheduler, TokioClock};
use billing_common::{
    BillingError, BillingEvent, PublishError, QueryError, ResourceKind, Sku, TimeWindow, WorkspaceUsage,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Answers each query family with fixed per-namespace values
#[derive(Default)]
struct StaticSource {
    cpu: Vec<(&'static str, f64)>,
    mem: Vec<(&'static str, f64)>,
    requested_cpu: Vec<(&'static str, f64)>,
    requested_mem: Vec<(&'static str, f64)>,
    fail_with: Option<QueryError>,
    windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl StaticSource {
    fn values_for(&self, query: &str) -> &[(&'static str, f64)] {
        if query.contains("container_cpu_usage_seconds_total") {
            &self.cpu
        } else if query.contains("container_memory_usage_bytes") {
            &self.mem
        } else if query.contains("resource=\"cpu\"") {
            &self.requested_cpu
        } else {
            &self.requested_mem
        }
    }

    fn windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSource for StaticSource {
    async fn range_query(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _step: StdDuration,
    ) -> Result<Vec<RangeSeries>, QueryError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        if query.contains("container_cpu_usage_seconds_total") {
            self.windows.lock().unwrap().push((start, end));
        }

        Ok(self
            .values_for(query)
            .iter()
            .map(|(namespace, value)| {
                RangeSeries::for_namespace(*namespace, vec![(end.timestamp() as f64, *value)])
            })
            .collect())
    }
}

/// Records published events; optionally fails every publish
#[derive(Default)]
struct MemoryPublisher {
    events: Mutex<Vec<BillingEvent>>,
    fail_with: Option<PublishError>,
}

impl MemoryPublisher {
    fn failing(error: PublishError) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_with: Some(error),
        }
    }

    fn events(&self) -> Vec<BillingEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, event: &BillingEvent) -> Result<(), PublishError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDeadLetter {
    events: Mutex<Vec<(BillingEvent, String)>>,
}

impl DeadLetterSink for RecordingDeadLetter {
    fn record(&self, event: &BillingEvent, error: &PublishError) {
        self.events.lock().unwrap().push((event.clone(), error.to_string()));
    }
}

fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 17, 12, 0, 0).unwrap()
}

fn single_workspace_source() -> Arc<StaticSource> {
    Arc::new(StaticSource {
        cpu: vec![("ws-acme", 12.5)],
        ..Default::default()
    })
}

fn assert_contiguous(windows: &[(DateTime<Utc>, DateTime<Utc>)], interval: Duration) {
    for (start, end) in windows {
        assert_eq!(*end - *start, interval);
    }
    for pair in windows.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "gap or overlap between windows");
    }
}

#[tokio::test(start_paused = true)]
async fn test_recovery_from_far_past_drains_backlog_then_stops() {
    let source = single_workspace_source();
    let publisher = Arc::new(MemoryPublisher::default());
    let start = origin() - Duration::hours(1);

    let mut scheduler = TimeGridScheduler::with_clock(
        &BillingConfig::default(),
        Some(start),
        source.clone(),
        publisher.clone(),
        Arc::new(TokioClock::starting_at(origin())),
    );

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::CaughtUp);
    assert_eq!(summary.windows_processed, 12);
    assert_eq!(summary.events_dispatched, 12);

    let windows = source.windows();
    assert_eq!(windows.len(), 12);
    assert_eq!(windows[0].0, start);
    assert_eq!(windows[11].1, origin());
    assert_contiguous(&windows, Duration::seconds(300));

    let events = publisher.events();
    assert!(events.iter().all(|e| e.workspace == "acme" && e.sku == Sku::CpuSeconds));
    assert_eq!(scheduler.state().next_run_time, origin());
}

#[tokio::test(start_paused = true)]
async fn test_recovery_near_now_waits_then_processes_one_window() {
    // (start offset before now, wait until the window completes)
    let cases = [
        (Duration::minutes(5), StdDuration::from_secs(60)),
        (Duration::minutes(2), StdDuration::from_secs(4 * 60)),
        (Duration::zero(), StdDuration::from_secs(6 * 60)),
    ];

    for (offset, expected_wait) in cases {
        let source = single_workspace_source();
        let publisher = Arc::new(MemoryPublisher::default());
        let started = tokio::time::Instant::now();

        let mut scheduler = TimeGridScheduler::with_clock(
            &BillingConfig::default(),
            Some(origin() - offset),
            source.clone(),
            publisher.clone(),
            Arc::new(TokioClock::starting_at(origin())),
        );

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::CaughtUp);
        assert_eq!(summary.windows_processed, 1, "offset {offset}: {summary:?}");
        let waited = started.elapsed();
        assert!(
            waited >= expected_wait && waited < expected_wait + StdDuration::from_secs(1),
            "offset {offset}: waited {waited:?}"
        );
        assert_eq!(source.windows(), vec![(origin() - offset, origin() - offset + Duration::minutes(5))]);
        assert_eq!(publisher.events().len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_reservation_billing_scenario() {
    let source = Arc::new(StaticSource {
        cpu: vec![("ws-ns1", 10.0)],
        mem: vec![("ws-ns1", 2.0 * GIB)],
        requested_cpu: vec![("ws-ns1", 8.0)],
        requested_mem: vec![("ws-ns1", GIB)],
        ..Default::default()
    });
    let publisher = Arc::new(MemoryPublisher::default());
    let config = BillingConfig {
        scrape_interval_sec: 600,
        ..BillingConfig::default()
    };
    let start = origin() - Duration::minutes(11);

    let mut scheduler = TimeGridScheduler::with_clock(
        &config,
        Some(start),
        source,
        publisher.clone(),
        Arc::new(TokioClock::starting_at(origin())),
    );

    let summary = scheduler.run().await.unwrap();
    assert_eq!(summary.windows_processed, 1);

    let window = TimeWindow::starting_at(start, Duration::seconds(600));
    let events = publisher.events();
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].sku, Sku::CpuSeconds);
    assert_eq!(events[0].quantity, 4800.0);
    assert_eq!(events[0].workspace, "ns1");
    assert_eq!(events[0].id, event_id("ws-ns1", Sku::CpuSeconds, &window));

    assert_eq!(events[1].sku, Sku::MemoryGbSeconds);
    assert_eq!(events[1].quantity, 1200.0);
    assert_eq!(events[1].workspace, "ns1");
    assert_eq!(events[1].window(), window);
}

/// Bills observed usage only, ignoring reservations
struct ActualUsagePolicy;

impl BillingPolicy for ActualUsagePolicy {
    fn reconcile(&self, usage: &WorkspaceUsage) -> BillableUsage {
        BillableUsage {
            cpu_seconds: usage.get(ResourceKind::Cpu),
            memory_gb_seconds: usage.get(ResourceKind::Mem),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_replaces_reservation_billing() {
    let source = Arc::new(StaticSource {
        cpu: vec![("ws-ns1", 10.0)],
        mem: vec![("ws-ns1", 2.0 * GIB)],
        requested_cpu: vec![("ws-ns1", 8.0)],
        requested_mem: vec![("ws-ns1", 4.0 * GIB)],
        ..Default::default()
    });
    let publisher = Arc::new(MemoryPublisher::default());
    let config = BillingConfig {
        scrape_interval_sec: 600,
        ..BillingConfig::default()
    };

    let mut scheduler = TimeGridScheduler::with_clock(
        &config,
        Some(origin() - Duration::minutes(11)),
        source,
        publisher.clone(),
        Arc::new(TokioClock::starting_at(origin())),
    )
    .with_policy(Arc::new(ActualUsagePolicy));

    let summary = scheduler.run().await.unwrap();
    assert_eq!(summary.windows_processed, 1);

    let events = publisher.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sku, Sku::CpuSeconds);
    assert_eq!(events[0].quantity, 10.0);
    assert_eq!(events[1].sku, Sku::MemoryGbSeconds);
    assert_eq!(events[1].quantity, 1200.0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_usage_emits_nothing() {
    let source = Arc::new(StaticSource {
        cpu: vec![("ws-idle", 0.0), ("ws-busy", 3.0)],
        mem: vec![("ws-idle", 0.0)],
        ..Default::default()
    });
    let publisher = Arc::new(MemoryPublisher::default());

    let mut scheduler = TimeGridScheduler::with_clock(
        &BillingConfig::default(),
        Some(origin() - Duration::minutes(6)),
        source,
        publisher.clone(),
        Arc::new(TokioClock::starting_at(origin())),
    );

    scheduler.run().await.unwrap();

    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].workspace, "busy");
}

#[tokio::test(start_paused = true)]
async fn test_query_failure_stops_without_advancing() {
    let source = Arc::new(StaticSource {
        fail_with: Some(QueryError::Status {
            status: 503,
            body: "unavailable".to_string(),
        }),
        ..Default::default()
    });
    let publisher = Arc::new(MemoryPublisher::default());
    let start = origin() - Duration::hours(1);

    let mut scheduler = TimeGridScheduler::with_clock(
        &BillingConfig::default(),
        Some(start),
        source,
        publisher.clone(),
        Arc::new(TokioClock::starting_at(origin())),
    );

    let err = scheduler.run().await.unwrap_err();

    assert!(matches!(err, BillingError::Query(QueryError::Status { status: 503, .. })));
    assert_eq!(scheduler.state().next_run_time, start);
    assert!(publisher.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_publish_is_dead_lettered_and_window_advances() {
    let publisher = Arc::new(MemoryPublisher::failing(PublishError::Rejected(
        "no responders".to_string(),
    )));
    let dead_letter = Arc::new(RecordingDeadLetter::default());
    let start = origin() - Duration::minutes(11);

    let mut scheduler = TimeGridScheduler::with_clock(
        &BillingConfig::default(),
        Some(start),
        single_workspace_source(),
        publisher,
        Arc::new(TokioClock::starting_at(origin())),
    )
    .with_retry(RetryConfig::none())
    .with_dead_letter(dead_letter.clone());

    let summary = scheduler.run().await.unwrap();

    assert_eq!(summary.windows_processed, 2);
    assert_eq!(summary.events_dispatched, 0);
    assert_eq!(summary.events_dead_lettered, 2);
    assert_eq!(dead_letter.events.lock().unwrap().len(), 2);
    assert_eq!(scheduler.state().next_run_time, start + Duration::minutes(10));
}

#[tokio::test(start_paused = true)]
async fn test_closed_publisher_is_fatal() {
    let publisher = Arc::new(MemoryPublisher::failing(PublishError::Closed));
    let dead_letter = Arc::new(RecordingDeadLetter::default());
    let start = origin() - Duration::minutes(11);

    let mut scheduler = TimeGridScheduler::with_clock(
        &BillingConfig::default(),
        Some(start),
        single_workspace_source(),
        publisher,
        Arc::new(TokioClock::starting_at(origin())),
    )
    .with_dead_letter(dead_letter.clone());

    let err = scheduler.run().await.unwrap_err();

    assert!(matches!(err, BillingError::Publish(PublishError::Closed)));
    assert!(dead_letter.events.lock().unwrap().is_empty());
    assert_eq!(scheduler.state().next_run_time, start);
}

#[tokio::test(start_paused = true)]
async fn test_normal_mode_keeps_pace_until_shutdown() {
    let source = single_workspace_source();
    let publisher = Arc::new(MemoryPublisher::default());

    let mut scheduler = TimeGridScheduler::with_clock(
        &BillingConfig::default(),
        None,
        source.clone(),
        publisher.clone(),
        Arc::new(TokioClock::starting_at(origin())),
    );

    // Backlog of 11 windows, then one more at +1m and another at +6m.
    let summary = scheduler
        .run_until(tokio::time::sleep(StdDuration::from_secs(7 * 60)))
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Interrupted);
    assert_eq!(summary.windows_processed, 13);

    let windows = source.windows();
    assert_eq!(windows[0].0, origin() - Duration::hours(1));
    assert_eq!(windows[12].1, origin() + Duration::minutes(5));
    assert_contiguous(&windows, Duration::seconds(300));
    assert_eq!(publisher.events().len(), 13);
}

#[tokio::test(start_paused = true)]
async fn test_replay_produces_identical_event_ids() {
    let start = origin() - Duration::minutes(30);
    let mut runs = Vec::new();

    for _ in 0..2 {
        let publisher = Arc::new(MemoryPublisher::default());
        let mut scheduler = TimeGridScheduler::with_clock(
            &BillingConfig::default(),
            Some(start),
            single_workspace_source(),
            publisher.clone(),
            Arc::new(TokioClock::starting_at(origin())),
        );
        scheduler.run().await.unwrap();
        runs.push(publisher.events().into_iter().map(|e| e.id).collect::<Vec<_>>());
    }

    assert!(!runs[0].is_empty());
    assert_eq!(runs[0], runs[1]);
}
