//! Billing collector binary

use std::sync::Arc;

use anyhow::Context;
use billing_collector::{
    config::BillingConfig,
    dispatch::{EventPublisher, NatsPublisher},
    metering::PrometheusClient,
    scheduler::{RunOutcome, TimeGridScheduler},
    telemetry,
};
use billing_common::parse_iso_timestamp;
use clap::Parser;
use tracing::{info, warn};

/// Collects workspace usage from Prometheus and publishes billing events
#[derive(Debug, Parser)]
#[command(name = "billing-collector", version, about)]
struct Args {
    /// Backfill from this ISO-8601 instant and exit once caught up
    #[arg(long = "from", env = "BILLING_FROM", value_name = "TIMESTAMP")]
    from: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = BillingConfig::load().context("loading configuration")?;
    telemetry::init_tracing(config.log_format)?;

    let start = args
        .from
        .as_deref()
        .map(parse_iso_timestamp)
        .transpose()
        .context("invalid --from timestamp")?;

    info!(
        version = billing_common::VERSION,
        prometheus = %config.prometheus_url,
        nats = %config.nats_url,
        subject = %config.billing_subject,
        from = ?start,
        "Starting billing collector"
    );

    let publisher = Arc::new(NatsPublisher::connect(&config.nats_url, config.billing_subject.clone()).await?);
    let source = Arc::new(PrometheusClient::new(config.prometheus_url.clone(), config.query_timeout())?);

    let mut scheduler = TimeGridScheduler::new(&config, start, source, publisher.clone());
    let result = scheduler.run_until(shutdown_signal()).await;

    if let Err(e) = publisher.close().await {
        warn!(error = %e, "Failed to flush publisher on exit");
    }

    let summary = result?;
    match summary.outcome {
        RunOutcome::CaughtUp => info!(
            windows = summary.windows_processed,
            events = summary.events_dispatched,
            dead_lettered = summary.events_dead_lettered,
            "Recovery complete"
        ),
        RunOutcome::Interrupted => info!(
            windows = summary.windows_processed,
            next_run_time = %scheduler.state().next_run_time,
            "Billing collector stopped"
        ),
    }

    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
