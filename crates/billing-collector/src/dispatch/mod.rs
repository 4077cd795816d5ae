//! Dispatch module - hands billing events to the message bus
//!
//! Provides:
//! - [`EventPublisher`]: the narrow publish capability the bus client implements
//! - [`Dispatcher`]: per-event trace context, bounded retry, dead-lettering
//! - [`DeadLetterSink`]: where events that could not be published are reported

pub mod nats;
pub mod retry;

pub use nats::NatsPublisher;
pub use retry::{with_retry, RetryConfig};

use std::sync::Arc;

use async_trait::async_trait;
use billing_common::{BillingEvent, PublishError};
use opentelemetry::baggage::BaggageExt;
use opentelemetry::trace::FutureExt;
use opentelemetry::{Context, KeyValue};
use tracing::{debug, error, info_span, Instrument};

/// Publish capability of the message bus client
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event. Delivery semantics belong to the implementation.
    async fn publish(&self, event: &BillingEvent) -> Result<(), PublishError>;

    /// Flush anything buffered and release the connection
    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Receives events that could not be published
pub trait DeadLetterSink: Send + Sync {
    fn record(&self, event: &BillingEvent, error: &PublishError);
}

/// Dead-letter sink that logs the full event so it can be replayed by hand
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeadLetter;

impl DeadLetterSink for LogDeadLetter {
    fn record(&self, event: &BillingEvent, error: &PublishError) {
        let payload = serde_json::to_string(event).unwrap_or_else(|e| format!("<unencodable: {e}>"));
        error!(
            event_id = %event.id,
            workspace = %event.workspace,
            sku = %event.sku,
            quantity = event.quantity,
            error = %error,
            payload = %payload,
            "Billing event dead-lettered"
        );
    }
}

/// Result of dispatching one event
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Publisher accepted the event
    Published,
    /// Publishing failed for good; the event went to the dead-letter sink
    DeadLettered(PublishError),
}

/// Sends events through an [`EventPublisher`], one at a time
pub struct Dispatcher {
    publisher: Arc<dyn EventPublisher>,
    retry: RetryConfig,
    dead_letter: Arc<dyn DeadLetterSink>,
}

impl Dispatcher {
    /// Create a dispatcher with the default retry policy and log dead-lettering
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            retry: RetryConfig::default(),
            dead_letter: Arc::new(LogDeadLetter),
        }
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set dead-letter sink
    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = sink;
        self
    }

    /// Publish one event inside its own trace context.
    ///
    /// The context is attached only while the publish future is being polled,
    /// so it is released whether the publish succeeds, fails, or is dropped.
    /// Only a closed publisher is returned as an error; every other failure is
    /// dead-lettered and reported in the outcome.
    pub async fn dispatch(&self, event: &BillingEvent) -> Result<DispatchOutcome, PublishError> {
        let span = info_span!(
            "send_billing_event",
            workspace = %event.workspace,
            sku = %event.sku,
            event_id = %event.id,
        );
        let publisher = self.publisher.as_ref();

        let result = with_retry(move || publisher.publish(event), &self.retry)
            .with_context(event_context(event))
            .instrument(span)
            .await;

        match result {
            Ok(()) => {
                debug!(event_id = %event.id, workspace = %event.workspace, sku = %event.sku, "Billing event published");
                Ok(DispatchOutcome::Published)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.dead_letter.record(event, &e);
                Ok(DispatchOutcome::DeadLettered(e))
            }
        }
    }

    /// Close the underlying publisher
    pub async fn close(&self) -> Result<(), PublishError> {
        self.publisher.close().await
    }
}

/// Baggage carried while an event is being published
fn event_context(event: &BillingEvent) -> Context {
    Context::current_with_baggage(vec![
        KeyValue::new("workspace", event.workspace.clone()),
        KeyValue::new("sku", event.sku.code()),
    ])
}
