//! NATS publisher for billing events
//!
//! Events are published as JSON with a `Nats-Msg-Id` header set to the
//! deterministic event id, so a JetStream stream with a duplicate window
//! drops redeliveries of the same window.

use std::time::Duration;

use async_nats::client::FlushErrorKind;
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use billing_common::{BillingError, BillingEvent, PublishError, Result};
use tracing::{info, instrument, warn};

use super::EventPublisher;

/// Header carrying the idempotency key
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Publishes billing events to a NATS subject
pub struct NatsPublisher {
    client: Client,
    subject: String,
    flush_timeout: Duration,
}

impl NatsPublisher {
    /// Connect to the NATS server at `url`
    #[instrument(skip(subject))]
    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| {
                BillingError::Publish(PublishError::Connection(format!(
                    "Failed to connect to NATS at {url}: {e}"
                )))
            })?;
        let subject = subject.into();

        info!(subject = %subject, "Connected to NATS");

        Ok(Self::from_client(client, subject))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
            flush_timeout: Duration::from_secs(10),
        }
    }

    /// Subject events go to
    pub fn subject(&self) -> &str {
        &self.subject
    }

    async fn flush(&self) -> std::result::Result<(), PublishError> {
        match tokio::time::timeout(self.flush_timeout, self.client.flush()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(flush_error(e.kind(), e.to_string())),
            Err(_) => Err(PublishError::Timeout(self.flush_timeout.as_millis() as u64)),
        }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &BillingEvent) -> std::result::Result<(), PublishError> {
        let payload = event
            .to_json()
            .map_err(|e| PublishError::Serialization(e.to_string()))?;

        check_payload_size(payload.len(), self.client.server_info().max_payload)?;

        let mut headers = HeaderMap::new();
        headers.insert(MSG_ID_HEADER, event.id.to_string().as_str());

        self.client
            .publish_with_headers(self.subject.clone(), headers, payload.into())
            .await
            .map_err(|e| {
                // The only failure is a closed command channel: the client is gone
                warn!(subject = %self.subject, error = %e, "NATS client closed");
                PublishError::Closed
            })?;

        // Surface broken connections now rather than at the next window
        self.flush().await
    }

    async fn close(&self) -> std::result::Result<(), PublishError> {
        self.flush().await?;
        info!(subject = %self.subject, "NATS publisher flushed");
        Ok(())
    }
}

/// Reject payloads the server announced it will not accept. A zero limit
/// means the server did not announce one.
fn check_payload_size(len: usize, max_payload: usize) -> std::result::Result<(), PublishError> {
    if max_payload > 0 && len > max_payload {
        return Err(PublishError::Rejected(format!(
            "payload of {len} bytes exceeds server limit of {max_payload}"
        )));
    }
    Ok(())
}

/// Classify a failed flush. `SendError` means the connection task is gone
/// and the client will never recover.
fn flush_error(kind: FlushErrorKind, detail: String) -> PublishError {
    match kind {
        FlushErrorKind::SendError => PublishError::Closed,
        FlushErrorKind::FlushError => PublishError::Connection(detail),
    }
}
