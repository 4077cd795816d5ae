//! Billing event construction
//!
//! Event ids are UUID v5 over `"{namespace}-{sku}-{window start}"`, so the
//! same workspace, sku and window always produce the same id.

use billing_common::{round_quantity, BillingEvent, Sku, TimeWindow};
use uuid::Uuid;

/// Builds deterministic billing events
#[derive(Debug, Clone)]
pub struct BillingEventFactory {
    namespace_prefix: String,
}

impl BillingEventFactory {
    /// Create a factory that strips `namespace_prefix` from workspace names
    pub fn new(namespace_prefix: impl Into<String>) -> Self {
        Self {
            namespace_prefix: namespace_prefix.into(),
        }
    }

    /// Build the event for `namespace` / `sku` over `window`
    pub fn make_event(
        &self,
        namespace: &str,
        sku: Sku,
        quantity: f64,
        window: &TimeWindow,
    ) -> BillingEvent {
        BillingEvent {
            id: event_id(namespace, sku, window),
            event_start: window.start,
            event_end: window.end,
            sku,
            user: None,
            workspace: self.workspace_name(namespace).to_string(),
            quantity: round_quantity(quantity),
        }
    }

    /// Workspace display name: the namespace with the prefix removed once
    pub fn workspace_name<'a>(&self, namespace: &'a str) -> &'a str {
        namespace
            .strip_prefix(self.namespace_prefix.as_str())
            .unwrap_or(namespace)
    }
}

/// Idempotency key for one (namespace, sku, window) triple
pub fn event_id(namespace: &str, sku: Sku, window: &TimeWindow) -> Uuid {
    let name = format!(
        "{}-{}-{}",
        namespace,
        sku.code(),
        window.start.format("%Y-%m-%dT%H:%M:%S")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn window() -> TimeWindow {
        TimeWindow::starting_at(
            Utc.with_ymd_and_hms(2025, 4, 17, 0, 0, 0).unwrap(),
            Duration::seconds(300),
        )
    }

    #[test]
    fn test_strip_prefix() {
        let factory = BillingEventFactory::new("ws-");
        assert_eq!(factory.workspace_name("ws-foo"), "foo");
        assert_eq!(factory.workspace_name("ws-bar"), "bar");
        assert_eq!(factory.workspace_name("ws-"), "");
        assert_eq!(factory.workspace_name("foo"), "foo");
        assert_eq!(factory.workspace_name(""), "");
        assert_eq!(factory.workspace_name("ws-123"), "123");
        assert_eq!(factory.workspace_name("ws-ws-nested"), "ws-nested");
    }

    #[test]
    fn test_event_id_deterministic() {
        let factory = BillingEventFactory::new("ws-");
        let a = factory.make_event("ws-acme", Sku::CpuSeconds, 10.0, &window());
        let b = factory.make_event("ws-acme", Sku::CpuSeconds, 99.0, &window());

        assert_eq!(a.id, b.id);
        assert_eq!(a.id.get_version_num(), 5);
        assert_eq!(a.id, event_id("ws-acme", Sku::CpuSeconds, &window()));
    }

    #[test]
    fn test_event_id_varies_with_inputs() {
        let base = event_id("ws-acme", Sku::CpuSeconds, &window());

        assert_ne!(base, event_id("ws-globex", Sku::CpuSeconds, &window()));
        assert_ne!(base, event_id("ws-acme", Sku::MemoryGbSeconds, &window()));
        assert_ne!(base, event_id("ws-acme", Sku::CpuSeconds, &window().next()));
    }

    #[test]
    fn test_event_id_name_format() {
        let expected = Uuid::new_v5(
            &Uuid::NAMESPACE_DNS,
            b"ws-acme-cpu-seconds-2025-04-17T00:00:00",
        );
        assert_eq!(event_id("ws-acme", Sku::CpuSeconds, &window()), expected);
    }

    #[test]
    fn test_make_event_fields() {
        let factory = BillingEventFactory::new("ws-");
        let event = factory.make_event("ws-ns1", Sku::MemoryGbSeconds, 1199.99999951, &window());

        assert_eq!(event.workspace, "ns1");
        assert_eq!(event.sku, Sku::MemoryGbSeconds);
        assert_eq!(event.user, None);
        assert_eq!(event.quantity, 1200.0);
        assert_eq!(event.window(), window());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_start"], "2025-04-17T00:00:00Z");
        assert_eq!(json["event_end"], "2025-04-17T00:05:00Z");
    }
}
