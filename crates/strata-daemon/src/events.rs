//! Event emission to UI subscribers.
//!
//! Engine state changes are pushed to subscribed IPC connections as
//! JSON-RPC notifications. Each subscriber has an independent buffer;
//! a subscriber that falls behind skips the missed events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_types::{Event, EventType};
use tokio::sync::broadcast;

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "chain", "ledger", "profile", "system".
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Only these event types.
    #[serde(default)]
    pub event_types: Option<Vec<EventType>>,
    /// Only events whose payload `address` matches (case-insensitive).
    #[serde(default)]
    pub address: Option<String>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Emit an event stamped with the current time.
    pub fn publish(&self, event_type: EventType, payload: Value) {
        self.emit(Event {
            event_type,
            timestamp: strata_types::now_millis(),
            payload,
        });
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let category = event.event_type.category();
            if !categories.iter().any(|c| c == category) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }

        // Events without an address are not account specific and pass.
        if let Some(ref address) = self.address {
            if let Some(event_address) = event.payload.get("address").and_then(Value::as_str) {
                if !event_address.eq_ignore_ascii_case(address) {
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, payload: Value) -> Event {
        Event {
            event_type,
            timestamp: 1000,
            payload,
        }
    }

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(
            EventType::DaemonStarted,
            serde_json::json!({"version": "0.1.0"}),
        );

        let event = rx.try_recv().expect("receive event");
        assert_eq!(event.event_type, EventType::DaemonStarted);
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_event_filter_categories() {
        let filter = EventFilter {
            categories: Some(vec!["ledger".to_string()]),
            ..Default::default()
        };
        assert!(filter.matches(&event(EventType::LedgerUpdated, serde_json::json!({}))));
        assert!(!filter.matches(&event(EventType::ProfileUpdated, serde_json::json!({}))));
    }

    #[test]
    fn test_event_filter_types_and_address() {
        let filter = EventFilter {
            event_types: Some(vec![EventType::ProfileUpdated]),
            address: Some("0xAA".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&event(
            EventType::ProfileUpdated,
            serde_json::json!({"address": "0xaa"})
        )));
        assert!(!filter.matches(&event(
            EventType::ProfileUpdated,
            serde_json::json!({"address": "0xbb"})
        )));
        assert!(!filter.matches(&event(EventType::LedgerUpdated, serde_json::json!({}))));
    }

    #[test]
    fn test_filter_from_params() {
        let filter: EventFilter =
            serde_json::from_value(serde_json::json!({"categories": ["chain"]})).expect("parse");
        assert!(filter.matches(&event(EventType::CollectionUpdated, Value::Null)));
        assert!(filter.event_types.is_none());
    }
}
