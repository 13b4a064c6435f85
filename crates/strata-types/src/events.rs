//! Event types for engine-to-UI notification.
//!
//! All events are emitted via the JSON-RPC event subscription channel.

use serde::{Deserialize, Serialize};

/// Envelope for all daemon events.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: u64,
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
}

/// All event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EventType {
    // Chain state
    CollectionUpdated,
    AccountValueUpdated,

    // Ledger
    LedgerUpdated,
    TransactionSubmitted,
    TransactionConfirmed,
    TransactionFailed,

    // Profile
    ProfileUpdated,

    // System
    AccountChanged,
    DaemonStarted,
    ErrorOccurred,
}

impl EventType {
    /// Category used by subscription filters.
    pub fn category(self) -> &'static str {
        match self {
            EventType::CollectionUpdated | EventType::AccountValueUpdated => "chain",
            EventType::LedgerUpdated
            | EventType::TransactionSubmitted
            | EventType::TransactionConfirmed
            | EventType::TransactionFailed => "ledger",
            EventType::ProfileUpdated => "profile",
            EventType::AccountChanged | EventType::DaemonStarted | EventType::ErrorOccurred => {
                "system"
            }
        }
    }
}
