//! # strata-types
//!
//! Shared domain types used across the Strata workspace: the local
//! transaction ledger records, the profile record and its source tag,
//! contract call descriptors exchanged with the node, and the event
//! envelope pushed to UI subscribers.

pub mod chain;
pub mod events;
pub mod profile;
pub mod transaction;

pub use chain::{CallOutcome, CallStatus, ContractCall, Receipt, ReceiptStatus, TxRequest};
pub use events::{Event, EventType};
pub use profile::{Profile, ProfileSource};
pub use transaction::{NewTransaction, Transaction, TransactionUpdate, TxStatus, TxType};

/// Default number of ledger entries kept per account.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Default storage key prefix for the transaction ledger.
pub const DEFAULT_LEDGER_PREFIX: &str = "web3_transaction_history";

/// Default storage key prefix for cached profiles.
pub const DEFAULT_PROFILE_PREFIX: &str = "strata_profile";

/// Default number of confirmations awaited for a submitted transaction.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default first id of an on-chain enumerable collection.
pub const DEFAULT_START_INDEX: u64 = 1;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
