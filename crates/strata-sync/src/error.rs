//! Error taxonomy for the sync engine.
//!
//! - transient read failures are captured into component state
//! - user-rejected actions are detected by message pattern and reported
//!   as informational, not as failures
//! - an absent client fails fast with [`SyncError::ClientUnavailable`]
//! - persistence failures are swallowed by the components themselves

use thiserror::Error;

/// Failure reported by the blockchain node client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// JSON-RPC error object returned by the node.
    #[error("{message}")]
    Rpc { code: i64, message: String },

    /// Network or protocol failure reaching the node.
    #[error("network error: {0}")]
    Transport(String),

    /// The transaction was mined but reverted.
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    /// The transaction was dropped or replaced before confirmation.
    #[error("transaction {tx_hash} dropped")]
    Dropped { tx_hash: String },

    /// The node answered with a value of an unexpected shape.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Failure reported by the remote profile store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network failure reaching the store.
    #[error("network error: {0}")]
    Transport(String),

    /// Non-2xx response.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// Malformed response body.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Engine error.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("{0} not available")]
    ClientUnavailable(&'static str),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("storage error: {0}")]
    Store(String),

    #[error("item {id}: {message}")]
    Decode { id: u64, message: String },

    #[error("refresh callback failed: {0}")]
    Callback(String),
}

impl From<strata_store::StoreError> for SyncError {
    fn from(err: strata_store::StoreError) -> Self {
        SyncError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// How a failed user action should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The user declined in their wallet. Informational.
    UserRejected,
    /// Anything else.
    Failure,
}

const REJECTION_PATTERNS: &[&str] = &[
    "user rejected",
    "user denied",
    "user cancelled",
    "user canceled",
    "transaction was rejected",
    "rejected the request",
];

/// Case-insensitive match against the wallet rejection phrases.
pub fn is_user_rejected(message: &str) -> bool {
    let lower = message.to_lowercase();
    REJECTION_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify an error by its message.
pub fn classify(err: &SyncError) -> ErrorClass {
    if is_user_rejected(&err.to_string()) {
        ErrorClass::UserRejected
    } else {
        ErrorClass::Failure
    }
}

const MAX_MESSAGE_LEN: usize = 100;

/// Short user-facing description of a failure message.
pub fn describe_error(message: &str) -> String {
    if is_user_rejected(message) {
        return "You cancelled this action".to_string();
    }

    let known = [
        ("insufficient funds", "Insufficient balance, check your account"),
        ("gas required exceeds", "Gas limit too low, increase the gas limit"),
        ("execution reverted", "Transaction reverted, check the contract state"),
        ("nonce too low", "Nonce too low, please retry"),
        (
            "replacement transaction underpriced",
            "Replacement transaction gas price too low",
        ),
        ("network", "Network request failed, check your connection"),
    ];
    if let Some((_, friendly)) = known.iter().find(|(needle, _)| message.contains(needle)) {
        return (*friendly).to_string();
    }

    let first_line = message.lines().next().unwrap_or_default();
    if first_line.is_empty() {
        return "Operation failed, please retry".to_string();
    }
    if first_line.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = first_line.chars().take(MAX_MESSAGE_LEN).collect();
        return format!("{truncated}...");
    }
    first_line.to_string()
}
