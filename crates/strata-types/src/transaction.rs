//! Local transaction ledger records.

use serde::{Deserialize, Serialize};

/// Kind of user-initiated on-chain action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum TxType {
    Deposit,
    Withdraw,
    Swap,
    BuyToken,
    Purchase,
}

/// Lifecycle state of a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    /// `success` and `failed` are terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// A recorded user transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Transaction {
    /// Opaque unique id, `<millis>_<suffix>`.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TxType,
    /// Decimal amount as entered by the user.
    pub amount: String,
    /// Token symbol.
    pub token: String,
    /// Creation time, ms since epoch.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub status: TxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Input for a new ledger entry; id and timestamp are assigned by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    #[serde(rename = "type")]
    pub kind: TxType,
    pub amount: String,
    pub token: String,
    #[serde(default = "default_status")]
    pub status: TxStatus,
    #[serde(default)]
    pub details: Option<String>,
}

fn default_status() -> TxStatus {
    TxStatus::Pending
}

impl NewTransaction {
    /// A pending entry with no details.
    pub fn pending(kind: TxType, amount: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            kind,
            amount: amount.into(),
            token: token.into(),
            status: TxStatus::Pending,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Partial update merged into an existing entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    #[serde(default)]
    pub status: Option<TxStatus>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl TransactionUpdate {
    pub fn status(status: TxStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn success(tx_hash: impl Into<String>) -> Self {
        Self {
            status: Some(TxStatus::Success),
            tx_hash: Some(tx_hash.into()),
            details: None,
        }
    }
}
