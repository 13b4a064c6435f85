//! Profile record shared between the remote store and local storage.

use serde::{Deserialize, Serialize};

/// A per-address profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Profile {
    /// Lower-cased account address.
    pub address: String,
    pub nickname: String,
    /// Wallet signature over `message`.
    pub signature: String,
    pub message: String,
    pub updated_at: u64,
}

/// Which copy of the profile most recently satisfied a read or write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ProfileSource {
    #[default]
    None,
    Remote,
    Local,
}
