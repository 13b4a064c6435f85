//! Namespaced storage keys.
//!
//! Every cache entry is scoped by account address so one account's data
//! is never written under another account's key.

/// `"<prefix>_<lowercased-address>"`.
pub fn scoped_key(prefix: &str, address: &str) -> String {
    format!("{prefix}_{}", address.trim().to_lowercase())
}
