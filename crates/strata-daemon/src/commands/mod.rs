//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod account;
pub mod collection;
pub mod diagnostics;
pub mod ledger;
pub mod profile;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc::RpcError;

/// Decode a named parameter.
pub(crate) fn param<T: DeserializeOwned>(params: &Value, name: &str) -> Result<T, RpcError> {
    let value = params
        .get(name)
        .cloned()
        .ok_or_else(|| RpcError::invalid_params(&format!("{name} required")))?;
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(&format!("{name}: {e}")))
}

/// Decode an optional named parameter; `null` counts as absent.
pub(crate) fn optional_param<T: DeserializeOwned>(
    params: &Value,
    name: &str,
) -> Result<Option<T>, RpcError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| RpcError::invalid_params(&format!("{name}: {e}"))),
    }
}
