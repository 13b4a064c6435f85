//! Account and status command handlers.

use std::sync::Arc;

use serde_json::{json, Value};
use strata_sync::amount::{format_token_amount, is_valid_address};
use tracing::info;

use super::optional_param;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Set or clear the connected account. The ledger and the profile service
/// are scoped to the new account by the time this returns.
pub async fn set_account(state: &Arc<DaemonState>, params: &Value) -> Result {
    let address: Option<String> = optional_param(params, "address")?;
    if let Some(ref address) = address {
        if !is_valid_address(address) {
            return Err(RpcError::invalid_params("address must be 0x followed by 40 hex digits"));
        }
    }

    let changed = state.switch_account(address.clone());
    if changed {
        info!(account = ?address, "Account changed");
    }
    Ok(json!({ "address": address, "changed": changed }))
}

/// Snapshot of the whole engine.
pub async fn get_status(state: &Arc<DaemonState>) -> Result {
    let collection = state.courses.as_ref().map(|reader| {
        let snapshot = reader.snapshot();
        json!({
            "address": reader.source().address,
            "count": snapshot.items.len(),
            "loading": snapshot.loading,
            "error": snapshot.error,
        })
    });

    let balance = state.balance.as_ref().map(|reader| {
        let snapshot = reader.snapshot();
        let formatted = snapshot
            .value
            .as_ref()
            .and_then(value_as_u128)
            .map(|raw| format_token_amount(raw, state.config.node.token_decimals));
        json!({
            "raw": snapshot.value,
            "formatted": formatted,
            "loading": snapshot.loading,
            "error": snapshot.error,
        })
    });

    let profile = state.profile.snapshot();
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "booted_at": state.boot.booted_at(),
        "account": state.account.get(),
        "chain_ready": state.chain.is_ready(),
        "node_url": state.chain.get().map(|client| client.url().to_string()),
        "profile_url": state.profile_url,
        "collection": collection,
        "refresh": state.refresh.as_ref().map(|r| json!({
            "enabled": r.is_enabled(),
            "running": r.is_running(),
            "runs": r.run_count(),
        })),
        "balance": balance,
        "transactions": state.ledger.transactions().len(),
        "profile_source": profile.source,
        "event_sequence": state.event_bus.sequence(),
    }))
}

/// Token amounts arrive as decimal strings when they exceed `u64`.
fn value_as_u128(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
