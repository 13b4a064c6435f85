//! Diagnostics and event subscription helpers.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use super::optional_param;
use crate::events::EventFilter;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Daemon version and boot time.
pub async fn get_version(state: &Arc<DaemonState>) -> Result {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "booted": state.boot.is_booted(),
        "booted_at": state.boot.booted_at(),
    }))
}

/// Ask the daemon to exit.
pub async fn shutdown(state: &Arc<DaemonState>) -> Result {
    info!("Shutdown requested over IPC");
    let _ = state.shutdown_tx.send(());
    Ok(json!({"shutting_down": true}))
}

/// Event filter from `subscribe_events` params. Absent means everything.
pub fn parse_filter(params: &Value) -> std::result::Result<EventFilter, RpcError> {
    Ok(optional_param(params, "filter")?.unwrap_or_default())
}

/// Random 128-bit subscription id, hex encoded.
pub fn new_subscription_id() -> String {
    let mut sub_id = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut sub_id);
    hex::encode(sub_id)
}
