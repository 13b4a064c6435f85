//! Course collection command handlers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::optional_param;
use crate::rpc::RpcError;
use crate::{CourseReader, DaemonState};

type Result = std::result::Result<Value, RpcError>;

fn reader(state: &DaemonState) -> std::result::Result<&Arc<CourseReader>, RpcError> {
    state
        .courses
        .as_ref()
        .ok_or_else(RpcError::collection_not_configured)
}

/// Current collection snapshot.
pub async fn get_collection(state: &Arc<DaemonState>) -> Result {
    let reader = reader(state)?;
    let snapshot = reader.snapshot();
    Ok(json!({
        "items": snapshot.items.as_slice(),
        "loading": snapshot.loading,
        "error": snapshot.error,
    }))
}

/// Reload the collection.
///
/// With `wait` the call returns the fresh items; otherwise the reload key
/// is bumped and the result arrives as a `collection_updated` event.
pub async fn reload_collection(state: &Arc<DaemonState>, params: &Value) -> Result {
    let reader = reader(state)?;
    let wait: bool = optional_param(params, "wait")?.unwrap_or(false);
    if !wait {
        let key = state.reload.bump();
        return Ok(json!({ "reload_key": key }));
    }

    let items = reader.load().await;
    let snapshot = reader.snapshot();
    Ok(json!({
        "items": items.as_slice(),
        "error": snapshot.error,
    }))
}

/// Reconfigure or trigger the periodic refresh.
pub async fn set_refresh(state: &Arc<DaemonState>, params: &Value) -> Result {
    let refresh = state
        .refresh
        .as_ref()
        .ok_or_else(RpcError::collection_not_configured)?;

    if let Some(interval_ms) = optional_param::<u64>(params, "interval_ms")? {
        if interval_ms == 0 {
            return Err(RpcError::invalid_params("interval_ms must be positive"));
        }
        refresh.set_interval(Duration::from_millis(interval_ms));
    }
    if let Some(enabled) = optional_param::<bool>(params, "enabled")? {
        refresh.set_enabled(enabled);
    }
    if optional_param::<bool>(params, "trigger")?.unwrap_or(false) {
        refresh.trigger().await;
    }

    Ok(json!({
        "enabled": refresh.is_enabled(),
        "running": refresh.is_running(),
        "runs": refresh.run_count(),
    }))
}
