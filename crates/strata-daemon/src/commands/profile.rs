//! Profile command handlers.

use std::sync::Arc;

use serde_json::{json, Value};
use strata_types::Profile;

use super::param;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Profile state for the connected account.
pub async fn get_profile(state: &Arc<DaemonState>) -> Result {
    let snapshot = state.profile.snapshot();
    Ok(json!({
        "address": state.profile.address(),
        "loading": snapshot.is_loading(),
        "state": snapshot,
    }))
}

/// Save a signed profile locally, then publish it to the remote store.
///
/// A failed publish still succeeds the call; `synced` is false and the
/// profile state carries the warning.
pub async fn save_profile(state: &Arc<DaemonState>, params: &Value) -> Result {
    let address = state
        .account
        .get()
        .map(|a| a.to_lowercase())
        .ok_or_else(RpcError::no_account)?;
    let nickname: String = param(params, "nickname")?;
    let nickname = nickname.trim().to_string();
    if nickname.is_empty() {
        return Err(RpcError::invalid_params("nickname required"));
    }

    let profile = Profile {
        address,
        nickname,
        signature: param(params, "signature")?,
        message: param(params, "message")?,
        updated_at: strata_types::now_millis(),
    };

    if !state.profile.save_local(profile.clone()) {
        // The account switched while the request was in flight.
        return Err(RpcError::internal_error("profile account is not current"));
    }
    let synced = state.profile.sync_to_remote(&profile).await;
    Ok(json!({ "saved": true, "synced": synced, "profile": profile }))
}

/// Retry publishing the current profile.
pub async fn sync_profile(state: &Arc<DaemonState>) -> Result {
    let profile = state
        .profile
        .snapshot()
        .profile
        .ok_or_else(|| RpcError::invalid_params("no profile to sync"))?;
    let synced = state.profile.sync_to_remote(&profile).await;
    Ok(json!({ "synced": synced, "state": state.profile.snapshot() }))
}
