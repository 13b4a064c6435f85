//! Transaction history command handlers.

use std::sync::Arc;

use serde_json::{json, Value};
use strata_sync::amount::parse_units;
use strata_sync::{ChainError, SyncError};
use strata_types::{
    EventType, NewTransaction, ReceiptStatus, TransactionUpdate, TxRequest, TxStatus,
};
use tracing::info;

use super::{optional_param, param};
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Amounts are validated against the widest supported token precision.
const AMOUNT_DECIMALS: u32 = 18;

/// Entries for the connected account, newest first.
pub async fn get_transactions(state: &Arc<DaemonState>) -> Result {
    Ok(json!({
        "address": state.ledger.address(),
        "transactions": state.ledger.transactions(),
    }))
}

/// Record a transaction the UI is about to submit itself.
pub async fn add_transaction(state: &Arc<DaemonState>, params: &Value) -> Result {
    let entry: NewTransaction = param(params, "transaction")?;
    if parse_units(&entry.amount, AMOUNT_DECIMALS).is_none() {
        return Err(RpcError::invalid_params("amount must be a non-negative decimal"));
    }
    if entry.token.trim().is_empty() {
        return Err(RpcError::invalid_params("token required"));
    }

    let id = state.ledger.add_transaction(entry);
    Ok(json!({ "id": id }))
}

/// Merge a partial update into an entry.
pub async fn update_transaction(state: &Arc<DaemonState>, params: &Value) -> Result {
    let id: String = param(params, "id")?;
    let update: TransactionUpdate = param(params, "update")?;
    if !state.ledger.update_transaction(&id, update) {
        return Err(RpcError::transaction_not_found(&id));
    }
    Ok(json!({ "transaction": state.ledger.get(&id) }))
}

/// Forget the connected account's history.
pub async fn clear_history(state: &Arc<DaemonState>) -> Result {
    state.ledger.clear_history();
    Ok(json!({ "cleared": true }))
}

/// Wait for a transaction hash to reach the requested depth. When a
/// ledger `id` is given the entry records the outcome.
pub async fn wait_for_receipt(state: &Arc<DaemonState>, params: &Value) -> Result {
    let tx_hash: String = param(params, "tx_hash")?;
    let confirmations: u64 = optional_param(params, "confirmations")?
        .unwrap_or(state.config.node.confirmations);
    let id: Option<String> = optional_param(params, "id")?;
    let owner = state.ledger.address();

    if let Some(ref id) = id {
        if state.ledger.get(id).is_none() {
            return Err(RpcError::transaction_not_found(id));
        }
    }

    let outcome = match state.waiter.wait_for_receipt(&tx_hash, confirmations).await {
        Ok(receipt) if receipt.status == ReceiptStatus::Reverted => {
            Err(SyncError::Chain(ChainError::Reverted {
                tx_hash: tx_hash.clone(),
            }))
        }
        other => other,
    };

    match outcome {
        Ok(receipt) => {
            if let Some(ref id) = id {
                state.ledger.update_transaction_for(
                    owner.as_deref(),
                    id,
                    TransactionUpdate::success(tx_hash.clone()),
                );
            }
            state.event_bus.publish(
                EventType::TransactionConfirmed,
                json!({
                    "id": id,
                    "address": owner,
                    "tx_hash": tx_hash,
                    "block_number": receipt.block_number,
                }),
            );
            Ok(json!({ "receipt": receipt }))
        }
        Err(e) => {
            if let Some(ref id) = id {
                state.ledger.update_transaction_for(
                    owner.as_deref(),
                    id,
                    TransactionUpdate {
                        status: Some(TxStatus::Failed),
                        tx_hash: Some(tx_hash.clone()),
                        details: None,
                    },
                );
            }
            state.event_bus.publish(
                EventType::TransactionFailed,
                json!({
                    "id": id,
                    "address": owner,
                    "tx_hash": tx_hash,
                    "error": e.to_string(),
                }),
            );
            Err(RpcError::from(&e))
        }
    }
}

/// Sign, submit and confirm one or more steps under a single ledger entry.
pub async fn submit_transaction(state: &Arc<DaemonState>, params: &Value) -> Result {
    let entry: NewTransaction = param(params, "transaction")?;
    let steps: Vec<TxRequest> = param(params, "steps")?;
    if steps.is_empty() {
        return Err(RpcError::invalid_params("steps must not be empty"));
    }
    if parse_units(&entry.amount, AMOUNT_DECIMALS).is_none() {
        return Err(RpcError::invalid_params("amount must be a non-negative decimal"));
    }

    let kind = entry.kind;
    let owner = state.ledger.address();
    state.event_bus.publish(
        EventType::TransactionSubmitted,
        json!({ "address": owner, "type": kind, "steps": steps.len() }),
    );

    match state.flow.submit_steps(entry, steps).await {
        Ok(submitted) => {
            info!(id = %submitted.id, "Submitted transaction confirmed");
            state.event_bus.publish(
                EventType::TransactionConfirmed,
                json!({
                    "id": submitted.id,
                    "address": owner,
                    "tx_hash": submitted.tx_hash,
                    "block_number": submitted.receipt.block_number,
                }),
            );
            Ok(json!({
                "id": submitted.id,
                "tx_hash": submitted.tx_hash,
                "receipt": submitted.receipt,
            }))
        }
        Err(e) => {
            state.event_bus.publish(
                EventType::TransactionFailed,
                json!({
                    "id": e.id,
                    "address": owner,
                    "error": e.to_string(),
                    "user_rejected": e.is_user_rejected(),
                }),
            );
            Err(RpcError::from_submit(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn new_entry(amount: &str) -> Value {
        json!({"transaction": {"type": "deposit", "amount": amount, "token": "USDT"}})
    }

    #[tokio::test]
    async fn test_add_and_update_transaction() {
        let state = testing::state(testing::offline_config());
        let added = add_transaction(&state, &new_entry("12.5")).await.expect("add");
        let id = added["id"].as_str().expect("id").to_string();

        let listed = get_transactions(&state).await.expect("list");
        assert_eq!(listed["transactions"][0]["id"], id.as_str());
        assert_eq!(listed["transactions"][0]["status"], "pending");

        let updated = update_transaction(
            &state,
            &json!({"id": id, "update": {"status": "success", "txHash": "0xabc"}}),
        )
        .await
        .expect("update");
        assert_eq!(updated["transaction"]["status"], "success");
        assert_eq!(updated["transaction"]["txHash"], "0xabc");
    }

    #[tokio::test]
    async fn test_add_transaction_rejects_bad_amount() {
        let state = testing::state(testing::offline_config());
        let err = add_transaction(&state, &new_entry("-1"))
            .await
            .expect_err("negative");
        assert_eq!(err.code, -32602);
        let err = add_transaction(&state, &json!({}))
            .await
            .expect_err("missing");
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn test_update_unknown_transaction() {
        let state = testing::state(testing::offline_config());
        let err = update_transaction(&state, &json!({"id": "nope", "update": {}}))
            .await
            .expect_err("unknown");
        assert_eq!(err.code, -32022);
    }

    #[tokio::test]
    async fn test_clear_history() {
        let state = testing::state(testing::offline_config());
        add_transaction(&state, &new_entry("1")).await.expect("add");
        clear_history(&state).await.expect("clear");
        let listed = get_transactions(&state).await.expect("list");
        assert_eq!(listed["transactions"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn test_wait_for_unknown_entry() {
        let state = testing::state(testing::offline_config());
        let err = wait_for_receipt(&state, &json!({"tx_hash": "0x1", "id": "missing"}))
            .await
            .expect_err("unknown entry");
        assert_eq!(err.code, -32022);
    }

    #[tokio::test]
    async fn test_submit_requires_steps() {
        let state = testing::state(testing::offline_config());
        let mut params = new_entry("1");
        params["steps"] = json!([]);
        let err = submit_transaction(&state, &params)
            .await
            .expect_err("empty steps");
        assert_eq!(err.code, -32602);
    }
}
