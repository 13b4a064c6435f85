//! HTTP JSON-RPC client for the chain gateway.
//!
//! The gateway holds the wallet and exposes contract reads, batched
//! reads, signing and receipt polling as JSON-RPC 2.0 methods.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use strata_sync::{ChainClient, ChainError};
use strata_types::{CallOutcome, ContractCall, Receipt, TxRequest};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    code: i64,
    message: String,
}

pub struct JsonRpcNodeClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcNodeClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "Node request");

        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Transport(format!("HTTP {status}: {body}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| ChainError::Decode(format!("{method}: missing result")))
    }
}

impl ChainClient for JsonRpcNodeClient {
    async fn read(&self, call: &ContractCall) -> Result<Value, ChainError> {
        self.call("contract_read", json!([call])).await
    }

    async fn batch_read(&self, calls: &[ContractCall]) -> Vec<CallOutcome> {
        let outcomes = self
            .call("contract_batchRead", json!([calls]))
            .await
            .and_then(|value| {
                serde_json::from_value::<Vec<CallOutcome>>(value)
                    .map_err(|e| ChainError::Decode(e.to_string()))
            });

        match outcomes {
            Ok(outcomes) if outcomes.len() == calls.len() => outcomes,
            Ok(outcomes) => {
                warn!(
                    expected = calls.len(),
                    received = outcomes.len(),
                    "Batched read length mismatch"
                );
                let message = format!("expected {} results, got {}", calls.len(), outcomes.len());
                calls.iter().map(|_| CallOutcome::failure(message.clone())).collect()
            }
            Err(e) => {
                warn!(error = %e, calls = calls.len(), "Batched read failed");
                calls.iter().map(|_| CallOutcome::failure(e.to_string())).collect()
            }
        }
    }

    async fn send_transaction(&self, request: &TxRequest) -> Result<String, ChainError> {
        let value = self.call("tx_send", json!([request])).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ChainError::Decode("tx_send: expected a transaction hash".into()))
    }

    async fn wait_for_receipt(&self, tx_hash: &str, confirmations: u64) -> Result<Receipt, ChainError> {
        let value = self
            .call("tx_waitForReceipt", json!([tx_hash, confirmations]))
            .await?;
        serde_json::from_value(value).map_err(|e| ChainError::Decode(e.to_string()))
    }
}
