//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! line-delimited JSON-RPC method calls to the command handlers. Event
//! subscriptions are per connection and are pushed as `event`
//! notifications on the same stream.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use strata_sync::error::describe_error;
use strata_sync::{SubmitError, SyncError};

use crate::commands;
use crate::events::EventFilter;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC success response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(json!({"detail": detail})),
        }
    }

    /// No collection contract configured (-32020).
    pub fn collection_not_configured() -> Self {
        Self {
            code: -32020,
            message: "COLLECTION_NOT_CONFIGURED".to_string(),
            data: None,
        }
    }

    /// No account connected (-32021).
    pub fn no_account() -> Self {
        Self {
            code: -32021,
            message: "NO_ACCOUNT".to_string(),
            data: None,
        }
    }

    /// Transaction id not in the ledger (-32022).
    pub fn transaction_not_found(id: &str) -> Self {
        Self {
            code: -32022,
            message: "TRANSACTION_NOT_FOUND".to_string(),
            data: Some(json!({"id": id})),
        }
    }

    /// Unknown event subscription (-32023).
    pub fn subscription_not_found(id: &str) -> Self {
        Self {
            code: -32023,
            message: "SUBSCRIPTION_NOT_FOUND".to_string(),
            data: Some(json!({"subscription_id": id})),
        }
    }

    /// A submitted transaction failed. The ledger entry id is included so
    /// the caller can show the recorded outcome.
    pub fn from_submit(err: &SubmitError) -> Self {
        let mut rpc = Self::from(&err.source);
        if let Some(Value::Object(data)) = rpc.data.as_mut() {
            data.insert("id".to_string(), Value::from(err.id.clone()));
        }
        rpc
    }
}

impl From<&SyncError> for RpcError {
    fn from(err: &SyncError) -> Self {
        let message = err.to_string();
        let detail = json!({
            "detail": describe_error(&message),
            "message": message,
            "user_rejected": strata_sync::error::is_user_rejected(&message),
        });
        match err {
            SyncError::ClientUnavailable(_) => Self {
                code: -32030,
                message: "CLIENT_UNAVAILABLE".to_string(),
                data: Some(detail),
            },
            SyncError::Chain(_) => Self {
                code: -32031,
                message: "CHAIN_ERROR".to_string(),
                data: Some(detail),
            },
            SyncError::Remote(_) => Self {
                code: -32032,
                message: "REMOTE_ERROR".to_string(),
                data: Some(detail),
            },
            _ => Self::internal_error(&message),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Event forwarders owned by one connection.
struct Subscriptions {
    out: mpsc::UnboundedSender<String>,
    forwarders: HashMap<String, JoinHandle<()>>,
}

impl Subscriptions {
    fn new(out: mpsc::UnboundedSender<String>) -> Self {
        Self {
            out,
            forwarders: HashMap::new(),
        }
    }

    fn subscribe(&mut self, state: &DaemonState, params: &Value) -> Result<Value, RpcError> {
        let filter = commands::diagnostics::parse_filter(params)?;
        let subscription_id = commands::diagnostics::new_subscription_id();
        let rx = state.event_bus.subscribe();
        let handle = tokio::spawn(forward_events(
            rx,
            filter,
            subscription_id.clone(),
            self.out.clone(),
        ));
        self.forwarders.insert(subscription_id.clone(), handle);
        debug!(subscription_id = %subscription_id, "Event subscription added");
        Ok(json!({ "subscription_id": subscription_id }))
    }

    fn unsubscribe(&mut self, params: &Value) -> Result<Value, RpcError> {
        let subscription_id = params
            .get("subscription_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("subscription_id required"))?;
        match self.forwarders.remove(subscription_id) {
            Some(handle) => {
                handle.abort();
                Ok(json!({"unsubscribed": true}))
            }
            None => Err(RpcError::subscription_not_found(subscription_id)),
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for handle in self.forwarders.values() {
            handle.abort();
        }
    }
}

/// Push matching events to the connection until it closes.
async fn forward_events(
    mut rx: broadcast::Receiver<strata_types::Event>,
    filter: EventFilter,
    subscription_id: String,
    out: mpsc::UnboundedSender<String>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(subscription_id = %subscription_id, skipped, "Subscriber lagging");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if !filter.matches(&event) {
            continue;
        }
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "event",
            "params": { "subscription_id": subscription_id, "event": event },
        });
        if out.send(notification.to_string()).is_err() {
            break;
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Responses and notifications share the stream through one writer.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(mut message) = out_rx.recv().await {
            message.push('\n');
            if writer.write_all(message.as_bytes()).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });
    let mut subscriptions = Subscriptions::new(out_tx.clone());

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) if request.jsonrpc != "2.0" => {
                RpcResponse::error(request.id, RpcError::invalid_request())
            }
            Ok(request) => match request.method.as_str() {
                "subscribe_events" => respond(
                    request.id,
                    subscriptions.subscribe(&state, &request.params),
                ),
                "unsubscribe_events" => {
                    respond(request.id, subscriptions.unsubscribe(&request.params))
                }
                _ => dispatch_request(state.clone(), request).await,
            },
            Err(_) => RpcResponse::error(Value::Null, RpcError::parse_error()),
        };

        if out_tx.send(serde_json::to_string(&response)?).is_err() {
            break;
        }
    }

    drop(subscriptions);
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

fn respond(id: Value, result: Result<Value, RpcError>) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Account and status
        "set_account" => commands::account::set_account(&state, params).await,
        "get_status" => commands::account::get_status(&state).await,

        // Collection
        "get_collection" => commands::collection::get_collection(&state).await,
        "reload_collection" => commands::collection::reload_collection(&state, params).await,
        "set_refresh" => commands::collection::set_refresh(&state, params).await,

        // Ledger
        "get_transactions" => commands::ledger::get_transactions(&state).await,
        "add_transaction" => commands::ledger::add_transaction(&state, params).await,
        "update_transaction" => commands::ledger::update_transaction(&state, params).await,
        "clear_history" => commands::ledger::clear_history(&state).await,
        "wait_for_receipt" => commands::ledger::wait_for_receipt(&state, params).await,
        "submit_transaction" => commands::ledger::submit_transaction(&state, params).await,

        // Profile
        "get_profile" => commands::profile::get_profile(&state).await,
        "save_profile" => commands::profile::save_profile(&state, params).await,
        "sync_profile" => commands::profile::sync_profile(&state).await,

        // Diagnostics
        "get_version" => commands::diagnostics::get_version(&state).await,
        "shutdown" => commands::diagnostics::shutdown(&state).await,

        // Subscriptions need a connection to push to.
        "subscribe_events" | "unsubscribe_events" => Err(RpcError::invalid_request()),

        _ => Err(RpcError::method_not_found(method)),
    };

    respond(id, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_sync::ChainError;

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(1),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(RpcError::method_not_found("unknown").code, -32601);
        assert_eq!(RpcError::collection_not_configured().code, -32020);
        assert_eq!(RpcError::no_account().message, "NO_ACCOUNT");

        let err = RpcError::from(&SyncError::ClientUnavailable("wallet client"));
        assert_eq!(err.code, -32030);
    }

    #[test]
    fn test_chain_error_mapping_flags_rejection() {
        let err = RpcError::from(&SyncError::Chain(ChainError::Rpc {
            code: 4001,
            message: "User rejected the request".to_string(),
        }));
        assert_eq!(err.code, -32031);
        let data = err.data.expect("data");
        assert_eq!(data["user_rejected"], true);
        assert_eq!(data["detail"], "You cancelled this action");
    }

    #[test]
    fn test_rpc_response_success() {
        let resp = RpcResponse::success(json!(1), json!({"count": 3}));
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let state = crate::testing::state(crate::testing::offline_config());
        let resp = dispatch_request(state, request("no_such_method", Value::Null)).await;
        assert_eq!(resp.error.expect("error").code, -32601);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_subscription_without_connection() {
        let state = crate::testing::state(crate::testing::offline_config());
        let resp = dispatch_request(state, request("subscribe_events", json!({}))).await;
        assert_eq!(resp.error.expect("error").code, -32600);
    }

    #[tokio::test]
    async fn test_socket_round_trip_with_events() {
        let dir = std::env::temp_dir().join(format!("strata-rpc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let socket_path = dir.join("test.sock");
        let state = crate::testing::state(crate::testing::offline_config());
        let server = RpcServer::new(state.clone(), socket_path.clone());
        let server_task = tokio::spawn(async move { server.run().await });

        let stream = loop {
            match tokio::net::UnixStream::connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"subscribe_events\",\"params\":{\"filter\":{\"categories\":[\"system\"]}}}\n")
            .await
            .expect("write");
        let reply: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("json");
        let subscription_id = reply["result"]["subscription_id"]
            .as_str()
            .expect("subscription id")
            .to_string();

        state.event_bus.publish(
            strata_types::EventType::LedgerUpdated,
            json!({"count": 1}),
        );
        state.event_bus.publish(
            strata_types::EventType::AccountChanged,
            json!({"address": "0xab"}),
        );

        let notification: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("json");
        assert_eq!(notification["method"], "event");
        assert_eq!(notification["params"]["subscription_id"], subscription_id.as_str());
        assert_eq!(notification["params"]["event"]["event_type"], "account_changed");

        write_half
            .write_all(b"not json\n")
            .await
            .expect("write");
        let reply: Value =
            serde_json::from_str(&lines.next_line().await.expect("read").expect("line"))
                .expect("json");
        assert_eq!(reply["error"]["code"], -32700);

        server_task.abort();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
