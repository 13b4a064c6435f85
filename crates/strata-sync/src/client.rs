//! Blockchain node client abstraction.

use std::future::Future;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use strata_types::{CallOutcome, ContractCall, Receipt, TxRequest};

use crate::error::ChainError;

/// Read and write access to contracts through a node.
///
/// Implementors provide the actual network I/O. This abstraction allows
/// the engine to be tested without a node.
pub trait ChainClient: Send + Sync + 'static {
    /// Evaluate one read-only call.
    fn read(
        &self,
        call: &ContractCall,
    ) -> impl Future<Output = Result<Value, ChainError>> + Send;

    /// Evaluate several read-only calls in one request.
    ///
    /// Returns one outcome per call, same length and order as `calls`.
    /// Never fails as a whole.
    fn batch_read(&self, calls: &[ContractCall]) -> impl Future<Output = Vec<CallOutcome>> + Send;

    /// Sign and submit a transaction, returning its hash.
    fn send_transaction(
        &self,
        request: &TxRequest,
    ) -> impl Future<Output = Result<String, ChainError>> + Send;

    /// Resolve once `confirmations` blocks have been observed on top of
    /// the transaction. Fails if it reverted or was dropped.
    fn wait_for_receipt(
        &self,
        tx_hash: &str,
        confirmations: u64,
    ) -> impl Future<Output = Result<Receipt, ChainError>> + Send;
}

/// Holder for a client that may not be connected yet.
///
/// Components keep a slot rather than a client so they can be built
/// before the wallet connects and observe the client once it does.
pub struct ClientSlot<C> {
    inner: Arc<RwLock<Option<Arc<C>>>>,
}

impl<C> Clone for ClientSlot<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> Default for ClientSlot<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C> ClientSlot<C> {
    /// A slot with no client.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// A slot holding `client`.
    pub fn new(client: Arc<C>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(client))),
        }
    }

    /// Replace the client; `None` disconnects.
    pub fn set(&self, client: Option<Arc<C>>) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = client;
    }

    /// The current client, if connected.
    pub fn get(&self) -> Option<Arc<C>> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.get().is_some()
    }
}

/// Interpret a node value as an unsigned integer.
///
/// Accepts JSON numbers, decimal strings, and `0x` hex strings. Large
/// integers usually arrive as strings.
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex_digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex_digits, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}
