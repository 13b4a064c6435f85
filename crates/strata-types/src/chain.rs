//! Descriptors exchanged with the blockchain node client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A read-only contract call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCall {
    pub address: String,
    /// Contract ABI fragment, passed through to the node untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<Value>,
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

impl ContractCall {
    pub fn new(address: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            abi: None,
            function_name: function_name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_abi(mut self, abi: Value) -> Self {
        self.abi = Some(abi);
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

/// Per-call status inside a batched read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Failure,
}

/// Result of one sub-call in a batched read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            status: CallStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: CallStatus::Failure,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }
}

/// A state-changing contract call to be signed and submitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    #[serde(flatten)]
    pub call: ContractCall,
    /// Native value in wei, as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl From<ContractCall> for TxRequest {
    fn from(call: ContractCall) -> Self {
        Self { call, value: None }
    }
}

/// Final status reported by a receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Transaction receipt once the requested confirmation depth is reached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub status: ReceiptStatus,
    #[serde(default)]
    pub confirmations: u64,
}
