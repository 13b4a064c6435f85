//! Shared fixtures for end-to-end engine scenarios.
//!
//! [`MockChain`] stands in for the node: a course marketplace, an ERC-20
//! balance, and a wallet that signs whatever it is told to.
//! [`MockRemote`] stands in for the remote profile store.
//!
//! Run the scenarios:
//! ```sh
//! cargo test -p strata-integration-tests
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use strata_sync::{ChainError, ChainClient, ProfileRemote, RemoteError};
use strata_types::{
    CallOutcome, ContractCall, Profile, Receipt, ReceiptStatus, TxRequest,
};

/// Marketplace address used by every scenario.
pub const MARKET: &str = "0x1000000000000000000000000000000000000001";
/// Token address used by every scenario.
pub const TOKEN: &str = "0x2000000000000000000000000000000000000002";

pub const ALICE: &str = "0xAAaAaAaaAaAaAaaAaAAAAAAAAaaaAaAaAaaAaaAa";
pub const BOB: &str = "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB";

/// A course as the UI would decode it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub is_active: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What the wallet does with the next `send_transaction`.
#[derive(Debug, Clone)]
pub enum WalletResponse {
    /// Sign and return this hash.
    Sign(String),
    /// The user declines.
    Reject,
}

/// In-memory node.
#[derive(Default)]
pub struct MockChain {
    /// Value returned by `nextCourseId` (the last assigned id).
    pub last_id: Mutex<u64>,
    courses: Mutex<HashMap<u64, Value>>,
    broken: Mutex<HashSet<u64>>,
    balances: Mutex<HashMap<String, String>>,
    wallet: Mutex<VecDeque<WalletResponse>>,
    reverted: Mutex<HashSet<String>>,
    sent: Mutex<Vec<TxRequest>>,
    receipt_delay: Option<Duration>,
    count_reads: Mutex<usize>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receipts take `delay` to arrive.
    pub fn with_receipt_delay(mut self, delay: Duration) -> Self {
        self.receipt_delay = Some(delay);
        self
    }

    /// Publish a course under the next id.
    pub fn add_course(&self, title: &str) -> u64 {
        let mut last_id = lock(&self.last_id);
        *last_id += 1;
        let id = *last_id;
        lock(&self.courses).insert(id, json!({"id": id, "title": title, "isActive": true}));
        id
    }

    /// Make reads of course `id` revert.
    pub fn break_course(&self, id: u64) {
        lock(&self.broken).insert(id);
    }

    pub fn set_balance(&self, account: &str, amount: &str) {
        lock(&self.balances).insert(account.to_lowercase(), amount.to_string());
    }

    /// Queue wallet behaviour for upcoming submissions.
    pub fn queue_wallet(&self, response: WalletResponse) {
        lock(&self.wallet).push_back(response);
    }

    /// Receipts for `tx_hash` report a revert.
    pub fn revert(&self, tx_hash: &str) {
        lock(&self.reverted).insert(tx_hash.to_string());
    }

    /// Transactions the wallet has signed, in order.
    pub fn sent(&self) -> Vec<TxRequest> {
        lock(&self.sent).clone()
    }

    pub fn count_reads(&self) -> usize {
        *lock(&self.count_reads)
    }

    fn evaluate(&self, call: &ContractCall) -> Result<Value, ChainError> {
        match call.function_name.as_str() {
            "nextCourseId" => {
                *lock(&self.count_reads) += 1;
                Ok(Value::from(*lock(&self.last_id)))
            }
            "getCourse" => {
                let id = call.args.first().and_then(Value::as_u64).unwrap_or_default();
                if lock(&self.broken).contains(&id) {
                    return Err(ChainError::Rpc {
                        code: 3,
                        message: "execution reverted".into(),
                    });
                }
                lock(&self.courses)
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| ChainError::Rpc {
                        code: 3,
                        message: "execution reverted: no such course".into(),
                    })
            }
            "balanceOf" => {
                let account = call
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .map(str::to_lowercase)
                    .unwrap_or_default();
                let balance = lock(&self.balances)
                    .get(&account)
                    .cloned()
                    .unwrap_or_else(|| "0".to_string());
                Ok(Value::from(balance))
            }
            other => Err(ChainError::Rpc {
                code: -32601,
                message: format!("unknown function {other}"),
            }),
        }
    }
}

impl ChainClient for MockChain {
    async fn read(&self, call: &ContractCall) -> Result<Value, ChainError> {
        tokio::task::yield_now().await;
        self.evaluate(call)
    }

    async fn batch_read(&self, calls: &[ContractCall]) -> Vec<CallOutcome> {
        tokio::task::yield_now().await;
        calls
            .iter()
            .map(|call| match self.evaluate(call) {
                Ok(value) => CallOutcome::success(value),
                Err(e) => CallOutcome::failure(e.to_string()),
            })
            .collect()
    }

    async fn send_transaction(&self, request: &TxRequest) -> Result<String, ChainError> {
        let response = lock(&self.wallet).pop_front();
        match response {
            Some(WalletResponse::Sign(hash)) => {
                lock(&self.sent).push(request.clone());
                Ok(hash)
            }
            Some(WalletResponse::Reject) => Err(ChainError::Rpc {
                code: 4001,
                message: "User rejected the request.".into(),
            }),
            None => Err(ChainError::Transport("wallet has no queued response".into())),
        }
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        confirmations: u64,
    ) -> Result<Receipt, ChainError> {
        if let Some(delay) = self.receipt_delay {
            tokio::time::sleep(delay).await;
        }
        let status = if lock(&self.reverted).contains(tx_hash) {
            ReceiptStatus::Reverted
        } else {
            ReceiptStatus::Success
        };
        Ok(Receipt {
            transaction_hash: tx_hash.to_string(),
            block_number: 100,
            status,
            confirmations,
        })
    }
}

/// In-memory remote profile store.
#[derive(Default)]
pub struct MockRemote {
    profiles: Mutex<HashMap<String, Profile>>,
    offline: Mutex<bool>,
    delays: Mutex<HashMap<String, Duration>>,
    publishes: Mutex<usize>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: Profile) {
        lock(&self.profiles).insert(profile.address.clone(), profile);
    }

    pub fn get(&self, address: &str) -> Option<Profile> {
        lock(&self.profiles).get(address).cloned()
    }

    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }

    /// Fetches for `address` take `delay`.
    pub fn delay_fetch(&self, address: &str, delay: Duration) {
        lock(&self.delays).insert(address.to_lowercase(), delay);
    }

    pub fn publish_count(&self) -> usize {
        *lock(&self.publishes)
    }
}

impl ProfileRemote for MockRemote {
    async fn fetch(&self, address: &str) -> Result<Option<Profile>, RemoteError> {
        let delay = lock(&self.delays).get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.offline) {
            return Err(RemoteError::Transport("connection refused".into()));
        }
        Ok(self.get(address))
    }

    async fn publish(&self, profile: &Profile) -> Result<(), RemoteError> {
        *lock(&self.publishes) += 1;
        if *lock(&self.offline) {
            return Err(RemoteError::Status {
                status: 503,
                message: "profile sync failed: 503".into(),
            });
        }
        self.insert(profile.clone());
        Ok(())
    }
}

/// A signed profile for `address`.
pub fn profile(address: &str, nickname: &str, updated_at: u64) -> Profile {
    Profile {
        address: address.to_lowercase(),
        nickname: nickname.to_string(),
        signature: "0xsig".to_string(),
        message: format!("I am {nickname}"),
        updated_at,
    }
}

/// Let spawned watchers run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
}
