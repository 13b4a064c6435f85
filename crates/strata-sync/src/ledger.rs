//! Per-account transaction ledger.
//!
//! Keeps the most recent user transactions for the connected account,
//! newest first, bounded to a fixed capacity and persisted under an
//! address-scoped key. Storage is a cache: read and write failures are
//! logged and never block the in-memory update.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};

use strata_store::keys::scoped_key;
use strata_store::KvStore;
use strata_types::{
    now_millis, NewTransaction, Transaction, TransactionUpdate, DEFAULT_LEDGER_PREFIX,
    DEFAULT_MAX_HISTORY,
};

use crate::signal::{watch_value, Signal, Subscription};

/// Ledger settings.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub key_prefix: String,
    pub max_history: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_LEDGER_PREFIX.to_string(),
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

#[derive(Default)]
struct LedgerState {
    address: Option<String>,
    entries: Vec<Transaction>,
}

pub struct TransactionLedger {
    store: Arc<dyn KvStore>,
    config: LedgerConfig,
    state: Mutex<LedgerState>,
    changes: watch::Sender<Arc<Vec<Transaction>>>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn KvStore>, config: LedgerConfig) -> Self {
        let (changes, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            store,
            config,
            state: Mutex::new(LedgerState::default()),
            changes,
        }
    }

    /// Switch to `address` and load its persisted history. `None` empties
    /// the ledger; entries added without an address live in memory only.
    pub fn load_history(&self, address: Option<&str>) {
        let mut state = self.lock();
        let address = normalize(address);

        state.entries = match &address {
            Some(addr) => self.read_persisted(addr),
            None => Vec::new(),
        };
        debug!(
            address = address.as_deref().unwrap_or("<none>"),
            entries = state.entries.len(),
            "Transaction history loaded"
        );
        state.address = address;
        self.publish(&state);
    }

    /// Record a new entry and return its id.
    pub fn add_transaction(&self, tx: NewTransaction) -> String {
        self.record(tx).0
    }

    /// Record a new entry and return its id together with the account it
    /// was filed under, for updates that may land after an account switch.
    pub fn record(&self, tx: NewTransaction) -> (String, Option<String>) {
        let mut state = self.lock();
        let id = loop {
            let candidate = new_id();
            if !state.entries.iter().any(|e| e.id == candidate) {
                break candidate;
            }
        };

        state.entries.insert(
            0,
            Transaction {
                id: id.clone(),
                kind: tx.kind,
                amount: tx.amount,
                token: tx.token,
                timestamp: now_millis(),
                tx_hash: None,
                status: tx.status,
                details: tx.details,
            },
        );
        state.entries.truncate(self.config.max_history);
        debug!(id = %id, kind = ?tx.kind, "Transaction recorded");

        self.persist(&state);
        self.publish(&state);
        (id, state.address.clone())
    }

    /// Merge `update` into the entry with `id`. Returns `false` when no
    /// such entry exists.
    ///
    /// A terminal entry keeps its status and details; only a missing
    /// `tx_hash` can still be attached.
    pub fn update_transaction(&self, id: &str, update: TransactionUpdate) -> bool {
        let mut state = self.lock();
        self.update_current(&mut state, id, update)
    }

    /// Like [`update_transaction`](Self::update_transaction), but against
    /// the history of `address`. When that is no longer the current account
    /// the persisted list is rewritten in place and nothing is published.
    pub fn update_transaction_for(
        &self,
        address: Option<&str>,
        id: &str,
        update: TransactionUpdate,
    ) -> bool {
        let address = normalize(address);
        let mut state = self.lock();
        if state.address == address {
            return self.update_current(&mut state, id, update);
        }
        let Some(addr) = address else {
            debug!(id, "Update for a detached in-memory transaction ignored");
            return false;
        };

        let mut entries = self.read_persisted(&addr);
        let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
            debug!(id, address = %addr, "Update for unknown transaction ignored");
            return false;
        };
        if merge_update(entry, update) {
            self.write_entries(&addr, &entries);
            debug!(id, address = %addr, "Transaction updated for inactive account");
        }
        true
    }

    /// Drop every entry for the current account, including the persisted copy.
    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.entries.clear();
        if let Some(addr) = &state.address {
            let key = self.key(addr);
            if let Err(e) = self.store.remove(&key) {
                warn!(key = %key, error = %e, "Failed to remove transaction history");
            }
        }
        self.publish(&state);
    }

    /// Entries, newest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().entries.clone()
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.lock().entries.iter().find(|e| e.id == id).cloned()
    }

    /// The account the ledger is scoped to.
    pub fn address(&self) -> Option<String> {
        self.lock().address.clone()
    }

    pub fn max_history(&self) -> usize {
        self.config.max_history
    }

    /// Receive the full list after every change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Transaction>>> {
        self.changes.subscribe()
    }

    /// Reload history whenever the connected account changes.
    pub fn bind_account(self: &Arc<Self>, account: &Signal<Option<String>>) -> Subscription {
        let ledger = Arc::clone(self);
        watch_value(account.subscribe(), move |address| {
            let ledger = Arc::clone(&ledger);
            async move { ledger.load_history(address.as_deref()) }
        })
    }

    fn update_current(&self, state: &mut LedgerState, id: &str, update: TransactionUpdate) -> bool {
        let Some(entry) = state.entries.iter_mut().find(|e| e.id == id) else {
            debug!(id, "Update for unknown transaction ignored");
            return false;
        };
        if merge_update(entry, update) {
            self.persist(state);
            self.publish(state);
        }
        true
    }

    fn read_persisted(&self, address: &str) -> Vec<Transaction> {
        let key = self.key(address);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read transaction history");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Transaction>>(&raw) {
            Ok(mut entries) => {
                entries.truncate(self.config.max_history);
                entries
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable transaction history");
                Vec::new()
            }
        }
    }

    fn persist(&self, state: &LedgerState) {
        if let Some(addr) = &state.address {
            self.write_entries(addr, &state.entries);
        }
    }

    fn write_entries(&self, address: &str, entries: &[Transaction]) {
        let key = self.key(address);
        let result = serde_json::to_string(entries)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set(&key, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to persist transaction history");
        }
    }

    fn publish(&self, state: &LedgerState) {
        self.changes.send_replace(Arc::new(state.entries.clone()));
    }

    fn key(&self, address: &str) -> String {
        scoped_key(&self.config.key_prefix, address)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn normalize(address: Option<&str>) -> Option<String> {
    address
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_lowercase)
}

/// Apply `update` to `entry`; returns whether anything changed.
fn merge_update(entry: &mut Transaction, update: TransactionUpdate) -> bool {
    if entry.status.is_terminal() {
        return match update.tx_hash {
            Some(hash) if entry.tx_hash.is_none() => {
                entry.tx_hash = Some(hash);
                true
            }
            _ => {
                debug!(id = %entry.id, status = ?entry.status, "Transaction already final");
                false
            }
        };
    }
    if let Some(status) = update.status {
        entry.status = status;
    }
    if let Some(hash) = update.tx_hash {
        entry.tx_hash = Some(hash);
    }
    if let Some(details) = update.details {
        entry.details = Some(details);
    }
    true
}

const ID_SUFFIX_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `<millis>_<7 base36 chars>`.
fn new_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}_{}", now_millis(), suffix)
}
