//! Single contract value scoped to the connected account.

use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use strata_types::ContractCall;

use crate::client::{ChainClient, ClientSlot};
use crate::error::{Result, SyncError};
use crate::signal::{watch_value, Signal, Subscription};

/// Published state of an account-scoped read.
#[derive(Clone, Debug)]
pub struct AccountValueState<T> {
    pub value: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for AccountValueState<T> {
    fn default() -> Self {
        Self {
            value: None,
            loading: false,
            error: None,
        }
    }
}

/// Reads one accessor that takes the account address as its only
/// argument, such as the ids of courses an account has purchased.
///
/// A failed read keeps the previous value and records the error.
pub struct AccountValueReader<C, T> {
    slot: ClientSlot<C>,
    call: ContractCall,
    enabled: bool,
    account: Mutex<Option<String>>,
    state: watch::Sender<AccountValueState<T>>,
}

impl<C, T> AccountValueReader<C, T>
where
    C: ChainClient,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(slot: ClientSlot<C>, call: ContractCall) -> Self {
        let (state, _) = watch::channel(AccountValueState::default());
        Self {
            slot,
            call,
            enabled: true,
            account: Mutex::new(None),
            state,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn snapshot(&self) -> AccountValueState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AccountValueState<T>> {
        self.state.subscribe()
    }

    /// Switch account and read. A different account starts from an empty
    /// value; no account clears it.
    pub async fn refresh_for(&self, account: Option<String>) {
        let changed = {
            let mut current = self.account.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = *current != account;
            current.clone_from(&account);
            changed
        };
        if changed {
            self.state.send_replace(AccountValueState::default());
        }
        self.refresh().await;
    }

    /// Re-read for the current account.
    pub async fn refresh(&self) {
        let account = self
            .account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let (Some(account), Some(client)) = (account, self.slot.get()) else {
            return;
        };
        if !self.enabled {
            return;
        }

        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
        let result = self.read(client.as_ref(), &account).await;

        // The account may have changed while the read was in flight.
        let still_current = self
            .account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            == Some(account.as_str());
        if !still_current {
            debug!(account = %account, "Discarding read for previous account");
            return;
        }

        self.state.send_modify(|s| {
            s.loading = false;
            match result {
                Ok(value) => s.value = Some(value),
                Err(e) => {
                    warn!(function = %self.call.function_name, error = %e, "Account read failed");
                    s.error = Some(e.to_string());
                }
            }
        });
    }

    /// Re-read whenever the connected account changes.
    pub fn bind_account(self: &Arc<Self>, account: &Signal<Option<String>>) -> Subscription {
        let reader = Arc::clone(self);
        watch_value(account.subscribe(), move |address| {
            let reader = Arc::clone(&reader);
            async move { reader.refresh_for(address).await }
        })
    }

    async fn read(&self, client: &C, account: &str) -> Result<T> {
        let call = self
            .call
            .clone()
            .with_args(vec![Value::String(account.to_string())]);
        let raw = client.read(&call).await?;
        serde_json::from_value(raw).map_err(|e| SyncError::Decode {
            id: 0,
            message: e.to_string(),
        })
    }
}
