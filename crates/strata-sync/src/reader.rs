//! Enumeration of on-chain indexed collections.
//!
//! A collection exposes a count accessor and an item accessor keyed by a
//! dense id range `[start, start + count - 1]`. The reader snapshots the
//! whole range, either one call per id or as one batched call, and
//! tolerates individual item failures.
//!
//! Loads are single-flight: a second `load()` while one is running joins
//! the running load instead of issuing duplicate network calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use strata_types::{ContractCall, DEFAULT_START_INDEX};

use crate::client::{value_as_u64, ChainClient, ClientSlot};
use crate::error::{Result, SyncError};
use crate::signal::{on_change, Signal, Subscription};
use crate::ErrorObserver;

/// Turns the raw count accessor value into the number of items to read.
/// Negative results are floored at zero.
pub type CountTransform = Arc<dyn Fn(&Value, u64) -> i64 + Send + Sync>;

/// Builds item accessor arguments for an id.
pub type ItemArgs = Arc<dyn Fn(u64) -> Vec<Value> + Send + Sync>;

/// Post-processes a decoded item with its id.
pub type ItemMapper<T> = Arc<dyn Fn(T, u64) -> T + Send + Sync>;

/// Count accessor reports the next id to assign: `raw - start`.
pub fn next_id_count(raw: &Value, start: u64) -> i64 {
    match value_as_u64(raw) {
        Some(next_id) => saturate(i128::from(next_id) - i128::from(start)),
        None => 0,
    }
}

/// Count accessor reports the last assigned id: `raw - start + 1`.
pub fn last_id_count(raw: &Value, start: u64) -> i64 {
    match value_as_u64(raw) {
        Some(last_id) => saturate(i128::from(last_id) - i128::from(start) + 1),
        None => 0,
    }
}

fn saturate(count: i128) -> i64 {
    i64::try_from(count).unwrap_or(if count < 0 { i64::MIN } else { i64::MAX })
}

/// How item reads are issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// One read per id, in id order.
    #[default]
    Sequential,
    /// One multicall covering every id. Failed sub-calls are dropped.
    Batched,
}

/// The contract and accessors describing a collection.
#[derive(Clone, Debug)]
pub struct CollectionSource {
    pub address: String,
    pub abi: Option<Value>,
    /// Accessor returning the count or next/last id.
    pub count_function: String,
    /// Accessor returning one item by id.
    pub item_function: String,
    pub start_index: u64,
}

impl CollectionSource {
    pub fn new(
        address: impl Into<String>,
        count_function: impl Into<String>,
        item_function: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            abi: None,
            count_function: count_function.into(),
            item_function: item_function.into(),
            start_index: DEFAULT_START_INDEX,
        }
    }

    pub fn with_start_index(mut self, start_index: u64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn with_abi(mut self, abi: Value) -> Self {
        self.abi = Some(abi);
        self
    }

    fn call(&self, function: &str, args: Vec<Value>) -> ContractCall {
        ContractCall {
            address: self.address.clone(),
            abi: self.abi.clone(),
            function_name: function.to_string(),
            args,
        }
    }
}

/// Reader behaviour.
pub struct ReaderOptions<T> {
    /// When false, `load()` yields an empty snapshot without network calls.
    pub enabled: bool,
    /// Load on [`CollectionReader::activate`].
    pub auto: bool,
    /// Skip failing items (sequential mode). When false the first item
    /// failure aborts the load.
    pub skip_failure: bool,
    pub mode: ReadMode,
    pub count_transform: CountTransform,
    pub item_args: ItemArgs,
    pub map_item: Option<ItemMapper<T>>,
    pub on_error: Option<ErrorObserver>,
}

impl<T> Default for ReaderOptions<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            auto: true,
            skip_failure: true,
            mode: ReadMode::Sequential,
            count_transform: Arc::new(next_id_count),
            item_args: Arc::new(|id: u64| vec![Value::from(id)]),
            map_item: None,
            on_error: None,
        }
    }
}

/// Published reader state.
pub struct CollectionState<T> {
    pub items: Arc<Vec<T>>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Clone for CollectionState<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            loading: false,
            error: None,
        }
    }
}

type Inflight<T> = Option<watch::Receiver<Option<Arc<Vec<T>>>>>;

/// Snapshot reader for one on-chain collection.
pub struct CollectionReader<C, T> {
    slot: ClientSlot<C>,
    source: CollectionSource,
    options: ReaderOptions<T>,
    state: watch::Sender<CollectionState<T>>,
    inflight: Mutex<Inflight<T>>,
}

impl<C, T> CollectionReader<C, T>
where
    C: ChainClient,
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(slot: ClientSlot<C>, source: CollectionSource, options: ReaderOptions<T>) -> Self {
        let (state, _) = watch::channel(CollectionState::default());
        Self {
            slot,
            source,
            options,
            state,
            inflight: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &CollectionSource {
        &self.source
    }

    /// Current state.
    pub fn snapshot(&self) -> CollectionState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectionState<T>> {
        self.state.subscribe()
    }

    /// Load on first activation when `auto` is set.
    pub async fn activate(&self) -> Option<Arc<Vec<T>>> {
        if self.options.auto {
            Some(self.load().await)
        } else {
            None
        }
    }

    /// Reload every time `reload` changes.
    pub fn bind_reload(self: &Arc<Self>, reload: &Signal<u64>) -> Subscription {
        let reader = Arc::clone(self);
        on_change(reload.subscribe(), move |key| {
            let reader = Arc::clone(&reader);
            async move {
                debug!(reload_key = key, "Reload signal received");
                reader.load().await;
            }
        })
    }

    /// Read a fresh snapshot, or join the load already in progress.
    pub async fn load(&self) -> Arc<Vec<T>> {
        let role = {
            let mut inflight = lock(&self.inflight);
            match inflight.as_ref() {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *inflight = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                debug!(collection = %self.source.address, "Joining in-flight load");
                match rx.wait_for(Option::is_some).await {
                    Ok(done) => done.clone().unwrap_or_default(),
                    // Leader was cancelled before finishing.
                    Err(_) => self.snapshot().items,
                }
            }
            Role::Leader(tx) => {
                let _release = InflightRelease(&self.inflight);
                let items = self.run_load().await;
                let _ = tx.send(Some(items.clone()));
                items
            }
        }
    }

    async fn run_load(&self) -> Arc<Vec<T>> {
        let client = match self.slot.get() {
            Some(client) if self.options.enabled => client,
            _ => {
                self.state.send_modify(|s| s.items = Arc::new(Vec::new()));
                return Arc::new(Vec::new());
            }
        };

        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
        let _loading = LoadingFlag(&self.state);

        match self.fetch(client.as_ref()).await {
            Ok(items) => {
                let items = Arc::new(items);
                debug!(
                    collection = %self.source.address,
                    count = items.len(),
                    "Collection loaded"
                );
                self.state.send_modify(|s| s.items = items.clone());
                items
            }
            Err(err) => {
                warn!(collection = %self.source.address, error = %err, "Collection load failed");
                self.observe(&err);
                self.state.send_modify(|s| {
                    s.items = Arc::new(Vec::new());
                    s.error = Some(err.to_string());
                });
                Arc::new(Vec::new())
            }
        }
    }

    async fn fetch(&self, client: &C) -> Result<Vec<T>> {
        let start = self.source.start_index;
        let raw_count = client
            .read(&self.source.call(&self.source.count_function, Vec::new()))
            .await?;
        let count = (self.options.count_transform)(&raw_count, start).max(0) as u64;
        if count == 0 {
            return Ok(Vec::new());
        }

        let ids: Vec<u64> = (0..count).map(|offset| start.saturating_add(offset)).collect();
        match self.options.mode {
            ReadMode::Sequential => self.read_sequential(client, &ids).await,
            ReadMode::Batched => Ok(self.read_batched(client, &ids).await),
        }
    }

    async fn read_sequential(&self, client: &C, ids: &[u64]) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(ids.len());
        for &id in ids {
            let call = self.item_call(id);
            let item = match client.read(&call).await {
                Ok(raw) => self.decode(raw, id),
                Err(e) => Err(SyncError::from(e)),
            };
            match item {
                Ok(item) => items.push(item),
                Err(err) if self.options.skip_failure => {
                    debug!(id, error = %err, "Skipping failed item");
                    self.observe(&err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(items)
    }

    async fn read_batched(&self, client: &C, ids: &[u64]) -> Vec<T> {
        let calls: Vec<ContractCall> = ids.iter().map(|&id| self.item_call(id)).collect();
        let outcomes = client.batch_read(&calls).await;
        if outcomes.len() != calls.len() {
            warn!(
                expected = calls.len(),
                received = outcomes.len(),
                "Batched read returned a different number of results"
            );
        }

        // Outcomes are positional: index i answers ids[i].
        ids.iter()
            .zip(outcomes)
            .filter_map(|(&id, outcome)| {
                if !outcome.is_success() {
                    debug!(id, error = ?outcome.error, "Dropping failed sub-call");
                    return None;
                }
                let raw = outcome.result.unwrap_or(Value::Null);
                match self.decode(raw, id) {
                    Ok(item) => Some(item),
                    Err(err) => {
                        debug!(id, error = %err, "Dropping undecodable item");
                        None
                    }
                }
            })
            .collect()
    }

    fn item_call(&self, id: u64) -> ContractCall {
        self.source
            .call(&self.source.item_function, (self.options.item_args)(id))
    }

    fn decode(&self, raw: Value, id: u64) -> Result<T> {
        let item: T = serde_json::from_value(raw).map_err(|e| SyncError::Decode {
            id,
            message: e.to_string(),
        })?;
        Ok(match &self.options.map_item {
            Some(map) => map(item, id),
            None => item,
        })
    }

    fn observe(&self, err: &SyncError) {
        if let Some(observer) = &self.options.on_error {
            observer(err);
        }
    }
}

enum Role<T> {
    Leader(watch::Sender<Option<Arc<Vec<T>>>>),
    Follower(watch::Receiver<Option<Arc<Vec<T>>>>),
}

/// Clears the in-flight slot when the leading load ends, however it ends.
struct InflightRelease<'a, T>(&'a Mutex<Inflight<T>>);

impl<T> Drop for InflightRelease<'_, T> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

/// Resets `loading` when a load ends, however it ends.
struct LoadingFlag<'a, T>(&'a watch::Sender<CollectionState<T>>);

impl<T> Drop for LoadingFlag<'_, T> {
    fn drop(&mut self) {
        self.0.send_modify(|s| s.loading = false);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
