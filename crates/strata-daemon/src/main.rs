//! strata-daemon: chain-state sync daemon.
//!
//! Single OS process running a Tokio async runtime. Builds the sync
//! engine, keeps the watched collection fresh, and serves the UI over
//! JSON-RPC on a Unix socket.

mod commands;
mod config;
mod course;
mod events;
mod node;
mod profile_remote;
mod rpc;
#[cfg(test)]
mod test_http;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use strata_store::KvStore;
use strata_sync::reader::{CollectionSource, ReaderOptions};
use strata_sync::signal::on_change;
use strata_sync::{
    AccountValueReader, BootState, ClientSlot, CollectionReader, ConfirmationWaiter,
    LedgerConfig, ProfileSyncService, RefreshScheduler, SchedulerOptions, Signal, Subscription,
    SyncError, TransactionFlow, TransactionLedger,
};
use strata_types::{ContractCall, EventType};

use crate::config::DaemonConfig;
use crate::course::Course;
use crate::events::EventBus;
use crate::node::JsonRpcNodeClient;
use crate::profile_remote::HttpProfileRemote;
use crate::rpc::RpcServer;

pub type CourseReader = CollectionReader<JsonRpcNodeClient, Course>;
pub type BalanceReader = AccountValueReader<JsonRpcNodeClient, Value>;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Configuration.
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    pub boot: BootState,
    /// Connected account. Change it through [`DaemonState::switch_account`].
    pub account: Signal<Option<String>>,
    account_switch: Mutex<()>,
    /// Collection reload key.
    pub reload: Signal<u64>,
    pub chain: ClientSlot<JsonRpcNodeClient>,
    /// Present when a collection contract is configured.
    pub courses: Option<Arc<CourseReader>>,
    /// Present when a balance token is configured.
    pub balance: Option<Arc<BalanceReader>>,
    pub refresh: Option<RefreshScheduler>,
    pub ledger: Arc<TransactionLedger>,
    pub profile: Arc<ProfileSyncService<HttpProfileRemote>>,
    /// Normalised remote profile store URL.
    pub profile_url: String,
    pub waiter: ConfirmationWaiter<JsonRpcNodeClient>,
    pub flow: TransactionFlow<JsonRpcNodeClient>,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl DaemonState {
    /// Assemble the engine from configuration.
    pub fn build(
        config: DaemonConfig,
        store: Arc<dyn KvStore>,
        boot: BootState,
    ) -> anyhow::Result<Self> {
        let event_bus = EventBus::new(config.advanced.event_buffer);

        let chain = match JsonRpcNodeClient::new(
            &config.node.rpc_url,
            Duration::from_secs(config.node.timeout_secs),
        ) {
            Ok(client) => ClientSlot::new(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "Node client unavailable");
                ClientSlot::empty()
            }
        };

        let courses = (!config.node.collection_address.is_empty()).then(|| {
            let source = CollectionSource::new(
                &config.node.collection_address,
                &config.node.count_function,
                &config.node.item_function,
            )
            .with_start_index(config.node.start_index);
            let options = ReaderOptions {
                skip_failure: config.node.skip_failure,
                mode: config.node.read_mode.into(),
                count_transform: config.node.count_semantics.transform(),
                on_error: Some(Arc::new(|e: &SyncError| {
                    warn!(error = %e, "Course read failed");
                })),
                ..Default::default()
            };
            Arc::new(CollectionReader::new(chain.clone(), source, options))
        });

        let balance = (!config.node.balance_token_address.is_empty()).then(|| {
            Arc::new(AccountValueReader::new(
                chain.clone(),
                ContractCall::new(&config.node.balance_token_address, "balanceOf"),
            ))
        });

        let refresh = courses.as_ref().map(|reader| {
            let on_error_bus = event_bus.clone();
            let reader = Arc::clone(reader);
            let balance = balance.clone();
            RefreshScheduler::new(
                "collection",
                move || {
                    let reader = Arc::clone(&reader);
                    let balance = balance.clone();
                    async move {
                        reader.load().await;
                        if let Some(balance) = balance {
                            balance.refresh().await;
                        }
                        match reader.snapshot().error {
                            Some(message) => Err(SyncError::Callback(message)),
                            None => Ok(()),
                        }
                    }
                },
                SchedulerOptions {
                    interval: config.refresh.interval(),
                    enabled: config.refresh.enabled,
                    immediate: config.refresh.immediate,
                    on_error: Some(Arc::new(move |e: &SyncError| {
                        on_error_bus.publish(
                            EventType::ErrorOccurred,
                            json!({"source": "collection_refresh", "message": e.to_string()}),
                        );
                    })),
                },
            )
        });

        let ledger = Arc::new(TransactionLedger::new(
            store.clone(),
            LedgerConfig {
                key_prefix: config.ledger.key_prefix.clone(),
                max_history: config.ledger.max_history,
            },
        ));

        let remote = HttpProfileRemote::new(
            &config.profile.base_url,
            Duration::from_secs(config.profile.timeout_secs),
        )?;
        let profile_url = remote.base_url().to_string();
        let profile = Arc::new(ProfileSyncService::with_prefix(
            Arc::new(remote),
            store,
            config.profile.key_prefix.clone(),
        ));

        let waiter = ConfirmationWaiter::new(chain.clone());
        let flow = TransactionFlow::new(chain.clone(), ledger.clone())
            .with_confirmations(config.node.confirmations);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            event_bus,
            boot,
            account: Signal::new(None),
            account_switch: Mutex::new(()),
            reload: Signal::new(0),
            chain,
            courses,
            balance,
            refresh,
            ledger,
            profile,
            profile_url,
            waiter,
            flow,
            shutdown_tx,
        })
    }

    /// Make `address` the connected account. The ledger and the profile
    /// service follow it before this returns; the remote profile fetch
    /// continues in the background. Returns whether the account changed.
    pub fn switch_account(&self, address: Option<String>) -> bool {
        let _guard = self
            .account_switch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.account.set(address.clone()) {
            return false;
        }
        self.ledger.load_history(address.as_deref());
        let load = self.profile.begin_load(address);
        let profile = Arc::clone(&self.profile);
        tokio::spawn(async move { profile.finish_load(load).await });
        true
    }

    /// Connect engine inputs to components and component outputs to the
    /// event bus. Dropping the returned handles disconnects everything.
    pub fn wire(&self) -> Vec<Subscription> {
        let bus = self.event_bus.clone();
        let mut subs = vec![on_change(self.account.subscribe(), move |address| {
            let bus = bus.clone();
            async move { bus.publish(EventType::AccountChanged, json!({ "address": address })) }
        })];

        let bus = self.event_bus.clone();
        let ledger = Arc::clone(&self.ledger);
        subs.push(on_change(self.ledger.subscribe(), move |entries| {
            let bus = bus.clone();
            let address = ledger.address();
            async move {
                bus.publish(
                    EventType::LedgerUpdated,
                    json!({ "address": address, "count": entries.len() }),
                )
            }
        }));

        let bus = self.event_bus.clone();
        let profile = Arc::clone(&self.profile);
        subs.push(on_change(self.profile.subscribe(), move |state| {
            let bus = bus.clone();
            let address = profile.address();
            async move {
                bus.publish(
                    EventType::ProfileUpdated,
                    json!({
                        "address": address,
                        "phase": state.phase,
                        "source": state.source,
                        "remoteError": state.remote_error,
                    }),
                )
            }
        }));

        if let Some(courses) = &self.courses {
            subs.push(courses.bind_reload(&self.reload));
            let bus = self.event_bus.clone();
            subs.push(on_change(courses.subscribe(), move |state| {
                let bus = bus.clone();
                async move {
                    if !state.loading {
                        bus.publish(
                            EventType::CollectionUpdated,
                            json!({ "count": state.items.len(), "error": state.error }),
                        )
                    }
                }
            }));
        }

        if let Some(balance) = &self.balance {
            subs.push(balance.bind_account(&self.account));
            let bus = self.event_bus.clone();
            let account = self.account.clone();
            subs.push(on_change(balance.subscribe(), move |state| {
                let bus = bus.clone();
                let address = account.get();
                async move {
                    if !state.loading {
                        bus.publish(
                            EventType::AccountValueUpdated,
                            json!({ "address": address, "value": state.value, "error": state.error }),
                        )
                    }
                }
            }));
        }

        subs
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("strata={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("Strata daemon starting");
    let boot = BootState::new();
    let data_dir = config.data_dir();

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open store
    let store: Arc<dyn KvStore> = Arc::new(strata_store::open(&data_dir.join("strata.db"))?);

    // 3. Build engine and wire signals
    let state = Arc::new(DaemonState::build(config, store, boot)?);
    let _subscriptions = state.wire();
    if let Some(refresh) = &state.refresh {
        refresh.start();
    }
    if let Some(courses) = &state.courses {
        // The scheduler's immediate run covers the first load.
        if !(state.config.refresh.enabled && state.config.refresh.immediate) {
            let courses = Arc::clone(courses);
            tokio::spawn(async move { courses.activate().await });
        }
    }

    // 4. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 5. Emit DaemonStarted event
    if state.boot.mark_booted() {
        state.event_bus.publish(
            EventType::DaemonStarted,
            json!({ "version": env!("CARGO_PKG_VERSION") }),
        );
    }

    // 6. Run the RPC server until shutdown
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Daemon shutting down gracefully");
    if let Some(refresh) = &state.refresh {
        refresh.set_enabled(false);
    }

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
