//! # strata-sync
//!
//! Keeps a client's view of chain state and user transaction history
//! consistent with a slow, partially unreliable node and a remote
//! profile store, using local storage as the fallback.
//!
//! ## Components
//!
//! - [`reader::CollectionReader`] snapshots an on-chain indexed
//!   collection, skipping items that fail to read
//! - [`scheduler::RefreshScheduler`] runs a refresh periodically and on
//!   demand, one run at a time
//! - [`ledger::TransactionLedger`] records user transactions per account
//! - [`confirm::ConfirmationWaiter`] waits for a transaction to reach the
//!   required confirmation depth
//! - [`profile::ProfileSyncService`] reconciles the profile between the
//!   remote store and local storage
//!
//! The engine has no UI dependency. Inputs (connected account, reload
//! key) arrive through [`signal::Signal`]s and outputs are published on
//! `tokio::sync::watch` channels for an adapter to forward.

pub mod account;
pub mod amount;
pub mod boot;
pub mod client;
pub mod confirm;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod profile;
pub mod reader;
pub mod scheduler;
pub mod signal;

use std::sync::Arc;

pub use account::{AccountValueReader, AccountValueState};
pub use boot::BootState;
pub use client::{ChainClient, ClientSlot};
pub use confirm::ConfirmationWaiter;
pub use error::{ChainError, ErrorClass, RemoteError, Result, SyncError};
pub use flow::{SubmitError, Submitted, TransactionFlow};
pub use ledger::{LedgerConfig, TransactionLedger};
pub use profile::{ProfileLoad, ProfilePhase, ProfileRemote, ProfileState, ProfileSyncService};
pub use reader::{CollectionReader, CollectionSource, CollectionState, ReadMode, ReaderOptions};
pub use scheduler::{RefreshScheduler, SchedulerOptions};
pub use signal::{Signal, Subscription};

/// Receives errors that a component handles itself (skipped items,
/// failed refreshes) so the caller can surface them.
pub type ErrorObserver = Arc<dyn Fn(&SyncError) + Send + Sync>;
