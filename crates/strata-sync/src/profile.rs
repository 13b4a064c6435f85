//! Two-tier profile synchronisation.
//!
//! The remote store is authoritative for reads when it answers with a
//! profile. Local storage is the fallback and the first target of every
//! write; the remote copy is updated best-effort afterwards. The
//! displayed profile is always one whole record, never a merge.
//!
//! Every load takes a generation number. A load whose generation is no
//! longer current when its fetch returns is discarded, so a slow
//! response for an old address never overwrites state for a newer one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use strata_store::keys::scoped_key;
use strata_store::KvStore;
use strata_types::{Profile, ProfileSource, DEFAULT_PROFILE_PREFIX};

use crate::error::RemoteError;
use crate::signal::{watch_value, Signal, Subscription};

/// Remote key-value profile store.
pub trait ProfileRemote: Send + Sync + 'static {
    /// Fetch the profile for `address`. `Ok(None)` means the store has
    /// no record.
    fn fetch(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Option<Profile>, RemoteError>> + Send;

    /// Store `profile`, replacing any previous record.
    fn publish(&self, profile: &Profile) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Load state machine: `Unloaded -> Loading -> {RemoteHit, LocalHit, Empty}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilePhase {
    #[default]
    Unloaded,
    Loading,
    RemoteHit,
    LocalHit,
    Empty,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileState {
    pub phase: ProfilePhase,
    pub profile: Option<Profile>,
    pub source: ProfileSource,
    /// Recoverable sync warning from the last remote failure.
    pub remote_error: Option<String>,
}

impl ProfileState {
    pub fn is_loading(&self) -> bool {
        self.phase == ProfilePhase::Loading
    }
}

/// A load started by [`ProfileSyncService::begin_load`].
#[derive(Debug)]
#[must_use]
pub struct ProfileLoad {
    generation: u64,
    address: Option<String>,
}

pub struct ProfileSyncService<R> {
    remote: Arc<R>,
    store: Arc<dyn KvStore>,
    key_prefix: String,
    address: Mutex<Option<String>>,
    generation: AtomicU64,
    state: watch::Sender<ProfileState>,
}

impl<R: ProfileRemote> ProfileSyncService<R> {
    pub fn new(remote: Arc<R>, store: Arc<dyn KvStore>) -> Self {
        Self::with_prefix(remote, store, DEFAULT_PROFILE_PREFIX)
    }

    pub fn with_prefix(remote: Arc<R>, store: Arc<dyn KvStore>, key_prefix: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ProfileState::default());
        Self {
            remote,
            store,
            key_prefix: key_prefix.into(),
            address: Mutex::new(None),
            generation: AtomicU64::new(0),
            state,
        }
    }

    pub fn snapshot(&self) -> ProfileState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileState> {
        self.state.subscribe()
    }

    pub fn address(&self) -> Option<String> {
        self.lock_address().clone()
    }

    /// Load the profile for `address`, remote first.
    pub async fn load(&self, address: Option<String>) {
        let load = self.begin_load(address);
        self.finish_load(load).await;
    }

    /// Point the service at `address` and publish the loading state
    /// without waiting on the remote. Saves for `address` are accepted
    /// from here on; [`finish_load`](Self::finish_load) fetches the profile.
    pub fn begin_load(&self, address: Option<String>) -> ProfileLoad {
        let address = address
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty());
        let generation = self.next_generation();
        *self.lock_address() = address.clone();

        self.state.send_replace(match &address {
            Some(_) => ProfileState {
                phase: ProfilePhase::Loading,
                ..Default::default()
            },
            None => ProfileState::default(),
        });
        ProfileLoad {
            generation,
            address,
        }
    }

    /// Fetch the profile selected by `load`. A newer load or a local save
    /// made in the meantime wins.
    pub async fn finish_load(&self, load: ProfileLoad) {
        let ProfileLoad {
            generation,
            address,
        } = load;
        let Some(address) = address else {
            return;
        };

        let fetched = self.remote.fetch(&address).await;
        if !self.is_current(generation) {
            debug!(address = %address, "Discarding stale profile load");
            return;
        }

        let next = match fetched {
            Ok(Some(profile)) => {
                self.write_local(&address, &profile);
                debug!(address = %address, "Profile loaded from remote");
                ProfileState {
                    phase: ProfilePhase::RemoteHit,
                    profile: Some(profile),
                    source: ProfileSource::Remote,
                    remote_error: None,
                }
            }
            Ok(None) => self.local_fallback(&address, None),
            Err(e) => {
                warn!(address = %address, error = %e, "Remote profile fetch failed, using local copy");
                self.local_fallback(&address, Some(e.to_string()))
            }
        };
        self.state.send_replace(next);
    }

    /// Store `profile` locally and show it. Only the current address can
    /// be written; returns `false` when the profile belongs to another
    /// account or no account is connected.
    ///
    /// Storage failures are logged and do not affect the result.
    pub fn save_local(&self, mut profile: Profile) -> bool {
        let Some(address) = self.matching_address(&profile) else {
            return false;
        };
        profile.address.clone_from(&address);
        // A fresh local write supersedes any load still in flight.
        self.next_generation();
        self.write_local(&address, &profile);
        self.state.send_replace(ProfileState {
            phase: ProfilePhase::LocalHit,
            profile: Some(profile),
            source: ProfileSource::Local,
            remote_error: None,
        });
        true
    }

    /// Publish `profile` to the remote store. Call [`save_local`] first.
    ///
    /// [`save_local`]: Self::save_local
    pub async fn sync_to_remote(&self, profile: &Profile) -> bool {
        let result = self.remote.publish(profile).await;
        let still_current = self.matching_address(profile).is_some();

        match result {
            Ok(()) => {
                info!(address = %profile.address, "Profile synced to remote");
                if still_current {
                    self.state.send_modify(|s| {
                        s.source = ProfileSource::Remote;
                        s.remote_error = None;
                    });
                }
                true
            }
            Err(e) => {
                warn!(address = %profile.address, error = %e, "Profile sync failed");
                if still_current {
                    self.state.send_modify(|s| {
                        s.source = ProfileSource::Local;
                        s.remote_error = Some(e.to_string());
                    });
                }
                false
            }
        }
    }

    /// Local save followed by remote sync. Returns whether the remote
    /// accepted the profile.
    pub async fn save_and_sync(&self, mut profile: Profile) -> bool {
        profile.address = profile.address.trim().to_lowercase();
        if !self.save_local(profile.clone()) {
            return false;
        }
        self.sync_to_remote(&profile).await
    }

    /// Reload whenever the connected account changes. Each change starts
    /// its own load so a newer address never waits on a stale fetch.
    pub fn bind_address(self: &Arc<Self>, account: &Signal<Option<String>>) -> Subscription {
        let service = Arc::clone(self);
        watch_value(account.subscribe(), move |address| {
            let service = Arc::clone(&service);
            async move {
                let load = service.begin_load(address);
                tokio::spawn(async move { service.finish_load(load).await });
            }
        })
    }

    fn local_fallback(&self, address: &str, remote_error: Option<String>) -> ProfileState {
        match self.read_local(address) {
            Some(profile) => ProfileState {
                phase: ProfilePhase::LocalHit,
                profile: Some(profile),
                source: ProfileSource::Local,
                remote_error,
            },
            None => ProfileState {
                phase: ProfilePhase::Empty,
                profile: None,
                source: ProfileSource::None,
                remote_error,
            },
        }
    }

    fn read_local(&self, address: &str) -> Option<Profile> {
        let key = scoped_key(&self.key_prefix, address);
        match self.store.get(&key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding unreadable local profile");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read local profile");
                None
            }
        }
    }

    fn write_local(&self, address: &str, profile: &Profile) {
        let key = scoped_key(&self.key_prefix, address);
        let result = serde_json::to_string(profile)
            .map_err(|e| e.to_string())
            .and_then(|json| self.store.set(&key, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to write local profile");
        }
    }

    fn matching_address(&self, profile: &Profile) -> Option<String> {
        let current = self.address()?;
        if profile.address.trim().to_lowercase() == current {
            Some(current)
        } else {
            warn!(
                current = %current,
                profile = %profile.address,
                "Refusing profile for a different address"
            );
            None
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn lock_address(&self) -> MutexGuard<'_, Option<String>> {
        self.address.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use strata_store::MemoryStore;

    const ADDR: &str = "0xaa00000000000000000000000000000000000001";

    enum Fetch {
        Hit(Profile),
        Missing,
        Fail,
    }

    #[derive(Default)]
    struct MockRemote {
        fetches: Mutex<HashMap<String, Fetch>>,
        delays: Mutex<HashMap<String, Duration>>,
        publish_fails: bool,
        published: Mutex<Vec<Profile>>,
    }

    impl MockRemote {
        fn answer(&self, address: &str, fetch: Fetch) {
            self.fetches.lock().expect("lock").insert(address.to_string(), fetch);
        }
    }

    impl ProfileRemote for MockRemote {
        async fn fetch(&self, address: &str) -> Result<Option<Profile>, RemoteError> {
            let delay = self.delays.lock().expect("lock").get(address).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match self.fetches.lock().expect("lock").get(address) {
                Some(Fetch::Hit(p)) => Ok(Some(p.clone())),
                Some(Fetch::Fail) => Err(RemoteError::Status {
                    status: 404,
                    message: "profile sync failed: 404".into(),
                }),
                Some(Fetch::Missing) | None => Ok(None),
            }
        }

        async fn publish(&self, profile: &Profile) -> Result<(), RemoteError> {
            if self.publish_fails {
                return Err(RemoteError::Transport("connection refused".into()));
            }
            self.published.lock().expect("lock").push(profile.clone());
            Ok(())
        }
    }

    fn profile(address: &str, nickname: &str, updated_at: u64) -> Profile {
        Profile {
            address: address.to_string(),
            nickname: nickname.to_string(),
            signature: "0xsig".to_string(),
            message: format!("nickname:{nickname}"),
            updated_at,
        }
    }

    fn service(remote: MockRemote) -> (Arc<MemoryStore>, ProfileSyncService<MockRemote>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), ProfileSyncService::new(Arc::new(remote), store))
    }

    fn seed_local(store: &MemoryStore, profile: &Profile) {
        let json = serde_json::to_string(profile).expect("json");
        store
            .set(&scoped_key(DEFAULT_PROFILE_PREFIX, &profile.address), &json)
            .expect("seed");
    }

    #[tokio::test]
    async fn test_remote_hit_wins_and_overwrites_local() {
        let remote = MockRemote::default();
        remote.answer(ADDR, Fetch::Hit(profile(ADDR, "Remote", 200)));
        let (store, service) = service(remote);
        seed_local(&store, &profile(ADDR, "Local", 100));

        service.load(Some(ADDR.to_string())).await;

        let state = service.snapshot();
        assert_eq!(state.phase, ProfilePhase::RemoteHit);
        assert_eq!(state.source, ProfileSource::Remote);
        assert_eq!(state.profile.expect("profile").nickname, "Remote");
        let raw = store
            .get(&scoped_key(DEFAULT_PROFILE_PREFIX, ADDR))
            .expect("get")
            .expect("written");
        let local: Profile = serde_json::from_str(&raw).expect("json");
        assert_eq!(local.nickname, "Remote");
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_with_warning() {
        let mixed_case = "0xAA00000000000000000000000000000000000001";
        let remote = MockRemote::default();
        remote.answer(ADDR, Fetch::Fail);
        let (store, service) = service(remote);
        seed_local(&store, &profile(ADDR, "Alice", 100));

        service.load(Some(mixed_case.to_string())).await;

        let state = service.snapshot();
        assert_eq!(state.phase, ProfilePhase::LocalHit);
        assert_eq!(state.source, ProfileSource::Local);
        assert_eq!(state.profile.expect("profile").nickname, "Alice");
        assert!(state.remote_error.is_some());
    }

    #[tokio::test]
    async fn test_remote_null_falls_back_without_warning() {
        let remote = MockRemote::default();
        remote.answer(ADDR, Fetch::Missing);
        let (store, service) = service(remote);
        seed_local(&store, &profile(ADDR, "Alice", 100));

        service.load(Some(ADDR.to_string())).await;

        let state = service.snapshot();
        assert_eq!(state.source, ProfileSource::Local);
        assert!(state.remote_error.is_none());
    }

    #[tokio::test]
    async fn test_both_empty() {
        let (_, service) = service(MockRemote::default());
        service.load(Some(ADDR.to_string())).await;
        let state = service.snapshot();
        assert_eq!(state.phase, ProfilePhase::Empty);
        assert_eq!(state.source, ProfileSource::None);
        assert!(state.profile.is_none());
    }

    #[tokio::test]
    async fn test_no_address_resets() {
        let remote = MockRemote::default();
        remote.answer(ADDR, Fetch::Hit(profile(ADDR, "Remote", 1)));
        let (_, service) = service(remote);
        service.load(Some(ADDR.to_string())).await;
        service.load(None).await;
        assert_eq!(service.snapshot(), ProfileState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_load_is_discarded() {
        let other = "0xbb00000000000000000000000000000000000002";
        let remote = MockRemote::default();
        remote.answer(ADDR, Fetch::Hit(profile(ADDR, "Slow", 1)));
        remote.answer(other, Fetch::Hit(profile(other, "Fast", 2)));
        remote
            .delays
            .lock()
            .expect("lock")
            .insert(ADDR.to_string(), Duration::from_millis(500));
        let (_, service) = service(remote);
        let service = Arc::new(service);

        let slow = tokio::spawn({
            let service = service.clone();
            async move { service.load(Some(ADDR.to_string())).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.load(Some(other.to_string())).await;
        slow.await.expect("join");

        let state = service.snapshot();
        assert_eq!(state.profile.expect("profile").nickname, "Fast");
        assert_eq!(service.address().as_deref(), Some(other));
    }

    #[tokio::test]
    async fn test_save_local_then_sync() {
        let (store, service) = service(MockRemote::default());
        service.load(Some(ADDR.to_string())).await;

        let updated = profile(ADDR, "Bob", 300);
        assert!(service.save_local(updated.clone()));
        assert_eq!(service.snapshot().source, ProfileSource::Local);
        assert!(store
            .get(&scoped_key(DEFAULT_PROFILE_PREFIX, ADDR))
            .expect("get")
            .is_some());

        assert!(service.sync_to_remote(&updated).await);
        let state = service.snapshot();
        assert_eq!(state.source, ProfileSource::Remote);
        assert_eq!(state.profile.expect("profile").nickname, "Bob");
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_local() {
        let (_, service) = service(MockRemote {
            publish_fails: true,
            ..Default::default()
        });
        service.load(Some(ADDR.to_string())).await;

        let updated = profile(ADDR, "Carol", 400);
        assert!(!service.save_and_sync(updated).await);

        let state = service.snapshot();
        assert_eq!(state.source, ProfileSource::Local);
        assert_eq!(state.profile.expect("profile").nickname, "Carol");
        assert!(state.remote_error.expect("error").contains("connection refused"));
    }

    #[tokio::test]
    async fn test_save_for_other_address_refused() {
        let (store, service) = service(MockRemote::default());
        service.load(Some(ADDR.to_string())).await;
        let foreign = profile("0xcc00000000000000000000000000000000000003", "Eve", 1);
        assert!(!service.save_local(foreign));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_stores_lowercased_address() {
        let remote = Arc::new(MockRemote::default());
        let store = Arc::new(MemoryStore::new());
        let service = ProfileSyncService::new(remote.clone(), store.clone());
        service.load(Some(ADDR.to_string())).await;

        let mixed = "0xAA00000000000000000000000000000000000001";
        assert!(service.save_and_sync(profile(mixed, "Mixed", 9)).await);

        let shown = service.snapshot().profile.expect("profile");
        assert_eq!(shown.address, ADDR);
        let raw = store
            .get(&scoped_key(DEFAULT_PROFILE_PREFIX, ADDR))
            .expect("get")
            .expect("stored");
        let stored: Profile = serde_json::from_str(&raw).expect("json");
        assert_eq!(stored.address, ADDR);
        assert_eq!(remote.published.lock().expect("lock")[0].address, ADDR);
    }

    #[tokio::test]
    async fn test_begin_load_accepts_saves_before_fetch() {
        let remote = MockRemote::default();
        remote.answer(ADDR, Fetch::Hit(profile(ADDR, "Remote", 1)));
        let (_, service) = service(remote);

        let load = service.begin_load(Some(ADDR.to_string()));
        assert_eq!(service.address().as_deref(), Some(ADDR));
        assert!(service.snapshot().is_loading());
        assert!(service.save_local(profile(ADDR, "Local", 2)));

        service.finish_load(load).await;
        let state = service.snapshot();
        assert_eq!(state.phase, ProfilePhase::LocalHit);
        assert_eq!(state.profile.expect("profile").nickname, "Local");
    }

    #[tokio::test]
    async fn test_local_write_failure_is_non_fatal() {
        let (store, service) = service(MockRemote::default());
        service.load(Some(ADDR.to_string())).await;
        store.set_available(false);
        assert!(service.save_local(profile(ADDR, "Dave", 5)));
        assert_eq!(service.snapshot().profile.expect("profile").nickname, "Dave");
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_address_loads_on_change() {
        let remote = MockRemote::default();
        remote.answer(ADDR, Fetch::Hit(profile(ADDR, "Remote", 1)));
        let (_, service) = service(remote);
        let service = Arc::new(service);
        let account = Signal::new(None);
        let _sub = service.bind_address(&account);

        account.set(Some(ADDR.to_string()));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(service.snapshot().phase, ProfilePhase::RemoteHit);
    }
}
