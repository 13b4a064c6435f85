//! Explicit change notification for engine inputs.
//!
//! Inputs such as the connected address, chain id, or a reload counter
//! are held in a [`Signal`]. Components subscribe and re-run on change;
//! nothing re-runs implicitly.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A value with change notification.
pub struct Signal<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value. Subscribers are only notified when it differs.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl Signal<u64> {
    /// Increment a reload counter, returning the new key.
    pub fn bump(&self) -> u64 {
        let mut next = 0;
        self.tx.send_modify(|key| {
            *key = key.wrapping_add(1);
            next = *key;
        });
        next
    }
}

/// Handle to a watcher task. Dropping it stops the watcher.
#[must_use = "dropping a Subscription stops it"]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Stop the watcher now.
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run `f` for every change after subscription. Changes are delivered in
/// order; a change arriving while `f` runs is coalesced into one call.
pub fn on_change<T, F, Fut>(rx: watch::Receiver<T>, f: F) -> Subscription
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    spawn_watcher(rx, f, false)
}

/// Like [`on_change`], but also runs `f` once for the current value.
pub fn watch_value<T, F, Fut>(rx: watch::Receiver<T>, f: F) -> Subscription
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    spawn_watcher(rx, f, true)
}

fn spawn_watcher<T, F, Fut>(mut rx: watch::Receiver<T>, mut f: F, initial: bool) -> Subscription
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let first = rx.borrow_and_update().clone();
    let handle = tokio::spawn(async move {
        if initial {
            f(first).await;
        }
        while rx.changed().await.is_ok() {
            let value = rx.borrow_and_update().clone();
            f(value).await;
        }
    });
    Subscription { handle }
}
