//! Periodic and manual refresh with single-flight runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::Result;
use crate::ErrorObserver;

/// Boxed future returned by a refresh callback.
pub type RefreshFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

type Callback = Arc<dyn Fn() -> RefreshFuture + Send + Sync>;

/// Default refresh period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(30_000);

/// Scheduler configuration.
#[derive(Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub enabled: bool,
    /// Run once as soon as the scheduler is enabled.
    pub immediate: bool,
    pub on_error: Option<ErrorObserver>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            enabled: true,
            immediate: false,
            on_error: None,
        }
    }
}

struct Shared {
    name: String,
    callback: RwLock<Callback>,
    /// Held for the duration of one run.
    run_lock: Arc<tokio::sync::Mutex<()>>,
    on_error: Option<ErrorObserver>,
    runs: AtomicU64,
}

impl Shared {
    fn current_callback(&self) -> Callback {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn run(&self) {
        let callback = self.current_callback();
        self.runs.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = callback().await {
            warn!(task = %self.name, error = %e, "Refresh failed");
            if let Some(observer) = &self.on_error {
                observer(&e);
            }
        }
    }

    /// Timer tick: start a run unless one is already in flight.
    fn tick(self: &Arc<Self>) {
        match self.run_lock.clone().try_lock_owned() {
            Ok(guard) => {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    shared.run().await;
                    drop(guard);
                });
            }
            Err(_) => debug!(task = %self.name, "Previous run still in flight, skipping tick"),
        }
    }
}

struct TimerState {
    interval: Duration,
    enabled: bool,
    immediate: bool,
    handle: Option<JoinHandle<()>>,
}

/// Runs a callback on a fixed interval and on demand.
///
/// At most one run is in flight at a time. Timer ticks that land on an
/// active run are skipped; [`trigger`](Self::trigger) waits for it and
/// then runs. The callback can be replaced at any time without
/// rebuilding the timer, and the next run uses the replacement.
///
/// Disabling or dropping the scheduler stops the timer. A run already in
/// progress finishes on its own.
pub struct RefreshScheduler {
    shared: Arc<Shared>,
    timer: Mutex<TimerState>,
}

impl RefreshScheduler {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F, options: SchedulerOptions) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                callback: RwLock::new(boxed(callback)),
                run_lock: Arc::new(tokio::sync::Mutex::new(())),
                on_error: options.on_error,
                runs: AtomicU64::new(0),
            }),
            timer: Mutex::new(TimerState {
                interval: options.interval,
                enabled: options.enabled,
                immediate: options.immediate,
                handle: None,
            }),
        }
    }

    /// Replace the callback used by subsequent runs.
    pub fn set_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        *self
            .shared
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = boxed(callback);
    }

    /// Start the timer if enabled. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut timer = self.timer();
        if timer.enabled && timer.handle.is_none() {
            let immediate = timer.immediate;
            self.spawn_timer(&mut timer, immediate);
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut timer = self.timer();
        if timer.enabled == enabled {
            return;
        }
        timer.enabled = enabled;
        if enabled {
            let immediate = timer.immediate;
            self.spawn_timer(&mut timer, immediate);
        } else if let Some(handle) = timer.handle.take() {
            handle.abort();
            debug!(task = %self.shared.name, "Refresh timer stopped");
        }
    }

    /// Change the period. A running timer restarts with the new period.
    pub fn set_interval(&self, interval: Duration) {
        let mut timer = self.timer();
        timer.interval = interval;
        if let Some(handle) = timer.handle.take() {
            handle.abort();
            self.spawn_timer(&mut timer, false);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.timer().enabled
    }

    /// Whether the timer task is active.
    pub fn is_running(&self) -> bool {
        self.timer()
            .handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Run the latest callback now, after any in-flight run completes.
    /// Errors go to the observer; this never fails.
    pub async fn trigger(&self) {
        let _guard = self.shared.run_lock.lock().await;
        self.shared.run().await;
    }

    /// Number of runs started so far.
    pub fn run_count(&self) -> u64 {
        self.shared.runs.load(Ordering::Relaxed)
    }

    fn spawn_timer(&self, timer: &mut TimerState, immediate: bool) {
        if let Some(old) = timer.handle.take() {
            old.abort();
        }
        let shared = Arc::clone(&self.shared);
        let period = timer.interval.max(Duration::from_millis(1));
        let first_tick = Instant::now() + period;
        debug!(task = %shared.name, interval_ms = period.as_millis() as u64, immediate, "Refresh timer started");

        timer.handle = Some(tokio::spawn(async move {
            if immediate {
                shared.tick();
            }
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                shared.tick();
            }
        }));
    }

    fn timer(&self) -> MutexGuard<'_, TimerState> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.timer().handle.take() {
            handle.abort();
        }
    }
}

fn boxed<F, Fut>(callback: F) -> Callback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || -> RefreshFuture { Box::pin(callback()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> RefreshFuture + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let callback = move || -> RefreshFuture {
            c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        };
        (count, callback)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_then_every_interval_until_disabled() {
        let (count, callback) = counter();
        let scheduler = RefreshScheduler::new(
            "courses",
            callback,
            SchedulerOptions {
                interval: Duration::from_millis(1000),
                immediate: true,
                ..Default::default()
            },
        );
        scheduler.start();

        advance(1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        advance(1000).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        advance(1000).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        scheduler.set_enabled(false);
        advance(5000).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_immediate_waits_for_first_tick() {
        let (count, callback) = counter();
        let scheduler = RefreshScheduler::new(
            "balances",
            callback,
            SchedulerOptions {
                interval: Duration::from_millis(500),
                ..Default::default()
            },
        );
        scheduler.start();
        advance(499).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        advance(2).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_does_not_start_until_enabled() {
        let (count, callback) = counter();
        let scheduler = RefreshScheduler::new(
            "idle",
            callback,
            SchedulerOptions {
                interval: Duration::from_millis(100),
                enabled: false,
                immediate: true,
                ..Default::default()
            },
        );
        scheduler.start();
        advance(1000).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        scheduler.set_enabled(true);
        advance(1).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_callback_is_used() {
        let (first, callback) = counter();
        let scheduler = RefreshScheduler::new(
            "swap",
            callback,
            SchedulerOptions {
                interval: Duration::from_millis(100),
                ..Default::default()
            },
        );
        scheduler.start();
        advance(101).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);

        let (second, replacement) = counter();
        scheduler.set_callback(replacement);
        advance(100).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        scheduler.trigger().await;
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_reported_and_interval_continues() {
        let failures = Arc::new(AtomicUsize::new(0));
        let observed = failures.clone();
        let scheduler = RefreshScheduler::new(
            "flaky",
            || async { Err(SyncError::Callback("node timeout".into())) },
            SchedulerOptions {
                interval: Duration::from_millis(100),
                immediate: true,
                on_error: Some(Arc::new(move |_: &SyncError| {
                    observed.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );
        scheduler.start();
        advance(250).await;
        assert_eq!(failures.load(Ordering::SeqCst), 3);

        // Manual trigger swallows the error too.
        scheduler.trigger().await;
        assert_eq!(failures.load(Ordering::SeqCst), 4);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());
        let scheduler = RefreshScheduler::new(
            "slow",
            move || {
                let (a, p) = (a.clone(), p.clone());
                async move {
                    let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    a.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            SchedulerOptions {
                interval: Duration::from_millis(100),
                immediate: true,
                ..Default::default()
            },
        );
        scheduler.start();
        advance(50).await;
        scheduler.trigger().await;
        advance(1000).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(scheduler.run_count() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timer() {
        let (count, callback) = counter();
        let scheduler = RefreshScheduler::new(
            "teardown",
            callback,
            SchedulerOptions {
                interval: Duration::from_millis(100),
                ..Default::default()
            },
        );
        scheduler.start();
        advance(101).await;
        drop(scheduler);
        advance(1000).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_restarts_timer() {
        let (count, callback) = counter();
        let scheduler = RefreshScheduler::new(
            "retune",
            callback,
            SchedulerOptions {
                interval: Duration::from_millis(1000),
                ..Default::default()
            },
        );
        scheduler.start();
        scheduler.set_interval(Duration::from_millis(100));
        advance(350).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
