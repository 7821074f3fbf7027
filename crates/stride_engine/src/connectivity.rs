//! Network reachability tracking with flap debouncing.

use crate::events::Subscription;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use stride_oplog::Clock;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default time a transition must persist before it is committed.
pub const DEFAULT_DWELL: Duration = Duration::from_millis(500);

/// Point-in-time view of reachability.
///
/// The timestamps are for display only; sync decisions use `is_online`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivitySnapshot {
    /// Whether the network is considered reachable.
    pub is_online: bool,
    /// Last committed transition to online, in unix milliseconds.
    pub last_online_time: Option<u64>,
    /// Last committed transition to offline, in unix milliseconds.
    pub last_offline_time: Option<u64>,
}

/// A poll-based reachability source, e.g. a platform API or a health check.
pub trait ReachabilityProbe: Send + Sync + 'static {
    /// Returns the current reachability, or `None` if it cannot be determined.
    fn probe(&self) -> Option<bool>;
}

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct MonitorState {
    snapshot: ConnectivitySnapshot,
    pending: Option<bool>,
    generation: u64,
}

struct Inner {
    state: Mutex<MonitorState>,
    subscribers: RwLock<Vec<(u64, Callback)>>,
    next_subscriber: AtomicU64,
    dwell: Duration,
    clock: Arc<dyn Clock>,
}

/// Tracks whether the network is reachable.
///
/// Platform signals arrive through [`ConnectivityMonitor::report`]. A
/// change is committed only after it has persisted for the dwell time; a
/// reversal inside the window cancels it, so an unstable link does not
/// thrash the coordinator. With no signal at all the monitor reports
/// online.
///
/// Clones share state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the default dwell time.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_dwell(clock, DEFAULT_DWELL)
    }

    /// Creates a monitor with a custom dwell time. Zero commits synchronously.
    pub fn with_dwell(clock: Arc<dyn Clock>, dwell: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitorState {
                    snapshot: ConnectivitySnapshot {
                        is_online: true,
                        last_online_time: None,
                        last_offline_time: None,
                    },
                    pending: None,
                    generation: 0,
                }),
                subscribers: RwLock::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
                dwell,
                clock,
            }),
        }
    }

    /// Returns whether the network is considered reachable.
    pub fn is_online(&self) -> bool {
        self.inner.state.lock().snapshot.is_online
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> ConnectivitySnapshot {
        self.inner.state.lock().snapshot
    }

    /// Returns the configured dwell time.
    pub fn dwell(&self) -> Duration {
        self.inner.dwell
    }

    /// Registers a callback invoked once per committed transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push((id, Arc::new(callback)));

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.write().retain(|(sub, _)| *sub != id);
            }
        })
    }

    /// Feeds a platform reachability signal.
    ///
    /// Outside a tokio runtime the dwell cannot be timed and the
    /// transition is committed immediately.
    pub fn report(&self, online: bool) {
        Inner::report(&self.inner, online);
    }

    /// Commits a reading without waiting out the dwell, e.g. the first
    /// reading taken at startup.
    pub fn report_immediate(&self, online: bool) {
        let generation = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.pending = Some(online);
            state.generation
        };
        self.inner.commit(generation, online);
    }
}

impl Inner {
    fn report(this: &Arc<Self>, online: bool) {
        let generation = {
            let mut state = this.state.lock();
            if state.snapshot.is_online == online {
                if state.pending.take().is_some() {
                    state.generation += 1;
                    tracing::debug!(online, "connectivity flap absorbed");
                }
                return;
            }
            if state.pending == Some(online) {
                return;
            }
            state.generation += 1;
            state.pending = Some(online);
            state.generation
        };

        if this.dwell.is_zero() {
            this.commit(generation, online);
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(this);
                let dwell = this.dwell;
                handle.spawn(async move {
                    tokio::time::sleep(dwell).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.commit(generation, online);
                    }
                });
            }
            Err(_) => this.commit(generation, online),
        }
    }

    fn commit(&self, generation: u64, online: bool) {
        let callbacks: Vec<Callback> = {
            let mut state = self.state.lock();
            if state.generation != generation || state.pending != Some(online) {
                return;
            }
            state.pending = None;
            if state.snapshot.is_online == online {
                return;
            }

            let now = self.clock.now_millis();
            state.snapshot.is_online = online;
            if online {
                state.snapshot.last_online_time = Some(now);
            } else {
                state.snapshot.last_offline_time = Some(now);
            }
            self.subscribers
                .read()
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };

        tracing::info!(online, "connectivity changed");
        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(online))).is_err() {
                tracing::warn!(online, "connectivity subscriber panicked");
            }
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("snapshot", &self.snapshot())
            .field("dwell", &self.inner.dwell)
            .finish()
    }
}

/// Polls `probe` every `interval` and reports the result to `monitor`.
///
/// Readings of `None` leave the state untouched. The loop ends when every
/// clone of the monitor has been dropped or the handle is aborted. Must be
/// called from within a tokio runtime.
pub fn spawn_probe_loop<P: ReachabilityProbe>(
    monitor: &ConnectivityMonitor,
    probe: P,
    interval: Duration,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(&monitor.inner);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match probe.probe() {
                Some(online) => Inner::report(&inner, online),
                None => tracing::trace!("reachability probe unavailable"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use stride_oplog::ManualClock;

    fn recorder(monitor: &ConnectivityMonitor) -> Arc<PlMutex<Vec<bool>>> {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let _ = monitor.subscribe(move |online| sink.lock().push(online));
        seen
    }

    fn monitor_with_dwell(dwell: Duration) -> ConnectivityMonitor {
        ConnectivityMonitor::with_dwell(Arc::new(ManualClock::new(0)), dwell)
    }

    #[test]
    fn defaults_to_online() {
        let monitor = ConnectivityMonitor::new(Arc::new(ManualClock::new(0)));
        assert!(monitor.is_online());
        assert_eq!(monitor.snapshot().last_offline_time, None);
    }

    #[test]
    fn zero_dwell_commits_synchronously() {
        let clock = Arc::new(ManualClock::new(1_000));
        let monitor = ConnectivityMonitor::with_dwell(clock.clone(), Duration::ZERO);
        let seen = recorder(&monitor);

        monitor.report(false);
        assert!(!monitor.is_online());
        assert_eq!(monitor.snapshot().last_offline_time, Some(1_000));

        clock.advance(Duration::from_secs(1));
        monitor.report(true);
        monitor.report(true);
        assert_eq!(monitor.snapshot().last_online_time, Some(2_000));
        assert_eq!(*seen.lock(), vec![false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn transition_waits_for_dwell() {
        let monitor = monitor_with_dwell(Duration::from_millis(500));
        let seen = recorder(&monitor);

        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(monitor.is_online());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!monitor.is_online());
        assert_eq!(*seen.lock(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_inside_dwell_is_absorbed() {
        let monitor = monitor_with_dwell(Duration::from_millis(500));
        let seen = recorder(&monitor);

        for _ in 0..5 {
            monitor.report(false);
            tokio::time::sleep(Duration::from_millis(100)).await;
            monitor.report(true);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(monitor.is_online());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_reports_do_not_restart_dwell() {
        let monitor = monitor_with_dwell(Duration::from_millis(500));

        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!monitor.is_online());
    }

    #[test]
    fn unsubscribe_stops_callbacks() {
        let monitor = monitor_with_dwell(Duration::ZERO);
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = monitor.subscribe(move |online| sink.lock().push(online));

        monitor.report(false);
        sub.unsubscribe();
        monitor.report(true);
        assert_eq!(*seen.lock(), vec![false]);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let monitor = monitor_with_dwell(Duration::ZERO);
        let _ = monitor.subscribe(|_| panic!("subscriber bug"));
        let seen = recorder(&monitor);

        monitor.report(false);
        assert_eq!(*seen.lock(), vec![false]);
    }

    struct FixedProbe(Option<bool>);

    impl ReachabilityProbe for FixedProbe {
        fn probe(&self) -> Option<bool> {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_reports_readings() {
        let monitor = monitor_with_dwell(Duration::ZERO);
        let handle = spawn_probe_loop(&monitor, FixedProbe(Some(false)), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!monitor.is_online());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_probe_leaves_state() {
        let monitor = monitor_with_dwell(Duration::ZERO);
        let handle = spawn_probe_loop(&monitor, FixedProbe(None), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(monitor.is_online());
        handle.abort();
    }
}
