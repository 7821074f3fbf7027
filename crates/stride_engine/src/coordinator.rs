//! Sync coordinator: status machine, triggers and single-flight runs.

use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivitySnapshot};
use crate::endpoint::RemoteEndpoint;
use crate::error::{SyncError, SyncResult, TerminalError};
use crate::events::{EventBus, EventKind, Subscription, SyncEvent};
use crate::executor::{RunObserver, RunReport, SyncExecutor};
use crate::status::{SyncHistory, SyncHistoryEntry, SyncStats, SyncStatus};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use stride_oplog::{DeadLetter, OperationLog, PendingOperation};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What happened to a trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerOutcome {
    /// A new run was started.
    Started,
    /// A run is already in flight; the request was coalesced into it.
    AlreadySyncing,
    /// The network is unreachable.
    Offline,
    /// The log is empty.
    NothingPending,
    /// The last run was rejected for bad credentials. Call
    /// [`SyncCoordinator::credentials_refreshed`] to resume.
    AuthBlocked,
}

enum Trigger {
    Started(u64),
    Joined(u64),
    Refused(TriggerOutcome),
}

impl Trigger {
    fn outcome(&self) -> TriggerOutcome {
        match self {
            Trigger::Started(_) => TriggerOutcome::Started,
            Trigger::Joined(_) => TriggerOutcome::AlreadySyncing,
            Trigger::Refused(outcome) => *outcome,
        }
    }
}

struct CoordinatorState {
    status: SyncStatus,
    progress: u8,
    history: SyncHistory,
    generation: u64,
    auth_blocked: bool,
    stats: SyncStats,
    current_run: u64,
}

impl CoordinatorState {
    fn transition(&mut self, to: SyncStatus) -> Option<SyncEvent> {
        let from = self.status;
        if from == to {
            return None;
        }
        self.status = to;
        self.generation += 1;
        Some(SyncEvent::StatusChanged { from, to })
    }
}

struct Shared<E> {
    config: EngineConfig,
    log: Arc<OperationLog>,
    monitor: ConnectivityMonitor,
    executor: SyncExecutor<E>,
    events: EventBus,
    runtime: Handle,
    running: AtomicBool,
    /// Held across every state change and the events it produces, so
    /// subscribers observe transitions in commit order. Reentrant because
    /// handlers may call back into the coordinator.
    emission: ReentrantMutex<()>,
    state: RwLock<CoordinatorState>,
    completed: watch::Sender<Option<(u64, RunReport)>>,
    connectivity: Mutex<Option<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<E: RemoteEndpoint + 'static> Shared<E> {
    fn emit_all(&self, events: impl IntoIterator<Item = SyncEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    fn trigger(self: &Arc<Self>) -> Trigger {
        let _emitting = self.emission.lock();
        let run_id;
        let mut changed = Vec::with_capacity(2);
        {
            let mut state = self.state.write();
            if state.auth_blocked {
                return Trigger::Refused(TriggerOutcome::AuthBlocked);
            }
            if !self.monitor.is_online() {
                return Trigger::Refused(TriggerOutcome::Offline);
            }
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Trigger::Joined(state.current_run);
            }
            if self.log.is_empty() {
                self.running.store(false, Ordering::SeqCst);
                return Trigger::Refused(TriggerOutcome::NothingPending);
            }

            state.current_run += 1;
            run_id = state.current_run;
            state.stats.runs += 1;
            state.progress = 0;
            if state.status.is_outcome() {
                changed.extend(state.transition(SyncStatus::Idle));
            }
            changed.extend(state.transition(SyncStatus::Syncing));
        }

        self.emit_all(changed);
        self.events.emit(SyncEvent::ProgressChanged(0));
        self.runtime.spawn(Arc::clone(self).run(run_id));
        Trigger::Started(run_id)
    }

    async fn run(self: Arc<Self>, run_id: u64) {
        let observer: Arc<dyn RunObserver> = Arc::new(ProgressRelay {
            shared: Arc::clone(&self),
        });
        let report = self.executor.run(observer).await;
        self.finish(run_id, report);
    }

    fn finish(self: &Arc<Self>, run_id: u64, report: RunReport) {
        let now = self.log.clock().now_millis();
        let outcome = if report.is_clean() {
            SyncStatus::Success
        } else {
            SyncStatus::Error
        };
        let entry = SyncHistoryEntry {
            timestamp: now,
            status: outcome,
            item_count: report.processed,
            error: report.error_message(),
        };

        let _emitting = self.emission.lock();
        let (changed, generation) = {
            let mut state = self.state.write();
            let stats = &mut state.stats;
            stats.operations_delivered += report.processed as u64;
            stats.operations_dead_lettered += report.dead_lettered as u64;
            stats.retries += report.retried as u64;
            stats.last_sync_time = Some(now);
            match outcome {
                SyncStatus::Success => stats.successful_runs += 1,
                _ => {
                    stats.failed_runs += 1;
                    stats.last_error = entry.error.clone();
                }
            }
            if matches!(report.terminal_error, Some(TerminalError::Auth(_))) {
                state.auth_blocked = true;
            }
            state.history.push(entry.clone());
            let changed = state.transition(outcome);
            self.running.store(false, Ordering::SeqCst);
            (changed, state.generation)
        };

        match outcome {
            SyncStatus::Success => tracing::info!(
                processed = report.processed,
                duration_ms = report.duration.as_millis() as u64,
                "sync succeeded"
            ),
            _ => tracing::warn!(
                processed = report.processed,
                remaining = report.remaining,
                error = entry.error.as_deref().unwrap_or(""),
                "sync ended with error"
            ),
        }

        self.emit_all(changed);
        self.events.emit(SyncEvent::HistoryAppended(entry));
        self.events.emit(SyncEvent::PendingCountChanged(self.log.count()));
        self.completed.send_replace(Some((run_id, report)));

        let weak = Arc::downgrade(self);
        let window = self.config.display_window;
        self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(shared) = weak.upgrade() {
                shared.revert_to_idle(generation);
            }
        });
    }

    fn revert_to_idle(&self, generation: u64) {
        let _emitting = self.emission.lock();
        let changed = {
            let mut state = self.state.write();
            if state.generation != generation || !state.status.is_outcome() {
                return;
            }
            state.transition(SyncStatus::Idle)
        };
        self.emit_all(changed);
    }

    fn after_enqueue(self: &Arc<Self>) {
        self.events
            .emit(SyncEvent::PendingCountChanged(self.log.count()));
        if self.config.sync_on_enqueue {
            let outcome = self.trigger().outcome();
            tracing::trace!(?outcome, "enqueue trigger");
        }
    }
}

struct ProgressRelay<E> {
    shared: Arc<Shared<E>>,
}

impl<E: RemoteEndpoint + 'static> RunObserver for ProgressRelay<E> {
    fn on_progress(&self, handled: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            (handled.saturating_mul(100) / total).min(100) as u8
        };
        let _emitting = self.shared.emission.lock();
        // Lanes report out of order; progress never moves backwards.
        let advanced = {
            let mut state = self.shared.state.write();
            if percent > state.progress {
                state.progress = percent;
                Some(percent)
            } else {
                None
            }
        };
        if let Some(percent) = advanced {
            self.shared.events.emit(SyncEvent::ProgressChanged(percent));
        }
        self.shared
            .events
            .emit(SyncEvent::PendingCountChanged(self.shared.log.count()));
    }

    fn on_dead_letter(&self, letter: &DeadLetter) {
        self.shared
            .events
            .emit(SyncEvent::DeadLettered(letter.clone()));
    }
}

/// Owns the externally visible sync state and decides when to run.
///
/// The status machine is `Idle -> Syncing -> (Success | Error) -> Idle`.
/// A run starts on a connectivity transition to online, on the periodic
/// timer, on enqueue (when configured) or on a manual trigger, and only
/// when online with work pending. At most one run is in flight;
/// concurrent triggers are coalesced into it. Success and Error stay
/// visible for the display window and then revert to Idle unless a new
/// run has started.
///
/// Clones share state. Reads are served from memory.
///
/// # Example
///
/// ```rust,ignore
/// let coordinator = SyncCoordinator::new(log, monitor, endpoint, EngineConfig::default())?;
/// coordinator.start();
/// coordinator.enqueue("task.complete", Some("task-42".into()), payload)?;
/// let report = coordinator.sync_now().await;
/// ```
pub struct SyncCoordinator<E: RemoteEndpoint + 'static> {
    shared: Arc<Shared<E>>,
}

impl<E: RemoteEndpoint + 'static> Clone for SyncCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: RemoteEndpoint + 'static> SyncCoordinator<E> {
    /// Creates a coordinator. Background triggers start with
    /// [`SyncCoordinator::start`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` does not validate,
    /// or [`SyncError::NoRuntime`] if called outside a tokio runtime.
    pub fn new(
        log: Arc<OperationLog>,
        monitor: ConnectivityMonitor,
        endpoint: E,
        config: EngineConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let executor = SyncExecutor::new(Arc::clone(&log), Arc::new(endpoint), config.clone());
        let (completed, _) = watch::channel(None);

        Ok(Self {
            shared: Arc::new(Shared {
                state: RwLock::new(CoordinatorState {
                    status: SyncStatus::Idle,
                    progress: 0,
                    history: SyncHistory::new(config.history_capacity),
                    generation: 0,
                    auth_blocked: false,
                    stats: SyncStats::default(),
                    current_run: 0,
                }),
                config,
                log,
                monitor,
                executor,
                events: EventBus::new(),
                runtime,
                running: AtomicBool::new(false),
                emission: ReentrantMutex::new(()),
                completed,
                connectivity: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Starts the connectivity listener and the periodic timer, then
    /// triggers a sync if work is already pending. Calling it again is a
    /// no-op.
    pub fn start(&self) {
        {
            let mut connectivity = self.shared.connectivity.lock();
            if connectivity.is_some() {
                return;
            }

            let weak: Weak<Shared<E>> = Arc::downgrade(&self.shared);
            *connectivity = Some(self.shared.monitor.subscribe(move |online| {
                if !online {
                    return;
                }
                if let Some(shared) = weak.upgrade() {
                    let outcome = shared.trigger().outcome();
                    tracing::debug!(?outcome, "back online");
                }
            }));
        }

        let weak: Weak<Shared<E>> = Arc::downgrade(&self.shared);
        let interval = self.shared.config.sync_interval;
        let ticker = self.shared.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if shared.monitor.is_online() && !shared.log.is_empty() {
                    let outcome = shared.trigger().outcome();
                    tracing::trace!(?outcome, "periodic trigger");
                }
            }
        });
        self.shared.tasks.lock().push(ticker);

        tracing::debug!(interval_ms = interval.as_millis() as u64, "coordinator started");
        let outcome = self.shared.trigger().outcome();
        tracing::trace!(?outcome, "startup trigger");
    }

    /// Stops background triggers. A run already in flight completes.
    pub fn shutdown(&self) {
        if let Some(subscription) = self.shared.connectivity.lock().take() {
            subscription.unsubscribe();
        }
        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!("coordinator stopped");
    }

    /// Requests a run without waiting for it.
    pub fn trigger_sync(&self) -> TriggerOutcome {
        self.shared.trigger().outcome()
    }

    /// Requests a run and waits for it to finish.
    ///
    /// If a run is already in flight, waits for that one instead. Returns
    /// `None` if no run could start.
    pub async fn sync_now(&self) -> Option<RunReport> {
        let mut completed = self.shared.completed.subscribe();
        let run_id = match self.shared.trigger() {
            Trigger::Started(id) | Trigger::Joined(id) => id,
            Trigger::Refused(outcome) => {
                tracing::debug!(?outcome, "sync_now refused");
                return None;
            }
        };

        let done = completed
            .wait_for(|last| last.as_ref().is_some_and(|(id, _)| *id >= run_id))
            .await
            .ok()?;
        done.as_ref().map(|(_, report)| report.clone())
    }

    /// Appends an operation and notifies subscribers of the new count.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot persist the operation.
    pub fn enqueue(
        &self,
        kind: impl Into<String>,
        entity: Option<String>,
        payload: Vec<u8>,
    ) -> SyncResult<PendingOperation> {
        let op = match entity {
            Some(entity) => self.shared.log.enqueue_for(kind, entity, payload)?,
            None => self.shared.log.enqueue(kind, payload)?,
        };
        self.shared.after_enqueue();
        Ok(op)
    }

    /// Appends an operation whose payload is `value` encoded as CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the log cannot persist it.
    pub fn enqueue_value<T: Serialize>(
        &self,
        kind: impl Into<String>,
        entity: Option<String>,
        value: &T,
    ) -> SyncResult<PendingOperation> {
        let op = self.shared.log.enqueue_value(kind, entity, value)?;
        self.shared.after_enqueue();
        Ok(op)
    }

    /// Returns the current status.
    pub fn current_status(&self) -> SyncStatus {
        self.shared.state.read().status
    }

    /// Returns the number of pending operations.
    pub fn pending_count(&self) -> usize {
        self.shared.log.count()
    }

    /// Returns progress of the current or last run in percent.
    pub fn progress(&self) -> u8 {
        self.shared.state.read().progress
    }

    /// Returns finished runs, oldest first.
    pub fn history(&self) -> Vec<SyncHistoryEntry> {
        self.shared.state.read().history.to_vec()
    }

    /// Returns cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.shared.state.read().stats.clone()
    }

    /// Returns the current connectivity snapshot.
    pub fn connectivity(&self) -> ConnectivitySnapshot {
        self.shared.monitor.snapshot()
    }

    /// Returns the connectivity monitor.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.shared.monitor
    }

    /// Returns the operation log.
    pub fn log(&self) -> &Arc<OperationLog> {
        &self.shared.log
    }

    /// Returns the remote endpoint.
    pub fn endpoint(&self) -> &E {
        self.shared.executor.endpoint()
    }

    /// Returns the event bus.
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Registers `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, handler)
    }

    /// Returns operations awaiting user resolution.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.log.dead_letters()
    }

    /// Returns a dead letter to the back of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be written.
    pub fn requeue_dead_letter(&self, id: u64) -> SyncResult<Option<PendingOperation>> {
        let op = self.shared.log.requeue_dead_letter(id)?;
        if op.is_some() {
            self.shared.after_enqueue();
        }
        Ok(op)
    }

    /// Permanently drops a dead letter.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be written.
    pub fn discard_dead_letter(&self, id: u64) -> SyncResult<bool> {
        Ok(self.shared.log.discard_dead_letter(id)?)
    }

    /// Returns true while an authentication failure blocks runs.
    pub fn is_auth_blocked(&self) -> bool {
        self.shared.state.read().auth_blocked
    }

    /// Clears an authentication block and triggers a run.
    pub fn credentials_refreshed(&self) -> TriggerOutcome {
        self.shared.state.write().auth_blocked = false;
        tracing::info!("credentials refreshed");
        self.trigger_sync()
    }
}

impl<E: RemoteEndpoint + 'static> std::fmt::Debug for SyncCoordinator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("status", &self.current_status())
            .field("pending", &self.pending_count())
            .field("online", &self.shared.monitor.is_online())
            .finish()
    }
}
