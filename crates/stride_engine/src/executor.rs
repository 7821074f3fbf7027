//! Drains the operation log against the remote endpoint.

use crate::config::EngineConfig;
use crate::endpoint::RemoteEndpoint;
use crate::error::{DeliveryError, TerminalError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stride_oplog::{
    DeadLetter, DeadLetterReason, LaneKey, LogResult, OperationLog, PendingOperation,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Receives progress from a running executor.
///
/// Callbacks are invoked from executor tasks, possibly concurrently.
pub trait RunObserver: Send + Sync {
    /// Called each time an operation leaves the log.
    ///
    /// `handled` counts delivered and dead-lettered operations; `total` is
    /// the pending count when the run started.
    fn on_progress(&self, _handled: usize, _total: usize) {}

    /// Called after an operation is moved to the dead-letter record.
    fn on_dead_letter(&self, _letter: &DeadLetter) {}
}

/// An observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Outcome of one executor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Operations delivered and removed.
    pub processed: usize,
    /// Operations still in the log when the run ended.
    pub remaining: usize,
    /// Operations moved to the dead-letter record.
    pub dead_lettered: usize,
    /// Operations skipped because of backoff or an earlier failure in
    /// their lane.
    pub deferred: usize,
    /// Retryable failures recorded.
    pub retried: usize,
    /// Failure that stopped the run early.
    pub terminal_error: Option<TerminalError>,
    /// Whether the run stopped because the run budget ran out.
    pub budget_exhausted: bool,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl RunReport {
    /// Returns true if the run emptied the log without a terminal error.
    pub fn is_clean(&self) -> bool {
        self.remaining == 0 && self.terminal_error.is_none()
    }

    /// Describes why the run was not clean.
    pub fn error_message(&self) -> Option<String> {
        if let Some(err) = &self.terminal_error {
            return Some(err.to_string());
        }
        if self.budget_exhausted {
            return Some(format!(
                "run budget exhausted with {} operation(s) pending",
                self.remaining
            ));
        }
        if self.remaining > 0 {
            return Some(format!("{} operation(s) still pending", self.remaining));
        }
        None
    }
}

#[derive(Debug, Default)]
struct LaneOutcome {
    processed: usize,
    dead_lettered: usize,
    deferred: usize,
    retried: usize,
    blocked: bool,
    budget_exhausted: bool,
}

struct RunContext<E> {
    log: Arc<OperationLog>,
    endpoint: Arc<E>,
    config: Arc<EngineConfig>,
    observer: Arc<dyn RunObserver>,
    halted: AtomicBool,
    handled: AtomicUsize,
    total: usize,
    deadline: Instant,
    terminal: Mutex<Option<TerminalError>>,
}

impl<E: RemoteEndpoint> RunContext<E> {
    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn halt(&self, err: TerminalError) {
        self.halted.store(true, Ordering::SeqCst);
        let mut terminal = self.terminal.lock();
        if terminal.is_none() {
            *terminal = Some(err);
        }
    }

    fn bump_progress(&self) {
        let handled = self.handled.fetch_add(1, Ordering::SeqCst) + 1;
        self.observer.on_progress(handled, self.total);
    }

    /// Runs a log write under the storage retry policy.
    async fn persist<T>(
        &self,
        what: &'static str,
        mut write: impl FnMut() -> LogResult<T>,
    ) -> Result<T, TerminalError> {
        let policy = &self.config.storage_retry;
        let mut attempt = 0u32;
        loop {
            match write() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                    attempt += 1;
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::warn!(what, attempt, ?delay, error = %e, "log write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(what, error = %e, "log write failed");
                    return Err(TerminalError::Storage(e.to_string()));
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        op: &PendingOperation,
        reason: DeadLetterReason,
        error: String,
    ) -> Result<bool, TerminalError> {
        let letter = self
            .persist("dead_letter", || {
                self.log.dead_letter(op.id, reason, Some(error.clone()))
            })
            .await?;
        match letter {
            Some(letter) => {
                self.observer.on_dead_letter(&letter);
                self.bump_progress();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn attempt(&self, op: &PendingOperation) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.config.request_timeout, self.endpoint.deliver(op)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        }
    }
}

async fn drain_lane<E: RemoteEndpoint>(
    ctx: Arc<RunContext<E>>,
    ops: Vec<PendingOperation>,
) -> LaneOutcome {
    let mut outcome = LaneOutcome::default();
    let count = ops.len();

    for (index, op) in ops.iter().enumerate() {
        if ctx.is_halted() {
            break;
        }
        if Instant::now() >= ctx.deadline {
            outcome.budget_exhausted = true;
            outcome.blocked = true;
            break;
        }

        let now = ctx.log.clock().now_millis();
        if let Some(max_age) = ctx.config.max_operation_age {
            if op.age_millis(now) > max_age.as_millis() as u64 {
                let error = format!("not delivered within {}s", max_age.as_secs());
                match ctx.dead_letter(op, DeadLetterReason::Expired, error).await {
                    Ok(moved) => outcome.dead_lettered += usize::from(moved),
                    Err(e) => {
                        ctx.halt(e);
                        break;
                    }
                }
                continue;
            }
        }

        if !op.is_ready(now) {
            outcome.blocked = true;
            outcome.deferred += count - index;
            break;
        }

        match ctx.attempt(op).await {
            Ok(()) => {
                if let Err(e) = ctx.persist("remove", || ctx.log.remove(op.id)).await {
                    ctx.halt(e);
                    break;
                }
                outcome.processed += 1;
                ctx.bump_progress();
                tracing::debug!(id = op.id, kind = %op.kind, "operation delivered");
            }
            Err(e) if e.is_auth() => {
                tracing::warn!(
                    id = op.id,
                    error = %e,
                    "delivery rejected credentials, halting run"
                );
                ctx.halt(TerminalError::Auth(e.to_string()));
                outcome.blocked = true;
                break;
            }
            Err(e) if e.is_retryable() => {
                let message = e.to_string();
                let delay = ctx.config.retry.delay_for_attempt(op.attempts.saturating_add(1));
                let not_before = ctx
                    .log
                    .clock()
                    .now_millis()
                    .saturating_add(delay.as_millis() as u64);

                let updated = match ctx
                    .persist("mark_attempt", || {
                        ctx.log.mark_attempt(op.id, Some(&message), Some(not_before))
                    })
                    .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        ctx.halt(e);
                        break;
                    }
                };
                outcome.retried += 1;

                let exhausted = updated
                    .as_ref()
                    .is_some_and(|u| u.attempts >= ctx.config.retry.max_attempts);
                if exhausted {
                    match ctx
                        .dead_letter(op, DeadLetterReason::RetriesExhausted, message)
                        .await
                    {
                        Ok(moved) => outcome.dead_lettered += usize::from(moved),
                        Err(e) => {
                            ctx.halt(e);
                            break;
                        }
                    }
                    continue;
                }

                tracing::debug!(id = op.id, error = %e, ?delay, "delivery failed, backing off");
                outcome.blocked = true;
                outcome.deferred += count - index - 1;
                break;
            }
            Err(e) => {
                let reason = e.dead_letter_reason().unwrap_or(DeadLetterReason::Rejected);
                match ctx.dead_letter(op, reason, e.to_string()).await {
                    Ok(moved) => outcome.dead_lettered += usize::from(moved),
                    Err(e) => {
                        ctx.halt(e);
                        break;
                    }
                }
            }
        }
    }

    outcome
}

/// Drains the log page by page.
///
/// Each page is split into lanes by `(kind, entity)`. Lanes run
/// concurrently; operations inside a lane run in id order. A lane that
/// hits a retryable failure or an operation still in backoff stays
/// blocked for the rest of the run, so later operations for the same
/// entity never overtake it.
pub struct SyncExecutor<E> {
    log: Arc<OperationLog>,
    endpoint: Arc<E>,
    config: Arc<EngineConfig>,
}

impl<E: RemoteEndpoint + 'static> SyncExecutor<E> {
    /// Creates a new executor.
    pub fn new(log: Arc<OperationLog>, endpoint: Arc<E>, config: EngineConfig) -> Self {
        Self {
            log,
            endpoint,
            config: Arc::new(config),
        }
    }

    /// Returns the operation log.
    pub fn log(&self) -> &Arc<OperationLog> {
        &self.log
    }

    /// Returns the remote endpoint.
    pub fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs until the log is exhausted, a terminal error occurs or the run
    /// budget runs out. Delivery failures never escape; they are counted
    /// in the report.
    pub async fn run(&self, observer: Arc<dyn RunObserver>) -> RunReport {
        let started = Instant::now();
        let total = self.log.count();
        let ctx = Arc::new(RunContext {
            log: Arc::clone(&self.log),
            endpoint: Arc::clone(&self.endpoint),
            config: Arc::clone(&self.config),
            observer,
            halted: AtomicBool::new(false),
            handled: AtomicUsize::new(0),
            total,
            deadline: started + self.config.run_budget,
            terminal: Mutex::new(None),
        });

        tracing::info!(pending = total, "sync run started");

        let mut report = RunReport::default();
        let mut blocked: HashSet<LaneKey> = HashSet::new();
        let mut cursor = 0u64;

        loop {
            if ctx.is_halted() {
                break;
            }
            if Instant::now() >= ctx.deadline {
                report.budget_exhausted = true;
                break;
            }

            let page = self.log.peek_batch_after(cursor, self.config.batch_size);
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.id;

            let mut lanes: Vec<(LaneKey, Vec<PendingOperation>)> = Vec::new();
            let mut slots: HashMap<LaneKey, usize> = HashMap::new();
            for op in page {
                let lane = op.lane();
                if blocked.contains(&lane) {
                    report.deferred += 1;
                    continue;
                }
                match slots.get(&lane) {
                    Some(&slot) => lanes[slot].1.push(op),
                    None => {
                        slots.insert(lane.clone(), lanes.len());
                        lanes.push((lane, vec![op]));
                    }
                }
            }

            let tasks: Vec<(LaneKey, JoinHandle<LaneOutcome>)> = lanes
                .into_iter()
                .map(|(lane, ops)| (lane, tokio::spawn(drain_lane(Arc::clone(&ctx), ops))))
                .collect();

            for (lane, task) in tasks {
                match task.await {
                    Ok(outcome) => {
                        report.processed += outcome.processed;
                        report.dead_lettered += outcome.dead_lettered;
                        report.deferred += outcome.deferred;
                        report.retried += outcome.retried;
                        report.budget_exhausted |= outcome.budget_exhausted;
                        if outcome.blocked {
                            blocked.insert(lane);
                        }
                    }
                    Err(e) => {
                        tracing::error!(lane = %lane, error = %e, "lane task failed");
                        blocked.insert(lane);
                    }
                }
            }
        }

        report.remaining = self.log.count();
        report.terminal_error = ctx.terminal.lock().take();
        report.duration = started.elapsed();

        tracing::info!(
            processed = report.processed,
            remaining = report.remaining,
            dead_lettered = report.dead_lettered,
            deferred = report.deferred,
            retried = report.retried,
            budget_exhausted = report.budget_exhausted,
            terminal = ?report.terminal_error,
            "sync run finished"
        );
        report
    }
}

impl<E> std::fmt::Debug for SyncExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncExecutor")
            .field("log", &self.log)
            .field("config", &self.config)
            .finish()
    }
}
