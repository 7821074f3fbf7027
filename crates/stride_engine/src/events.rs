//! Typed, synchronous fan-out of engine state changes.

use crate::status::{SyncHistoryEntry, SyncStatus};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use stride_oplog::DeadLetter;

/// Selects which events a handler receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`SyncEvent::StatusChanged`]
    StatusChanged,
    /// [`SyncEvent::PendingCountChanged`]
    PendingCountChanged,
    /// [`SyncEvent::HistoryAppended`]
    HistoryAppended,
    /// [`SyncEvent::ProgressChanged`]
    ProgressChanged,
    /// [`SyncEvent::DeadLettered`]
    DeadLettered,
}

/// A change in engine state.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The coordinator moved between states.
    StatusChanged {
        /// Previous status.
        from: SyncStatus,
        /// New status.
        to: SyncStatus,
    },
    /// The number of pending operations changed.
    PendingCountChanged(usize),
    /// A run finished and was recorded.
    HistoryAppended(SyncHistoryEntry),
    /// Run progress in percent.
    ProgressChanged(u8),
    /// An operation was set aside. Hosts apply a compensating local
    /// update for optimistic UI state.
    DeadLettered(DeadLetter),
}

impl SyncEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            SyncEvent::StatusChanged { .. } => EventKind::StatusChanged,
            SyncEvent::PendingCountChanged(_) => EventKind::PendingCountChanged,
            SyncEvent::HistoryAppended(_) => EventKind::HistoryAppended,
            SyncEvent::ProgressChanged(_) => EventKind::ProgressChanged,
            SyncEvent::DeadLettered(_) => EventKind::DeadLettered,
        }
    }
}

type Handler = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Registration {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: RwLock<Vec<Registration>>,
}

impl Registry {
    fn remove(&self, id: u64) {
        self.handlers.write().retain(|r| r.id != id);
    }
}

/// Handle returned by `subscribe` calls.
///
/// Dropping the handle leaves the handler attached; call
/// [`Subscription::unsubscribe`] to detach it.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detaches the handler. Later events are not delivered to it.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Event registry shared by the coordinator and its subscribers.
///
/// Delivery is synchronous and in subscription order. Handlers run
/// outside the registry lock, so a handler may subscribe or unsubscribe.
/// A panicking handler is logged and skipped.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.write().push(Registration {
            id,
            kind,
            handler: Arc::new(handler),
        });

        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    /// Returns the number of attached handlers.
    pub fn handler_count(&self) -> usize {
        self.registry.handlers.read().len()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        let kind = event.kind();
        let targets: Vec<Handler> = self
            .registry
            .handlers
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in targets {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::warn!(?kind, "event handler panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}
