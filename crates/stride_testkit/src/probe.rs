//! Scripted reachability probe.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use stride_engine::ReachabilityProbe;

/// A probe that replays queued readings, then repeats the last one.
///
/// Clones share the queue so a test can keep feeding readings after the
/// probe has been handed to a probe loop.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    readings: Arc<Mutex<VecDeque<Option<bool>>>>,
    last: Arc<Mutex<Option<bool>>>,
}

impl ScriptedProbe {
    /// Creates a probe that reports "unavailable" until fed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues readings.
    pub fn feed(&self, readings: impl IntoIterator<Item = Option<bool>>) {
        self.readings.lock().extend(readings);
    }

    /// Replaces the queue with a single sticky reading.
    pub fn set(&self, reading: Option<bool>) {
        self.readings.lock().clear();
        *self.last.lock() = reading;
    }
}

impl ReachabilityProbe for ScriptedProbe {
    fn probe(&self) -> Option<bool> {
        match self.readings.lock().pop_front() {
            Some(reading) => {
                *self.last.lock() = reading;
                reading
            }
            None => *self.last.lock(),
        }
    }
}
