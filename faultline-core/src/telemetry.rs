//! Telemetry recording
//!
//! A [`TelemetryTracker`] keeps the events leading up to an occurrence: log
//! lines, manual markers, navigations and network calls. The buffer is
//! bounded; when it is full the oldest event is dropped. The next reported
//! occurrence takes every buffered event with it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{Level, TelemetryEvent, TelemetryKind, TelemetrySource};

/// Upper bound on buffered events.
pub const MAX_CAPACITY: usize = 100;

/// Bounded drop-oldest buffer of telemetry events.
#[derive(Debug)]
pub struct TelemetryTracker {
    capacity: usize,
    source: TelemetrySource,
    events: Mutex<VecDeque<TelemetryEvent>>,
}

impl Default for TelemetryTracker {
    fn default() -> Self {
        Self::new(MAX_CAPACITY)
    }
}

impl TelemetryTracker {
    /// Create a tracker holding at most `capacity` events, clamped to
    /// [`MAX_CAPACITY`]. A capacity of zero records nothing.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CAPACITY);
        Self {
            capacity,
            source: TelemetrySource::default(),
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Tag recorded events with `source` instead of `server`.
    pub fn with_source(mut self, source: TelemetrySource) -> Self {
        self.source = source;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn source(&self) -> TelemetrySource {
        self.source
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TelemetryEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event, evicting the oldest one when full.
    pub fn record(&self, kind: TelemetryKind, level: Level, body: BTreeMap<String, String>) {
        if self.capacity == 0 {
            return;
        }
        let event = TelemetryEvent {
            kind,
            level,
            source: self.source,
            timestamp_ms: Some(chrono::Utc::now().timestamp_millis()),
            body,
        };

        let mut events = self.lock();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn record_log(&self, level: Level, message: &str) {
        self.record(TelemetryKind::Log, level, fields([("message", message)]));
    }

    pub fn record_manual(&self, level: Level, message: &str) {
        self.record(TelemetryKind::Manual, level, fields([("message", message)]));
    }

    pub fn record_navigation(&self, level: Level, from: &str, to: &str) {
        self.record(
            TelemetryKind::Navigation,
            level,
            fields([("from", from), ("to", to)]),
        );
    }

    pub fn record_network(&self, level: Level, method: &str, url: &str, status_code: &str) {
        self.record(
            TelemetryKind::Network,
            level,
            fields([("method", method), ("url", url), ("status_code", status_code)]),
        );
    }

    /// Buffered events, oldest first, leaving the buffer as is.
    pub fn snapshot(&self) -> Vec<TelemetryEvent> {
        self.lock().iter().cloned().collect()
    }

    /// Take every buffered event, oldest first.
    pub fn drain(&self) -> Vec<TelemetryEvent> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn fields<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
