//! Bounded drop-oldest payload queue
//!
//! Producers push from any thread without blocking; the single delivery
//! worker pops. When the queue is full the oldest item is evicted to make
//! room, so the most recent occurrences survive a burst.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::types::Payload;

/// A payload waiting for delivery.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub payload: Payload,
    /// Retries already spent on this payload
    pub retries: u32,
    pub enqueued_at: Instant,
}

impl QueueItem {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            retries: 0,
            enqueued_at: Instant::now(),
        }
    }
}

/// Result of pushing onto the queue.
#[derive(Debug)]
pub enum PushOutcome {
    Accepted,
    /// Accepted after evicting the oldest item, which is returned
    Evicted(QueueItem),
    /// The queue is closed; the item is handed back
    Closed(QueueItem),
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    /// The worker holds a popped item that has not been completed yet
    in_flight: bool,
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.items.is_empty() && !self.in_flight
    }
}

#[derive(Debug)]
pub struct DeliveryQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    /// Wakes the worker when an item arrives or the queue closes
    ready: Notify,
    /// Signalled whenever the queue becomes idle
    idle: Condvar,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a new item. Fails only once the queue is closed.
    pub fn push(&self, item: QueueItem) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed(item);
            }
            Self::append(&mut state, self.capacity, item)
        };
        self.ready.notify_one();
        outcome
    }

    /// Put a retried item back at the tail. Allowed while closed so that
    /// shutdown draining can still retry.
    pub fn requeue(&self, item: QueueItem) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            Self::append(&mut state, self.capacity, item)
        };
        self.ready.notify_one();
        outcome
    }

    fn append(state: &mut QueueState, capacity: usize, item: QueueItem) -> PushOutcome {
        let evicted = if state.items.len() >= capacity {
            state.items.pop_front()
        } else {
            None
        };
        state.items.push_back(item);
        match evicted {
            Some(old) => PushOutcome::Evicted(old),
            None => PushOutcome::Accepted,
        }
    }

    /// Take the oldest item and mark it in flight.
    pub fn pop(&self) -> Option<QueueItem> {
        let mut state = self.lock();
        let item = state.items.pop_front();
        if item.is_some() {
            state.in_flight = true;
        }
        item
    }

    /// Mark the in-flight item as finished.
    pub fn complete(&self) {
        let mut state = self.lock();
        state.in_flight = false;
        if state.is_idle() {
            self.idle.notify_all();
        }
    }

    /// Wait until an item may be available.
    pub async fn notified(&self) {
        self.ready.notified().await
    }

    /// Stop accepting new items and wake the worker.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove and return everything still queued.
    pub fn drain_remaining(&self) -> Vec<QueueItem> {
        let mut state = self.lock();
        let items = state.items.drain(..).collect();
        if state.is_idle() {
            self.idle.notify_all();
        }
        items
    }

    /// Block until the queue is empty with nothing in flight.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .idle
            .wait_timeout_while(state, timeout, |s| !s.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        state.is_idle()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Copies of the queued payloads, oldest first.
    pub fn snapshot(&self) -> Vec<Payload> {
        self.lock()
            .items
            .iter()
            .map(|item| item.payload.clone())
            .collect()
    }
}
