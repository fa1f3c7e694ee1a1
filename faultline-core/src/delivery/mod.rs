//! Asynchronous delivery
//!
//! Payloads handed over by the notifier land in a bounded
//! [`DeliveryQueue`] and are shipped by a single background
//! [`DeliveryWorker`]. Network failures never reach the reporting thread.
//!
//! ## Guarantees
//!
//! - `enqueue` never blocks on I/O; a full queue evicts its oldest item
//! - payloads are attempted in FIFO order; a retried payload rejoins at the tail
//! - a payload is attempted at most `max_retries + 1` times
//! - shutdown drains for at most the grace period, then discards
//!
//! Every outcome is logged through `tracing` and, optionally, reported to a
//! [`DeliveryListener`].

mod backoff;
mod queue;
mod worker;

pub use backoff::Backoff;
pub use queue::{DeliveryQueue, PushOutcome, QueueItem};
pub use worker::{
    DeliveryListener, DeliveryOptions, DeliveryStats, DeliveryWorker, DropReason,
    WORKER_THREAD_NAME,
};
