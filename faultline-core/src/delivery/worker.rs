//! Background delivery worker
//!
//! One dedicated thread runs a current-thread tokio runtime and is the only
//! consumer of the [`DeliveryQueue`]. Callers never wait on the network: they
//! push and return.
//!
//! Each payload moves through Queued → InFlight → Delivered or Dropped. A
//! retriable failure sleeps for the backoff delay and puts the payload back
//! at the tail of the queue with its retry count bumped. Once `max_retries`
//! retries are spent the payload is dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::config::DeliveryConfig;
use crate::error::Result;
use crate::sender::{Ack, FailureKind, SendFailure, Sender};
use crate::types::Payload;

use super::backoff::Backoff;
use super::queue::{DeliveryQueue, PushOutcome, QueueItem};

/// Name of the delivery thread.
pub const WORKER_THREAD_NAME: &str = "faultline-delivery";

/// Receives the final outcome of every payload.
///
/// Called on the delivery thread; implementations should return quickly.
pub trait DeliveryListener: Send + Sync {
    fn on_delivered(&self, _payload: &Payload, _ack: &Ack) {}

    fn on_dropped(&self, _payload: &Payload, _reason: &DropReason) {}
}

/// Why a payload was not delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The endpoint refused it with a non-retriable failure
    Rejected(SendFailure),
    /// Every allowed attempt failed with a retriable failure
    RetriesExhausted { attempts: u32, last: SendFailure },
    /// Evicted from a full queue by a newer payload
    Evicted,
    /// Still queued when the shutdown grace period ran out
    Shutdown,
}

/// Counters since the worker started.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Payloads accepted into the queue
    pub enqueued: u64,
    /// Send attempts made
    pub attempts: u64,
    pub delivered: u64,
    /// Payloads put back in the queue after a retriable failure
    pub retried: u64,
    /// Payloads given up on after a send failure
    pub dropped: u64,
    /// Payloads evicted by queue overflow
    pub evicted: u64,
    /// Payloads discarded at shutdown
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    enqueued: AtomicU64,
    attempts: AtomicU64,
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    discarded: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    pub queue_capacity: usize,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Time budget for a single send attempt
    pub send_timeout: Duration,
    /// Drain time used when the worker is dropped
    pub shutdown_grace: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl DeliveryOptions {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity,
            max_retries: config.max_retries,
            backoff: Backoff::from_config(config),
            send_timeout: config.send_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

struct Shared {
    queue: Arc<DeliveryQueue>,
    sender: Arc<dyn Sender>,
    options: DeliveryOptions,
    listener: Option<Arc<dyn DeliveryListener>>,
    stats: StatsCounters,
}

/// Handle to the delivery thread.
///
/// Dropping the handle shuts the worker down with the configured grace
/// period.
pub struct DeliveryWorker {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<Option<Instant>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl DeliveryWorker {
    /// Start the delivery thread.
    pub fn spawn(
        sender: Arc<dyn Sender>,
        options: DeliveryOptions,
        listener: Option<Arc<dyn DeliveryListener>>,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let shared = Arc::new(Shared {
            queue: Arc::new(DeliveryQueue::new(options.queue_capacity)),
            sender,
            options,
            listener,
            stats: StatsCounters::default(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(None);

        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(worker_shared.run(shutdown_rx)))?;
        let thread_id = handle.thread().id();

        Ok(Self {
            shared,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Queue a payload. Never blocks on delivery.
    ///
    /// Returns `false` if the worker has shut down and the payload was
    /// discarded.
    pub fn enqueue(&self, payload: Payload) -> bool {
        match self.shared.queue.push(QueueItem::new(payload)) {
            PushOutcome::Accepted => {
                StatsCounters::bump(&self.shared.stats.enqueued);
                true
            }
            PushOutcome::Evicted(old) => {
                StatsCounters::bump(&self.shared.stats.enqueued);
                self.shared.record_evicted(old);
                true
            }
            PushOutcome::Closed(item) => {
                tracing::warn!(
                    uuid = ?item.payload.uuid(),
                    "Delivery worker is shut down; discarding payload"
                );
                self.shared.discard(vec![item]);
                false
            }
        }
    }

    /// Wait until the queue is empty and nothing is in flight.
    ///
    /// Returns `false` if `timeout` elapsed first. Called from the delivery
    /// thread itself it returns immediately.
    pub fn flush(&self, timeout: Duration) -> bool {
        if std::thread::current().id() == self.thread_id {
            return self.shared.queue.is_idle();
        }
        self.shared.queue.wait_idle(timeout)
    }

    /// Stop accepting payloads, deliver what fits in `grace`, discard the
    /// rest and join the thread. Later calls return the final stats.
    pub fn shutdown(&self, grace: Duration) -> DeliveryStats {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return self.stats();
        };

        tracing::debug!(
            pending = self.shared.queue.len(),
            grace_ms = grace.as_millis() as u64,
            "Shutting down delivery worker"
        );
        let _ = self.shutdown_tx.send(Some(Instant::now() + grace));
        self.shared.queue.close();

        if std::thread::current().id() == self.thread_id {
            tracing::warn!("Shutdown requested from the delivery thread; not waiting for drain");
            return self.stats();
        }
        if handle.join().is_err() {
            tracing::error!("Delivery worker thread panicked");
        }

        let stats = self.stats();
        tracing::info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            evicted = stats.evicted,
            discarded = stats.discarded,
            "Delivery worker stopped"
        );
        stats
    }

    pub fn stats(&self) -> DeliveryStats {
        self.shared.stats.snapshot()
    }

    /// Payloads currently waiting, not counting one in flight.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.is_closed()
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.shared.queue
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        self.shutdown(self.shared.options.shutdown_grace);
    }
}

impl Shared {
    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<Option<Instant>>) {
        tracing::debug!(
            capacity = self.queue.capacity(),
            max_retries = self.options.max_retries,
            "Delivery worker started"
        );

        loop {
            let deadline = *shutdown_rx.borrow_and_update();
            if let Some(deadline) = deadline {
                self.drain(deadline, &mut shutdown_rx).await;
                break;
            }

            match self.queue.pop() {
                Some(item) => {
                    self.deliver(item, None, &mut shutdown_rx).await;
                    self.queue.complete();
                }
                None => {
                    tokio::select! {
                        _ = self.queue.notified() => {}
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                // Handle dropped without a deadline
                                self.drain(Instant::now(), &mut shutdown_rx).await;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Deliver queued payloads until the queue is empty or `deadline` passes.
    async fn drain(&self, deadline: Instant, shutdown_rx: &mut watch::Receiver<Option<Instant>>) {
        self.queue.close();
        while Instant::now() < deadline {
            let Some(item) = self.queue.pop() else {
                break;
            };
            self.deliver(item, Some(deadline), shutdown_rx).await;
            self.queue.complete();
        }

        let leftovers = self.queue.drain_remaining();
        if !leftovers.is_empty() {
            tracing::warn!(
                count = leftovers.len(),
                "Shutdown grace period elapsed; discarding queued payloads"
            );
        }
        self.discard(leftovers);
    }

    async fn deliver(
        &self,
        mut item: QueueItem,
        deadline: Option<Instant>,
        shutdown_rx: &mut watch::Receiver<Option<Instant>>,
    ) {
        let attempt = item.retries + 1;
        StatsCounters::bump(&self.stats.attempts);

        let budget = match deadline {
            Some(deadline) => self
                .options
                .send_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.options.send_timeout,
        };

        let sender = self.sender.clone();
        let payload = item.payload.clone();
        // A separate task so a panicking sender cannot take the worker down.
        let mut task = tokio::spawn(async move { sender.send(&payload).await });
        let result = match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SendFailure::new(
                FailureKind::Internal,
                None,
                format!("sender task failed: {}", e),
            )),
            Err(_) => {
                task.abort();
                Err(SendFailure::timeout())
            }
        };

        match result {
            Ok(ack) => {
                StatsCounters::bump(&self.stats.delivered);
                tracing::debug!(
                    uuid = ?ack.uuid,
                    status = ack.status,
                    attempt,
                    "Payload delivered"
                );
                self.notify(|l| l.on_delivered(&item.payload, &ack));
            }
            Err(failure) if failure.is_retriable() => {
                if item.retries >= self.options.max_retries {
                    tracing::warn!(
                        uuid = ?item.payload.uuid(),
                        attempts = attempt,
                        error = %failure,
                        "Retries exhausted; dropping payload"
                    );
                    self.drop_item(
                        item,
                        DropReason::RetriesExhausted {
                            attempts: attempt,
                            last: failure,
                        },
                    );
                    return;
                }

                let delay = self.options.backoff.delay(item.retries);
                tracing::debug!(
                    attempt,
                    max_retries = self.options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    kind = %failure.kind,
                    "Transient delivery failure; retrying"
                );
                if !wait_backoff(delay, deadline, shutdown_rx).await {
                    self.discard(vec![item]);
                    return;
                }

                item.retries += 1;
                StatsCounters::bump(&self.stats.retried);
                if let PushOutcome::Evicted(old) = self.queue.requeue(item) {
                    self.record_evicted(old);
                }
            }
            Err(failure) => {
                if failure.kind == FailureKind::UnknownResponseCode {
                    tracing::error!(
                        uuid = ?item.payload.uuid(),
                        status = ?failure.status,
                        error = %failure,
                        "Unrecognized response code from endpoint; dropping payload"
                    );
                } else {
                    tracing::warn!(
                        uuid = ?item.payload.uuid(),
                        kind = %failure.kind,
                        status = ?failure.status,
                        error = %failure,
                        "Payload rejected"
                    );
                }
                self.drop_item(item, DropReason::Rejected(failure));
            }
        }
    }

    fn drop_item(&self, item: QueueItem, reason: DropReason) {
        StatsCounters::bump(&self.stats.dropped);
        self.notify(|l| l.on_dropped(&item.payload, &reason));
    }

    fn record_evicted(&self, old: QueueItem) {
        StatsCounters::bump(&self.stats.evicted);
        tracing::warn!(
            uuid = ?old.payload.uuid(),
            capacity = self.queue.capacity(),
            "Delivery queue full; evicted oldest payload"
        );
        self.notify(|l| l.on_dropped(&old.payload, &DropReason::Evicted));
    }

    fn discard(&self, items: Vec<QueueItem>) {
        for item in items {
            StatsCounters::bump(&self.stats.discarded);
            self.notify(|l| l.on_dropped(&item.payload, &DropReason::Shutdown));
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn DeliveryListener)) {
        if let Some(listener) = &self.listener {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                tracing::warn!("Delivery listener panicked");
            }
        }
    }
}

/// Sleep for `delay` unless a shutdown deadline makes the retry pointless.
///
/// Returns `true` when the payload should be requeued.
async fn wait_backoff(
    delay: Duration,
    mut deadline: Option<Instant>,
    shutdown_rx: &mut watch::Receiver<Option<Instant>>,
) -> bool {
    let wake = Instant::now() + delay;
    loop {
        match deadline {
            Some(deadline) if wake > deadline => return false,
            Some(_) => {
                tokio::time::sleep_until(tokio::time::Instant::from_std(wake)).await;
                return true;
            }
            None => {}
        }

        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => return true,
            changed = shutdown_rx.changed() => {
                deadline = match changed {
                    Ok(()) => *shutdown_rx.borrow_and_update(),
                    Err(_) => Some(Instant::now()),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SendResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Replies with a fixed script of results, then succeeds.
    struct ScriptedSender {
        script: Mutex<Vec<SendResult>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSender {
        fn new(script: Vec<SendResult>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sender for ScriptedSender {
        async fn send(&self, _payload: &Payload) -> SendResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(Ack {
                    status: 200,
                    uuid: None,
                })
            } else {
                script.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        delivered: Mutex<Vec<Payload>>,
        dropped: Mutex<Vec<DropReason>>,
    }

    impl DeliveryListener for RecordingListener {
        fn on_delivered(&self, payload: &Payload, _ack: &Ack) {
            self.delivered.lock().unwrap().push(payload.clone());
        }

        fn on_dropped(&self, _payload: &Payload, reason: &DropReason) {
            self.dropped.lock().unwrap().push(reason.clone());
        }
    }

    fn options(max_retries: u32) -> DeliveryOptions {
        DeliveryOptions {
            queue_capacity: 10,
            max_retries,
            backoff: Backoff::fixed(Duration::from_millis(1)),
            send_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    fn server_error() -> SendResult {
        Err(SendFailure::new(
            FailureKind::InternalServerError,
            Some(500),
            "boom",
        ))
    }

    #[test]
    fn test_delivers_payload() {
        let sender = Arc::new(ScriptedSender::new(vec![]));
        let listener = Arc::new(RecordingListener::default());
        let worker =
            DeliveryWorker::spawn(sender.clone(), options(3), Some(listener.clone())).unwrap();

        assert!(worker.enqueue(Payload::raw("{}")));
        assert!(worker.flush(Duration::from_secs(5)));

        let stats = worker.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(sender.calls(), 1);
        assert_eq!(listener.delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let sender = Arc::new(ScriptedSender::new(vec![server_error(), server_error()]));
        let worker = DeliveryWorker::spawn(sender.clone(), options(3), None).unwrap();

        worker.enqueue(Payload::raw("{}"));
        assert!(worker.flush(Duration::from_secs(5)));

        let stats = worker.stats();
        assert_eq!(sender.calls(), 3);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_retries_exhausted() {
        let script = (0..10).map(|_| server_error()).collect();
        let sender = Arc::new(ScriptedSender::new(script));
        let listener = Arc::new(RecordingListener::default());
        let worker =
            DeliveryWorker::spawn(sender.clone(), options(2), Some(listener.clone())).unwrap();

        worker.enqueue(Payload::raw("{}"));
        assert!(worker.flush(Duration::from_secs(5)));

        assert_eq!(sender.calls(), 3);
        assert_eq!(worker.stats().dropped, 1);
        let dropped = listener.dropped.lock().unwrap();
        assert!(matches!(
            dropped[0],
            DropReason::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_non_retriable_dropped_immediately() {
        let sender = Arc::new(ScriptedSender::new(vec![Err(SendFailure::new(
            FailureKind::Unauthorized,
            Some(401),
            "bad token",
        ))]));
        let worker = DeliveryWorker::spawn(sender.clone(), options(3), None).unwrap();

        worker.enqueue(Payload::raw("{}"));
        assert!(worker.flush(Duration::from_secs(5)));

        assert_eq!(sender.calls(), 1);
        assert_eq!(worker.stats().dropped, 1);
        assert_eq!(worker.stats().retried, 0);
    }

    #[test]
    fn test_slow_send_times_out() {
        let mut sender = ScriptedSender::new(vec![]);
        sender.delay = Duration::from_secs(10);
        let sender = Arc::new(sender);
        let opts = DeliveryOptions {
            send_timeout: Duration::from_millis(20),
            ..options(0)
        };
        let worker = DeliveryWorker::spawn(sender, opts, None).unwrap();

        worker.enqueue(Payload::raw("{}"));
        assert!(worker.flush(Duration::from_secs(5)));
        assert_eq!(worker.stats().dropped, 1);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_discarded() {
        let sender = Arc::new(ScriptedSender::new(vec![]));
        let worker = DeliveryWorker::spawn(sender.clone(), options(0), None).unwrap();
        worker.shutdown(Duration::from_secs(1));

        assert!(worker.is_shut_down());
        assert!(!worker.enqueue(Payload::raw("{}")));
        assert_eq!(worker.stats().discarded, 1);
        assert_eq!(sender.calls(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let sender = Arc::new(ScriptedSender::new(vec![]));
        let worker = DeliveryWorker::spawn(sender, options(0), None).unwrap();
        worker.enqueue(Payload::raw("{}"));
        let first = worker.shutdown(Duration::from_secs(5));
        let second = worker.shutdown(Duration::from_secs(5));
        assert_eq!(first, second);
        assert_eq!(first.delivered, 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_worker() {
        struct Panicky;
        impl DeliveryListener for Panicky {
            fn on_delivered(&self, _payload: &Payload, _ack: &Ack) {
                panic!("listener bug");
            }
        }

        let sender = Arc::new(ScriptedSender::new(vec![]));
        let worker = DeliveryWorker::spawn(sender.clone(), options(0), Some(Arc::new(Panicky)))
            .unwrap();
        worker.enqueue(Payload::raw("{}"));
        worker.enqueue(Payload::raw("{}"));
        assert!(worker.flush(Duration::from_secs(5)));
        assert_eq!(worker.stats().delivered, 2);
    }
}
