//! End-to-end tests for the reporting pipeline
//!
//! These drive a real `Notifier` and delivery worker against in-memory
//! senders that replay canned endpoint responses.

use async_trait::async_trait;
use faultline_core::delivery::{Backoff, DeliveryQueue, PushOutcome, QueueItem};
use faultline_core::scrub::REDACTED;
use faultline_core::sender::interpret_response;
use faultline_core::{
    Body, DeliveryListener, DeliveryOptions, DropReason, ErrorReport, FailureKind, FieldScrubber,
    Level, Notifier, NotifierBuilder, Occurrence, Payload, Scrubber, SendResult, Sender,
    Transformer, TransformerPipeline,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

// ============================================
// Test doubles
// ============================================

/// Replays a script of `(status, body)` responses, then answers 200.
struct ReplaySender {
    script: Mutex<Vec<(u16, String)>>,
    received: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ReplaySender {
    fn new(script: &[(u16, &str)]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .iter()
                    .map(|(status, body)| (*status, body.to_string()))
                    .collect(),
            ),
            received: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn always(status: u16, body: &str) -> Arc<Self> {
        Self::new(&vec![(status, body); 64])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn received(&self) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|body| serde_json::from_str(body).unwrap())
            .collect()
    }
}

#[async_trait]
impl Sender for ReplaySender {
    async fn send(&self, payload: &Payload) -> SendResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().push(payload.to_json().unwrap());

        let next = {
            let mut script = self.script.lock().unwrap();
            (!script.is_empty()).then(|| script.remove(0))
        };
        match next {
            Some((status, body)) => interpret_response(status, &body),
            None => interpret_response(200, r#"{"err":0,"result":{"uuid":"ok"}}"#),
        }
    }
}

#[derive(Default)]
struct Outcomes {
    delivered: Mutex<Vec<Payload>>,
    dropped: Mutex<Vec<DropReason>>,
    evicted: Mutex<Vec<Payload>>,
}

impl DeliveryListener for Outcomes {
    fn on_delivered(&self, payload: &Payload, _ack: &faultline_core::Ack) {
        self.delivered.lock().unwrap().push(payload.clone());
    }

    fn on_dropped(&self, payload: &Payload, reason: &DropReason) {
        if matches!(reason, DropReason::Evicted) {
            self.evicted.lock().unwrap().push(payload.clone());
        }
        self.dropped.lock().unwrap().push(reason.clone());
    }
}

#[derive(Debug)]
struct Boom;

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("boom")
    }
}

impl std::error::Error for Boom {}

fn delivery(max_retries: u32, backoff: Duration) -> DeliveryOptions {
    DeliveryOptions {
        queue_capacity: 16,
        max_retries,
        backoff: Backoff::fixed(backoff),
        send_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(5),
    }
}

fn builder(sender: Arc<ReplaySender>, outcomes: Arc<Outcomes>) -> NotifierBuilder {
    Notifier::builder("test-token")
        .environment("test")
        .sender(sender)
        .listener(outcomes)
        .delivery(delivery(3, Duration::from_millis(50)))
}

const RATE_LIMITED: &str = r#"{"err":1,"message":"rate limited"}"#;
const UNAUTHORIZED: &str = r#"{"err":1,"message":"invalid access token"}"#;
const SERVER_ERROR: &str = r#"{"err":1,"message":"oops"}"#;

// ============================================
// Scenarios
// ============================================

#[test]
fn test_error_report_is_delivered_once() {
    let sender = ReplaySender::new(&[]);
    let outcomes = Arc::new(Outcomes::default());
    let notifier = builder(sender.clone(), outcomes.clone()).build().unwrap();

    let report = ErrorReport::from_error(&Boom);
    notifier.log(Some(Level::Error), Some(&report), None, None, false);
    assert!(notifier.flush(Duration::from_secs(5)));

    let received = sender.received();
    assert_eq!(received.len(), 1);
    let data = &received[0]["data"];
    assert_eq!(received[0]["access_token"], "test-token");
    assert_eq!(data["level"], "error");
    assert_eq!(data["body"]["trace"]["exception"]["message"], "boom");
    assert!(!data["fingerprint"].as_str().unwrap().is_empty());
    assert_eq!(data["uuid"].as_str().unwrap().len(), 36);
    assert_eq!(data["notifier"]["name"], "faultline-rust");

    assert_eq!(outcomes.delivered.lock().unwrap().len(), 1);
    assert_eq!(notifier.stats().delivered, 1);
}

#[test]
fn test_scrubbed_custom_field_is_redacted() {
    let sender = ReplaySender::new(&[]);
    let outcomes = Arc::new(Outcomes::default());
    let notifier = builder(sender.clone(), outcomes)
        .scrub_fields(["password"])
        .unwrap()
        .build()
        .unwrap();

    let mut custom = Map::new();
    custom.insert("password".to_string(), json!("secret"));
    custom.insert("user".to_string(), json!("ada"));
    notifier.log(None, None, Some("login failed"), Some(custom), false);
    assert!(notifier.flush(Duration::from_secs(5)));

    let data = &sender.received()[0]["data"];
    assert_eq!(data["custom"]["password"], REDACTED);
    assert_eq!(data["custom"]["user"], "ada");
    assert_eq!(data["body"]["message"]["body"], "login failed");
    assert_eq!(data["environment"], "test");
}

#[test]
fn test_rate_limited_twice_then_delivered() {
    let sender = ReplaySender::new(&[(429, RATE_LIMITED), (429, RATE_LIMITED)]);
    let outcomes = Arc::new(Outcomes::default());
    let notifier = builder(sender.clone(), outcomes.clone()).build().unwrap();

    let started = Instant::now();
    notifier.error_message("retry me");
    assert!(notifier.flush(Duration::from_secs(10)));

    assert_eq!(sender.calls(), 3);
    assert!(started.elapsed() >= Duration::from_millis(100));
    let stats = notifier.stats();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 0);
    assert_eq!(outcomes.delivered.lock().unwrap().len(), 1);
}

#[test]
fn test_unauthorized_is_dropped_after_one_attempt() {
    let sender = ReplaySender::always(401, UNAUTHORIZED);
    let outcomes = Arc::new(Outcomes::default());
    let notifier = builder(sender.clone(), outcomes.clone()).build().unwrap();

    notifier.error_message("bad token");
    assert!(notifier.flush(Duration::from_secs(5)));

    assert_eq!(sender.calls(), 1);
    let stats = notifier.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.retried, 0);

    let dropped = outcomes.dropped.lock().unwrap();
    match &dropped[..] {
        [DropReason::Rejected(failure)] => {
            assert_eq!(failure.kind, FailureKind::Unauthorized);
            assert_eq!(failure.status, Some(401));
        }
        other => panic!("unexpected drop reasons: {:?}", other),
    }
}

// ============================================
// Retry policy
// ============================================

#[test]
fn test_retriable_failure_exhausts_retries() {
    let sender = ReplaySender::always(500, SERVER_ERROR);
    let outcomes = Arc::new(Outcomes::default());
    let notifier = builder(sender.clone(), outcomes.clone())
        .delivery(delivery(4, Duration::from_millis(1)))
        .build()
        .unwrap();

    notifier.critical_message("always failing");
    assert!(notifier.flush(Duration::from_secs(5)));

    assert_eq!(sender.calls(), 5);
    let dropped = outcomes.dropped.lock().unwrap();
    assert!(matches!(
        &dropped[..],
        [DropReason::RetriesExhausted { attempts: 5, .. }]
    ));
}

#[test]
fn test_non_retriable_failures_attempt_once() {
    for (status, body) in [(400, "{}"), (403, "{}"), (413, "{}"), (422, "{}"), (418, "")] {
        let sender = ReplaySender::always(status, body);
        let outcomes = Arc::new(Outcomes::default());
        let notifier = builder(sender.clone(), outcomes)
            .delivery(delivery(3, Duration::from_millis(1)))
            .build()
            .unwrap();

        notifier.error_message("once");
        assert!(notifier.flush(Duration::from_secs(5)));
        assert_eq!(sender.calls(), 1, "status {}", status);
        assert_eq!(notifier.stats().dropped, 1, "status {}", status);
    }
}

// ============================================
// Backpressure
// ============================================

#[test]
fn test_queue_keeps_most_recent_items() {
    const CAPACITY: usize = 8;
    const EXTRA: usize = 5;

    let queue = DeliveryQueue::new(CAPACITY);
    let mut evicted = 0;
    for n in 0..CAPACITY + EXTRA {
        if let PushOutcome::Evicted(_) = queue.push(QueueItem::new(Payload::raw(n.to_string()))) {
            evicted += 1;
        }
    }

    assert_eq!(evicted, EXTRA);
    let expected: Vec<Payload> = (EXTRA..CAPACITY + EXTRA)
        .map(|n| Payload::raw(n.to_string()))
        .collect();
    assert_eq!(queue.snapshot(), expected);
}

#[test]
fn test_concurrent_producers_lose_nothing_but_evictions() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 50;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let sender = ReplaySender::new(&[]);
    let outcomes = Arc::new(Outcomes::default());
    let notifier = Arc::new(
        builder(sender.clone(), outcomes.clone())
            .delivery(DeliveryOptions {
                queue_capacity: 8,
                ..delivery(0, Duration::from_millis(10))
            })
            .build()
            .unwrap(),
    );

    let start = Arc::new(Barrier::new(PRODUCERS));
    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let notifier = notifier.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for n in 0..PER_PRODUCER {
                    notifier.send_raw(format!(r#"{{"data":{{"uuid":"{}-{}"}}}}"#, p, n));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(notifier.flush(Duration::from_secs(10)));

    let stats = notifier.stats();
    assert_eq!(stats.enqueued, TOTAL as u64);
    assert_eq!(stats.delivered + stats.evicted, TOTAL as u64);
    assert_eq!(stats.dropped, 0);

    let delivered = outcomes.delivered.lock().unwrap();
    let evicted = outcomes.evicted.lock().unwrap();
    assert_eq!(delivered.len() as u64, stats.delivered);
    assert_eq!(evicted.len() as u64, stats.evicted);
    assert_eq!(sender.calls(), delivered.len());

    let seen: HashSet<String> = delivered
        .iter()
        .chain(evicted.iter())
        .map(|payload| payload.uuid().unwrap())
        .collect();
    assert_eq!(seen.len(), TOTAL);
    for p in 0..PRODUCERS {
        assert!(seen.contains(&format!("{}-{}", p, PER_PRODUCER - 1)));
    }
}

/// Blocks every send until released.
struct GatedSender {
    gate: tokio::sync::Semaphore,
    started: AtomicUsize,
    sent: Mutex<Vec<Payload>>,
}

#[async_trait]
impl Sender for GatedSender {
    async fn send(&self, payload: &Payload) -> SendResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.sent.lock().unwrap().push(payload.clone());
        interpret_response(200, r#"{"err":0}"#)
    }
}

#[test]
fn test_overflow_while_sending_never_blocks() {
    const CAPACITY: usize = 4;
    const EXTRA: usize = 3;

    let sender = Arc::new(GatedSender {
        gate: tokio::sync::Semaphore::new(0),
        started: AtomicUsize::new(0),
        sent: Mutex::new(Vec::new()),
    });
    let notifier = Notifier::builder("tok")
        .sender(sender.clone())
        .delivery(DeliveryOptions {
            queue_capacity: CAPACITY,
            ..delivery(0, Duration::from_millis(1))
        })
        .build()
        .unwrap();

    notifier.send_raw("first");
    let deadline = Instant::now() + Duration::from_secs(5);
    while sender.started.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(sender.started.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    for n in 0..CAPACITY + EXTRA {
        notifier.send_raw(n.to_string());
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(notifier.pending(), CAPACITY);

    sender.gate.add_permits(CAPACITY + EXTRA + 1);
    assert!(notifier.flush(Duration::from_secs(5)));

    let stats = notifier.stats();
    assert_eq!(stats.evicted, EXTRA as u64);
    assert_eq!(stats.delivered, (CAPACITY + 1) as u64);

    let sent = sender.sent.lock().unwrap();
    let expected: Vec<Payload> = std::iter::once(Payload::raw("first"))
        .chain((EXTRA..CAPACITY + EXTRA).map(|n| Payload::raw(n.to_string())))
        .collect();
    assert_eq!(*sent, expected);
}

// ============================================
// Shutdown
// ============================================

#[test]
fn test_shutdown_discards_after_grace() {
    let sender = Arc::new(GatedSender {
        gate: tokio::sync::Semaphore::new(0),
        started: AtomicUsize::new(0),
        sent: Mutex::new(Vec::new()),
    });
    let notifier = Notifier::builder("tok")
        .sender(sender.clone())
        .delivery(DeliveryOptions {
            send_timeout: Duration::from_millis(200),
            ..delivery(0, Duration::from_millis(1))
        })
        .build()
        .unwrap();

    for n in 0..3 {
        notifier.send_raw(n.to_string());
    }
    let started = Instant::now();
    let stats = notifier.shutdown(Duration::from_millis(100));

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.dropped + stats.discarded, 3);

    notifier.send_raw("late");
    assert_eq!(notifier.stats().discarded, stats.discarded + 1);
}

// ============================================
// Pipeline properties
// ============================================

fn tag(label: &'static str) -> impl Transformer + Clone {
    move |mut data: Occurrence| {
        let text = data.body.message_text().unwrap_or_default().to_string();
        data.body = Body::message(format!("{}{}", text, label));
        data.context = Some(format!("{}{}", data.context.unwrap_or_default(), label));
        data
    }
}

#[test]
fn test_transformer_pipeline_is_associative() {
    let input = Occurrence::new(Level::Info, Body::message("x"));

    let left = TransformerPipeline::new()
        .with(TransformerPipeline::new().with(tag("1")).with(tag("2")))
        .with(tag("3"));
    let right = TransformerPipeline::new()
        .with(tag("1"))
        .with(TransformerPipeline::new().with(tag("2")).with(tag("3")));
    let flat = TransformerPipeline::new()
        .with(tag("1"))
        .with(tag("2"))
        .with(tag("3"));

    let expected = flat.transform(input.clone());
    assert_eq!(left.transform(input.clone()), expected);
    assert_eq!(right.transform(input), expected);
    assert_eq!(expected.body, Body::message("x123"));
}

#[test]
fn test_request_scope_feeds_request_provider() {
    use faultline_core::provider::ScopedRequestProvider;
    use faultline_core::{request_scope, RequestInfo};

    let sender = ReplaySender::new(&[]);
    let notifier = builder(sender, Arc::new(Outcomes::default()))
        .request_provider(ScopedRequestProvider)
        .scrub_fields(["request.headers.authorization"])
        .unwrap()
        .build()
        .unwrap();

    let mut request = RequestInfo {
        url: Some("https://example.test/checkout".to_string()),
        method: Some("POST".to_string()),
        ..Default::default()
    };
    request
        .headers
        .insert("Authorization".to_string(), "Bearer abc".to_string());

    let payload = {
        let _scope = request_scope(request);
        notifier.build_payload(None, None, Some("in request"), None)
    }
    .unwrap();
    let scoped = payload.occurrence().unwrap().request.clone().unwrap();
    assert_eq!(scoped.url.as_deref(), Some("https://example.test/checkout"));
    assert_eq!(scoped.headers["Authorization"], REDACTED);

    let outside = notifier.build_payload(None, None, Some("outside"), None).unwrap();
    assert!(outside.occurrence().unwrap().request.is_none());
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,8}".prop_map(Value::from),
    ]
}

fn json_tree() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(
                prop_oneof![
                    Just("password".to_string()),
                    Just("api_token".to_string()),
                    "[a-z]{1,6}"
                ],
                inner,
                0..4
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn prop_scrub_is_idempotent(tree in json_tree(), message in "[a-z ]{0,16}") {
        let scrubber = FieldScrubber::new(["password", "*token*", "custom.nested.id"]).unwrap();

        let mut data = Occurrence::new(Level::Warning, Body::message(message));
        let mut custom = Map::new();
        custom.insert("nested".to_string(), tree.clone());
        custom.insert("password".to_string(), tree);
        data.custom = Some(custom);

        let once = scrubber.scrub(data);
        let twice = scrubber.scrub(once.clone());
        prop_assert_eq!(once, twice);
    }
}
