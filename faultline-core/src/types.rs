//! Core domain types for faultline
//!
//! These types are the wire model shared by every stage of the pipeline:
//! the assembler builds an [`Occurrence`], transformers and the scrubber
//! rewrite it, and the delivery worker ships it inside a [`Payload`].
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Occurrence** | One reported error or message with its contextual data |
//! | **Body** | The error part of an occurrence (a trace, a trace chain or a message) plus its telemetry |
//! | **Telemetry** | Events recorded before an occurrence and shipped inside its body |
//! | **Frame** | One stack frame of a trace, oldest call first |
//! | **Payload** | The envelope sent to the collection endpoint (token + occurrence) |
//! | **Fingerprint** | Grouping key; equal fingerprints mean the same logical issue |
//!
//! Values are never mutated in place once assembled. Every pipeline stage
//! takes an [`Occurrence`] by value and returns a new one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================
// Level
// ============================================

/// Severity of an occurrence, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Critical => "critical",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }

    /// Numeric severity (higher is more severe).
    pub fn severity(&self) -> u8 {
        match self {
            Level::Critical => 50,
            Level::Error => 40,
            Level::Warning => 30,
            Level::Info => 20,
            Level::Debug => 10,
        }
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Level::Critical),
            "error" => Ok(Level::Error),
            "warning" | "warn" => Ok(Level::Warning),
            "info" => Ok(Level::Info),
            "debug" => Ok(Level::Debug),
            _ => Err(format!("unknown level: {}", s)),
        }
    }
}

// ============================================
// Body
// ============================================

/// The error part of an occurrence plus the telemetry recorded before it.
///
/// The content serializes externally tagged, which is the shape the
/// collection API expects: `{"trace": {...}}`, `{"trace_chain": [...]}` or
/// `{"message": {"body": "..."}}`. Telemetry sits next to it under
/// `"telemetry"` and is omitted when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(flatten)]
    pub content: BodyContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub telemetry: Vec<TelemetryEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyContent {
    /// A single error with its frames
    Trace(Trace),
    /// An error and its causes, outermost first
    TraceChain(Vec<Trace>),
    /// A free-text message with no error attached
    Message(MessageBody),
}

impl From<BodyContent> for Body {
    fn from(content: BodyContent) -> Self {
        Self {
            content,
            telemetry: Vec::new(),
        }
    }
}

impl Body {
    pub fn message(text: impl Into<String>) -> Self {
        BodyContent::Message(MessageBody { body: text.into() }).into()
    }

    pub fn trace(trace: Trace) -> Self {
        BodyContent::Trace(trace).into()
    }

    pub fn trace_chain(chain: Vec<Trace>) -> Self {
        BodyContent::TraceChain(chain).into()
    }

    pub fn with_telemetry(self, telemetry: Vec<TelemetryEvent>) -> Self {
        Self { telemetry, ..self }
    }

    /// The outermost trace, if this body carries an error.
    pub fn primary_trace(&self) -> Option<&Trace> {
        match &self.content {
            BodyContent::Trace(trace) => Some(trace),
            BodyContent::TraceChain(chain) => chain.first(),
            BodyContent::Message(_) => None,
        }
    }

    /// The message text, if this body is a plain message.
    pub fn message_text(&self) -> Option<&str> {
        match &self.content {
            BodyContent::Message(m) => Some(&m.body),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub body: String,
}

/// One error: its frames (oldest call first) and exception details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub frames: Vec<Frame>,
    pub exception: ExceptionInfo,
}

impl Trace {
    /// The most recent call, which is the last frame.
    pub fn top_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Error type name
    #[serde(rename = "class")]
    pub class_name: String,
    /// Error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Human readable description supplied by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single stack frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "unknown_filename")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    /// Fully qualified function path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Module path of the function
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn unknown_filename() -> String {
    "[unknown]".to_string()
}

impl Frame {
    /// Whether this frame belongs to application code rather than the
    /// standard library, async runtime or panic machinery.
    pub fn is_in_app(&self) -> bool {
        const SYSTEM_PREFIXES: &[&str] = &[
            "std::",
            "core::",
            "alloc::",
            "<std::",
            "<core::",
            "<alloc::",
            "tokio::",
            "<tokio::",
            "futures::",
            "<futures::",
            "async_trait::",
            "tracing::",
            "<tracing::",
            "faultline_core::",
            "<faultline_core::",
            "rust_begin_unwind",
            "rust_panic",
            "__rust_",
            "_rust_",
        ];
        const SYSTEM_CONTAINS: &[&str] = &[
            "::panic::",
            "::panicking::",
            "::rt::",
            "::sys_common::",
            "::backtrace::",
        ];

        let Some(method) = self.method.as_deref() else {
            return false;
        };
        if SYSTEM_PREFIXES.iter().any(|p| method.starts_with(p)) {
            return false;
        }
        !SYSTEM_CONTAINS.iter().any(|c| method.contains(c))
    }
}

// ============================================
// Telemetry
// ============================================

/// What kind of event a telemetry entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Log,
    Manual,
    Navigation,
    Network,
}

/// Which side of the application recorded a telemetry entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySource {
    Client,
    #[default]
    Server,
}

/// One event recorded before an occurrence, such as a log line or an
/// outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub kind: TelemetryKind,
    pub level: Level,
    pub source: TelemetrySource,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub body: BTreeMap<String, String>,
}

// ============================================
// Context attributes
// ============================================

/// Identity of the reporting library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierInfo {
    pub name: String,
    pub version: String,
}

/// The host that produced the occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Application root directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_version: Option<String>,
}

/// Snapshot of the in-flight request, captured at report time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ip: Option<String>,
}

/// The end user affected by the occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// ============================================
// Occurrence
// ============================================

/// One reported event with its full contextual enrichment.
///
/// Serializes to the `data` object of the wire payload. Optional fields are
/// omitted when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub body: Body,
    pub level: Level,
    /// Seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Free-form grouping context, e.g. a route or job name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<PersonInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier: Option<NotifierInfo>,
}

impl Occurrence {
    /// Create a bare occurrence with only a level and body.
    pub fn new(level: Level, body: Body) -> Self {
        Self {
            environment: None,
            body,
            level,
            timestamp: None,
            code_version: None,
            platform: None,
            language: None,
            framework: None,
            context: None,
            request: None,
            person: None,
            server: None,
            custom: None,
            fingerprint: None,
            title: None,
            uuid: None,
            notifier: None,
        }
    }

    /// Short one-line summary used in diagnostics.
    pub fn summary(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        match &self.body.content {
            BodyContent::Message(m) => m.body.clone(),
            _ => match self.body.primary_trace() {
                Some(trace) => match &trace.exception.message {
                    Some(msg) => format!("{}: {}", trace.exception.class_name, msg),
                    None => trace.exception.class_name.clone(),
                },
                None => String::new(),
            },
        }
    }
}

// ============================================
// Payload
// ============================================

/// The envelope delivered to the collection endpoint.
///
/// `Item` is the structured form. `Raw` carries a body that was already
/// serialized, either by a caller that produced its own JSON or by payload
/// truncation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Item {
        access_token: String,
        data: Box<Occurrence>,
    },
    Raw(String),
}

#[derive(Serialize)]
struct ItemEnvelope<'a> {
    access_token: &'a str,
    data: &'a Occurrence,
}

impl Payload {
    pub fn item(access_token: impl Into<String>, data: Occurrence) -> Self {
        Payload::Item {
            access_token: access_token.into(),
            data: Box::new(data),
        }
    }

    pub fn raw(json: impl Into<String>) -> Self {
        Payload::Raw(json.into())
    }

    /// Serialize to the wire body: `{"access_token": ..., "data": ...}`.
    pub fn to_json(&self) -> crate::Result<String> {
        match self {
            Payload::Item { access_token, data } => Ok(serde_json::to_string(&ItemEnvelope {
                access_token,
                data,
            })?),
            Payload::Raw(json) => Ok(json.clone()),
        }
    }

    /// Same as [`Payload::to_json`] but as a JSON tree.
    pub fn to_value(&self) -> crate::Result<serde_json::Value> {
        match self {
            Payload::Item { access_token, data } => Ok(serde_json::to_value(ItemEnvelope {
                access_token,
                data,
            })?),
            Payload::Raw(json) => Ok(serde_json::from_str(json)?),
        }
    }

    pub fn occurrence(&self) -> Option<&Occurrence> {
        match self {
            Payload::Item { data, .. } => Some(data),
            Payload::Raw(_) => None,
        }
    }

    /// The occurrence uuid, used to correlate diagnostics with the
    /// endpoint's acknowledgement.
    pub fn uuid(&self) -> Option<String> {
        match self {
            Payload::Item { data, .. } => data.uuid.clone(),
            Payload::Raw(json) => serde_json::from_str::<serde_json::Value>(json)
                .ok()
                .and_then(|v| v["data"]["uuid"].as_str().map(str::to_string)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace() -> Trace {
        Trace {
            frames: vec![
                Frame {
                    filename: "src/main.rs".to_string(),
                    lineno: Some(10),
                    method: Some("my_app::main".to_string()),
                    ..Default::default()
                },
                Frame {
                    filename: "src/handlers.rs".to_string(),
                    lineno: Some(42),
                    method: Some("my_app::handlers::process".to_string()),
                    ..Default::default()
                },
            ],
            exception: ExceptionInfo {
                class_name: "ParseError".to_string(),
                message: Some("bad input".to_string()),
                description: None,
            },
        }
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Critical > Level::Error);
        assert!(Level::Warning > Level::Info);
        assert!(Level::Debug < Level::Info);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("ERROR".parse::<Level>().unwrap(), Level::Error);
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warning);
        assert!("fatal".parse::<Level>().is_err());
    }

    #[test]
    fn test_body_serializes_externally_tagged() {
        let body = Body::message("hello");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"message": {"body": "hello"}}));

        let body = Body::trace(sample_trace());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["trace"]["exception"]["class"], "ParseError");
        assert_eq!(json["trace"]["frames"][1]["lineno"], 42);
    }

    #[test]
    fn test_telemetry_sits_next_to_body_content() {
        let event = TelemetryEvent {
            kind: TelemetryKind::Navigation,
            level: Level::Info,
            source: TelemetrySource::Client,
            timestamp_ms: Some(1_700_000_000_123),
            body: BTreeMap::from([
                ("from".to_string(), "/cart".to_string()),
                ("to".to_string(), "/checkout".to_string()),
            ]),
        };
        let body = Body::trace(sample_trace()).with_telemetry(vec![event]);

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["trace"]["exception"]["class"], "ParseError");
        assert_eq!(json["telemetry"][0]["type"], "navigation");
        assert_eq!(json["telemetry"][0]["source"], "client");
        assert_eq!(json["telemetry"][0]["timestamp_ms"], 1_700_000_000_123_i64);
        assert_eq!(json["telemetry"][0]["body"]["to"], "/checkout");

        let back: Body = serde_json::from_value(json).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn test_top_frame_is_last() {
        let trace = sample_trace();
        assert_eq!(
            trace.top_frame().unwrap().method.as_deref(),
            Some("my_app::handlers::process")
        );
    }

    #[test]
    fn test_frame_in_app() {
        let frame = |m: &str| Frame {
            method: Some(m.to_string()),
            ..Default::default()
        };
        assert!(frame("my_app::handlers::process").is_in_app());
        assert!(!frame("std::panicking::begin_panic").is_in_app());
        assert!(!frame("tokio::runtime::Runtime::block_on").is_in_app());
        assert!(!frame("faultline_core::error_report::capture_frames").is_in_app());
        assert!(!Frame::default().is_in_app());
    }

    #[test]
    fn test_payload_wire_shape() {
        let mut data = Occurrence::new(Level::Error, Body::message("boom"));
        data.uuid = Some("abc".to_string());
        let payload = Payload::item("token-1", data);

        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["access_token"], "token-1");
        assert_eq!(json["data"]["level"], "error");
        assert_eq!(json["data"]["body"]["message"]["body"], "boom");
        assert!(json["data"].get("environment").is_none());
        assert_eq!(payload.uuid().as_deref(), Some("abc"));
    }

    #[test]
    fn test_raw_payload_passes_through() {
        let raw = r#"{"access_token":"t","data":{"uuid":"u-1"}}"#;
        let payload = Payload::raw(raw);
        assert_eq!(payload.to_json().unwrap(), raw);
        assert_eq!(payload.uuid().as_deref(), Some("u-1"));
        assert!(payload.occurrence().is_none());
    }

    #[test]
    fn test_payload_value_equality() {
        let a = Payload::item("t", Occurrence::new(Level::Info, Body::message("x")));
        let b = Payload::item("t", Occurrence::new(Level::Info, Body::message("x")));
        assert_eq!(a, b);
    }

    #[test]
    fn test_occurrence_round_trip() {
        let mut data = Occurrence::new(Level::Warning, Body::trace_chain(vec![sample_trace()]));
        data.environment = Some("staging".to_string());
        data.timestamp = Some(1_700_000_000);
        let json = serde_json::to_string(&data).unwrap();
        let back: Occurrence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_summary() {
        let data = Occurrence::new(Level::Error, Body::trace(sample_trace()));
        assert_eq!(data.summary(), "ParseError: bad input");
        let data = Occurrence::new(Level::Info, Body::message("started"));
        assert_eq!(data.summary(), "started");
    }
}
