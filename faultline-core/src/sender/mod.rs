//! Payload senders
//!
//! A [`Sender`] submits one payload to the collection endpoint and classifies
//! the outcome. It never retries; retry policy belongs to the delivery
//! worker, which only needs [`SendFailure::is_retriable`].
//!
//! ## Response classification
//!
//! | Response | Outcome | Retriable |
//! |----------|---------|-----------|
//! | 2xx, `err == 0` | [`Ack`] | - |
//! | 2xx, `err != 0` | `Api` | no |
//! | 400, 422 | `BadRequest`, `UnprocessablePayload` | no |
//! | 401, 403 | `Unauthorized`, `AccessDenied` | no |
//! | 413 | `RequestTooLarge` | no |
//! | 429 | `TooManyRequests` | yes |
//! | 5xx | `InternalServerError` | yes |
//! | connect error, timeout | `Transport`, `Timeout` | yes |
//! | anything else | `UnknownResponseCode` | no |

mod http;

pub use http::HttpSender;

use crate::types::Payload;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

/// Outcome of a single send attempt.
pub type SendResult = std::result::Result<Ack, SendFailure>;

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, payload: &Payload) -> SendResult;
}

/// Successful acknowledgement from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
    /// Occurrence uuid echoed back by the endpoint
    pub uuid: Option<String>,
}

/// Response code classes the endpoint is known to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    BadRequest,
    Unauthorized,
    AccessDenied,
    RequestTooLarge,
    UnprocessablePayload,
    TooManyRequests,
    InternalServerError,
    Unknown,
}

impl ResultCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => ResultCode::Success,
            400 => ResultCode::BadRequest,
            401 => ResultCode::Unauthorized,
            403 => ResultCode::AccessDenied,
            413 => ResultCode::RequestTooLarge,
            422 => ResultCode::UnprocessablePayload,
            429 => ResultCode::TooManyRequests,
            500..=599 => ResultCode::InternalServerError,
            _ => ResultCode::Unknown,
        }
    }

    /// The failure this code represents, `None` for success.
    pub fn failure_kind(self) -> Option<FailureKind> {
        match self {
            ResultCode::Success => None,
            ResultCode::BadRequest => Some(FailureKind::BadRequest),
            ResultCode::Unauthorized => Some(FailureKind::Unauthorized),
            ResultCode::AccessDenied => Some(FailureKind::AccessDenied),
            ResultCode::RequestTooLarge => Some(FailureKind::RequestTooLarge),
            ResultCode::UnprocessablePayload => Some(FailureKind::UnprocessablePayload),
            ResultCode::TooManyRequests => Some(FailureKind::TooManyRequests),
            ResultCode::InternalServerError => Some(FailureKind::InternalServerError),
            ResultCode::Unknown => Some(FailureKind::UnknownResponseCode),
        }
    }
}

/// Why a send attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The endpoint accepted the request but reported an error in the body
    Api,
    BadRequest,
    Unauthorized,
    AccessDenied,
    RequestTooLarge,
    UnprocessablePayload,
    TooManyRequests,
    InternalServerError,
    /// A status code this client does not recognize
    UnknownResponseCode,
    /// Connection failed or the request could not be sent
    Transport,
    /// The attempt exceeded its time budget
    Timeout,
    /// The payload could not be serialized
    Serialization,
    /// The sender itself panicked
    Internal,
}

impl FailureKind {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FailureKind::TooManyRequests
                | FailureKind::InternalServerError
                | FailureKind::Transport
                | FailureKind::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Api => "api",
            FailureKind::BadRequest => "bad_request",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::AccessDenied => "access_denied",
            FailureKind::RequestTooLarge => "request_too_large",
            FailureKind::UnprocessablePayload => "unprocessable_payload",
            FailureKind::TooManyRequests => "too_many_requests",
            FailureKind::InternalServerError => "internal_server_error",
            FailureKind::UnknownResponseCode => "unknown_response_code",
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::Serialization => "serialization",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SendFailure {}

impl SendFailure {
    pub fn new(kind: FailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, None, message)
    }

    pub fn timeout() -> Self {
        Self::new(FailureKind::Timeout, None, "send attempt timed out")
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// Response body of the item endpoint.
#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    err: i64,
    #[serde(default)]
    result: Option<ApiResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResult {
    #[serde(default)]
    uuid: Option<String>,
}

/// Longest response excerpt kept in a failure message.
const MAX_ERROR_TEXT: usize = 512;

/// Classify an HTTP status and response body.
pub fn interpret_response(status: u16, body: &str) -> SendResult {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    let kind = ResultCode::from_status(status).failure_kind();

    match kind {
        None => match parsed {
            Some(response) if response.err != 0 => Err(SendFailure::new(
                FailureKind::Api,
                Some(status),
                response
                    .message
                    .unwrap_or_else(|| "endpoint reported an error".to_string()),
            )),
            Some(response) => Ok(Ack {
                status,
                uuid: response.result.and_then(|r| r.uuid),
            }),
            None => {
                tracing::debug!(status, "Unparseable success response body");
                Ok(Ack { status, uuid: None })
            }
        },
        Some(kind) => {
            let message = parsed
                .and_then(|r| r.message)
                .unwrap_or_else(|| excerpt(body));
            Err(SendFailure::new(kind, Some(status), message))
        }
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return "empty response body".to_string();
    }
    match body.char_indices().nth(MAX_ERROR_TEXT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
