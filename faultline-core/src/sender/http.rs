//! HTTP sender for the item endpoint
//!
//! POSTs the payload JSON and classifies the response. One request per call;
//! retries are the delivery worker's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};

use crate::config::DeliveryConfig;
use crate::error::{Error, Result};
use crate::types::Payload;

use super::{interpret_response, FailureKind, SendFailure, SendResult, Sender};

/// Sends payloads to the collection endpoint over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpSender {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpSender {
    /// Create a sender for `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.into();
        reqwest::Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {:?}: {}", endpoint, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("faultline-rust/", env!("CARGO_PKG_VERSION"))),
        );

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }

    /// Create a sender from the `[delivery]` section.
    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.endpoint.clone(), config.send_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, payload: &Payload) -> SendResult {
        let body = payload.to_json().map_err(|e| {
            SendFailure::new(FailureKind::Serialization, None, e.to_string())
        })?;

        let response = self
            .http_client
            .post(&self.endpoint)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendFailure::new(FailureKind::Timeout, None, e.to_string())
                } else {
                    SendFailure::transport(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_else(|e| {
            tracing::debug!(status, error = %e, "Failed to read response body");
            String::new()
        });

        interpret_response(status, &text)
    }
}
