//! Serving collaborator seam.
//!
//! `Transport::fetch` performs exactly one attempt. Timeouts and retries are
//! the request queue's business, so the HTTP client here only carries a
//! connect timeout.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;

use crate::config::ServingConfig;
use crate::wire::{TeaserRequest, TeaserResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("serving endpoint answered HTTP {0}")]
    Status(u16),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Network-level failures get another attempt; a payload we cannot parse
    /// fails the whole batch.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Malformed(_))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &TeaserRequest) -> Result<TeaserResponse, TransportError>;
    fn name(&self) -> &'static str;
}

/// JSON-over-HTTP transport (`POST <endpoint>`).
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(cfg: &ServingConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()
            .context("building serving http client")?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &TeaserRequest) -> Result<TeaserResponse, TransportError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                counter!("slot_transport_errors_total").increment(1);
                tracing::debug!(target: "transport", endpoint = %self.endpoint, error = %e, "send failed");
                TransportError::Http(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            counter!("slot_transport_errors_total").increment(1);
            tracing::debug!(target: "transport", endpoint = %self.endpoint, %status, "non-success status");
            return Err(TransportError::Status(status.as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(format!("read body: {e}")))?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Err(TransportError::Malformed(format!(
                "empty body with status {status}"
            )));
        }
        serde_json::from_str(trimmed).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_is_terminal() {
        assert!(TransportError::Http("reset".into()).is_retryable());
        assert!(TransportError::Status(502).is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!TransportError::Malformed("eof".into()).is_retryable());
    }
}
