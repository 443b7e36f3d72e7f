//! HTTP transport seam
//!
//! The client hands a fully built request to a [`Transport`] and gets back
//! status, headers, and the raw body text. Non-2xx statuses are responses,
//! not errors; only failures below HTTP become a [`TransportError`].

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::constants;

/// One outbound POST
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Value,
}

/// What came back, whatever the status
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "request timed out"),
            TransportErrorKind::Connect => write!(f, "connection failed"),
            TransportErrorKind::Request => write!(f, "request failed"),
            TransportErrorKind::Body => write!(f, "failed to read response body"),
        }
    }
}

/// A failure below HTTP
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    pub fn new(
        kind: TransportErrorKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// Wrap a reqwest failure, dropping the URL it carries
    ///
    /// Query-key providers put the credential in the URL.
    fn from_reqwest(err: reqwest::Error, reading_body: bool) -> Self {
        let err = err.without_url();
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if reading_body || err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Request
        };
        Self::new(kind, err)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport over a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: Self::create_http_client(),
        }
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    fn create_http_client() -> Client {
        Client::builder()
            .user_agent(constants::http::USER_AGENT)
            .connect_timeout(constants::http::CONNECT_TIMEOUT)
            .timeout(constants::http::REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client: {}. Using default client.", e);
                Client::new()
            })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self
            .http
            .post(request.url)
            .headers(request.headers)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, false))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, true))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
