//! Provider error normalization
//!
//! Maps failed HTTP responses and transport failures from any provider into a
//! single error taxonomy with a user-actionable message. Normalization never
//! fails; every input produces a [`NormalizedError`].

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::client::config::redact_url;
use super::governor::{parse_reset, retry_after};
use crate::constants;

/// Every way a send can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidCredential,
    /// The local governor held the request back
    RateLimitedLocal,
    /// HTTP 429 from the provider
    RateLimitedRemote,
    /// HTTP 401/403
    AuthRejected,
    /// HTTP 402
    InsufficientQuota,
    /// HTTP 400
    BadRequest,
    /// HTTP 5xx
    ServerError,
    /// Transport-level failure (DNS, connect, timeout)
    Network,
    /// 2xx with no usable completion text
    MalformedResponse,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidCredential => "invalid_credential",
            ErrorKind::RateLimitedLocal => "rate_limited_local",
            ErrorKind::RateLimitedRemote => "rate_limited_remote",
            ErrorKind::AuthRejected => "auth_rejected",
            ErrorKind::InsufficientQuota => "insufficient_quota",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Network => "network",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A classified failure, produced once per failed attempt
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub message: String,
    /// Informational only; failures are never retried automatically
    pub retriable: bool,
    /// Server-suggested wait, when one was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,
    /// Raw response or failure detail for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_payload: Option<Value>,
}

impl NormalizedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retriable,
            retry_after: None,
            debug_payload: None,
        }
    }

    fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.debug_payload = payload;
        self
    }

    fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Credential rejected before any network activity
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCredential, message, false)
    }

    /// Local governor denial
    pub fn rate_limited_local(wait: Duration) -> Self {
        let secs = wait.as_millis().div_ceil(1000).max(1);
        let unit = if secs == 1 { "second" } else { "seconds" };
        Self::new(
            ErrorKind::RateLimitedLocal,
            format!(
                "Please wait {} {} before sending another message.",
                secs, unit
            ),
            true,
        )
        .with_retry_after(Some(wait))
    }

    /// 2xx response without usable completion text
    pub fn malformed_response(detail: &str, payload: Option<Value>) -> Self {
        Self::new(
            ErrorKind::MalformedResponse,
            format!("Invalid response format from API: {}", detail),
            false,
        )
        .with_payload(payload)
    }
}

/// Turns provider failures into [`NormalizedError`]s
#[derive(Debug, Clone)]
pub struct ErrorNormalizer {
    provider_name: String,
}

impl ErrorNormalizer {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Classify a non-2xx HTTP response
    ///
    /// Detail text comes from the body's `error.message` when it is JSON,
    /// otherwise the raw body, otherwise the status line. Wait hints are
    /// measured from `now`.
    pub fn from_http_failure(
        &self,
        status: u16,
        body: Option<&str>,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> NormalizedError {
        let parsed: Option<Value> = body
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .and_then(|b| serde_json::from_str(b).ok());
        let detail = parsed
            .as_ref()
            .and_then(extract_error_message)
            .or_else(|| body.map(str::trim).filter(|b| !b.is_empty()).map(String::from))
            .map(|d| truncate(&d, constants::ai::ERROR_DETAIL_MAX_CHARS))
            .unwrap_or_else(|| status_line(status));

        let payload = parsed.or_else(|| {
            body.map(|raw| serde_json::json!({ "status": status, "raw": raw }))
        });
        let provider = &self.provider_name;

        let (kind, message, retriable) = match status {
            429 => (
                ErrorKind::RateLimitedRemote,
                self.remote_rate_limit_message(&detail, headers, now),
                true,
            ),
            401 => (
                ErrorKind::AuthRejected,
                format!(
                    "Invalid API key ({}). Please check your {} API key.",
                    detail, provider
                ),
                false,
            ),
            403 => (
                ErrorKind::AuthRejected,
                format!(
                    "Access denied ({}). Check that your {} API key has access to this model.",
                    detail, provider
                ),
                false,
            ),
            402 => (
                ErrorKind::InsufficientQuota,
                format!(
                    "Insufficient credits ({}). Please check your {} account balance.",
                    detail, provider
                ),
                false,
            ),
            400 => (
                ErrorKind::BadRequest,
                format!("Bad request: {}", detail),
                false,
            ),
            500..=599 => (
                ErrorKind::ServerError,
                format!(
                    "{} server error ({}): {}. The service may be temporarily unavailable.",
                    provider, status, detail
                ),
                true,
            ),
            _ => (
                ErrorKind::Unknown,
                format!("API error ({}): {}", status, detail),
                false,
            ),
        };

        NormalizedError::new(kind, message, retriable)
            .with_payload(payload)
            .with_retry_after(retry_after(headers, now))
    }

    /// Classify an error envelope delivered with a 2xx status
    ///
    /// A numeric `error.code` goes through the status table; anything else is
    /// reported as unknown.
    pub fn from_error_body(
        &self,
        code: Option<u16>,
        message: &str,
        body: &str,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> NormalizedError {
        match code.filter(|c| *c >= 400) {
            Some(status) => self.from_http_failure(status, Some(body), headers, now),
            None => NormalizedError::new(
                ErrorKind::Unknown,
                format!(
                    "API error: {}",
                    truncate(message, constants::ai::ERROR_DETAIL_MAX_CHARS)
                ),
                false,
            )
            .with_payload(serde_json::from_str(body).ok()),
        }
    }

    /// Classify a failure below HTTP (DNS, connect, TLS, timeout, body read)
    pub fn from_transport_failure(
        &self,
        error: &(dyn std::error::Error + 'static),
    ) -> NormalizedError {
        let chain = error_chain(error);
        let network = is_network_failure(error, &chain);
        let payload = Some(serde_json::json!({ "transport": chain }));

        if network {
            NormalizedError::new(
                ErrorKind::Network,
                format!(
                    "Network error: could not reach {} ({}). Check your connection and try again.",
                    self.provider_name, chain
                ),
                true,
            )
            .with_payload(payload)
        } else {
            NormalizedError::new(
                ErrorKind::Unknown,
                format!("Request to {} failed: {}", self.provider_name, chain),
                false,
            )
            .with_payload(payload)
        }
    }

    fn remote_rate_limit_message(
        &self,
        detail: &str,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> String {
        if let Some(wait) = retry_after(headers, now) {
            let secs = wait.as_secs().max(1);
            return format!(
                "Rate limit exceeded ({}). Please wait {} seconds before trying again.",
                detail, secs
            );
        }

        let minutes = parse_reset(headers, now)
            .map(|reset| {
                let secs = (reset - now).num_seconds().max(0);
                (secs + 59) / 60
            })
            .filter(|m| *m > 0)
            .unwrap_or(constants::rate::DEFAULT_REMOTE_WAIT_MINUTES);
        let unit = if minutes == 1 { "minute" } else { "minutes" };
        format!(
            "Rate limit exceeded ({}). Please wait {} {} before trying again.",
            detail, minutes, unit
        )
    }
}

/// Pull a human-readable message out of a provider error body
///
/// Handles `{"error": {"message": ...}}` (OpenAI, OpenRouter, Gemini),
/// `{"error": "..."}`, and `{"message": ...}`.
pub fn extract_error_message(body: &Value) -> Option<String> {
    let error = body.get("error");
    error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .or_else(|| error.and_then(Value::as_str))
        .or_else(|| body.get("message").and_then(Value::as_str))
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
}

/// Numeric `error.code` from a provider error body, if any
pub fn extract_error_code(body: &Value) -> Option<u16> {
    let code = body.get("error")?.get("code")?;
    code.as_u64()
        .and_then(|c| u16::try_from(c).ok())
        .or_else(|| code.as_str().and_then(|s| s.parse().ok()))
}

fn status_line(status: u16) -> String {
    match StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("{} {}", status, reason),
        None => format!("HTTP {}", status),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut)
}

/// Display text of an error and its sources, with URL query strings removed
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![redact_urls(&error.to_string())];
    let mut source = error.source();
    while let Some(cause) = source {
        let text = redact_urls(&cause.to_string());
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

/// Strip the query and fragment from every http(s) URL in `text`
fn redact_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let start = [rest.find("http://"), rest.find("https://")]
            .into_iter()
            .flatten()
            .min();
        let Some(start) = start else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail
            .find(|c: char| c.is_whitespace() || matches!(c, ')' | '"' | '\'' | '>'))
            .unwrap_or(tail.len());
        let candidate = &tail[..end];
        match Url::parse(candidate) {
            Ok(url) => out.push_str(&redact_url(&url)),
            Err(_) => {
                let kept = candidate
                    .find(|c: char| c == '?' || c == '#')
                    .unwrap_or(candidate.len());
                out.push_str(&candidate[..kept]);
            }
        }
        rest = &tail[end..];
    }
}

fn is_network_failure(error: &(dyn std::error::Error + 'static), chain: &str) -> bool {
    const NETWORK_HINTS: &[&str] = &[
        "dns",
        "resolve",
        "lookup",
        "connect",
        "connection",
        "timed out",
        "timeout",
        "unreachable",
        "network",
        "failed to fetch",
        "broken pipe",
        "tls",
        "certificate",
    ];

    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(req) = err.downcast_ref::<reqwest::Error>() {
            if req.is_timeout() || req.is_connect() {
                return true;
            }
        }
        current = err.source();
    }

    let lowered = chain.to_lowercase();
    NETWORK_HINTS.iter().any(|hint| lowered.contains(hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn normalizer() -> ErrorNormalizer {
        ErrorNormalizer::new("OpenRouter")
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct FakeFailure(String);

    #[test]
    fn test_401_is_auth_rejected_with_detail() {
        let err = normalizer().from_http_failure(
            401,
            Some(r#"{"error":{"message":"bad key"}}"#),
            &HeaderMap::new(),
            now(),
        );
        assert_eq!(err.kind, ErrorKind::AuthRejected);
        assert!(!err.retriable);
        assert!(err.message.contains("bad key"));
        assert!(err.message.contains("OpenRouter"));
        assert!(err.debug_payload.is_some());
    }

    #[test]
    fn test_error_body_with_status() {
        let body = r#"{"error":{"code":402,"message":"Insufficient credits"}}"#;
        let err = normalizer().from_error_body(
            Some(402),
            "Insufficient credits",
            body,
            &HeaderMap::new(),
            now(),
        );
        assert_eq!(err.kind, ErrorKind::InsufficientQuota);

        let body = r#"{"error":"upstream hiccup"}"#;
        let err =
            normalizer().from_error_body(None, "upstream hiccup", body, &HeaderMap::new(), now());
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.message.contains("upstream hiccup"));
    }

    #[test]
    fn test_429_always_retriable() {
        for body in [None, Some(""), Some("slow down"), Some(r#"{"error":{"message":"x"}}"#)] {
            let err = normalizer().from_http_failure(429, body, &HeaderMap::new(), now());
            assert_eq!(err.kind, ErrorKind::RateLimitedRemote);
            assert!(err.retriable);
        }
    }

    #[test]
    fn test_429_default_wait_minutes() {
        let err = normalizer().from_http_failure(429, None, &HeaderMap::new(), now());
        assert!(err.message.contains("5 minutes"), "{}", err.message);
    }

    #[test]
    fn test_429_retry_after_hint() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("12"));
        let err = normalizer().from_http_failure(429, None, &headers, now());
        assert_eq!(err.retry_after, Some(Duration::from_secs(12)));
        assert!(err.message.contains("12 seconds"));
    }

    #[test]
    fn test_429_reset_minutes_measured_from_given_now() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000150"));
        let err = normalizer().from_http_failure(429, None, &headers, now());
        assert!(err.message.contains("3 minutes"), "{}", err.message);

        let later = now() + chrono::Duration::seconds(100);
        let err = normalizer().from_http_failure(429, None, &headers, later);
        assert!(err.message.contains("1 minute "), "{}", err.message);
    }

    #[test]
    fn test_status_table() {
        let cases = [
            (400, ErrorKind::BadRequest, false),
            (402, ErrorKind::InsufficientQuota, false),
            (403, ErrorKind::AuthRejected, false),
            (404, ErrorKind::Unknown, false),
            (500, ErrorKind::ServerError, true),
            (503, ErrorKind::ServerError, true),
            (418, ErrorKind::Unknown, false),
        ];
        for (status, kind, retriable) in cases {
            let err = normalizer().from_http_failure(status, None, &HeaderMap::new(), now());
            assert_eq!(err.kind, kind, "status {}", status);
            assert_eq!(err.retriable, retriable, "status {}", status);
        }
    }

    #[test]
    fn test_detail_falls_back_to_raw_body_then_status_line() {
        let err = normalizer().from_http_failure(
            400,
            Some("model field required"),
            &HeaderMap::new(),
            now(),
        );
        assert!(err.message.contains("model field required"));

        let err = normalizer().from_http_failure(400, None, &HeaderMap::new(), now());
        assert!(err.message.contains("400 Bad Request"));
    }

    #[test]
    fn test_alternate_error_body_shapes() {
        let body: Value = serde_json::json!({"error": "quota gone"});
        assert_eq!(extract_error_message(&body).as_deref(), Some("quota gone"));
        let body: Value = serde_json::json!({"message": "nope"});
        assert_eq!(extract_error_message(&body).as_deref(), Some("nope"));
        let body: Value = serde_json::json!({"error": {"code": 429, "message": "busy"}});
        assert_eq!(extract_error_code(&body), Some(429));
        let body: Value = serde_json::json!({"error": {"code": "502"}});
        assert_eq!(extract_error_code(&body), Some(502));
    }

    #[test]
    fn test_long_detail_truncated() {
        let long = "x".repeat(1000);
        let err = normalizer().from_http_failure(500, Some(&long), &HeaderMap::new(), now());
        assert!(err.message.len() < 600);
    }

    #[test]
    fn test_transport_failure_network_heuristics() {
        let failure = FakeFailure("error sending request: dns error: failed to lookup address".into());
        let err = normalizer().from_transport_failure(&failure);
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(err.retriable);

        let failure = FakeFailure("Connection refused (os error 111)".into());
        assert_eq!(normalizer().from_transport_failure(&failure).kind, ErrorKind::Network);
    }

    #[test]
    fn test_transport_failure_strips_url_queries() {
        let failure = FakeFailure(
            "error sending request for url (https://example.test/v1/models/m:generateContent?key=AIzaSecret): connection refused"
                .into(),
        );
        let err = normalizer().from_transport_failure(&failure);
        assert_eq!(err.kind, ErrorKind::Network);
        assert!(!err.message.contains("AIzaSecret"), "{}", err.message);
        assert!(err.message.contains("https://example.test/v1/models/m:generateContent)"));
        let payload = err.debug_payload.unwrap().to_string();
        assert!(!payload.contains("AIzaSecret"));
    }

    #[test]
    fn test_redact_urls_leaves_plain_text() {
        assert_eq!(redact_urls("no urls here?"), "no urls here?");
        assert_eq!(
            redact_urls("at http://a.test/x?k=1 and https://b.test/y#frag done"),
            "at http://a.test/x and https://b.test/y done"
        );
    }

    #[test]
    fn test_transport_failure_unclassified() {
        let failure = FakeFailure("builder error: relative URL without a base".into());
        let err = normalizer().from_transport_failure(&failure);
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(!err.retriable);
    }

    #[test]
    fn test_local_rate_limit_message_rounds_up() {
        let err = NormalizedError::rate_limited_local(Duration::from_millis(1_200));
        assert_eq!(err.kind, ErrorKind::RateLimitedLocal);
        assert!(err.message.contains("2 seconds"));
        let err = NormalizedError::rate_limited_local(Duration::from_millis(300));
        assert!(err.message.contains("1 second "));
    }
}
