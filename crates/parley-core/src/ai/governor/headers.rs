//! Server rate-limit header parsing
//!
//! Providers report quota through a handful of header spellings. None of them
//! are required; anything unparsable is treated as absent.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REMAINING_HEADERS: &[&str] = &["x-ratelimit-remaining", "x-ratelimit-remaining-requests"];
const RESET_HEADERS: &[&str] = &["x-ratelimit-reset", "x-ratelimit-reset-requests"];

/// Values at or above this are epoch milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;
/// Values below this are seconds from now rather than an epoch timestamp
const EPOCH_SECONDS_THRESHOLD: f64 = 1e9;

/// Last-known server-side quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerQuota {
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

fn header_str<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name)?.to_str().ok())
        .map(str::trim)
}

/// Parse the remaining-request count, if reported
pub fn parse_remaining(headers: &HeaderMap) -> Option<u32> {
    header_str(headers, REMAINING_HEADERS)?.parse().ok()
}

/// Parse the reset time, if reported
///
/// Accepts epoch seconds, epoch milliseconds, or seconds relative to `now`.
pub fn parse_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value: f64 = header_str(headers, RESET_HEADERS)?.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    if value >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value as i64).single()
    } else if value >= EPOCH_SECONDS_THRESHOLD {
        Utc.timestamp_opt(value as i64, 0).single()
    } else {
        let delta = chrono::Duration::milliseconds((value * 1000.0) as i64);
        now.checked_add_signed(delta)
    }
}

/// Parse both quota headers
pub fn parse_rate_limit_headers(headers: &HeaderMap, now: DateTime<Utc>) -> ServerQuota {
    ServerQuota {
        remaining: parse_remaining(headers),
        reset_at: parse_reset(headers, now),
    }
}

/// Parse Retry-After header value
///
/// The header can be either:
/// - A number of seconds (e.g., "120")
/// - An HTTP date (e.g., "Wed, 21 Oct 2015 07:28:00 GMT"), measured from `now`
pub fn parse_retry_after(header_value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let header_value = header_value.trim();

    // Try parsing as seconds first
    if let Ok(seconds) = header_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // Try parsing as HTTP date
    if let Ok(date) = httpdate::parse_http_date(header_value) {
        let date = DateTime::<Utc>::from(date);
        if let Ok(duration) = (date - now).to_std() {
            return Some(duration);
        }
    }

    None
}

/// Read and parse the Retry-After header
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()
        .and_then(|value| parse_retry_after(value, now))
}
