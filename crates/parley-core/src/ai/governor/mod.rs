//! Local rate governor
//!
//! Keeps a sliding window of request timestamps plus an exponential spacing
//! delay, and decides whether a new request may leave now. The allow/deny
//! decision is purely local; server quota headers are recorded for display
//! and for an optional [`QuotaPolicy`].

mod clock;
mod headers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::{
    parse_rate_limit_headers, parse_remaining, parse_reset, parse_retry_after, retry_after,
    ServerQuota,
};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::ConfigError;
use crate::constants;

/// Tunables for one provider's local limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_growth_factor")]
    pub backoff_growth_factor: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_window_ms() -> u64 {
    constants::rate::WINDOW_MS
}

fn default_max_requests() -> u32 {
    constants::rate::MAX_REQUESTS_PER_WINDOW
}

fn default_initial_backoff_ms() -> u64 {
    constants::rate::INITIAL_BACKOFF_MS
}

fn default_growth_factor() -> f64 {
    constants::rate::BACKOFF_GROWTH_FACTOR
}

fn default_max_backoff_ms() -> u64 {
    constants::rate::MAX_BACKOFF_MS
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests_per_window: default_max_requests(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_growth_factor: default_growth_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Reject values that would break the governor's invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_ms == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_requests_per_window == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "max_requests_per_window must be greater than zero".to_string(),
            ));
        }
        if !self.backoff_growth_factor.is_finite() || self.backoff_growth_factor < 1.0 {
            return Err(ConfigError::InvalidRateLimit(format!(
                "backoff_growth_factor must be at least 1.0 (got {})",
                self.backoff_growth_factor
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::InvalidRateLimit(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Mutable governor state, owned by one session
#[derive(Debug, Clone, PartialEq)]
pub struct RateWindowState {
    /// Ascending; entries older than the window are pruned lazily on check
    recent_request_timestamps: VecDeque<DateTime<Utc>>,
    backoff_delay_ms: u64,
    max_backoff_ms: u64,
    request_count: u64,
    server_remaining: Option<u32>,
    server_reset_at: Option<DateTime<Utc>>,
}

impl RateWindowState {
    fn initial(config: &RateLimitConfig) -> Self {
        Self {
            recent_request_timestamps: VecDeque::new(),
            backoff_delay_ms: config.initial_backoff_ms.min(config.max_backoff_ms),
            max_backoff_ms: config.max_backoff_ms,
            request_count: 0,
            server_remaining: None,
            server_reset_at: None,
        }
    }

    pub fn recent_request_timestamps(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.recent_request_timestamps.iter()
    }

    pub fn backoff_delay_ms(&self) -> u64 {
        self.backoff_delay_ms
    }

    pub fn max_backoff_ms(&self) -> u64 {
        self.max_backoff_ms
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn server_remaining(&self) -> Option<u32> {
        self.server_remaining
    }

    pub fn server_reset_at(&self) -> Option<DateTime<Utc>> {
        self.server_reset_at
    }

    fn server_quota(&self) -> Option<ServerQuota> {
        if self.server_remaining.is_none() && self.server_reset_at.is_none() {
            return None;
        }
        Some(ServerQuota {
            remaining: self.server_remaining,
            reset_at: self.server_reset_at,
        })
    }
}

/// Why a request was held back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The sliding window is at its ceiling
    WindowFull,
    /// Too soon after the previous request
    Backoff,
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Zero when allowed
    pub wait: Duration,
    pub reason: Option<DenyReason>,
}

impl RateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
            reason: None,
        }
    }

    pub fn deny(reason: DenyReason, wait_ms: u64) -> Self {
        Self {
            allowed: false,
            wait: Duration::from_millis(wait_ms),
            reason: Some(reason),
        }
    }

    pub fn wait_ms(&self) -> u64 {
        self.wait.as_millis() as u64
    }
}

/// Hook for adjusting the window ceiling from server quota
///
/// The default [`LocalOnly`] ignores the server entirely.
pub trait QuotaPolicy: Send + Sync + fmt::Debug {
    /// Effective ceiling for the current window
    fn max_requests(
        &self,
        configured: u32,
        in_window: usize,
        server: Option<ServerQuota>,
        now: DateTime<Utc>,
    ) -> u32;
}

/// Enforce only the configured local ceiling
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl QuotaPolicy for LocalOnly {
    fn max_requests(
        &self,
        configured: u32,
        _in_window: usize,
        _server: Option<ServerQuota>,
        _now: DateTime<Utc>,
    ) -> u32 {
        configured
    }
}

/// Stop short of the server's quota once it runs low
///
/// When the server reports `remaining <= threshold` and its reset time has not
/// passed, only `remaining` more requests are allowed in the current window.
#[derive(Debug, Clone, Copy)]
pub struct TightenWhenLow {
    pub threshold: u32,
}

impl QuotaPolicy for TightenWhenLow {
    fn max_requests(
        &self,
        configured: u32,
        in_window: usize,
        server: Option<ServerQuota>,
        now: DateTime<Utc>,
    ) -> u32 {
        let Some(quota) = server else {
            return configured;
        };
        let Some(remaining) = quota.remaining else {
            return configured;
        };
        let still_current = quota.reset_at.map_or(true, |reset| reset > now);
        if remaining > self.threshold || !still_current {
            return configured;
        }
        let in_window = u32::try_from(in_window).unwrap_or(u32::MAX);
        configured.min(in_window.saturating_add(remaining))
    }
}

/// Display snapshot of governor state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateSnapshot {
    pub request_count: u64,
    pub in_window: usize,
    pub window_limit: u32,
    pub backoff_delay_ms: u64,
    pub server: Option<ServerQuota>,
    /// Server quota is below [`constants::rate::QUOTA_WARNING_THRESHOLD`]
    /// and its reset time has not passed
    pub quota_low: bool,
}

impl RateSnapshot {
    /// Remaining server requests, when the quota is running low
    pub fn quota_warning(&self) -> Option<u32> {
        if !self.quota_low {
            return None;
        }
        self.server.and_then(|quota| quota.remaining)
    }
}

/// Session-scoped rate governor
#[derive(Debug)]
pub struct RateGovernor {
    config: RateLimitConfig,
    state: RateWindowState,
    policy: Box<dyn QuotaPolicy>,
}

impl RateGovernor {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_policy(config, Box::new(LocalOnly))
    }

    pub fn with_policy(config: RateLimitConfig, policy: Box<dyn QuotaPolicy>) -> Self {
        let state = RateWindowState::initial(&config);
        Self {
            config,
            state,
            policy,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn state(&self) -> &RateWindowState {
        &self.state
    }

    /// Decide whether a request may leave at `now`
    ///
    /// Prunes expired timestamps, then applies the window ceiling before the
    /// spacing delay. Does not record anything; call [`record_attempt`] once the
    /// request is actually sent.
    ///
    /// [`record_attempt`]: RateGovernor::record_attempt
    pub fn check_and_reserve(&mut self, now: DateTime<Utc>) -> RateDecision {
        self.prune(now);

        let timestamps = &self.state.recent_request_timestamps;
        let in_window = timestamps.len();
        let ceiling = self.policy.max_requests(
            self.config.max_requests_per_window,
            in_window,
            self.state.server_quota(),
            now,
        );

        if in_window >= ceiling as usize {
            let wait_ms = match timestamps.front() {
                Some(oldest) => self.config.window_ms - elapsed_ms(now, *oldest),
                None => self
                    .state
                    .server_reset_at
                    .map(|reset| elapsed_ms(reset, now))
                    .filter(|ms| *ms > 0)
                    .unwrap_or(self.config.window_ms),
            };
            debug!(in_window, ceiling, wait_ms, "Rate window full");
            return RateDecision::deny(DenyReason::WindowFull, wait_ms.max(1));
        }

        if let Some(latest) = timestamps.back() {
            let min_delay = self.state.backoff_delay_ms.min(self.state.max_backoff_ms);
            let since_last = elapsed_ms(now, *latest);
            if since_last < min_delay {
                let wait_ms = min_delay - since_last;
                debug!(min_delay, since_last, wait_ms, "Request spacing not yet elapsed");
                return RateDecision::deny(DenyReason::Backoff, wait_ms);
            }
        }

        RateDecision::allow()
    }

    /// Record a request that is about to reach the network
    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        // Keep the sequence ascending even if the clock stepped backwards
        let at = self
            .state
            .recent_request_timestamps
            .back()
            .map_or(now, |latest| now.max(*latest));
        self.state.recent_request_timestamps.push_back(at);
        self.state.request_count += 1;

        let grown = (self.state.backoff_delay_ms as f64 * self.config.backoff_growth_factor).ceil();
        let grown = if grown.is_finite() {
            grown as u64
        } else {
            u64::MAX
        };
        self.state.backoff_delay_ms = grown
            .max(self.config.initial_backoff_ms)
            .min(self.state.max_backoff_ms);

        debug!(
            request_count = self.state.request_count,
            backoff_delay_ms = self.state.backoff_delay_ms,
            "Recorded attempt"
        );
    }

    /// Check at `now` and, when allowed, record the attempt in the same step
    pub fn reserve(&mut self, now: DateTime<Utc>) -> RateDecision {
        let decision = self.check_and_reserve(now);
        if decision.allowed {
            self.record_attempt(now);
        }
        decision
    }

    /// Reset the spacing delay after a fully successful response
    pub fn record_success(&mut self) {
        self.state.backoff_delay_ms = self.config.initial_backoff_ms.min(self.state.max_backoff_ms);
    }

    /// Overwrite the server quota snapshot
    ///
    /// A response carrying neither value leaves the previous snapshot in place.
    pub fn update_from_server_headers(
        &mut self,
        remaining: Option<u32>,
        reset_at: Option<DateTime<Utc>>,
    ) {
        if remaining.is_none() && reset_at.is_none() {
            return;
        }
        self.state.server_remaining = remaining;
        self.state.server_reset_at = reset_at;
        debug!(?remaining, ?reset_at, "Server quota snapshot updated");
    }

    /// Parse quota headers from a response and record them
    pub fn observe_headers(&mut self, headers: &HeaderMap, now: DateTime<Utc>) {
        let quota = parse_rate_limit_headers(headers, now);
        self.update_from_server_headers(quota.remaining, quota.reset_at);
    }

    /// Return to the initial state ("new chat")
    pub fn reset(&mut self) {
        self.state = RateWindowState::initial(&self.config);
    }

    pub fn server_quota(&self) -> Option<ServerQuota> {
        self.state.server_quota()
    }

    /// Display snapshot; counts in-window requests without pruning
    pub fn snapshot(&self, now: DateTime<Utc>) -> RateSnapshot {
        let in_window = self
            .state
            .recent_request_timestamps
            .iter()
            .filter(|t| elapsed_ms(now, **t) < self.config.window_ms)
            .count();
        let server = self.state.server_quota();
        let quota_low = server.is_some_and(|quota| {
            let still_current = quota.reset_at.map_or(true, |reset| reset > now);
            still_current
                && quota
                    .remaining
                    .is_some_and(|left| left < constants::rate::QUOTA_WARNING_THRESHOLD)
        });
        RateSnapshot {
            request_count: self.state.request_count,
            in_window,
            window_limit: self.config.max_requests_per_window,
            backoff_delay_ms: self.state.backoff_delay_ms,
            server,
            quota_low,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.config.window_ms;
        while let Some(oldest) = self.state.recent_request_timestamps.front() {
            if elapsed_ms(now, *oldest) >= window {
                self.state.recent_request_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Milliseconds from `earlier` to `later`, zero if negative
fn elapsed_ms(later: DateTime<Utc>, earlier: DateTime<Utc>) -> u64 {
    (later - earlier).num_milliseconds().max(0) as u64
}
