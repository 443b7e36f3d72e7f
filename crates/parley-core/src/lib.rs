//! Parley Core - Outbound request governor for LLM chat clients
//!
//! This crate provides everything a chat front-end needs short of rendering:
//! - API key format validation
//! - Local sliding-window rate limiting with exponential backoff
//! - Normalization of provider error responses into one taxonomy
//! - Request building for multiple provider wire shapes
//! - A single-flight completion client tying it all together

pub mod ai;
pub mod config;
pub mod constants;
pub mod paths;

// Re-exports for convenience
pub use ai::client::{ClientConfig, ClientState, CompletionClient, SendOutcome, SessionView};
pub use ai::credentials::{CredentialValidator, CredentialVerdict, KeyPolicy, ReasonCode};
pub use ai::errors::{ErrorKind, ErrorNormalizer, NormalizedError};
pub use ai::format::{ChatRequestBuilder, RequestShape};
pub use ai::governor::{
    Clock, LocalOnly, ManualClock, QuotaPolicy, RateDecision, RateGovernor, RateLimitConfig,
    RateSnapshot, SystemClock, TightenWhenLow,
};
pub use ai::providers::{ProviderConfig, ProviderId};
pub use ai::types::{Conversation, ConversationTurn, Role};
pub use config::{ConfigError, Settings};
