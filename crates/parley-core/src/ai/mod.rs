//! AI provider layer
//!
//! Governs outbound completion requests to OpenRouter, Gemini, and other
//! OpenAI-compatible endpoints. Supports two request shapes: a flat
//! role/content message list and a single prompt with an embedded transcript.

// Leaf components
pub mod credentials;
pub mod errors;
pub mod governor;
pub mod types;

// Provider-specific configuration
pub mod format;
pub mod providers;

// Orchestration
pub mod client;

pub use client::{ClientConfig, CompletionClient};
