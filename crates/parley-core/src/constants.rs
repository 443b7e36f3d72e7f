//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// HTTP client configuration
pub mod http {
    use super::*;

    /// Connection timeout for HTTP requests
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Whole-request timeout. Completions are not streamed, so this covers generation time.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    /// User agent sent with every request
    pub const USER_AGENT: &str = "Parley/0.1";

    /// App title reported to aggregators that attribute traffic (OpenRouter)
    pub const APP_TITLE: &str = "Parley Chat";

    /// Referer reported to aggregators that attribute traffic (OpenRouter)
    pub const APP_REFERER: &str = "https://github.com/parley-chat/parley";
}

/// AI/LLM configuration
pub mod ai {
    /// System prompt used when the user leaves instructions empty
    pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

    /// Sampling temperature
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    /// Output token cap per completion
    pub const MAX_OUTPUT_TOKENS: u32 = 1500;

    /// Characters of the first user message shown as the conversation title
    pub const TITLE_PREVIEW_CHARS: usize = 30;

    /// Cap on provider-supplied text interpolated into error messages
    pub const ERROR_DETAIL_MAX_CHARS: usize = 300;
}

/// Rate governor defaults
pub mod rate {
    /// Sliding window length
    pub const WINDOW_MS: u64 = 60_000;

    /// Requests allowed inside one window
    pub const MAX_REQUESTS_PER_WINDOW: u32 = 20;

    /// Minimum spacing between requests after a success
    pub const INITIAL_BACKOFF_MS: u64 = 2_000;

    /// Multiplier applied to the spacing after every sent attempt
    pub const BACKOFF_GROWTH_FACTOR: f64 = 1.5;

    /// Upper bound on the spacing
    pub const MAX_BACKOFF_MS: u64 = 30_000;

    /// Wait suggested for a remote 429 when the server gives no reset time
    pub const DEFAULT_REMOTE_WAIT_MINUTES: i64 = 5;

    /// Server-reported remaining requests below which the session warns
    pub const QUOTA_WARNING_THRESHOLD: u32 = 5;
}

/// UI configuration
pub mod ui {
    /// Config directory name
    pub const CONFIG_DIR_NAME: &str = ".parley";

    /// Config file name inside the config directory
    pub const CONFIG_FILE_NAME: &str = "config.toml";
}
