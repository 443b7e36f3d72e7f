//! AI provider configuration
//!
//! Defines provider types, configurations, and the built-in provider registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use super::credentials::KeyPolicy;
use super::format::RequestShape;
use super::governor::RateLimitConfig;
use crate::constants;

/// Unique identifier for each supported provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    #[default]
    OpenRouter,
    Gemini,
    OpenAiCompatible,
}

impl ProviderId {
    pub fn all() -> &'static [ProviderId] {
        &[
            ProviderId::OpenRouter,
            ProviderId::Gemini,
            ProviderId::OpenAiCompatible,
        ]
    }

    /// Key used in config files and on the command line
    pub fn storage_key(&self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Gemini => "gemini",
            ProviderId::OpenAiCompatible => "openai_compatible",
        }
    }

    pub fn from_storage_key(key: &str) -> Option<ProviderId> {
        let key = key.trim().to_ascii_lowercase().replace('-', "_");
        Self::all()
            .iter()
            .copied()
            .find(|id| id.storage_key() == key || (key == "openai" && *id == ProviderId::OpenAiCompatible))
    }

    /// Environment variable holding this provider's API key
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderId::OpenRouter => "OPENROUTER_API_KEY",
            ProviderId::Gemini => "GEMINI_API_KEY",
            ProviderId::OpenAiCompatible => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::OpenRouter => write!(f, "OpenRouter"),
            ProviderId::Gemini => write!(f, "Google Gemini"),
            ProviderId::OpenAiCompatible => write!(f, "OpenAI-compatible"),
        }
    }
}

/// How to send the API key in requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>` header
    #[default]
    Bearer,
    /// `?key=<key>` query parameter (Gemini style)
    QueryKey,
}

/// Information about a model offered by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model ID to send in API requests
    pub id: String,
    /// Human-readable display name
    pub display_name: String,
}

impl ModelInfo {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/// Configuration for an AI provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ProviderId,
    /// Display name
    pub name: String,
    /// Short description for listings
    pub description: String,
    /// API base URL (without trailing slash)
    pub base_url: String,
    /// Endpoint path; `{model}` is replaced with the model id
    pub path: String,
    pub auth: AuthScheme,
    pub request_shape: RequestShape,
    pub key_policy: KeyPolicy,
    pub rate_limits: RateLimitConfig,
    /// Curated models (the first is the default)
    pub models: Vec<ModelInfo>,
    /// Extra headers sent with every request
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn default_model(&self) -> &str {
        self.models.first().map(|m| m.id.as_str()).unwrap_or("")
    }

    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }

    /// Display name for a model id, falling back to the id itself
    pub fn display_name_for<'a>(&'a self, model_id: &'a str) -> &'a str {
        self.models
            .iter()
            .find(|m| m.id == model_id)
            .map(|m| m.display_name.as_str())
            .unwrap_or(model_id)
    }
}

fn app_headers() -> HashMap<String, String> {
    HashMap::from([
        (
            "HTTP-Referer".to_string(),
            constants::http::APP_REFERER.to_string(),
        ),
        ("X-Title".to_string(), constants::http::APP_TITLE.to_string()),
    ])
}

/// Lazily initialized built-in provider configurations
static BUILTIN_PROVIDERS: LazyLock<Vec<ProviderConfig>> = LazyLock::new(|| {
    vec![
        ProviderConfig {
            id: ProviderId::OpenRouter,
            name: "OpenRouter".to_string(),
            description: "Many vendors behind one OpenAI-style endpoint".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            path: "/chat/completions".to_string(),
            auth: AuthScheme::Bearer,
            request_shape: RequestShape::ChatMessages,
            key_policy: KeyPolicy::new("sk-or-v1-", 73),
            rate_limits: RateLimitConfig::default(),
            models: vec![
                ModelInfo::new("anthropic/claude-3-haiku", "Claude 3 Haiku"),
                ModelInfo::new("anthropic/claude-3-sonnet", "Claude 3 Sonnet"),
                ModelInfo::new("openai/gpt-4", "GPT-4"),
                ModelInfo::new("openai/gpt-3.5-turbo", "GPT-3.5 Turbo"),
                ModelInfo::new("meta-llama/llama-3-70b-instruct", "Llama 3 70B"),
                ModelInfo::new("google/gemini-pro", "Gemini Pro"),
            ],
            custom_headers: app_headers(),
        },
        ProviderConfig {
            id: ProviderId::Gemini,
            name: "Google Gemini".to_string(),
            description: "Gemini generateContent API".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            path: "/models/{model}:generateContent".to_string(),
            auth: AuthScheme::QueryKey,
            request_shape: RequestShape::PromptTranscript,
            key_policy: KeyPolicy::new("AIza", 39),
            rate_limits: RateLimitConfig {
                max_requests_per_window: 15,
                ..RateLimitConfig::default()
            },
            models: vec![
                ModelInfo::new("gemini-1.5-flash", "Gemini 1.5 Flash"),
                ModelInfo::new("gemini-1.5-pro", "Gemini 1.5 Pro"),
                ModelInfo::new("gemini-2.0-flash", "Gemini 2.0 Flash"),
            ],
            custom_headers: HashMap::new(),
        },
        ProviderConfig {
            id: ProviderId::OpenAiCompatible,
            name: "OpenAI-compatible".to_string(),
            description: "OpenAI chat/completions or any compatible server".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            path: "/chat/completions".to_string(),
            auth: AuthScheme::Bearer,
            request_shape: RequestShape::ChatMessages,
            key_policy: KeyPolicy::new("sk-", 20),
            rate_limits: RateLimitConfig::default(),
            models: vec![
                ModelInfo::new("gpt-4o-mini", "GPT-4o mini"),
                ModelInfo::new("gpt-4o", "GPT-4o"),
                ModelInfo::new("gpt-4-turbo", "GPT-4 Turbo"),
            ],
            custom_headers: HashMap::new(),
        },
    ]
});

/// Get all built-in providers
pub fn builtin_providers() -> &'static [ProviderConfig] {
    &BUILTIN_PROVIDERS
}

/// Get a provider by ID
pub fn get_provider(id: ProviderId) -> Option<&'static ProviderConfig> {
    BUILTIN_PROVIDERS.iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_id_has_a_provider() {
        for id in ProviderId::all() {
            let provider = get_provider(*id).unwrap();
            assert!(!provider.models.is_empty());
            assert!(!provider.default_model().is_empty());
            assert!(provider.rate_limits.validate().is_ok());
        }
    }

    #[test]
    fn test_openrouter_defaults() {
        let provider = get_provider(ProviderId::OpenRouter).unwrap();
        assert_eq!(provider.default_model(), "anthropic/claude-3-haiku");
        assert_eq!(provider.key_policy.required_prefix.as_deref(), Some("sk-or-v1-"));
        assert_eq!(provider.custom_headers.get("X-Title").map(String::as_str), Some("Parley Chat"));
        assert_eq!(provider.rate_limits.max_requests_per_window, 20);
    }

    #[test]
    fn test_gemini_uses_transcript_and_query_key() {
        let provider = get_provider(ProviderId::Gemini).unwrap();
        assert_eq!(provider.request_shape, RequestShape::PromptTranscript);
        assert_eq!(provider.auth, AuthScheme::QueryKey);
        assert!(provider.path.contains("{model}"));
        assert_eq!(provider.rate_limits.max_requests_per_window, 15);
    }

    #[test]
    fn test_display_name_for() {
        let provider = get_provider(ProviderId::OpenRouter).unwrap();
        assert_eq!(provider.display_name_for("openai/gpt-4"), "GPT-4");
        assert_eq!(provider.display_name_for("mistral/custom"), "mistral/custom");
    }

    #[test]
    fn test_from_storage_key() {
        assert_eq!(ProviderId::from_storage_key("Gemini"), Some(ProviderId::Gemini));
        assert_eq!(
            ProviderId::from_storage_key("openai-compatible"),
            Some(ProviderId::OpenAiCompatible)
        );
        assert_eq!(ProviderId::from_storage_key("openai"), Some(ProviderId::OpenAiCompatible));
        assert_eq!(ProviderId::from_storage_key("anthropic"), None);
    }
}
