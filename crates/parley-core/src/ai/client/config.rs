//! Completion client configuration

use std::collections::HashMap;
use thiserror::Error;
use url::Url;

use crate::ai::credentials::KeyPolicy;
use crate::ai::format::{RequestOptions, RequestShape};
use crate::ai::governor::RateLimitConfig;
use crate::ai::providers::{AuthScheme, ProviderConfig, ProviderId};

/// Errors raised while (re)configuring a client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid model id '{0}'")]
    InvalidModel(String),

    #[error("invalid endpoint URL '{url}'")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Everything a [`CompletionClient`](super::CompletionClient) needs to talk to one endpoint
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub provider_id: ProviderId,
    /// Display name used in messages
    pub provider_name: String,
    /// Model ID to use for API calls
    pub model: String,
    /// API base URL (trailing slash tolerated)
    pub base_url: String,
    /// Endpoint path, `{model}` substituted
    pub path: String,
    pub auth: AuthScheme,
    pub request_shape: RequestShape,
    pub key_policy: KeyPolicy,
    pub rate_limits: RateLimitConfig,
    pub options: RequestOptions,
    /// System instructions; empty means the default prompt
    pub instructions: String,
    /// Custom headers to send with requests
    pub custom_headers: HashMap<String, String>,
}

impl ClientConfig {
    /// Defaults for a built-in provider, using its first model
    pub fn for_provider(provider: &ProviderConfig) -> Self {
        Self {
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            model: provider.default_model().to_string(),
            base_url: provider.base_url.clone(),
            path: provider.path.clone(),
            auth: provider.auth,
            request_shape: provider.request_shape,
            key_policy: provider.key_policy.clone(),
            rate_limits: provider.rate_limits.clone(),
            options: RequestOptions::default(),
            instructions: String::new(),
            custom_headers: provider.custom_headers.clone(),
        }
    }

    /// Endpoint URL for `model`, without credentials
    pub fn api_url(&self, model: &str) -> Result<Url, ClientError> {
        validate_model_id(model)?;
        let url = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.path.replace("{model}", model)
        );
        Url::parse(&url).map_err(|source| ClientError::InvalidEndpoint { url, source })
    }
}

/// Model ids end up in URL paths and request bodies
pub fn validate_model_id(model: &str) -> Result<(), ClientError> {
    let bad = model.is_empty()
        || model
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '?' | '#' | '%'));
    if bad {
        return Err(ClientError::InvalidModel(model.to_string()));
    }
    Ok(())
}

/// Render a URL for logs: scheme, host, and path only
pub fn redact_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.set_fragment(None);
    shown.to_string()
}
