//! User settings
//!
//! Loaded from `~/.parley/config.toml` (or an explicit path). Every field is
//! optional and layered over the chosen provider's defaults. API keys never
//! come from this file; they are read from an environment variable.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::ai::client::{ClientConfig, ClientError};
use crate::ai::format::RequestShape;
use crate::ai::providers::{get_provider, ProviderId};
use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid rate limit settings: {0}")]
    InvalidRateLimit(String),

    #[error("unknown provider '{0}' (expected one of: openrouter, gemini, openai_compatible)")]
    UnknownProvider(String),

    #[error("invalid base URL '{url}'")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("API keys must not be stored in the config file; set the {env} environment variable instead")]
    ApiKeyInFile { env: String },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Partial override of a provider's rate limits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitOverrides {
    pub window_ms: Option<u64>,
    pub max_requests_per_window: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub backoff_growth_factor: Option<f64>,
    pub max_backoff_ms: Option<u64>,
}

/// Partial override of a provider's key policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialOverrides {
    /// An empty string removes the prefix requirement
    pub required_prefix: Option<String>,
    pub min_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub request_shape: Option<RequestShape>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitOverrides,
    #[serde(default)]
    pub credentials: CredentialOverrides,
}

fn default_provider() -> String {
    ProviderId::default().storage_key().to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            instructions: None,
            base_url: None,
            request_shape: None,
            temperature: None,
            max_tokens: None,
            api_key_env: None,
            rate_limit: RateLimitOverrides::default(),
            credentials: CredentialOverrides::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(text)?;
        if table.contains_key("api_key") {
            let provisional = Self {
                provider: table
                    .get("provider")
                    .and_then(toml::Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(default_provider),
                api_key_env: table
                    .get("api_key_env")
                    .and_then(toml::Value::as_str)
                    .map(String::from),
                ..Self::default()
            };
            return Err(ConfigError::ApiKeyInFile {
                env: provisional.api_key_env_name()?,
            });
        }
        Ok(toml::Value::Table(table).try_into()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&text)?;
        info!(path = %path.display(), provider = %settings.provider, "Loaded settings");
        Ok(settings)
    }

    /// Load `~/.parley/config.toml`, or defaults when it does not exist
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    pub fn provider_id(&self) -> Result<ProviderId, ConfigError> {
        ProviderId::from_storage_key(&self.provider)
            .ok_or_else(|| ConfigError::UnknownProvider(self.provider.clone()))
    }

    pub fn api_key_env_name(&self) -> Result<String, ConfigError> {
        match &self.api_key_env {
            Some(name) if !name.trim().is_empty() => Ok(name.trim().to_string()),
            _ => Ok(self.provider_id()?.default_api_key_env().to_string()),
        }
    }

    /// The API key from the configured environment variable, if set
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        let name = self.api_key_env_name()?;
        Ok(std::env::var(&name).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Merge these settings over the provider defaults
    pub fn into_client_config(&self) -> Result<ClientConfig, ConfigError> {
        let provider_id = self.provider_id()?;
        let provider =
            get_provider(provider_id).ok_or_else(|| ConfigError::UnknownProvider(self.provider.clone()))?;
        let mut config = ClientConfig::for_provider(provider);

        if let Some(model) = self.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            config.model = model.to_string();
        }
        if let Some(instructions) = &self.instructions {
            config.instructions = instructions.trim().to_string();
        }
        if let Some(base_url) = &self.base_url {
            Url::parse(base_url).map_err(|source| ConfigError::InvalidBaseUrl {
                url: base_url.clone(),
                source,
            })?;
            config.base_url = base_url.clone();
        }
        if let Some(shape) = self.request_shape {
            config.request_shape = shape;
        }
        if let Some(temperature) = self.temperature {
            config.options.temperature = Some(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            config.options.max_tokens = max_tokens;
        }

        let limits = &mut config.rate_limits;
        let overrides = &self.rate_limit;
        if let Some(v) = overrides.window_ms {
            limits.window_ms = v;
        }
        if let Some(v) = overrides.max_requests_per_window {
            limits.max_requests_per_window = v;
        }
        if let Some(v) = overrides.initial_backoff_ms {
            limits.initial_backoff_ms = v;
        }
        if let Some(v) = overrides.backoff_growth_factor {
            limits.backoff_growth_factor = v;
        }
        if let Some(v) = overrides.max_backoff_ms {
            limits.max_backoff_ms = v;
        }
        config.rate_limits.validate()?;

        if let Some(prefix) = &self.credentials.required_prefix {
            config.key_policy.required_prefix = Some(prefix.clone()).filter(|p| !p.is_empty());
        }
        if let Some(min_length) = self.credentials.min_length {
            config.key_policy.min_length = min_length;
        }

        config.api_url(&config.model)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::providers::AuthScheme;
    use std::io::Write;

    #[test]
    fn test_defaults_resolve_to_openrouter() {
        let config = Settings::default().into_client_config().unwrap();
        assert_eq!(config.provider_id, ProviderId::OpenRouter);
        assert_eq!(config.model, "anthropic/claude-3-haiku");
        assert_eq!(config.rate_limits.max_requests_per_window, 20);
        assert_eq!(config.options.max_tokens, 1500);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Settings::from_toml_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_load_from_path_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
provider = "gemini"
model = "gemini-1.5-pro"
instructions = "Be concise."
temperature = 0.2

[rate_limit]
max_requests_per_window = 5
initial_backoff_ms = 4000

[credentials]
min_length = 10
"#
        )
        .unwrap();

        let settings = Settings::load_from_path(file.path()).unwrap();
        let config = settings.into_client_config().unwrap();
        assert_eq!(config.provider_id, ProviderId::Gemini);
        assert_eq!(config.auth, AuthScheme::QueryKey);
        assert_eq!(config.request_shape, RequestShape::PromptTranscript);
        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.instructions, "Be concise.");
        assert_eq!(config.options.temperature, Some(0.2));
        assert_eq!(config.rate_limits.max_requests_per_window, 5);
        assert_eq!(config.rate_limits.initial_backoff_ms, 4000);
        assert_eq!(config.rate_limits.window_ms, 60_000);
        assert_eq!(config.key_policy.min_length, 10);
        assert_eq!(config.key_policy.required_prefix.as_deref(), Some("AIza"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load_from_path(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_api_key_in_file_is_rejected() {
        let err = Settings::from_toml_str("api_key = \"sk-or-v1-abc\"").unwrap_err();
        match err {
            ConfigError::ApiKeyInFile { env } => assert_eq!(env, "OPENROUTER_API_KEY"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_fields_and_providers() {
        assert!(matches!(
            Settings::from_toml_str("colour = \"blue\""),
            Err(ConfigError::Parse(_))
        ));
        let settings = Settings::from_toml_str("provider = \"anthropic\"").unwrap();
        assert!(matches!(
            settings.into_client_config(),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_invalid_rate_limits_rejected() {
        let settings = Settings::from_toml_str("[rate_limit]\nbackoff_growth_factor = 0.5").unwrap();
        assert!(matches!(
            settings.into_client_config(),
            Err(ConfigError::InvalidRateLimit(_))
        ));

        let settings = Settings::from_toml_str("[rate_limit]\nwindow_ms = 0").unwrap();
        assert!(matches!(
            settings.into_client_config(),
            Err(ConfigError::InvalidRateLimit(_))
        ));
    }

    #[test]
    fn test_invalid_base_url_and_model() {
        let settings = Settings::from_toml_str("base_url = \"::nope\"").unwrap();
        assert!(matches!(
            settings.into_client_config(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        let settings = Settings::from_toml_str("model = \"has space\"").unwrap();
        assert!(matches!(
            settings.into_client_config(),
            Err(ConfigError::Client(ClientError::InvalidModel(_)))
        ));
    }

    #[test]
    fn test_empty_prefix_override_removes_requirement() {
        let settings = Settings::from_toml_str("[credentials]\nrequired_prefix = \"\"").unwrap();
        let config = settings.into_client_config().unwrap();
        assert!(config.key_policy.required_prefix.is_none());
    }

    #[test]
    fn test_resolve_api_key_from_env() {
        let settings = Settings {
            api_key_env: Some("PARLEY_TEST_KEY_RESOLVE".to_string()),
            ..Settings::default()
        };
        std::env::set_var("PARLEY_TEST_KEY_RESOLVE", "sk-or-v1-test");
        assert_eq!(settings.resolve_api_key().unwrap().as_deref(), Some("sk-or-v1-test"));
        std::env::remove_var("PARLEY_TEST_KEY_RESOLVE");
        assert_eq!(settings.resolve_api_key().unwrap(), None);
    }

    #[test]
    fn test_default_key_env_follows_provider() {
        let settings = Settings {
            provider: "gemini".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.api_key_env_name().unwrap(), "GEMINI_API_KEY");
    }
}
