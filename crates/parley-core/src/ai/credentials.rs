//! API key format validation
//!
//! Cheap, side-effect free string checks, safe to run on every keystroke.
//! The verdict is derived fresh from the raw key each time and never cached.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider requirements for an API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    /// Prefix every valid key starts with (None accepts any prefix)
    #[serde(default)]
    pub required_prefix: Option<String>,
    /// Minimum total key length, prefix included
    #[serde(default)]
    pub min_length: usize,
}

impl KeyPolicy {
    pub fn new(required_prefix: impl Into<String>, min_length: usize) -> Self {
        Self {
            required_prefix: Some(required_prefix.into()),
            min_length,
        }
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            required_prefix: None,
            min_length: 1,
        }
    }
}

/// Why a key was accepted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Missing,
    Empty,
    TooShort,
    WrongPrefix,
    BearerPrefixPresent,
    InvalidFormat,
    Ok,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCode::Missing => "missing",
            ReasonCode::Empty => "empty",
            ReasonCode::TooShort => "too_short",
            ReasonCode::WrongPrefix => "wrong_prefix",
            ReasonCode::BearerPrefixPresent => "bearer_prefix_present",
            ReasonCode::InvalidFormat => "invalid_format",
            ReasonCode::Ok => "ok",
        };
        write!(f, "{}", s)
    }
}

/// Result of validating a raw key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialVerdict {
    pub valid: bool,
    pub reason: ReasonCode,
}

impl CredentialVerdict {
    fn rejected(reason: ReasonCode) -> Self {
        Self {
            valid: false,
            reason,
        }
    }

    fn accepted() -> Self {
        Self {
            valid: true,
            reason: ReasonCode::Ok,
        }
    }
}

/// Classifies raw API key strings against a provider's [`KeyPolicy`]
#[derive(Debug, Clone)]
pub struct CredentialValidator {
    policy: KeyPolicy,
}

impl CredentialValidator {
    pub fn new(policy: KeyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    /// Classify a raw key
    ///
    /// Surrounding whitespace is ignored. Rules are checked in order: missing,
    /// empty, pasted authorization scheme, wrong prefix, too short, stray
    /// characters.
    pub fn validate(&self, raw_key: Option<&str>) -> CredentialVerdict {
        let Some(raw) = raw_key else {
            return CredentialVerdict::rejected(ReasonCode::Missing);
        };

        let key = raw.trim();
        if key.is_empty() {
            return CredentialVerdict::rejected(ReasonCode::Empty);
        }

        if has_bearer_prefix(key) {
            return CredentialVerdict::rejected(ReasonCode::BearerPrefixPresent);
        }

        if let Some(prefix) = self.policy.required_prefix.as_deref() {
            if !key.starts_with(prefix) {
                return CredentialVerdict::rejected(ReasonCode::WrongPrefix);
            }
        }

        if key.chars().count() < self.policy.min_length {
            return CredentialVerdict::rejected(ReasonCode::TooShort);
        }

        if !key.chars().all(is_key_char) {
            return CredentialVerdict::rejected(ReasonCode::InvalidFormat);
        }

        CredentialVerdict::accepted()
    }

    /// User-facing explanation of a rejection reason
    pub fn describe(&self, reason: ReasonCode, provider_name: &str) -> String {
        match reason {
            ReasonCode::Missing => format!("No {} API key is set", provider_name),
            ReasonCode::Empty => format!("The {} API key is empty", provider_name),
            ReasonCode::TooShort => format!(
                "The key is too short; {} keys have at least {} characters",
                provider_name, self.policy.min_length
            ),
            ReasonCode::WrongPrefix => match self.policy.required_prefix.as_deref() {
                Some(prefix) => format!("{} API keys should start with '{}'", provider_name, prefix),
                None => format!("The key does not look like a {} key", provider_name),
            },
            ReasonCode::BearerPrefixPresent => {
                "Remove the 'Bearer ' prefix and paste only the key itself".to_string()
            }
            ReasonCode::InvalidFormat => {
                "The key contains spaces or unexpected characters".to_string()
            }
            ReasonCode::Ok => "API key format appears correct ✓".to_string(),
        }
    }
}

fn has_bearer_prefix(key: &str) -> bool {
    const SCHEMES: [&str; 2] = ["bearer ", "authorization:"];
    SCHEMES.iter().any(|scheme| {
        key.get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openrouter() -> CredentialValidator {
        CredentialValidator::new(KeyPolicy::new("sk-or-v1-", 73))
    }

    fn valid_openrouter_key() -> String {
        format!("sk-or-v1-{}", "a1".repeat(32))
    }

    #[test]
    fn test_missing_and_empty() {
        let v = openrouter();
        assert_eq!(v.validate(None).reason, ReasonCode::Missing);
        assert_eq!(v.validate(Some("")).reason, ReasonCode::Empty);
        assert_eq!(v.validate(Some("   \t")).reason, ReasonCode::Empty);
        assert!(!v.validate(Some("")).valid);
    }

    #[test]
    fn test_valid_key() {
        let verdict = openrouter().validate(Some(&valid_openrouter_key()));
        assert!(verdict.valid);
        assert_eq!(verdict.reason, ReasonCode::Ok);
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let key = format!("  {}\n", valid_openrouter_key());
        assert!(openrouter().validate(Some(&key)).valid);
    }

    #[test]
    fn test_wrong_prefix() {
        let v = openrouter();
        for key in ["sk-proj-abcdef", "AIzaSyD-something-long-enough-here", "or-v1-sk-xxxx", "x"] {
            let verdict = v.validate(Some(key));
            assert!(!verdict.valid);
            assert_eq!(verdict.reason, ReasonCode::WrongPrefix, "key: {}", key);
        }
    }

    #[test]
    fn test_bearer_prefix_wins_over_wrong_prefix() {
        let v = openrouter();
        let pasted = format!("Bearer {}", valid_openrouter_key());
        assert_eq!(v.validate(Some(&pasted)).reason, ReasonCode::BearerPrefixPresent);
        assert_eq!(
            v.validate(Some("bearer sk-or-v1-abc")).reason,
            ReasonCode::BearerPrefixPresent
        );
        assert_eq!(
            v.validate(Some("Authorization: Bearer sk-or-v1-abc")).reason,
            ReasonCode::BearerPrefixPresent
        );
    }

    #[test]
    fn test_too_short() {
        let verdict = openrouter().validate(Some("sk-or-v1-abc123"));
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, ReasonCode::TooShort);
    }

    #[test]
    fn test_invalid_format() {
        let key = format!("sk-or-v1-{} {}", "a".repeat(40), "b".repeat(30));
        assert_eq!(openrouter().validate(Some(&key)).reason, ReasonCode::InvalidFormat);
    }

    #[test]
    fn test_no_required_prefix() {
        let v = CredentialValidator::new(KeyPolicy::default());
        assert!(v.validate(Some("local-token")).valid);
    }

    #[test]
    fn test_describe_mentions_prefix() {
        let v = openrouter();
        let text = v.describe(ReasonCode::WrongPrefix, "OpenRouter");
        assert!(text.contains("sk-or-v1-"));
    }
}
