//! Conversation domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ErrorKind;
use crate::constants;

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn in the conversation
///
/// Turns are immutable once created. Error turns and local notices use
/// `Role::System` so they are never replayed to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Model that produced an assistant turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Set when this turn reports a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            created_at,
            model: None,
            error: None,
        }
    }

    pub fn assistant(
        text: impl Into<String>,
        model: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            created_at,
            model: Some(model.into()),
            error: None,
        }
    }

    /// A local informational message (never sent to the provider)
    pub fn notice(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            created_at,
            model: None,
            error: None,
        }
    }

    pub fn error(kind: ErrorKind, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            created_at,
            model: None,
            error: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this turn belongs in the transcript replayed to the provider
    pub fn is_replayable(&self) -> bool {
        !self.is_error() && matches!(self.role, Role::User | Role::Assistant)
    }
}

/// Append-only sequence of turns for one chat session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Drop every turn ("new chat")
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Sidebar preview: the opening of the first user message
    pub fn title(&self) -> String {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| {
                let preview: String = t
                    .text
                    .chars()
                    .take(constants::ai::TITLE_PREVIEW_CHARS)
                    .collect();
                format!("{}...", preview)
            })
            .unwrap_or_else(|| "New conversation".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replayable_excludes_notices_and_errors() {
        let now = Utc::now();
        assert!(ConversationTurn::user("hi", now).is_replayable());
        assert!(ConversationTurn::assistant("hello", "m", now).is_replayable());
        assert!(!ConversationTurn::notice("key ok", now).is_replayable());
        assert!(!ConversationTurn::error(ErrorKind::Network, "down", now).is_replayable());
    }

    #[test]
    fn test_title_previews_first_user_turn() {
        let now = Utc::now();
        let mut conversation = Conversation::new();
        assert_eq!(conversation.title(), "New conversation");

        conversation.push(ConversationTurn::notice("welcome", now));
        conversation.push(ConversationTurn::user(
            "How do I automate my weekly report emails with Zapier?",
            now,
        ));
        assert_eq!(conversation.title(), "How do I automate my weekly re...");
    }

    #[test]
    fn test_clear_empties_sequence() {
        let mut conversation = Conversation::new();
        conversation.push(ConversationTurn::user("hi", Utc::now()));
        assert_eq!(conversation.len(), 1);
        conversation.clear();
        assert!(conversation.is_empty());
    }

    #[test]
    fn test_turn_serializes_without_empty_options() {
        let turn = ConversationTurn::user("hi", Utc::now());
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("model").is_none());
        assert!(json.get("error").is_none());
    }
}
