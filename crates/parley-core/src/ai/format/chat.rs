//! Chat messages format handler
//!
//! Handles the OpenAI chat/completions shape used by OpenRouter and other
//! OpenAI-compatible endpoints.

use serde_json::{json, Value};

use super::{response, FormatHandler, RequestOptions, RequestShape};
use crate::ai::types::{ConversationTurn, Role};

/// Chat messages format handler
#[derive(Debug, Default)]
pub struct ChatMessagesFormat;

impl ChatMessagesFormat {
    pub fn new() -> Self {
        Self
    }
}

impl FormatHandler for ChatMessagesFormat {
    fn shape(&self) -> RequestShape {
        RequestShape::ChatMessages
    }

    /// System message first, then history in order, then the new user message
    fn convert_messages(
        &self,
        system_prompt: &str,
        history: &[&ConversationTurn],
        new_user_text: &str,
    ) -> Vec<Value> {
        let mut result = Vec::with_capacity(history.len() + 2);
        result.push(json!({ "role": "system", "content": system_prompt }));

        for turn in history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => continue,
            };
            result.push(json!({ "role": role, "content": turn.text }));
        }

        result.push(json!({ "role": "user", "content": new_user_text }));
        result
    }

    fn build_request_body(
        &self,
        model: &str,
        messages: Vec<Value>,
        options: &RequestOptions,
    ) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": options.max_tokens,
        });

        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    fn extract_completion(&self, response: &Value) -> Option<String> {
        response::extract_chat_completion(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_convert_messages_skips_system_turns() {
        let now = Utc::now();
        let notice = ConversationTurn::notice("ignored", now);
        let user = ConversationTurn::user("hello", now);
        let messages = ChatMessagesFormat::new().convert_messages("sys", &[&notice, &user], "next");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], json!({ "role": "user", "content": "hello" }));
    }

    #[test]
    fn test_temperature_omitted_when_unset() {
        let options = RequestOptions {
            max_tokens: 100,
            temperature: None,
        };
        let body = ChatMessagesFormat::new().build_request_body("m", vec![], &options);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["max_tokens"], 100);
    }
}
