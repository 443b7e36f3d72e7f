//! Prompt transcript format handler
//!
//! Providers in this shape take one user part per request. The system
//! instructions and the prior conversation are flattened into that part as a
//! labelled transcript, ending with an open `Assistant:` line for the model to
//! complete. The body follows Gemini's generateContent layout.

use serde_json::{json, Value};

use super::{response, FormatHandler, RequestOptions, RequestShape};
use crate::ai::types::{ConversationTurn, Role};

/// Prompt transcript format handler
#[derive(Debug, Default)]
pub struct PromptTranscriptFormat;

impl PromptTranscriptFormat {
    pub fn new() -> Self {
        Self
    }

    /// Flatten instructions, history, and the new message into one prompt
    pub fn render_prompt(
        system_prompt: &str,
        history: &[&ConversationTurn],
        new_user_text: &str,
    ) -> String {
        let mut prompt = String::from(system_prompt);
        prompt.push_str("\n\n");

        let lines: Vec<String> = history
            .iter()
            .filter_map(|turn| {
                let label = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::System => return None,
                };
                Some(format!("{}: {}", label, turn.text))
            })
            .collect();

        if !lines.is_empty() {
            prompt.push_str("Conversation so far:\n");
            prompt.push_str(&lines.join("\n"));
            prompt.push_str("\n\n");
        }

        prompt.push_str("User: ");
        prompt.push_str(new_user_text);
        prompt.push_str("\nAssistant:");
        prompt
    }
}

impl FormatHandler for PromptTranscriptFormat {
    fn shape(&self) -> RequestShape {
        RequestShape::PromptTranscript
    }

    fn convert_messages(
        &self,
        system_prompt: &str,
        history: &[&ConversationTurn],
        new_user_text: &str,
    ) -> Vec<Value> {
        let prompt = Self::render_prompt(system_prompt, history, new_user_text);
        vec![json!({
            "role": "user",
            "parts": [{ "text": prompt }]
        })]
    }

    /// The model travels in the URL path, not the body
    fn build_request_body(
        &self,
        _model: &str,
        messages: Vec<Value>,
        options: &RequestOptions,
    ) -> Value {
        let mut generation_config = json!({ "maxOutputTokens": options.max_tokens });
        if let Some(temp) = options.temperature {
            generation_config["temperature"] = json!(temp);
        }

        json!({
            "contents": messages,
            "generationConfig": generation_config,
        })
    }

    fn extract_completion(&self, response: &Value) -> Option<String> {
        response::extract_generate_content(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_render_prompt_without_history() {
        let prompt = PromptTranscriptFormat::render_prompt("Be kind.", &[], "hi");
        assert_eq!(prompt, "Be kind.\n\nUser: hi\nAssistant:");
    }

    #[test]
    fn test_render_prompt_with_history() {
        let now = Utc::now();
        let q = ConversationTurn::user("2+2?", now);
        let a = ConversationTurn::assistant("4", "m", now);
        let prompt = PromptTranscriptFormat::render_prompt("Be kind.", &[&q, &a], "and 3+3?");
        assert_eq!(
            prompt,
            "Be kind.\n\nConversation so far:\nUser: 2+2?\nAssistant: 4\n\nUser: and 3+3?\nAssistant:"
        );
    }

    #[test]
    fn test_body_has_no_model_field() {
        let format = PromptTranscriptFormat::new();
        let messages = format.convert_messages("s", &[], "u");
        let body = format.build_request_body("gemini-1.5-flash", messages, &RequestOptions::default());
        assert!(body.get("model").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
    }
}
