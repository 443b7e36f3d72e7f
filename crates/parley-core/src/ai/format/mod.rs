//! Request shape handling
//!
//! Abstracts the two wire shapes providers accept for a chat turn: a flat
//! role/content message list, and a single prompt with the transcript
//! embedded in it. The shape is chosen by configuration, not provider, so a
//! new shape only needs a new [`FormatHandler`].

pub mod chat;
pub mod response;
pub mod transcript;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ai::types::ConversationTurn;
use crate::constants;

/// Wire shape of the request body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    /// `messages: [{role, content}]` (OpenAI chat/completions family)
    #[default]
    ChatMessages,
    /// One user part holding instructions plus transcript (Gemini generateContent)
    PromptTranscript,
}

impl fmt::Display for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestShape::ChatMessages => write!(f, "chat_messages"),
            RequestShape::PromptTranscript => write!(f, "prompt_transcript"),
        }
    }
}

/// Trait for handling different request shapes
///
/// Implementations convert the conversation into the provider's body and pull
/// the completion text back out of a success response.
pub trait FormatHandler: Send + Sync {
    fn shape(&self) -> RequestShape;

    /// Convert the system prompt, replayable history, and new user text
    fn convert_messages(
        &self,
        system_prompt: &str,
        history: &[&ConversationTurn],
        new_user_text: &str,
    ) -> Vec<Value>;

    /// Build the complete request body
    fn build_request_body(&self, model: &str, messages: Vec<Value>, options: &RequestOptions)
        -> Value;

    /// Completion text at the shape's expected path, if non-empty
    fn extract_completion(&self, response: &Value) -> Option<String>;
}

/// Sampling options shared by every shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            max_tokens: constants::ai::MAX_OUTPUT_TOKENS,
            temperature: Some(constants::ai::DEFAULT_TEMPERATURE),
        }
    }
}

/// Select the handler for a request shape
pub fn get_format_handler(shape: RequestShape) -> Box<dyn FormatHandler> {
    match shape {
        RequestShape::ChatMessages => Box::new(chat::ChatMessagesFormat::new()),
        RequestShape::PromptTranscript => Box::new(transcript::PromptTranscriptFormat::new()),
    }
}

/// A built request body, ready for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub shape: RequestShape,
    pub body: Value,
    /// History turns replayed into the body
    pub replayed_turns: usize,
}

/// Assembles outbound payloads through the configured [`FormatHandler`]
pub struct ChatRequestBuilder {
    handler: Box<dyn FormatHandler>,
    options: RequestOptions,
}

impl ChatRequestBuilder {
    pub fn new(shape: RequestShape, options: RequestOptions) -> Self {
        Self::with_handler(get_format_handler(shape), options)
    }

    pub fn with_handler(handler: Box<dyn FormatHandler>, options: RequestOptions) -> Self {
        Self { handler, options }
    }

    pub fn shape(&self) -> RequestShape {
        self.handler.shape()
    }

    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Build a request for `new_user_text` following `history`
    ///
    /// Only user and assistant turns are replayed; notices and error turns are
    /// dropped. Empty instructions fall back to the default system prompt.
    pub fn build(
        &self,
        model: &str,
        system_instructions: &str,
        history: &[ConversationTurn],
        new_user_text: &str,
    ) -> ProviderRequest {
        let system_prompt = match system_instructions.trim() {
            "" => constants::ai::DEFAULT_SYSTEM_PROMPT,
            trimmed => trimmed,
        };
        let replayable: Vec<&ConversationTurn> =
            history.iter().filter(|t| t.is_replayable()).collect();

        let messages = self
            .handler
            .convert_messages(system_prompt, &replayable, new_user_text);
        let body = self
            .handler
            .build_request_body(model, messages, &self.options);

        ProviderRequest {
            shape: self.handler.shape(),
            body,
            replayed_turns: replayable.len(),
        }
    }

    pub fn extract_completion(&self, response: &Value) -> Option<String> {
        self.handler.extract_completion(response)
    }
}

impl fmt::Debug for ChatRequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRequestBuilder")
            .field("shape", &self.handler.shape())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::errors::ErrorKind;
    use chrono::Utc;

    fn history() -> Vec<ConversationTurn> {
        let now = Utc::now();
        vec![
            ConversationTurn::user("first question", now),
            ConversationTurn::assistant("first answer", "m", now),
            ConversationTurn::error(ErrorKind::Network, "offline", now),
            ConversationTurn::notice("API key format appears correct ✓", now),
            ConversationTurn::user("second question", now),
            ConversationTurn::assistant("second answer", "m", now),
        ]
    }

    #[test]
    fn test_chat_shape_orders_and_filters() {
        let builder = ChatRequestBuilder::new(RequestShape::ChatMessages, RequestOptions::default());
        let request = builder.build("openai/gpt-4", "Be brief.", &history(), "third question");

        assert_eq!(request.replayed_turns, 4);
        let messages = request.body["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user", "assistant", "user"]);
        assert_eq!(messages[0]["content"], "Be brief.");
        assert_eq!(messages[5]["content"], "third question");
        assert_eq!(request.body["model"], "openai/gpt-4");
    }

    #[test]
    fn test_empty_instructions_use_default() {
        let builder = ChatRequestBuilder::new(RequestShape::ChatMessages, RequestOptions::default());
        let request = builder.build("m", "   ", &[], "hi");
        assert_eq!(
            request.body["messages"][0]["content"],
            constants::ai::DEFAULT_SYSTEM_PROMPT
        );
    }

    #[test]
    fn test_transcript_shape_embeds_history() {
        let builder =
            ChatRequestBuilder::new(RequestShape::PromptTranscript, RequestOptions::default());
        let request = builder.build("gemini-1.5-flash", "Be brief.", &history(), "third question");

        assert_eq!(request.shape, RequestShape::PromptTranscript);
        let contents = request.body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 1);
        let prompt = contents[0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.starts_with("Be brief."));
        assert!(prompt.contains("User: first question"));
        assert!(prompt.contains("Assistant: second answer"));
        assert!(!prompt.contains("offline"));
        assert!(prompt.trim_end().ends_with("User: third question\nAssistant:"));
    }

    #[test]
    fn test_options_flow_into_body() {
        let options = RequestOptions {
            max_tokens: 256,
            temperature: Some(0.2),
        };
        let chat = ChatRequestBuilder::new(RequestShape::ChatMessages, options);
        let body = chat.build("m", "", &[], "hi").body;
        assert_eq!(body["max_tokens"], 256);

        let transcript = ChatRequestBuilder::new(RequestShape::PromptTranscript, options);
        let body = transcript.build("m", "", &[], "hi").body;
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }
}
