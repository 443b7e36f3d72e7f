//! Success-response parsing
//!
//! Pulls completion text out of 2xx bodies and spots error envelopes that
//! some gateways return with a 200 status.

use serde_json::Value;

use super::RequestShape;
use crate::ai::errors::{extract_error_code, extract_error_message};

/// An error object found inside a 2xx body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedError {
    /// HTTP-like status from `error.code`, when present
    pub code: Option<u16>,
    pub message: String,
}

/// `choices[0].message.content`, as a string or a list of text parts
pub fn extract_chat_completion(response: &Value) -> Option<String> {
    let content = response
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?;

    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => join_text_parts(parts),
        _ => return None,
    };
    non_empty(text)
}

/// `candidates[0].content.parts[*].text`, joined
pub fn extract_generate_content(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    non_empty(join_text_parts(parts))
}

/// Detect `{"error": ...}` returned in place of a completion
pub fn find_embedded_error(response: &Value) -> Option<EmbeddedError> {
    let error = response.get("error")?;
    if error.is_null() {
        return None;
    }

    let message = extract_error_message(response).unwrap_or_else(|| error.to_string());
    Some(EmbeddedError {
        code: extract_error_code(response),
        message,
    })
}

/// Why no completion text was found, for the malformed-response message
pub fn describe_missing_completion(shape: RequestShape, response: &Value) -> String {
    let (container, reason) = match shape {
        RequestShape::ChatMessages => (
            "choices",
            response
                .pointer("/choices/0/finish_reason")
                .and_then(Value::as_str),
        ),
        RequestShape::PromptTranscript => (
            "candidates",
            response
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .or_else(|| {
                    response
                        .pointer("/promptFeedback/blockReason")
                        .and_then(Value::as_str)
                }),
        ),
    };

    let has_container = response
        .get(container)
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty());

    match (has_container, reason) {
        (_, Some(reason)) => format!("no completion text (finish reason: {})", reason),
        (true, None) => "completion text was empty".to_string(),
        (false, None) => format!("missing '{}' in response", container),
    }
}

fn join_text_parts(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_chat_completion() {
        let body = json!({ "choices": [{ "message": { "role": "assistant", "content": "Hi there" } }] });
        assert_eq!(extract_chat_completion(&body).as_deref(), Some("Hi there"));

        let parts = json!({ "choices": [{ "message": { "content": [
            { "type": "text", "text": "Hi " }, { "type": "text", "text": "again" }
        ] } }] });
        assert_eq!(extract_chat_completion(&parts).as_deref(), Some("Hi again"));
    }

    #[test]
    fn test_chat_completion_missing_or_empty() {
        assert!(extract_chat_completion(&json!({})).is_none());
        assert!(extract_chat_completion(&json!({ "choices": [] })).is_none());
        let blank = json!({ "choices": [{ "message": { "content": "  " } }] });
        assert!(extract_chat_completion(&blank).is_none());
        let null = json!({ "choices": [{ "message": { "content": null } }] });
        assert!(extract_chat_completion(&null).is_none());
    }

    #[test]
    fn test_extract_generate_content() {
        let body = json!({ "candidates": [{ "content": { "role": "model", "parts": [
            { "text": "Hello" }, { "text": ", world" }
        ] } }] });
        assert_eq!(extract_generate_content(&body).as_deref(), Some("Hello, world"));
        assert!(extract_generate_content(&json!({ "candidates": [] })).is_none());
    }

    #[test]
    fn test_find_embedded_error() {
        let body = json!({ "error": { "code": 402, "message": "Insufficient credits" } });
        let found = find_embedded_error(&body).unwrap();
        assert_eq!(found.code, Some(402));
        assert_eq!(found.message, "Insufficient credits");

        assert!(find_embedded_error(&json!({ "choices": [] })).is_none());
        assert!(find_embedded_error(&json!({ "error": null })).is_none());
    }

    #[test]
    fn test_describe_missing_completion() {
        let blocked = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        assert_eq!(
            describe_missing_completion(RequestShape::PromptTranscript, &blocked),
            "no completion text (finish reason: SAFETY)"
        );
        assert_eq!(
            describe_missing_completion(RequestShape::ChatMessages, &json!({ "id": "x" })),
            "missing 'choices' in response"
        );
    }
}
