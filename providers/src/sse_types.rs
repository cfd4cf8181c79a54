//! Typed response and SSE payload structures.
//!
//! Parse errors happen at the serde boundary, not scattered through parsing
//! logic. Unknown event types deserialize to an `Unknown` variant so new
//! server-side events do not break old clients.

/// Anthropic legacy Text Completions API (`/v1/complete`).
pub mod claude {
    use serde::Deserialize;

    /// Non-streaming response body.
    #[derive(Debug, Deserialize)]
    pub struct CompletionResponse {
        #[serde(default)]
        pub completion: Option<String>,
        #[serde(default)]
        pub stop_reason: Option<String>,
    }

    /// Streaming event, tagged by the `type` field.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Event {
        Completion {
            #[serde(default)]
            completion: String,
            /// Non-null on the final event.
            #[serde(default)]
            stop_reason: Option<String>,
        },
        /// Keepalive.
        Ping,
        Error {
            error: ErrorInfo,
        },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default, rename = "type")]
        pub error_type: String,
        #[serde(default)]
        pub message: String,
    }
}

/// OpenAI Chat Completions API (`/v1/chat/completions`).
pub mod openai {
    use serde::Deserialize;

    /// Non-streaming response body.
    #[derive(Debug, Deserialize)]
    pub struct ChatCompletion {
        #[serde(default)]
        pub choices: Vec<Choice>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Choice {
        pub message: ChoiceMessage,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChoiceMessage {
        #[serde(default)]
        pub content: Option<String>,
    }

    impl ChatCompletion {
        /// `choices[0].message.content`, if present.
        #[must_use]
        pub fn into_text(self) -> Option<String> {
            self.choices.into_iter().next()?.message.content
        }
    }

    /// One streamed `chat.completion.chunk`, or an error object.
    #[derive(Debug, Deserialize)]
    pub struct Chunk {
        #[serde(default)]
        pub choices: Vec<ChunkChoice>,
        #[serde(default)]
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ChunkChoice {
        #[serde(default)]
        pub delta: Delta,
        #[serde(default)]
        pub finish_reason: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Delta {
        #[serde(default)]
        pub content: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        #[serde(default)]
        pub message: String,
        #[serde(default, rename = "type")]
        pub error_type: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::{claude, openai};
    use serde_json::json;

    #[test]
    fn claude_completion_event() {
        let event: claude::Event = serde_json::from_value(json!({
            "type": "completion",
            "completion": " Hello",
            "stop_reason": null,
            "model": "claude-2.0"
        }))
        .unwrap();

        match event {
            claude::Event::Completion {
                completion,
                stop_reason,
            } => {
                assert_eq!(completion, " Hello");
                assert!(stop_reason.is_none());
            }
            other => panic!("expected Completion, got {other:?}"),
        }
    }

    #[test]
    fn claude_unknown_event_is_tolerated() {
        let event: claude::Event =
            serde_json::from_value(json!({"type": "brand_new_thing", "x": 1})).unwrap();
        assert!(matches!(event, claude::Event::Unknown));
    }

    #[test]
    fn claude_error_event() {
        let event: claude::Event = serde_json::from_value(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        }))
        .unwrap();
        match event {
            claude::Event::Error { error } => {
                assert_eq!(error.error_type, "overloaded_error");
                assert_eq!(error.message, "Overloaded");
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn openai_completion_text() {
        let body: openai::ChatCompletion = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"}}]
        }))
        .unwrap();
        assert_eq!(body.into_text().as_deref(), Some("Hi"));

        let empty: openai::ChatCompletion = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(empty.into_text(), None);
    }

    #[test]
    fn openai_chunk_role_only_delta() {
        let chunk: openai::Chunk = serde_json::from_value(json!({
            "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
        }))
        .unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
        assert!(chunk.error.is_none());
    }
}
