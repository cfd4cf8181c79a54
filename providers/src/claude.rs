//! Anthropic Text Completions API (`POST /v1/complete`).
//!
//! The whole conversation is flattened into one prompt string using the
//! `Human:` / `Assistant:` turn delimiters, ending with an open
//! `Assistant:` turn for the model to complete.

use colloquy_types::{Message, Role, StreamEvent};
use serde_json::json;

use crate::sse::{SseParseAction, SseParser, emit_or_continue, parse_payload};
use crate::sse_types::claude as typed;
use crate::{
    CompletionReply, GatewayError, GatewayReply, GatewayRequest, HttpGateway, decode_body,
    endpoint, send_checked, spawn_stream,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const HUMAN_PROMPT: &str = "\n\nHuman:";
const AI_PROMPT: &str = "\n\nAssistant:";

/// Encodes `messages` as a single completion prompt.
///
/// System and user messages both become `Human` turns.
///
/// ```rust
/// use colloquy_providers::claude::build_prompt;
/// use colloquy_providers::colloquy_types::Message;
///
/// let prompt = build_prompt(&[Message::system("Be brief."), Message::user("Hi")]);
/// assert_eq!(prompt, "\n\nHuman: Be brief.\n\nHuman: Hi\n\nAssistant:");
/// ```
#[must_use]
pub fn build_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let marker = match message.role() {
            Role::System | Role::User => HUMAN_PROMPT,
            Role::Assistant => AI_PROMPT,
        };
        prompt.push_str(marker);
        prompt.push(' ');
        prompt.push_str(message.content());
    }
    prompt.push_str(AI_PROMPT);
    prompt
}

fn build_request_body(request: &GatewayRequest<'_>, max_tokens_to_sample: u32) -> serde_json::Value {
    json!({
        "model": request.model.as_str(),
        "prompt": build_prompt(request.messages),
        "temperature": request.temperature.as_f64(),
        "max_tokens_to_sample": max_tokens_to_sample,
        "stream": request.stream,
    })
}

#[derive(Debug, Default)]
struct ClaudeParser {
    stopped: bool,
}

impl SseParser for ClaudeParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction {
        let Some(event) = parse_payload::<typed::Event>(json, "Claude") else {
            return SseParseAction::Continue;
        };

        match event {
            typed::Event::Completion {
                completion,
                stop_reason,
            } => {
                if let Some(reason) = stop_reason.as_deref() {
                    tracing::debug!(stop_reason = reason, "Claude completion stopped");
                    self.stopped = true;
                    if completion.is_empty() {
                        return SseParseAction::Done;
                    }
                }

                let mut events = Vec::with_capacity(2);
                if !completion.is_empty() {
                    events.push(StreamEvent::TextDelta(completion));
                }
                if self.stopped {
                    events.push(StreamEvent::Done);
                }
                emit_or_continue(events)
            }
            typed::Event::Ping | typed::Event::Unknown => SseParseAction::Continue,
            typed::Event::Error { error } => SseParseAction::Error(if error.error_type.is_empty() {
                error.message
            } else {
                format!("{}: {}", error.error_type, error.message)
            }),
        }
    }

    fn provider_name(&self) -> &'static str {
        "Claude"
    }

    fn finished_on_eof(&self) -> bool {
        self.stopped
    }
}

pub(crate) async fn send(
    gateway: &HttpGateway,
    request: &GatewayRequest<'_>,
) -> Result<GatewayReply, GatewayError> {
    let config = gateway.config();
    let api_key = config.api_key(request.provider())?.expose_secret().to_string();
    let url = endpoint(config.anthropic_base(), "complete");
    let body = build_request_body(request, config.max_tokens_to_sample());
    let client = gateway.client();

    let response = send_checked(
        request.provider(),
        || {
            client
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
        },
        config.retry_policy(),
    )
    .await?;

    if request.stream {
        let stream = spawn_stream(
            response,
            ClaudeParser::default(),
            config.stream_idle_timeout_duration(),
        );
        return Ok(GatewayReply::Stream(stream));
    }

    let completion: typed::CompletionResponse = decode_body(response).await?;
    Ok(GatewayReply::Complete(CompletionReply {
        text: completion.completion,
    }))
}
