//! OpenAI Chat Completions API (`POST /v1/chat/completions`).

use colloquy_types::{Message, StreamEvent};
use serde_json::json;

use crate::sse::{SseParseAction, SseParser, emit_or_continue, parse_payload};
use crate::sse_types::openai as typed;
use crate::{
    CompletionReply, GatewayError, GatewayReply, GatewayRequest, HttpGateway, decode_body,
    endpoint, send_checked, spawn_stream,
};

fn build_request_body(request: &GatewayRequest<'_>) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|message: &Message| {
            json!({
                "role": message.role_str(),
                "content": message.content(),
            })
        })
        .collect();

    json!({
        "model": request.model.as_str(),
        "messages": messages,
        "temperature": request.temperature.as_f64(),
        "stream": request.stream,
    })
}

/// Streaming chunks carry `choices[0].delta.content`; the final chunk has a
/// `finish_reason` and is followed by `data: [DONE]`.
#[derive(Debug, Default)]
struct OpenAIParser {
    saw_finish_reason: bool,
}

impl SseParser for OpenAIParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction {
        let Some(chunk) = parse_payload::<typed::Chunk>(json, "OpenAI") else {
            return SseParseAction::Continue;
        };

        if let Some(error) = chunk.error {
            return SseParseAction::Error(match error.error_type {
                Some(kind) => format!("{kind}: {}", error.message),
                None => error.message,
            });
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                events.push(StreamEvent::TextDelta(content));
            }
            if let Some(reason) = choice.finish_reason {
                tracing::debug!(finish_reason = %reason, "OpenAI completion finished");
                self.saw_finish_reason = true;
            }
        }
        emit_or_continue(events)
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    // Some proxies drop the `[DONE]` sentinel.
    fn finished_on_eof(&self) -> bool {
        self.saw_finish_reason
    }
}

pub(crate) async fn send(
    gateway: &HttpGateway,
    request: &GatewayRequest<'_>,
) -> Result<GatewayReply, GatewayError> {
    let config = gateway.config();
    let auth_header = format!(
        "Bearer {}",
        config.api_key(request.provider())?.expose_secret()
    );
    let url = endpoint(config.openai_base(), "chat/completions");
    let body = build_request_body(request);
    let client = gateway.client();

    let response = send_checked(
        request.provider(),
        || {
            client
                .post(&url)
                .header("Authorization", &auth_header)
                .json(&body)
        },
        config.retry_policy(),
    )
    .await?;

    if request.stream {
        let stream = spawn_stream(
            response,
            OpenAIParser::default(),
            config.stream_idle_timeout_duration(),
        );
        return Ok(GatewayReply::Stream(stream));
    }

    let completion: typed::ChatCompletion = decode_body(response).await?;
    Ok(GatewayReply::Complete(CompletionReply {
        text: completion.into_text(),
    }))
}
