//! Shared test utilities and fixtures
//!
//! Mock Claude and OpenAI endpoints plus a gateway pointed at them.

#![allow(dead_code)]

use std::time::Duration;

use colloquy_providers::retry::RetryPolicy;
use colloquy_providers::{GatewayConfig, HttpGateway};
use colloquy_types::ApiKey;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLAUDE_KEY: &str = "sk-ant-test";
pub const OPENAI_KEY: &str = "sk-test";

/// Both providers routed to `server`, with retries disabled.
pub fn gateway_for(server: &MockServer) -> HttpGateway {
    gateway_with_retry(server, RetryPolicy::none())
}

pub fn gateway_with_retry(server: &MockServer, retry: RetryPolicy) -> HttpGateway {
    let base = format!("{}/v1", server.uri());
    HttpGateway::new(
        GatewayConfig::new()
            .with_api_key(ApiKey::Claude(CLAUDE_KEY.to_string()))
            .with_api_key(ApiKey::OpenAI(OPENAI_KEY.to_string()))
            .with_anthropic_base(base.clone())
            .with_openai_base(base)
            .with_retry_policy(retry)
            .with_stream_idle_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

/// Retries with millisecond delays, so retry tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter_factor: 0.0,
    }
}

/// Non-streaming `/v1/complete` reply.
pub async fn mount_claude_completion(server: &MockServer, completion: &str) {
    let body = serde_json::json!({
        "type": "completion",
        "completion": completion,
        "stop_reason": "stop_sequence",
        "model": "claude-2.0"
    });

    Mock::given(method("POST"))
        .and(path("/v1/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Streaming `/v1/complete` reply: one event per fragment, then a stop event.
pub async fn mount_claude_stream(server: &MockServer, fragments: &[&str]) {
    let mut sse_body = String::new();

    for fragment in fragments {
        let data = serde_json::json!({
            "type": "completion",
            "completion": fragment,
            "stop_reason": null,
            "model": "claude-2.0"
        });
        sse_body.push_str(&format!("event: completion\ndata: {data}\n\n"));
    }

    let stop = serde_json::json!({
        "type": "completion",
        "completion": "",
        "stop_reason": "stop_sequence",
        "model": "claude-2.0"
    });
    sse_body.push_str(&format!("event: completion\ndata: {stop}\n\n"));

    Mock::given(method("POST"))
        .and(path("/v1/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
        .mount(server)
        .await;
}

/// Non-streaming `/v1/chat/completions` reply.
pub async fn mount_openai_completion(server: &MockServer, content: &str) {
    let body = serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1_234_567_890,
        "model": "gpt-3.5-turbo",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
    });

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Streaming `/v1/chat/completions` reply, CRLF-framed like a real server.
pub async fn mount_openai_stream(server: &MockServer, fragments: &[&str]) {
    let mut sse_body = String::new();

    let role = serde_json::json!({
        "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
    });
    sse_body.push_str(&format!("data: {role}\r\n\r\n"));

    for fragment in fragments {
        let data = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": fragment}, "finish_reason": null}]
        });
        sse_body.push_str(&format!("data: {data}\r\n\r\n"));
    }

    let finish = serde_json::json!({
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    });
    sse_body.push_str(&format!("data: {finish}\r\n\r\n"));
    sse_body.push_str("data: [DONE]\r\n\r\n");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
        .mount(server)
        .await;
}
