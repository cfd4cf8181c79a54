//! HTTP gateway behaviour against mock provider endpoints.

use colloquy_providers::retry::RetryPolicy;
use colloquy_providers::{
    GatewayConfig, GatewayError, GatewayReply, GatewayRequest, HttpGateway, ModelGateway,
};
use colloquy_types::{ApiKey, Message, ModelName, Provider, Temperature};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    CLAUDE_KEY, OPENAI_KEY, fast_retry, gateway_for, gateway_with_retry, mount_claude_stream,
    mount_openai_stream,
};

fn request<'a>(messages: &'a [Message], model: &'a ModelName, stream: bool) -> GatewayRequest<'a> {
    GatewayRequest {
        messages,
        model,
        temperature: Temperature::default(),
        stream,
    }
}

async fn drain(reply: GatewayReply) -> Result<String, GatewayError> {
    match reply {
        GatewayReply::Complete(reply) => Ok(reply.text.unwrap_or_default()),
        GatewayReply::Stream(mut stream) => {
            let mut text = String::new();
            while let Some(fragment) = stream.next_fragment().await? {
                text.push_str(&fragment);
            }
            Ok(text)
        }
    }
}

#[tokio::test]
async fn claude_request_uses_completion_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/complete"))
        .and(header("x-api-key", CLAUDE_KEY))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "model": "claude-2.0",
            "prompt": "\n\nHuman: Be brief.\n\nHuman: hi\n\nAssistant: hello\n\nHuman: bye\n\nAssistant:",
            "max_tokens_to_sample": 10_000,
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "completion": " Goodbye.",
            "stop_reason": "stop_sequence"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let model = ModelName::parse("claude-2.0").unwrap();
    let messages = [
        Message::system("Be brief."),
        Message::user("hi"),
        Message::assistant("hello"),
        Message::user("bye"),
    ];

    let reply = gateway.send(request(&messages, &model, false)).await.unwrap();
    assert_eq!(drain(reply).await.unwrap(), " Goodbye.");
}

#[tokio::test]
async fn openai_request_sends_role_messages() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", format!("Bearer {OPENAI_KEY}").as_str()))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "S"},
                {"role": "user", "content": "q"}
            ],
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "a"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let model = ModelName::parse("gpt-4").unwrap();
    let messages = [Message::system("S"), Message::user("q")];

    let reply = gateway.send(request(&messages, &model, false)).await.unwrap();
    assert_eq!(drain(reply).await.unwrap(), "a");
}

#[tokio::test]
async fn streams_from_both_providers() {
    let server = MockServer::start().await;
    mount_claude_stream(&server, &["Hello", " from", " Claude"]).await;
    mount_openai_stream(&server, &["Hello", " from", " GPT"]).await;

    let gateway = gateway_for(&server);
    let messages = [Message::user("hi")];

    let claude = ModelName::parse("claude-1").unwrap();
    let reply = gateway.send(request(&messages, &claude, true)).await.unwrap();
    assert_eq!(drain(reply).await.unwrap(), "Hello from Claude");

    let gpt = ModelName::parse("gpt-3.5-turbo-16k").unwrap();
    let reply = gateway.send(request(&messages, &gpt, true)).await.unwrap();
    assert_eq!(drain(reply).await.unwrap(), "Hello from GPT");
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "recovered"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_with_retry(&server, fast_retry());
    let model = ModelName::parse("gpt-4").unwrap();
    let messages = [Message::user("hi")];

    let reply = gateway.send(request(&messages, &model, false)).await.unwrap();
    assert_eq!(drain(reply).await.unwrap(), "recovered");
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/complete"))
        .respond_with(ResponseTemplate::new(400).set_body_string("prompt too long"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_with_retry(&server, fast_retry());
    let model = ModelName::parse("claude-2.0").unwrap();
    let messages = [Message::user("hi")];

    let err = gateway
        .send(request(&messages, &model, true))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Http {
            provider: Provider::Claude,
            status: 400,
            body: "prompt too long".to_string(),
        }
    );
}

#[tokio::test]
async fn exhausted_retries_report_last_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway_with_retry(&server, fast_retry());
    let model = ModelName::parse("gpt-4").unwrap();
    let messages = [Message::user("hi")];

    let err = gateway
        .send(request(&messages, &model, false))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Http { status: 429, .. }));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connection_error() {
    // Port 9 (discard) is not listening on test machines.
    let gateway = HttpGateway::new(
        GatewayConfig::new()
            .with_api_key(ApiKey::OpenAI(OPENAI_KEY.to_string()))
            .with_openai_base("http://127.0.0.1:9/v1")
            .with_retry_policy(RetryPolicy::none()),
    )
    .unwrap();
    let model = ModelName::parse("gpt-4").unwrap();
    let messages = [Message::user("hi")];

    let err = gateway
        .send(request(&messages, &model, false))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Connection { attempts: 1, .. }));
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let model = ModelName::parse("gpt-4").unwrap();
    let messages = [Message::user("hi")];

    let err = gateway
        .send(request(&messages, &model, false))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Decode(_)));
}
