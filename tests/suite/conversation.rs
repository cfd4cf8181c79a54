//! End-to-end conversations: session + HTTP gateway + mock providers.

use colloquy_context::{CountTokens, ModelRegistry, TokenCounter};
use colloquy_context::retrieval::{build_chunks, upsert_in_batches};
use colloquy_engine::{
    Answer, AskError, ConversationSession, GatewayError, InMemoryIndex, ground_question,
};
use colloquy_types::{ChatSettings, Message, ModelName, Temperature};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    gateway_for, mount_claude_completion, mount_claude_stream, mount_openai_completion,
};

fn session_for(model: &str, stream: bool, registry: ModelRegistry) -> ConversationSession {
    let settings = ChatSettings::new(
        ModelName::parse(model).unwrap(),
        Temperature::default(),
        "You are terse.",
        stream,
    );
    ConversationSession::new(settings, registry)
}

async fn last_body(server: &MockServer) -> serde_json::Value {
    let requests = server.received_requests().await.unwrap();
    let last = requests.last().unwrap();
    serde_json::from_slice(&last.body).unwrap()
}

#[tokio::test]
async fn streamed_claude_answers_build_history() {
    let server = MockServer::start().await;
    mount_claude_stream(&server, &["Hello", " ", "world"]).await;

    let gateway = gateway_for(&server);
    let counter = TokenCounter::new();
    let mut session = session_for("claude-2.0", true, ModelRegistry::new());

    let Answer::Stream(mut stream) = session.ask(&gateway, &counter, "Greet me").await.unwrap()
    else {
        panic!("expected a streaming answer");
    };
    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next_fragment().await.unwrap() {
        fragments.push(fragment);
    }
    drop(stream);
    assert_eq!(fragments, ["Hello", " ", "world"]);

    let turns = session.history().turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].question().content(), "Greet me");
    assert_eq!(turns[0].answer().content(), "Hello world");

    // The next prompt carries the committed turn.
    let text = session
        .ask(&gateway, &counter, "Again")
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap();
    assert_eq!(text, "Hello world");

    let body = last_body(&server).await;
    assert_eq!(
        body["prompt"],
        "\n\nHuman: You are terse.\n\nHuman: Greet me\n\nAssistant: Hello world\n\nHuman: Again\n\nAssistant:"
    );
    assert_eq!(session.history().len(), 2);
}

#[tokio::test]
async fn non_streaming_openai_answer_is_committed() {
    let server = MockServer::start().await;
    mount_openai_completion(&server, "42").await;

    let gateway = gateway_for(&server);
    let mut session = session_for("gpt-4", false, ModelRegistry::new());

    let answer = session
        .ask(&gateway, &TokenCounter::new(), "Meaning of life?")
        .await
        .unwrap();
    assert!(matches!(answer, Answer::Text(ref t) if t == "42"));
    assert_eq!(session.history().turns()[0].answer().content(), "42");

    let body = last_body(&server).await;
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "You are terse.");
    assert_eq!(body["messages"][1]["content"], "Meaning of life?");
}

#[tokio::test]
async fn empty_non_streaming_answer_is_a_no_op() {
    let server = MockServer::start().await;
    mount_claude_completion(&server, "").await;

    let gateway = gateway_for(&server);
    let mut session = session_for("claude-1", false, ModelRegistry::new());

    let answer = session
        .ask(&gateway, &TokenCounter::new(), "Anything?")
        .await
        .unwrap();
    assert!(matches!(answer, Answer::Empty));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn long_history_is_trimmed_from_the_old_end() {
    let server = MockServer::start().await;
    mount_openai_completion(&server, &"word ".repeat(40)).await;

    let gateway = gateway_for(&server);
    let counter = TokenCounter::new();
    let limit = 300;
    let mut session = session_for(
        "gpt-3.5-turbo",
        false,
        ModelRegistry::with_overrides([("gpt-3.5-turbo", limit)]),
    );

    for i in 0..8 {
        session
            .ask(&gateway, &counter, format!("question number {i}"))
            .await
            .unwrap();
    }
    assert_eq!(session.history().len(), 8);

    let body = last_body(&server).await;
    let sent: Vec<Message> = serde_json::from_value(body["messages"].clone()).unwrap();

    assert_eq!(sent.first(), Some(&Message::system("You are terse.")));
    assert_eq!(sent.last(), Some(&Message::user("question number 7")));
    assert!(counter.count(&sent, "gpt-3.5-turbo") <= limit);

    // Whatever history made it in is the newest suffix.
    let history: Vec<&Message> = session.history().messages().collect();
    let included = &sent[1..sent.len() - 1];
    assert!(included.len() < history.len() - 2);
    let expected_suffix = &history[history.len() - 2 - included.len()..history.len() - 2];
    assert!(included.iter().zip(expected_suffix).all(|(a, b)| a == *b));
}

#[tokio::test]
async fn unknown_window_fails_before_any_request() {
    let server = MockServer::start().await;
    mount_claude_completion(&server, "unused").await;

    let gateway = gateway_for(&server);
    let mut session = session_for("claude-v1-100k", false, ModelRegistry::new());

    let err = session
        .ask(&gateway, &TokenCounter::new(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, AskError::Configuration(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn truncated_stream_commits_nothing() {
    let server = MockServer::start().await;
    let body = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"half an\"},\"finish_reason\":null}]}\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let mut session = session_for("gpt-4", true, ModelRegistry::new());

    let err = session
        .ask(&gateway, &TokenCounter::new(), "Tell me everything")
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Stream(_)));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn rejected_request_surfaces_as_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/complete"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let mut session = session_for("claude-2.0", true, ModelRegistry::new());

    let err = session
        .ask(&gateway, &TokenCounter::new(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AskError::Gateway(GatewayError::Http { status: 401, .. })
    ));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn conversation_exports_as_role_content_json() {
    let server = MockServer::start().await;
    mount_claude_completion(&server, "Pong").await;

    let gateway = gateway_for(&server);
    let mut session = session_for("claude-2.0", false, ModelRegistry::new());
    session
        .ask(&gateway, &TokenCounter::new(), "Ping")
        .await
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = session.save_export(dir.path()).unwrap();
    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

    assert_eq!(
        exported,
        serde_json::json!([
            {"role": "user", "content": "Ping"},
            {"role": "assistant", "content": "Pong"}
        ])
    );
}

#[tokio::test]
async fn grounded_question_carries_document_excerpts() {
    let server = MockServer::start().await;
    mount_openai_completion(&server, "Hold reset for ten seconds.").await;

    let index = InMemoryIndex::new();
    let chunks = build_chunks(
        "manuals/router.pdf",
        [("Factory reset: hold the button for ten seconds.".to_string(), 3)],
        vec![vec![0.6, 0.8]],
    )
    .unwrap();
    upsert_in_batches(&index, &chunks).await.unwrap();

    let gateway = gateway_for(&server);
    let counter = TokenCounter::new();
    let mut session = session_for("gpt-3.5-turbo", false, ModelRegistry::new());

    let question = ground_question(&index, &counter, &[0.6, 0.8], "How do I reset?")
        .await
        .unwrap();
    session.ask(&gateway, &counter, question).await.unwrap();

    let body = last_body(&server).await;
    let sent = body["messages"][1]["content"].as_str().unwrap();
    assert!(sent.contains("source: router.pdf page: 3"));
    assert!(sent.ends_with("Question: How do I reset?"));
    assert_eq!(session.history().turns()[0].question().content(), sent);
}
