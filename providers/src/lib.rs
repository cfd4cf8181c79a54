//! Language-model gateways with unified streaming support.
//!
//! # Architecture
//!
//! - [`ModelGateway`] - the seam the conversation engine talks to
//! - [`HttpGateway`] - the production implementation, dispatching on the model's provider
//! - [`claude`] - Anthropic Text Completions API (single prompt string)
//! - [`openai`] - OpenAI Chat Completions API (role/content messages)
//!
//! A non-streaming call resolves to a [`CompletionReply`]. A streaming call
//! resolves once the HTTP response headers are in; the body is then read by a
//! spawned task that pushes [`StreamEvent`]s through a bounded channel, and
//! [`FragmentStream`] is the forward-only consumer of that channel. Dropping
//! the consumer aborts the task.
//!
//! # Error Handling
//!
//! Request-level failures (connection errors, non-2xx statuses after retries,
//! undecodable bodies) are returned as [`GatewayError`] from
//! [`ModelGateway::send`]. Failures after streaming started surface from
//! [`FragmentStream::next_fragment`] as [`GatewayError::Stream`].

pub mod claude;
pub mod openai;
pub mod retry;
mod sse;
pub mod sse_types;

use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

pub use colloquy_types;
use colloquy_types::{ApiKey, Message, ModelName, Provider, StreamEvent, Temperature};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::retry::{RetryOutcome, RetryPolicy, send_with_retry};
use crate::sse::{SseParser, pump_events};

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MAX_TOKENS_TO_SAMPLE: u32 = 10_000;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Every way a gateway call can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no API key configured for {}; set {}", .0.display_name(), .0.env_var())]
    MissingApiKey(Provider),
    #[error("{name} API error {status}: {body}", name = .provider.display_name())]
    Http {
        provider: Provider,
        status: u16,
        body: String,
    },
    #[error("request failed after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Gateway call future type alias.
pub type GatewayFut<'a> = Pin<Box<dyn Future<Output = Result<GatewayReply, GatewayError>> + Send + 'a>>;

/// Anything that can answer a bounded message list.
pub trait ModelGateway: Send + Sync {
    fn send<'a>(&'a self, request: GatewayRequest<'a>) -> GatewayFut<'a>;
}

/// One model invocation. The provider is implied by `model`.
#[derive(Debug, Clone, Copy)]
pub struct GatewayRequest<'a> {
    pub messages: &'a [Message],
    pub model: &'a ModelName,
    pub temperature: Temperature,
    pub stream: bool,
}

impl GatewayRequest<'_> {
    #[must_use]
    pub fn provider(&self) -> Provider {
        self.model.provider()
    }
}

#[derive(Debug)]
pub enum GatewayReply {
    Complete(CompletionReply),
    Stream(FragmentStream),
}

/// Result of a non-streaming call. `text` is `None` when the provider sent no content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReply {
    pub text: Option<String>,
}

impl CompletionReply {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Forward-only sequence of text fragments from a streaming call.
///
/// Fragments may be empty strings; callers decide whether to skip them.
/// Dropping the stream before it finishes aborts the producing task.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<StreamEvent>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl FragmentStream {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<StreamEvent>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer: Some(producer),
            finished: false,
        }
    }

    /// A stream over pre-recorded events, with no producer task.
    ///
    /// The stream ends where the events end; a missing `Done` reads as a
    /// premature close.
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        let events: Vec<StreamEvent> = events.into_iter().collect();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity matches the event count.
            let _ = tx.try_send(event);
        }
        Self {
            rx,
            producer: None,
            finished: false,
        }
    }

    /// A stream that yields each fragment and then completes.
    #[must_use]
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_events(
            fragments
                .into_iter()
                .map(|f| StreamEvent::TextDelta(f.into()))
                .chain(std::iter::once(StreamEvent::Done)),
        )
    }

    /// `Ok(Some(_))` per fragment, `Ok(None)` once complete (and on every later call).
    pub async fn next_fragment(&mut self) -> Result<Option<String>, GatewayError> {
        if self.finished {
            return Ok(None);
        }

        match self.rx.recv().await {
            Some(StreamEvent::TextDelta(text)) => Ok(Some(text)),
            Some(StreamEvent::Done) => {
                self.finished = true;
                Ok(None)
            }
            Some(StreamEvent::Error(message)) => {
                self.finished = true;
                Err(GatewayError::Stream(message))
            }
            None => {
                self.finished = true;
                Err(GatewayError::Stream(
                    "stream closed before completion".to_string(),
                ))
            }
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take()
            && !producer.is_finished()
        {
            producer.abort();
        }
    }
}

pub(crate) fn stream_idle_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let secs = std::env::var("COLLOQUY_STREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS);
        Duration::from_secs(secs)
    })
}

/// Credentials, endpoints and tuning for [`HttpGateway`].
///
/// ```rust
/// use colloquy_providers::GatewayConfig;
/// use colloquy_providers::colloquy_types::ApiKey;
///
/// let config = GatewayConfig::new()
///     .with_api_key(ApiKey::OpenAI("sk-test".to_string()))
///     .with_openai_base("http://localhost:8080/v1");
/// assert_eq!(config.openai_base(), "http://localhost:8080/v1");
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    anthropic_key: Option<ApiKey>,
    openai_key: Option<ApiKey>,
    openai_base: String,
    anthropic_base: String,
    max_tokens_to_sample: u32,
    retry: RetryPolicy,
    stream_idle_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            anthropic_key: None,
            openai_key: None,
            openai_base: DEFAULT_OPENAI_API_BASE.to_string(),
            anthropic_base: DEFAULT_ANTHROPIC_API_BASE.to_string(),
            max_tokens_to_sample: DEFAULT_MAX_TOKENS_TO_SAMPLE,
            retry: RetryPolicy::default(),
            stream_idle_timeout: stream_idle_timeout(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the key in the slot of the provider it belongs to.
    #[must_use]
    pub fn with_api_key(mut self, key: ApiKey) -> Self {
        match key.provider() {
            Provider::Claude => self.anthropic_key = Some(key),
            Provider::OpenAI => self.openai_key = Some(key),
        }
        self
    }

    #[must_use]
    pub fn with_openai_base(mut self, base: impl Into<String>) -> Self {
        self.openai_base = base.into();
        self
    }

    #[must_use]
    pub fn with_anthropic_base(mut self, base: impl Into<String>) -> Self {
        self.anthropic_base = base.into();
        self
    }

    #[must_use]
    pub fn with_max_tokens_to_sample(mut self, max_tokens: u32) -> Self {
        self.max_tokens_to_sample = max_tokens;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    pub fn api_key(&self, provider: Provider) -> Result<&ApiKey, GatewayError> {
        match provider {
            Provider::Claude => self.anthropic_key.as_ref(),
            Provider::OpenAI => self.openai_key.as_ref(),
        }
        .ok_or(GatewayError::MissingApiKey(provider))
    }

    #[must_use]
    pub fn openai_base(&self) -> &str {
        &self.openai_base
    }

    #[must_use]
    pub fn anthropic_base(&self) -> &str {
        &self.anthropic_base
    }

    #[must_use]
    pub fn max_tokens_to_sample(&self) -> u32 {
        self.max_tokens_to_sample
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn stream_idle_timeout_duration(&self) -> Duration {
        self.stream_idle_timeout
    }

    fn all_bases_https(&self) -> bool {
        [&self.openai_base, &self.anthropic_base]
            .iter()
            .all(|base| base.starts_with("https://"))
    }
}

pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(concat!("colloquy/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

/// HTTP implementation of [`ModelGateway`] for OpenAI and Anthropic.
///
/// Built once and passed by reference; holds its own connection pool.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpGateway {
    /// The client only speaks HTTPS unless an endpoint was explicitly configured as plain HTTP.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let https_only = config.all_bases_https();
        if !https_only {
            tracing::warn!("API base URL is not HTTPS; requests will be sent in cleartext");
        }
        let client = client_builder()
            .https_only(https_only)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl ModelGateway for HttpGateway {
    fn send<'a>(&'a self, request: GatewayRequest<'a>) -> GatewayFut<'a> {
        Box::pin(async move {
            let started = std::time::Instant::now();
            let result = match request.provider() {
                Provider::Claude => claude::send(self, &request).await,
                Provider::OpenAI => openai::send(self, &request).await,
            };
            tracing::debug!(
                model = %request.model,
                stream = request.stream,
                ok = result.is_ok(),
                elapsed_ms = started.elapsed().as_millis(),
                "Gateway request finished"
            );
            result
        })
    }
}

async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            return format!("{}...(truncated)", String::from_utf8_lossy(&body));
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Sends with retries and turns every non-2xx outcome into a [`GatewayError`].
pub(crate) async fn send_checked<F>(
    provider: Provider,
    build_request: F,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GatewayError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    match send_with_retry(build_request, policy).await {
        RetryOutcome::Success(response) => Ok(response),
        RetryOutcome::HttpError(response) => {
            let status = response.status().as_u16();
            let body = read_capped_error_body(response).await;
            tracing::warn!(provider = provider.as_str(), status, "API request rejected");
            Err(GatewayError::Http {
                provider,
                status,
                body,
            })
        }
        RetryOutcome::ConnectionError { attempts, source } => {
            tracing::warn!(provider = provider.as_str(), attempts, error = %source, "API request failed");
            Err(GatewayError::Connection {
                attempts,
                message: source.to_string(),
            })
        }
    }
}

pub(crate) async fn decode_body<T>(response: reqwest::Response) -> Result<T, GatewayError>
where
    T: serde::de::DeserializeOwned,
{
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GatewayError::Stream(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
}

/// Hands the response body to a producer task and returns its consumer.
pub(crate) fn spawn_stream<P>(
    response: reqwest::Response,
    mut parser: P,
    idle_timeout: Duration,
) -> FragmentStream
where
    P: SseParser + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let producer = tokio::spawn(async move {
        pump_events(response.bytes_stream(), &mut parser, &tx, idle_timeout).await;
    });
    FragmentStream::new(rx, producer)
}
