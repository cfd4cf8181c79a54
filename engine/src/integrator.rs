//! Response integration: turns a gateway reply into an answer and commits
//! the completed turn to history.
//!
//! ```text
//! ask ──► assemble ──► gateway.send
//!                        │
//!          ┌─────────────┴──────────────┐
//!     Complete(text)               Stream(fragments)
//!          │                            │
//!   empty? ─► Answer::Empty       AnswerStream::next_fragment
//!   else commit ─► Answer::Text     Some(f) ... None ─► commit (once)
//! ```

use std::time::{Duration, Instant};

use colloquy_context::CountTokens;
use colloquy_providers::{FragmentStream, GatewayError, GatewayReply, GatewayRequest, ModelGateway};

use crate::errors::AskError;
use crate::session::ConversationSession;

/// Outcome of [`ConversationSession::ask`].
#[derive(Debug)]
pub enum Answer<'s> {
    /// Complete non-streaming answer; already committed to history.
    Text(String),
    /// The provider returned no text. Nothing was committed.
    Empty,
    /// Streaming answer; committed when the stream is exhausted.
    Stream(AnswerStream<'s>),
}

impl Answer<'_> {
    /// Resolves any variant to the final answer text (empty for [`Answer::Empty`]).
    pub async fn into_text(self) -> Result<String, GatewayError> {
        match self {
            Answer::Text(text) => Ok(text),
            Answer::Empty => Ok(String::new()),
            Answer::Stream(stream) => stream.collect().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Committed,
    Failed,
}

/// A streaming answer bound to its session.
///
/// Holds the session's mutable borrow, so no other question can be asked
/// until it is exhausted or dropped. Dropping it early commits nothing.
#[derive(Debug)]
pub struct AnswerStream<'s> {
    session: &'s mut ConversationSession,
    question: String,
    accumulated: String,
    fragments: FragmentStream,
    state: StreamState,
    started: Instant,
    answer_time: Option<Duration>,
}

impl<'s> AnswerStream<'s> {
    fn new(
        session: &'s mut ConversationSession,
        question: String,
        fragments: FragmentStream,
        started: Instant,
    ) -> Self {
        Self {
            session,
            question,
            accumulated: String::new(),
            fragments,
            state: StreamState::Open,
            started,
            answer_time: None,
        }
    }

    /// Next non-empty fragment, or `Ok(None)` once the answer is complete.
    ///
    /// The turn is committed on the call that returns the first `Ok(None)`.
    /// After an error the stream is dead: nothing is committed and later
    /// calls return `Ok(None)`.
    pub async fn next_fragment(&mut self) -> Result<Option<String>, GatewayError> {
        while self.state == StreamState::Open {
            match self.fragments.next_fragment().await {
                Ok(Some(fragment)) if fragment.is_empty() => {}
                Ok(Some(fragment)) => {
                    self.accumulated.push_str(&fragment);
                    return Ok(Some(fragment));
                }
                Ok(None) => {
                    self.state = StreamState::Committed;
                    self.session.commit(
                        std::mem::take(&mut self.question),
                        self.accumulated.clone(),
                    );
                    let elapsed = self.started.elapsed();
                    self.answer_time = Some(elapsed);
                    tracing::info!(
                        model = %self.session.settings().model(),
                        elapsed_ms = elapsed.as_millis(),
                        answer_bytes = self.accumulated.len(),
                        "Answer committed"
                    );
                    return Ok(None);
                }
                Err(e) => {
                    self.state = StreamState::Failed;
                    tracing::warn!(
                        error = %e,
                        partial_bytes = self.accumulated.len(),
                        "Stream failed; turn not committed"
                    );
                    return Err(e);
                }
            }
        }
        Ok(None)
    }

    /// Text received so far.
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state == StreamState::Committed
    }

    /// Time from sending the question to the committed answer.
    #[must_use]
    pub fn answer_time(&self) -> Option<Duration> {
        self.answer_time
    }

    /// Drains the remaining fragments and returns the full answer.
    pub async fn collect(mut self) -> Result<String, GatewayError> {
        while self.next_fragment().await?.is_some() {}
        Ok(std::mem::take(&mut self.accumulated))
    }
}

impl Drop for AnswerStream<'_> {
    fn drop(&mut self) {
        if self.state == StreamState::Open {
            tracing::debug!(
                partial_bytes = self.accumulated.len(),
                "Answer stream dropped before completion; turn discarded"
            );
        }
    }
}

impl ConversationSession {
    /// Asks `question` using the session's streaming setting.
    pub async fn ask<'s, G, C>(
        &'s mut self,
        gateway: &G,
        counter: &C,
        question: impl Into<String>,
    ) -> Result<Answer<'s>, AskError>
    where
        G: ModelGateway + ?Sized,
        C: CountTokens + ?Sized,
    {
        let stream = self.settings().stream();
        self.ask_with_mode(gateway, counter, question, stream).await
    }

    /// Asks `question`, overriding the streaming setting for this call only.
    pub async fn ask_with_mode<'s, G, C>(
        &'s mut self,
        gateway: &G,
        counter: &C,
        question: impl Into<String>,
        stream: bool,
    ) -> Result<Answer<'s>, AskError>
    where
        G: ModelGateway + ?Sized,
        C: CountTokens + ?Sized,
    {
        let question = question.into();
        let started = Instant::now();
        let context = self.assemble(counter, &question)?;
        let model = self.settings().model();

        tracing::info!(
            model = %model,
            stream,
            token_estimate = context.token_estimate(),
            limit = context.limit(),
            included_history = context.included_history(),
            truncated = context.truncated(),
            "Sending question"
        );

        let reply = gateway
            .send(GatewayRequest {
                messages: context.messages(),
                model: &model,
                temperature: self.settings().temperature(),
                stream,
            })
            .await?;

        let answer = match reply {
            GatewayReply::Complete(reply) => match reply.text.filter(|text| !text.is_empty()) {
                Some(text) => {
                    self.commit(question, text.clone());
                    tracing::info!(
                        model = %model,
                        elapsed_ms = started.elapsed().as_millis(),
                        answer_bytes = text.len(),
                        "Answer committed"
                    );
                    Answer::Text(text)
                }
                None => {
                    tracing::info!(
                        model = %model,
                        elapsed_ms = started.elapsed().as_millis(),
                        "Provider returned no text; nothing committed"
                    );
                    Answer::Empty
                }
            },
            GatewayReply::Stream(fragments) => {
                tracing::debug!(
                    model = %model,
                    headers_ms = started.elapsed().as_millis(),
                    "Answer stream opened"
                );
                Answer::Stream(AnswerStream::new(self, question, fragments, started))
            }
        };

        Ok(answer)
    }
}
