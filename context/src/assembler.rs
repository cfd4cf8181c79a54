//! Context-window-bounded request assembly.
//!
//! The assembler never mutates history. It walks the flattened history from
//! the newest message backwards, pricing each message on its own, and stops
//! at the first message that would push the request over the model's window.
//! Everything older than that message is dropped as well, so the kept history
//! is always a contiguous suffix.

use colloquy_types::Message;

use crate::history::HistoryStore;
use crate::model_limits::{ModelRegistry, UnknownModelError};
use crate::token_counter::CountTokens;

/// A request-ready message list. Derived per request and never stored.
///
/// The first message is always the system prompt and the last is always the
/// question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    messages: Vec<Message>,
    token_estimate: u32,
    limit: u32,
    included_history: usize,
    truncated: bool,
}

impl AssembledContext {
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Base cost plus the per-message cost of every accepted history message.
    #[must_use]
    pub fn token_estimate(&self) -> u32 {
        self.token_estimate
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of history messages between the system prompt and the question.
    #[must_use]
    pub fn included_history(&self) -> usize {
        self.included_history
    }

    /// Whether some history was left out.
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

pub struct HistoryAssembler<'a, C: ?Sized> {
    registry: &'a ModelRegistry,
    counter: &'a C,
}

impl<'a, C: CountTokens + ?Sized> HistoryAssembler<'a, C> {
    #[must_use]
    pub fn new(registry: &'a ModelRegistry, counter: &'a C) -> Self {
        Self { registry, counter }
    }

    /// Builds `[system, ..suffix of history.., question]` within the model's window.
    ///
    /// If the system prompt and question alone exceed the window, the result
    /// is exactly `[system, question]`; the provider gets to reject it.
    pub fn assemble(
        &self,
        history: &HistoryStore,
        model: &str,
        system: &Message,
        question: &Message,
    ) -> Result<AssembledContext, UnknownModelError> {
        let limit = self.registry.context_window(model)?.tokens();

        let mut total = self
            .counter
            .count(&[system.clone(), question.clone()], model);
        let available = history.message_count();

        if total > limit {
            tracing::warn!(
                model,
                limit,
                base_tokens = total,
                "System prompt and question exceed the context window; sending without history"
            );
            return Ok(AssembledContext {
                messages: vec![system.clone(), question.clone()],
                token_estimate: total,
                limit,
                included_history: 0,
                truncated: available > 0,
            });
        }

        let mut accepted: Vec<&Message> = Vec::new();
        for candidate in history.messages().rev() {
            let cost = self.counter.count(std::slice::from_ref(candidate), model);
            let next = total.saturating_add(cost);
            if next > limit {
                break;
            }
            total = next;
            accepted.push(candidate);
        }

        let included_history = accepted.len();
        let truncated = included_history < available;
        if truncated {
            tracing::debug!(
                model,
                limit,
                included_history,
                dropped = available - included_history,
                "Trimmed oldest history to fit the context window"
            );
        }

        let mut messages = Vec::with_capacity(included_history + 2);
        messages.push(system.clone());
        messages.extend(accepted.into_iter().rev().cloned());
        messages.push(question.clone());

        Ok(AssembledContext {
            messages,
            token_estimate: total,
            limit,
            included_history,
            truncated,
        })
    }
}
