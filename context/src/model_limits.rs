//! Context-window registry.
//!
//! [`ModelRegistry`] maps a model name to the number of tokens a request to
//! that model may occupy. Unlike a best-effort budget, a missing entry is an
//! error: assembling a request for a model with no known window is refused
//! rather than guessed.

use std::collections::HashMap;

use thiserror::Error;

/// Raised when a model has no context window on record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no context window is configured for model '{model}'")]
pub struct UnknownModelError {
    model: String,
}

impl UnknownModelError {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Where a context window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextWindowSource {
    /// Exact match from an override (usually the config file).
    Override,
    /// Built-in table entry.
    Builtin,
}

/// Result of looking up a context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedContextWindow {
    tokens: u32,
    source: ContextWindowSource,
}

impl ResolvedContextWindow {
    #[must_use]
    pub const fn new(tokens: u32, source: ContextWindowSource) -> Self {
        Self { tokens, source }
    }

    #[must_use]
    pub const fn tokens(self) -> u32 {
        self.tokens
    }

    #[must_use]
    pub const fn source(self) -> ContextWindowSource {
        self.source
    }
}

/// Built-in context windows. `claude-v1-100k` is deliberately absent.
const KNOWN_WINDOWS: &[(&str, u32)] = &[
    ("claude-2.0", 100_000),
    ("claude-1", 100_000),
    ("gpt-3.5-turbo", 4_096),
    ("gpt-3.5-turbo-16k", 16_384),
    ("gpt-4", 8_192),
    ("gpt-4-32k", 32_768),
];

/// Registry of context windows with support for custom overrides.
///
/// Lookup order:
/// 1. Exact match in overrides
/// 2. Exact match in the built-in table
/// 3. [`UnknownModelError`]
///
/// # Example
///
/// ```
/// use colloquy_context::{ContextWindowSource, ModelRegistry};
///
/// let mut registry = ModelRegistry::new();
/// assert_eq!(registry.context_window("gpt-4").unwrap().tokens(), 8_192);
/// assert!(registry.context_window("claude-v1-100k").is_err());
///
/// registry.set_override("claude-v1-100k", 100_000);
/// let resolved = registry.context_window("claude-v1-100k").unwrap();
/// assert_eq!(resolved.source(), ContextWindowSource::Override);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    overrides: HashMap<String, u32>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry whose overrides come from `(model, tokens)` pairs.
    #[must_use]
    pub fn with_overrides<I, S>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self {
            overrides: overrides
                .into_iter()
                .map(|(model, tokens)| (model.into(), tokens))
                .collect(),
        }
    }

    pub fn context_window(&self, model: &str) -> Result<ResolvedContextWindow, UnknownModelError> {
        if let Some(tokens) = self.overrides.get(model) {
            return Ok(ResolvedContextWindow::new(
                *tokens,
                ContextWindowSource::Override,
            ));
        }

        KNOWN_WINDOWS
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, tokens)| ResolvedContextWindow::new(*tokens, ContextWindowSource::Builtin))
            .ok_or_else(|| UnknownModelError::new(model))
    }

    /// Overrides take precedence over the built-in table for exact matches.
    pub fn set_override(&mut self, model: impl Into<String>, tokens: u32) {
        self.overrides.insert(model.into(), tokens);
    }
}
