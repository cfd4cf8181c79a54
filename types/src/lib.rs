//! Core domain types for Colloquy.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod model;
mod settings;

pub use model::{ApiKey, ModelName, ModelParseError, PredefinedModel, Provider};
pub use settings::{
    ChatSettings, DEFAULT_SYSTEM_PROMPT, DEFAULT_TEMPERATURE, SettingsError, SettingsUpdate,
    Temperature,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation. Immutable once created.
///
/// Content may be empty: a stream that produced no text still commits an
/// (empty) assistant answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn role_str(&self) -> &'static str {
        self.role.as_str()
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// A completed question/answer exchange.
///
/// Built from two strings so the user/assistant roles hold by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    question: Message,
    answer: Message,
}

impl Turn {
    #[must_use]
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: Message::user(question),
            answer: Message::assistant(answer),
        }
    }

    #[must_use]
    pub fn question(&self) -> &Message {
        &self.question
    }

    #[must_use]
    pub fn answer(&self) -> &Message {
        &self.answer
    }

    /// Question then answer.
    #[must_use]
    pub fn messages(&self) -> [&Message; 2] {
        [&self.question, &self.answer]
    }
}

// ============================================================================
// Streaming Events
// ============================================================================

/// Streaming event from a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text content delta.
    TextDelta(String),
    /// Stream completed.
    Done,
    /// Error occurred.
    Error(String),
}
