//! Conversation engine for Colloquy.
//!
//! [`ConversationSession`] owns the settings, the turn history and the
//! context-window registry. [`ConversationSession::ask`] assembles a bounded
//! message list, calls a [`ModelGateway`], and integrates the reply: a
//! complete answer is committed at once, a streamed one when its
//! [`AnswerStream`] is exhausted.
//!
//! [`ground_question`] optionally prefixes a question with excerpts from a
//! [`DocumentIndex`] before it is asked.
//!
//! The engine never depends on a concrete gateway; the binary passes an
//! [`HttpGateway`] and tests pass scripted fakes.

mod commands;
mod errors;
mod init;
mod integrator;
mod knowledge;
mod session;

pub use commands::{
    Command, CommandOutcome, CommandSpec, command_help_summary, command_specs, parse_assignments,
};
pub use errors::{AskError, ExportError};
pub use init::gateway_config;
pub use integrator::{Answer, AnswerStream};
pub use knowledge::ground_question;
pub use session::ConversationSession;

// Re-export from crates for public API
pub use colloquy_config::{ColloquyConfig, ConfigError};
pub use colloquy_context::{
    AssembledContext, CountTokens, DocumentIndex, HistoryStore, InMemoryIndex, IndexError,
    ModelRegistry, TokenCounter, UnknownModelError,
};
pub use colloquy_providers::{
    self, FragmentStream, GatewayConfig, GatewayError, HttpGateway, ModelGateway,
};
pub use colloquy_types::{
    ChatSettings, Message, ModelName, PredefinedModel, Provider, Role, SettingsError,
    SettingsUpdate, Temperature, Turn,
};
