//! Context window management for conversations.
//!
//! This crate provides:
//! - Per-model context windows
//! - Approximate token counting via tiktoken
//! - Turn-based conversation history
//! - History assembly bounded by the context window
//! - The document-retrieval boundary and knowledge snippet assembly
//! - Atomic file writes for config and exports
//!
//! # Architecture
//!
//! ```text
//! HistoryAssembler (per request)
//! ├── registry: ModelRegistry (window per model)
//! ├── counter: impl CountTokens (TokenCounter in production)
//! └── reads HistoryStore (never mutates it)
//!
//! AssembledContext (ephemeral)
//! └── [system, ..newest history that fits.., question]
//! ```

mod assembler;
mod atomic_write;
mod history;
mod model_limits;
pub mod retrieval;
mod token_counter;

pub use assembler::{AssembledContext, HistoryAssembler};
pub use atomic_write::{
    AtomicWriteOptions, atomic_write, atomic_write_new, atomic_write_with_options,
};
pub use history::HistoryStore;
pub use model_limits::{
    ContextWindowSource, ModelRegistry, ResolvedContextWindow, UnknownModelError,
};
pub use retrieval::{
    ChunkMetadata, DocumentChunk, DocumentIndex, DocumentMatch, InMemoryIndex, IndexError,
    IndexFut,
};
pub use token_counter::{CountTokens, TokenCounter};
