use std::path::PathBuf;

use colloquy_context::UnknownModelError;
use colloquy_providers::GatewayError;
use thiserror::Error;

/// Why a question could not be answered. History is untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AskError {
    /// The model has no known context window.
    #[error("configuration error: {0}")]
    Configuration(#[from] UnknownModelError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: the conversation is empty")]
    Empty,
    #[error("failed to serialize conversation: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write export to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
