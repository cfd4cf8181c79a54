//! Per-conversation state: settings, history and the context-window registry.

use std::path::{Path, PathBuf};

use colloquy_context::{
    AssembledContext, AtomicWriteOptions, CountTokens, HistoryAssembler, HistoryStore,
    ModelRegistry, ResolvedContextWindow, UnknownModelError, atomic_write_new,
};
use colloquy_types::{ChatSettings, Message, SettingsError, SettingsUpdate, Turn};

use crate::errors::ExportError;

const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// One conversation. Turns are only appended by the response integrator.
#[derive(Debug, Clone, Default)]
pub struct ConversationSession {
    settings: ChatSettings,
    history: HistoryStore,
    registry: ModelRegistry,
}

impl ConversationSession {
    #[must_use]
    pub fn new(settings: ChatSettings, registry: ModelRegistry) -> Self {
        Self {
            settings,
            history: HistoryStore::new(),
            registry,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Applies every field of `update` or none of them.
    pub fn update_settings(&mut self, update: SettingsUpdate) -> Result<(), SettingsError> {
        let previous_model = self.settings.model();
        self.settings.apply(update)?;
        if self.settings.model() != previous_model {
            tracing::info!(
                from = %previous_model,
                to = %self.settings.model(),
                "Model changed"
            );
        }
        Ok(())
    }

    /// Clears history and, if given, replaces the settings.
    pub fn reset(&mut self, settings: Option<ChatSettings>) {
        let dropped = self.history.len();
        self.history.clear();
        if let Some(settings) = settings {
            self.settings = settings;
        }
        tracing::debug!(dropped_turns = dropped, "Conversation reset");
    }

    pub fn context_window(&self) -> Result<ResolvedContextWindow, UnknownModelError> {
        self.registry.context_window(self.settings.model().as_str())
    }

    /// The bounded message list that would be sent for `question` right now.
    pub fn assemble<C>(&self, counter: &C, question: &str) -> Result<AssembledContext, UnknownModelError>
    where
        C: CountTokens + ?Sized,
    {
        let system = Message::system(self.settings.system_prompt());
        let question = Message::user(question);
        HistoryAssembler::new(&self.registry, counter).assemble(
            &self.history,
            self.settings.model().as_str(),
            &system,
            &question,
        )
    }

    pub(crate) fn commit(&mut self, question: String, answer: String) {
        self.history.push(Turn::new(question, answer));
        tracing::debug!(turns = self.history.len(), "Committed turn");
    }

    /// The full history as a JSON array of `{role, content}`.
    pub fn export_json(&self) -> serde_json::Result<String> {
        self.history.export_json()
    }

    /// Writes the history to `dir/messages_<local time>.json` and returns the path.
    pub fn save_export(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        if self.history.is_empty() {
            return Err(ExportError::Empty);
        }

        let json = self.export_json()?;
        let stamp = chrono::Local::now().format(EXPORT_TIMESTAMP_FORMAT);
        let path = dir.join(format!("messages_{stamp}.json"));

        atomic_write_new(
            &path,
            json.as_bytes(),
            AtomicWriteOptions {
                sync_all: true,
                dir_sync: false,
                unix_mode: None,
            },
        )
        .map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), turns = self.history.len(), "Exported conversation");
        Ok(path)
    }
}
