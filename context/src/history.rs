//! Conversation history storage.
//!
//! History is an ordered list of completed [`Turn`]s, oldest first. It only
//! grows by whole turns and only shrinks by [`HistoryStore::clear`]; trimming
//! for the context window happens on a derived copy, never here.

use colloquy_types::{Message, Turn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStore {
    turns: Vec<Turn>,
}

impl HistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of flattened messages (always even).
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.turns.len() * 2
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Flattened view: `q1, a1, q2, a2, ...`.
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.turns.iter().flat_map(|turn| turn.messages())
    }

    /// Serializes the flattened messages as a JSON array of `{role, content}`.
    pub fn export_json(&self) -> serde_json::Result<String> {
        let messages: Vec<&Message> = self.messages().collect();
        serde_json::to_string_pretty(&messages)
    }
}

impl FromIterator<Turn> for HistoryStore {
    fn from_iter<I: IntoIterator<Item = Turn>>(iter: I) -> Self {
        Self {
            turns: iter.into_iter().collect(),
        }
    }
}
