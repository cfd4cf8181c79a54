//! Token counting using tiktoken.
//!
//! Counts are **approximate**. OpenAI chat models are counted with their own
//! encoding; everything else (Claude included) is counted with `cl100k_base`,
//! which is close enough to budget a context window but will not match the
//! vendor's billing numbers exactly.
//!
//! Chat framing follows the OpenAI cookbook: each message costs a fixed
//! overhead plus its role and content tokens, and every non-empty request is
//! primed with three extra tokens for the assistant reply.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use colloquy_types::Message;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

/// Anything that can price a message list for a given model.
///
/// Implementations must be deterministic, never fail, and be monotone:
/// appending a message never lowers the count.
pub trait CountTokens {
    fn count(&self, messages: &[Message], model: &str) -> u32;
}

impl<T: CountTokens + ?Sized> CountTokens for &T {
    fn count(&self, messages: &[Message], model: &str) -> u32 {
        (**self).count(messages, model)
    }
}

/// Tokens added once per non-empty request to prime the assistant reply.
const REPLY_PRIMING_TOKENS: u32 = 3;

/// Loading a vocabulary is expensive, so each encoding is built once and
/// shared by every `TokenCounter`.
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

/// Models already reported as lacking a tokenizer.
static UNMAPPED_MODELS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// True the first time `model` is seen without a tokenizer mapping.
fn first_unmapped(model: &str) -> bool {
    let seen = UNMAPPED_MODELS.get_or_init(Mutex::default);
    match seen.lock() {
        Ok(mut seen) => !seen.contains(model) && seen.insert(model.to_string()),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Cl100k,
    O200k,
}

impl Encoding {
    const fn name(self) -> &'static str {
        match self {
            Encoding::Cl100k => "cl100k_base",
            Encoding::O200k => "o200k_base",
        }
    }

    fn encoder(self) -> Option<&'static CoreBPE> {
        let cell = match self {
            Encoding::Cl100k => &CL100K,
            Encoding::O200k => &O200K,
        };
        cell.get_or_init(|| {
            let loaded = match self {
                Encoding::Cl100k => cl100k_base(),
                Encoding::O200k => o200k_base(),
            };
            match loaded {
                Ok(bpe) => Some(bpe),
                Err(e) => {
                    tracing::error!(
                        encoding = self.name(),
                        error = %e,
                        "Failed to initialize tiktoken encoder. Falling back to byte-length estimates."
                    );
                    None
                }
            }
        })
        .as_ref()
    }

    /// `None` when the model has no known tokenizer.
    fn for_model(model: &str) -> Option<Self> {
        if model.starts_with("gpt-4o") || model.starts_with("o1") || model.starts_with("o3") {
            Some(Encoding::O200k)
        } else if model.starts_with("gpt-4")
            || model.starts_with("gpt-3.5")
            || model.starts_with("text-embedding")
        {
            Some(Encoding::Cl100k)
        } else {
            None
        }
    }
}

fn tokens_per_message(model: &str) -> u32 {
    // Only the first gpt-3.5 snapshot wrapped messages in an extra token.
    if model == "gpt-3.5-turbo-0301" {
        4
    } else {
        3
    }
}

/// Thread-safe approximate token counter backed by tiktoken.
///
/// # Example
///
/// ```
/// use colloquy_context::{CountTokens, TokenCounter};
/// use colloquy_types::Message;
///
/// let counter = TokenCounter::new();
/// assert!(counter.count_str("Hello, world!") > 0);
///
/// let messages = [Message::user("Hi")];
/// assert!(counter.count(&messages, "gpt-4") > counter.count_str("Hi"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Counts the tokens of a bare string with the default encoding.
    #[must_use]
    pub fn count_str(&self, text: &str) -> u32 {
        encode_len(Encoding::Cl100k, text)
    }
}

fn count_message(message: &Message, encoding: Encoding, overhead: u32) -> u32 {
    overhead + encode_len(encoding, message.role_str()) + encode_len(encoding, message.content())
}

fn encode_len(encoding: Encoding, text: &str) -> u32 {
    let len = match encoding.encoder() {
        Some(encoder) => encoder.encode_ordinary(text).len(),
        None => text.len(),
    };
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl CountTokens for TokenCounter {
    fn count(&self, messages: &[Message], model: &str) -> u32 {
        if messages.is_empty() {
            return 0;
        }

        let encoding = Encoding::for_model(model).unwrap_or_else(|| {
            if first_unmapped(model) {
                tracing::debug!(model, "No tokenizer mapping for model; using cl100k_base");
            }
            Encoding::Cl100k
        });
        let overhead = tokens_per_message(model);

        messages
            .iter()
            .map(|message| count_message(message, encoding, overhead))
            .fold(REPLY_PRIMING_TOKENS, u32::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::{CountTokens, Encoding, TokenCounter, first_unmapped};
    use colloquy_types::Message;

    #[test]
    fn count_str_empty_string() {
        assert_eq!(TokenCounter::new().count_str(""), 0);
    }

    #[test]
    fn count_str_longer_text() {
        let tokens = TokenCounter::new().count_str("The quick brown fox jumps over the lazy dog.");
        assert!(tokens >= 5);
        assert!(tokens <= 20);
    }

    #[test]
    fn empty_list_costs_nothing() {
        assert_eq!(TokenCounter::new().count(&[], "gpt-4"), 0);
    }

    #[test]
    fn single_message_framing() {
        let counter = TokenCounter::new();
        let msg = Message::user("Hello!");

        let expected = 3 + counter.count_str("user") + counter.count_str("Hello!") + 3;
        assert_eq!(counter.count(&[msg], "gpt-3.5-turbo"), expected);
    }

    #[test]
    fn legacy_snapshot_uses_four_token_overhead() {
        let counter = TokenCounter::new();
        let messages = [Message::system("sys"), Message::user("question")];

        let modern = counter.count(&messages, "gpt-3.5-turbo");
        let legacy = counter.count(&messages, "gpt-3.5-turbo-0301");
        assert_eq!(legacy, modern + 2);
    }

    #[test]
    fn unknown_model_counts_with_default_encoding() {
        let counter = TokenCounter::new();
        let messages = [Message::user("How long is a piece of string?")];

        assert_eq!(
            counter.count(&messages, "claude-2.0"),
            counter.count(&messages, "gpt-4"),
        );
        assert!(counter.count(&messages, "definitely-not-a-model") > 0);
    }

    #[test]
    fn count_is_monotone_under_appending() {
        let counter = TokenCounter::new();
        let mut messages = vec![Message::system("You are terse.")];
        let mut previous = counter.count(&messages, "gpt-4");

        for text in ["a", "", "longer message with several words", "z"] {
            messages.push(Message::assistant(text));
            let next = counter.count(&messages, "gpt-4");
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn encoding_selection() {
        assert_eq!(Encoding::for_model("gpt-4o-mini"), Some(Encoding::O200k));
        assert_eq!(Encoding::for_model("gpt-4-32k"), Some(Encoding::Cl100k));
        assert_eq!(Encoding::for_model("claude-1"), None);
    }

    #[test]
    fn unmapped_model_is_reported_once() {
        let model = "unmapped-model-for-report-once";
        assert!(first_unmapped(model));
        assert!(!first_unmapped(model));

        let counter = TokenCounter::new();
        counter.count(&[Message::user("q")], model);
        assert!(!first_unmapped(model));
    }

    #[test]
    fn counter_reference_counts_the_same() {
        let counter = TokenCounter::new();
        let by_ref = &counter;
        let messages = [Message::user("same")];
        assert_eq!(
            by_ref.count(&messages, "gpt-4"),
            counter.count(&messages, "gpt-4")
        );
    }
}
