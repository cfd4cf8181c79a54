//! Model identifiers and provider enumeration.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend family a model is served by.
///
/// The family also decides the request shape: OpenAI takes a list of
/// role/content messages, Claude takes one prompt string with turn delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Claude,
    OpenAI,
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAI => "openai",
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude",
            Provider::OpenAI => "GPT",
        }
    }

    #[must_use]
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }

    #[must_use]
    pub fn default_model(&self) -> ModelName {
        match self {
            Provider::Claude => ModelName::from_predefined(PredefinedModel::Claude2),
            Provider::OpenAI => ModelName::from_predefined(PredefinedModel::Gpt35Turbo),
        }
    }
}

/// The fixed set of selectable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedModel {
    Claude2,
    Claude1,
    ClaudeV1_100k,
    Gpt35Turbo,
    Gpt35Turbo16k,
    Gpt4,
    Gpt4_32k,
}

const ALL_MODEL_IDS: &[&str] = &[
    "claude-2.0",
    "claude-1",
    "claude-v1-100k",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-16k",
    "gpt-4",
    "gpt-4-32k",
];

impl PredefinedModel {
    #[must_use]
    pub const fn all() -> &'static [PredefinedModel] {
        &[
            PredefinedModel::Claude2,
            PredefinedModel::Claude1,
            PredefinedModel::ClaudeV1_100k,
            PredefinedModel::Gpt35Turbo,
            PredefinedModel::Gpt35Turbo16k,
            PredefinedModel::Gpt4,
            PredefinedModel::Gpt4_32k,
        ]
    }

    #[must_use]
    pub const fn model_id(self) -> &'static str {
        match self {
            PredefinedModel::Claude2 => "claude-2.0",
            PredefinedModel::Claude1 => "claude-1",
            PredefinedModel::ClaudeV1_100k => "claude-v1-100k",
            PredefinedModel::Gpt35Turbo => "gpt-3.5-turbo",
            PredefinedModel::Gpt35Turbo16k => "gpt-3.5-turbo-16k",
            PredefinedModel::Gpt4 => "gpt-4",
            PredefinedModel::Gpt4_32k => "gpt-4-32k",
        }
    }

    #[must_use]
    pub const fn provider(self) -> Provider {
        match self {
            PredefinedModel::Claude2 | PredefinedModel::Claude1 | PredefinedModel::ClaudeV1_100k => {
                Provider::Claude
            }
            PredefinedModel::Gpt35Turbo
            | PredefinedModel::Gpt35Turbo16k
            | PredefinedModel::Gpt4
            | PredefinedModel::Gpt4_32k => Provider::OpenAI,
        }
    }

    pub fn from_model_id(raw: &str) -> Result<Self, ModelParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ModelParseError::EmptyInput);
        }
        Self::all()
            .iter()
            .copied()
            .find(|model| model.model_id().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ModelParseError::UnknownModel {
                raw: trimmed.to_string(),
                expected: ALL_MODEL_IDS,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelParseError {
    #[error("model name cannot be empty")]
    EmptyInput,
    #[error("unknown model '{raw}'; expected one of: {expected:?}")]
    UnknownModel {
        raw: String,
        expected: &'static [&'static str],
    },
}

/// A model from the known set. Existence proves the name was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelName {
    model: PredefinedModel,
}

impl ModelName {
    pub fn parse(raw: &str) -> Result<Self, ModelParseError> {
        PredefinedModel::from_model_id(raw).map(Self::from_predefined)
    }

    #[must_use]
    pub const fn from_predefined(model: PredefinedModel) -> Self {
        Self { model }
    }

    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.model.provider()
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.model.model_id()
    }

    #[must_use]
    pub const fn predefined(&self) -> PredefinedModel {
        self.model
    }
}

impl Default for ModelName {
    fn default() -> Self {
        Provider::default().default_model()
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ModelName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModelName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ModelName::parse(&raw).map_err(D::Error::custom)
    }
}

/// API key tagged with the provider it belongs to.
///
/// `Debug` is manually implemented to redact the key value.
#[derive(Clone)]
pub enum ApiKey {
    Claude(String),
    OpenAI(String),
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKey::Claude(_) => write!(f, "ApiKey::Claude(<redacted>)"),
            ApiKey::OpenAI(_) => write!(f, "ApiKey::OpenAI(<redacted>)"),
        }
    }
}

impl ApiKey {
    #[must_use]
    pub fn provider(&self) -> Provider {
        match self {
            ApiKey::Claude(_) => Provider::Claude,
            ApiKey::OpenAI(_) => Provider::OpenAI,
        }
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        match self {
            ApiKey::Claude(key) | ApiKey::OpenAI(key) => key,
        }
    }
}
