//! Resolved conversation settings.
//!
//! Raw TOML structs (with `Option` fields) stay in `colloquy-config`. These
//! types are what the rest of the workspace sees: every value has already been
//! validated at the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ModelName, ModelParseError};

/// Used whenever the configured system prompt is blank.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

pub const DEFAULT_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("temperature must be within [0, 1] (got {0})")]
    TemperatureOutOfRange(f32),
    #[error(transparent)]
    Model(#[from] ModelParseError),
    #[error("unknown setting '{0}'")]
    UnknownKey(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Sampling temperature in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> Result<Self, SettingsError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SettingsError::TemperatureOutOfRange(value))
        }
    }

    #[must_use]
    pub const fn get(self) -> f32 {
        self.0
    }

    /// Widened the way it was written: `0.1`, not `0.10000000149011612`.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        self.0
            .to_string()
            .parse::<f64>()
            .unwrap_or_else(|_| f64::from(self.0))
    }
}

impl Default for Temperature {
    fn default() -> Self {
        Self(DEFAULT_TEMPERATURE)
    }
}

impl TryFrom<f32> for Temperature {
    type Error = SettingsError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Temperature> for f32 {
    fn from(value: Temperature) -> Self {
        value.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Settings that drive history assembly and response integration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    model: ModelName,
    temperature: Temperature,
    system_prompt: String,
    stream: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: ModelName::default(),
            temperature: Temperature::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            stream: false,
        }
    }
}

fn resolve_system_prompt(prompt: String) -> String {
    if prompt.trim().is_empty() {
        DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        prompt
    }
}

impl ChatSettings {
    #[must_use]
    pub fn new(
        model: ModelName,
        temperature: Temperature,
        system_prompt: impl Into<String>,
        stream: bool,
    ) -> Self {
        Self {
            model,
            temperature,
            system_prompt: resolve_system_prompt(system_prompt.into()),
            stream,
        }
    }

    #[must_use]
    pub fn model(&self) -> ModelName {
        self.model
    }

    #[must_use]
    pub fn temperature(&self) -> Temperature {
        self.temperature
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    #[must_use]
    pub fn stream(&self) -> bool {
        self.stream
    }

    /// Replaces only the fields present in `update`.
    ///
    /// Every provided field is validated before anything is assigned, so a
    /// rejected update leaves the settings untouched.
    pub fn apply(&mut self, update: SettingsUpdate) -> Result<(), SettingsError> {
        let temperature = update.temperature.map(Temperature::new).transpose()?;

        if let Some(model) = update.model {
            self.model = model;
        }
        if let Some(temperature) = temperature {
            self.temperature = temperature;
        }
        if let Some(prompt) = update.system_prompt {
            self.system_prompt = resolve_system_prompt(prompt);
        }
        if let Some(stream) = update.stream {
            self.stream = stream;
        }
        Ok(())
    }
}

/// Partial settings change. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsUpdate {
    pub model: Option<ModelName>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub stream: Option<bool>,
}

impl SettingsUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.temperature.is_none()
            && self.system_prompt.is_none()
            && self.stream.is_none()
    }

    /// Sets one field from a `key` / `value` pair as typed on the command line.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        match key {
            "model" => self.model = Some(ModelName::parse(value)?),
            "temperature" | "temp" => {
                let parsed = value
                    .parse::<f32>()
                    .map_err(|_| SettingsError::InvalidValue {
                        key: "temperature",
                        value: value.to_string(),
                    })?;
                self.temperature = Some(parsed);
            }
            "system_prompt" | "prompt" => self.system_prompt = Some(value.to_string()),
            "stream" => {
                let parsed = match value.to_ascii_lowercase().as_str() {
                    "true" | "on" | "yes" | "1" => true,
                    "false" | "off" | "no" | "0" => false,
                    _ => {
                        return Err(SettingsError::InvalidValue {
                            key: "stream",
                            value: value.to_string(),
                        });
                    }
                };
                self.stream = Some(parsed);
            }
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}
