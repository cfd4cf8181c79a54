//! Configuration loading, parsing, and persistence for Colloquy.
//!
//! The file lives at `~/.colloquy/config.toml`. Every section is optional;
//! missing values fall back to the defaults in `colloquy-types`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

use colloquy_context::{AtomicWriteOptions, atomic_write_with_options};
use colloquy_types::{
    ApiKey, ChatSettings, DEFAULT_SYSTEM_PROMPT, ModelName, Provider, SettingsError, Temperature,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Default, Deserialize)]
pub struct ColloquyConfig {
    pub app: Option<AppConfig>,
    pub api_keys: Option<ApiKeys>,
    pub openai: Option<OpenAIConfig>,
    pub anthropic: Option<AnthropicConfig>,
    pub models: Option<ModelsConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config at {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not determine home directory for config")]
    NoHomeDir,
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Write { path, .. } => Some(path),
            ConfigError::NoHomeDir => None,
        }
    }
}

/// `[app]`: the conversation settings.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub stream: Option<bool>,
}

#[derive(Default, Deserialize)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(opt: Option<&String>) -> &'static str {
            if opt.is_some() { "[REDACTED]" } else { "None" }
        }
        f.debug_struct("ApiKeys")
            .field("anthropic", &mask(self.anthropic.as_ref()))
            .field("openai", &mask(self.openai.as_ref()))
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAIConfig {
    pub api_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnthropicConfig {
    pub api_base: Option<String>,
    pub max_tokens_to_sample: Option<u32>,
}

/// `[models]`: per-model overrides.
#[derive(Debug, Default, Deserialize)]
pub struct ModelsConfig {
    /// Context window sizes, keyed by model name. Adds to or replaces the built-in table.
    #[serde(default)]
    pub context_windows: HashMap<String, u32>,
}

/// Replaces `${VAR}` references with the variable's value (empty if unset).
///
/// An unterminated `${` is kept literally.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ColloquyConfig {
    /// Loads `~/.colloquy/config.toml`. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "Failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        toml::from_str(&content).map(Some).map_err(|source| {
            tracing::warn!(path = %path.display(), %source, "Failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Validated settings from `[app]`, with defaults for anything missing.
    pub fn chat_settings(&self) -> Result<ChatSettings, SettingsError> {
        let Some(app) = self.app.as_ref() else {
            return Ok(ChatSettings::default());
        };

        let model = match app.model.as_deref() {
            Some(raw) => ModelName::parse(raw)?,
            None => ModelName::default(),
        };
        let temperature = match app.temperature {
            Some(value) => Temperature::new(value)?,
            None => Temperature::default(),
        };
        let system_prompt = app
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        Ok(ChatSettings::new(
            model,
            temperature,
            system_prompt,
            app.stream.unwrap_or(false),
        ))
    }

    /// Key from `[api_keys]` (with `${VAR}` expansion), else the provider's environment variable.
    #[must_use]
    pub fn api_key(&self, provider: Provider) -> Option<ApiKey> {
        let configured = self.api_keys.as_ref().and_then(|keys| match provider {
            Provider::Claude => keys.anthropic.as_deref(),
            Provider::OpenAI => keys.openai.as_deref(),
        });

        configured
            .and_then(|raw| non_empty(&expand_env_vars(raw)))
            .or_else(|| env::var(provider.env_var()).ok().and_then(|v| non_empty(&v)))
            .map(|key| match provider {
                Provider::Claude => ApiKey::Claude(key),
                Provider::OpenAI => ApiKey::OpenAI(key),
            })
    }

    #[must_use]
    pub fn openai_api_base(&self) -> Option<&str> {
        self.openai.as_ref()?.api_base.as_deref()
    }

    #[must_use]
    pub fn anthropic_api_base(&self) -> Option<&str> {
        self.anthropic.as_ref()?.api_base.as_deref()
    }

    #[must_use]
    pub fn max_tokens_to_sample(&self) -> Option<u32> {
        self.anthropic.as_ref()?.max_tokens_to_sample
    }

    #[must_use]
    pub fn context_window_overrides(&self) -> HashMap<String, u32> {
        self.models
            .as_ref()
            .map(|models| models.context_windows.clone())
            .unwrap_or_default()
    }

    /// Writes `settings` into the `[app]` table of the config file.
    ///
    /// Uses `toml_edit` to preserve comments and formatting.
    /// Creates the config file and parent directory if they don't exist.
    pub fn persist_settings(settings: &ChatSettings) -> Result<(), ConfigError> {
        let path = config_path().ok_or(ConfigError::NoHomeDir)?;
        persist_settings_to(&path, settings)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let metadata = fs::metadata(path)?;
    // Only modify permissions if we own the entry
    let our_uid = unsafe { libc::getuid() };
    if metadata.uid() == our_uid && metadata.permissions().mode() & 0o077 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

pub fn persist_settings_to(path: &Path, settings: &ChatSettings) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(write_err)?;
        #[cfg(unix)]
        restrict_permissions(parent, 0o700).map_err(write_err)?;
    }

    let content = if path.exists() {
        fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        String::new()
    };

    let mut doc = content
        .parse::<toml_edit::DocumentMut>()
        .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    if !doc.contains_key("app") {
        doc["app"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    doc["app"]["model"] = toml_edit::value(settings.model().as_str());
    doc["app"]["temperature"] = toml_edit::value(settings.temperature().as_f64());
    doc["app"]["system_prompt"] = toml_edit::value(settings.system_prompt());
    doc["app"]["stream"] = toml_edit::value(settings.stream());

    atomic_write_with_options(
        path,
        doc.to_string().as_bytes(),
        AtomicWriteOptions {
            sync_all: true,
            dir_sync: true,
            unix_mode: Some(0o600),
        },
    )
    .map_err(write_err)?;

    #[cfg(unix)]
    restrict_permissions(path, 0o600).map_err(write_err)?;

    tracing::info!(path = %path.display(), model = %settings.model(), "Persisted settings");
    Ok(())
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".colloquy").join("config.toml"))
}
