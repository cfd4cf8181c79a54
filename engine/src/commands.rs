//! Slash commands for the REPL: /quit, /clear, /export, /set, /ctx, /help.

use std::path::Path;

use colloquy_types::{SettingsError, SettingsUpdate};

use crate::session::ConversationSession;

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub help_label: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec {
        help_label: "q(uit)",
        usage: "/quit",
        description: "Exit the application",
    },
    CommandSpec {
        help_label: "clear",
        usage: "/clear",
        description: "Clear conversation history",
    },
    CommandSpec {
        help_label: "export",
        usage: "/export [dir]",
        description: "Save the conversation as messages_<timestamp>.json",
    },
    CommandSpec {
        help_label: "set",
        usage: "/set key=value ...",
        description: "Change model, temperature, system_prompt or stream",
    },
    CommandSpec {
        help_label: "ctx",
        usage: "/ctx",
        description: "Show context window and history size",
    },
    CommandSpec {
        help_label: "help",
        usage: "/help",
        description: "Show available commands",
    },
];

#[must_use]
pub fn command_specs() -> &'static [CommandSpec] {
    COMMAND_SPECS
}

#[must_use]
pub fn command_help_summary() -> String {
    let labels: Vec<&str> = COMMAND_SPECS.iter().map(|spec| spec.help_label).collect();
    format!("Commands: /{}", labels.join(", /"))
}

fn command_help_detail() -> String {
    let width = COMMAND_SPECS
        .iter()
        .map(|spec| spec.usage.len())
        .max()
        .unwrap_or(0);
    COMMAND_SPECS
        .iter()
        .map(|spec| format!("  {:<width$}  {}", spec.usage, spec.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parsed command with typed arguments. Input is the line without its leading `/`.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Quit,
    Clear,
    Export(Option<&'a str>),
    /// Everything after `set`, parsed by [`parse_assignments`].
    Set(&'a str),
    Context,
    Help,
    Unknown(&'a str),
    Empty,
}

impl<'a> Command<'a> {
    /// Parse a raw command string into a typed Command.
    #[must_use]
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim_start();
        let (name, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (trimmed.trim_end(), ""),
        };
        let first_arg = rest.split_whitespace().next();

        match name {
            "" => Command::Empty,
            "q" | "quit" => Command::Quit,
            "clear" => Command::Clear,
            "export" => Command::Export(first_arg),
            "set" => Command::Set(rest),
            "context" | "ctx" => Command::Context,
            "help" => Command::Help,
            other => Command::Unknown(other),
        }
    }
}

/// Parses `key=value` pairs into one update.
///
/// A word without `=` continues the previous value, so
/// `system_prompt=Answer in French stream=on` sets a multi-word prompt.
pub fn parse_assignments(args: &str) -> Result<SettingsUpdate, SettingsError> {
    let mut pairs: Vec<(&str, String)> = Vec::new();
    for word in args.split_whitespace() {
        if let Some((key, value)) = word.split_once('=') {
            pairs.push((key, value.to_string()));
        } else if let Some((_, value)) = pairs.last_mut() {
            value.push(' ');
            value.push_str(word);
        } else {
            return Err(SettingsError::InvalidValue {
                key: "set",
                value: word.to_string(),
            });
        }
    }

    let mut update = SettingsUpdate::default();
    for (key, value) in &pairs {
        update.set(key, value)?;
    }
    Ok(update)
}

/// What the REPL should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Quit,
    /// Informational output for the user.
    Message(String),
    /// Settings were changed; the message describes the new settings.
    SettingsChanged(String),
}

impl ConversationSession {
    /// Runs a slash command against this session.
    pub fn run_command(&mut self, command: Command<'_>, default_export_dir: &Path) -> CommandOutcome {
        match command {
            Command::Quit => CommandOutcome::Quit,
            Command::Clear => {
                self.reset(None);
                CommandOutcome::Message("Conversation cleared".to_string())
            }
            Command::Export(dir) => {
                let dir = dir.map_or(default_export_dir, Path::new);
                match self.save_export(dir) {
                    Ok(path) => CommandOutcome::Message(format!("Exported to {}", path.display())),
                    Err(e) => CommandOutcome::Message(format!("Export failed: {e}")),
                }
            }
            Command::Set(args) => {
                let update = match parse_assignments(args) {
                    Ok(update) if update.is_empty() => {
                        return CommandOutcome::Message(format!(
                            "Usage: /set key=value ...\n{}",
                            self.describe_settings()
                        ));
                    }
                    Ok(update) => update,
                    Err(e) => return CommandOutcome::Message(format!("Invalid setting: {e}")),
                };
                match self.update_settings(update) {
                    Ok(()) => CommandOutcome::SettingsChanged(self.describe_settings()),
                    Err(e) => CommandOutcome::Message(format!("Invalid setting: {e}")),
                }
            }
            Command::Context => CommandOutcome::Message(self.describe_context()),
            Command::Help => CommandOutcome::Message(format!(
                "{}\n{}",
                command_help_summary(),
                command_help_detail()
            )),
            Command::Unknown(cmd) => CommandOutcome::Message(format!(
                "Unknown command /{cmd}. {}",
                command_help_summary()
            )),
            Command::Empty => CommandOutcome::Message(command_help_summary()),
        }
    }

    #[must_use]
    pub fn describe_settings(&self) -> String {
        let settings = self.settings();
        format!(
            "model={} temperature={} stream={} system_prompt={:?}",
            settings.model(),
            settings.temperature(),
            settings.stream(),
            settings.system_prompt()
        )
    }

    fn describe_context(&self) -> String {
        let model = self.settings().model();
        let window = match self.context_window() {
            Ok(window) => format!("{} tokens", window.tokens()),
            Err(e) => format!("unavailable ({e})"),
        };
        format!(
            "Model: {model}\nContext window: {window}\nHistory: {} turns ({} messages)",
            self.history().len(),
            self.history().message_count()
        )
    }
}
