//! Colloquy CLI - a line-oriented chat REPL.
//!
//! ```text
//! main() -> load config -> ConversationSession + HttpGateway -> repl()
//!                                                    |
//!             "/..." -> Command::parse -> run_command | text -> ask -> print
//! ```
//!
//! Logs go to a file so they never interleave with streamed answers.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use colloquy_engine::{
    Answer, AnswerStream, ColloquyConfig, Command, CommandOutcome, ConversationSession,
    HttpGateway, TokenCounter, command_help_summary, gateway_config,
};

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: prefer no logs over interleaving them with answers on stdout.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!("Failed to create log dir {}: {e}", parent.display()));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!("Failed to open log file {}: {e}", candidate.display()));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.colloquy/logs/colloquy.log
    if let Some(config_path) = ColloquyConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("colloquy.log"));
    }

    // Fallback: ./.colloquy/logs/colloquy.log
    candidates.push(PathBuf::from(".colloquy").join("logs").join("colloquy.log"));

    candidates
}

fn load_config() -> Option<ColloquyConfig> {
    match ColloquyConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: {e}; using defaults");
            None
        }
    }
}

fn prompt() -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(b"> ")?;
    out.flush()
}

/// Prints fragments as they arrive. Ctrl-C drops the stream, discarding the turn.
async fn print_stream(mut stream: AnswerStream<'_>) -> Result<()> {
    let mut out = std::io::stdout();
    loop {
        tokio::select! {
            fragment = stream.next_fragment() => match fragment {
                Ok(Some(fragment)) => {
                    out.write_all(fragment.as_bytes())?;
                    out.flush()?;
                }
                Ok(None) => break,
                Err(e) => {
                    writeln!(out)?;
                    eprintln!("error: {e}");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                writeln!(out)?;
                eprintln!("[cancelled; answer discarded]");
                return Ok(());
            }
        }
    }
    writeln!(out)?;
    Ok(())
}

async fn handle_question(
    session: &mut ConversationSession,
    gateway: &HttpGateway,
    counter: &TokenCounter,
    question: &str,
) -> Result<()> {
    match session.ask(gateway, counter, question).await {
        Ok(Answer::Stream(stream)) => print_stream(stream).await?,
        Ok(answer) => {
            if let Some(text) = complete_output(&answer) {
                println!("{text}");
            }
        }
        Err(e) => eprintln!("error: {e}"),
    }
    Ok(())
}

/// Text to print for a non-streamed answer. An empty reply prints nothing.
fn complete_output<'a>(answer: &'a Answer<'_>) -> Option<&'a str> {
    match answer {
        Answer::Text(text) => Some(text),
        Answer::Empty | Answer::Stream(_) => None,
    }
}

/// Returns `false` when the REPL should exit.
fn handle_command(session: &mut ConversationSession, raw: &str, export_dir: &Path) -> bool {
    match session.run_command(Command::parse(raw), export_dir) {
        CommandOutcome::Quit => return false,
        CommandOutcome::Message(message) => println!("{message}"),
        CommandOutcome::SettingsChanged(message) => {
            println!("{message}");
            if let Err(e) = ColloquyConfig::persist_settings(session.settings()) {
                tracing::warn!(error = %e, "Failed to persist settings");
                eprintln!("warning: settings not saved: {e}");
            }
        }
    }
    true
}

async fn repl(session: &mut ConversationSession, gateway: &HttpGateway) -> Result<()> {
    let counter = TokenCounter::new();
    let export_dir = std::env::current_dir().context("resolving current directory")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", session.describe_settings());
    println!("{}", command_help_summary());

    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(raw) = line.strip_prefix('/') {
            if !handle_command(session, raw, &export_dir) {
                break;
            }
            continue;
        }

        handle_question(session, gateway, &counter, line).await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config();
    let mut session = ConversationSession::from_config(config.as_ref())
        .context("invalid [app] settings in config")?;
    let gateway =
        HttpGateway::new(gateway_config(config.as_ref())).context("building HTTP client")?;

    tracing::info!(model = %session.settings().model(), "Session started");
    let result = repl(&mut session, &gateway).await;
    tracing::info!(turns = session.history().len(), "Session ended");
    result
}
