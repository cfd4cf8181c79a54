//! Server-sent-events framing shared by the providers.
//!
//! Bytes arrive in arbitrary chunks. [`SseBuffer`] splits them into events at
//! blank lines (LF or CRLF), [`data_payload`] joins an event's `data:` lines,
//! and [`pump_events`] drives a provider [`SseParser`] over a byte stream and
//! forwards the resulting [`StreamEvent`]s to a channel.

use std::fmt::Display;
use std::time::Duration;

use colloquy_types::StreamEvent;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

pub(crate) const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Consecutive undecodable payloads tolerated before the stream is abandoned.
pub(crate) const MAX_SSE_PARSE_ERRORS: usize = 3;

#[derive(Debug)]
pub(crate) enum SseParseAction {
    Continue,
    Emit(Vec<StreamEvent>),
    Done,
    Error(String),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction;

    fn provider_name(&self) -> &'static str;

    /// Whether a clean EOF at this point counts as completion.
    fn finished_on_eof(&self) -> bool {
        false
    }
}

/// Typed view of one payload. Undecodable shapes are logged and skipped.
pub(crate) fn parse_payload<T>(json: &serde_json::Value, provider: &'static str) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    match <T as Deserialize>::deserialize(json) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(%e, provider, "Unrecognized SSE payload");
            None
        }
    }
}

pub(crate) fn emit_or_continue(events: Vec<StreamEvent>) -> SseParseAction {
    if events.is_empty() {
        SseParseAction::Continue
    } else {
        SseParseAction::Emit(events)
    }
}

/// Accumulates raw bytes and hands out complete events.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    bytes: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BufferOverflow;

impl SseBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Result<(), BufferOverflow> {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > MAX_SSE_BUFFER_BYTES {
            Err(BufferOverflow)
        } else {
            Ok(())
        }
    }

    /// Position and length of the earliest blank-line delimiter.
    fn boundary(&self) -> Option<(usize, usize)> {
        let lf = self.bytes.windows(2).position(|w| w == b"\n\n");
        let crlf = self.bytes.windows(4).position(|w| w == b"\r\n\r\n");
        match (lf, crlf) {
            (Some(a), Some(b)) if b < a => Some((b, 4)),
            (Some(a), _) => Some((a, 2)),
            (None, Some(b)) => Some((b, 4)),
            (None, None) => None,
        }
    }

    pub(crate) fn next_event(&mut self) -> Option<Vec<u8>> {
        let (pos, delim) = self.boundary()?;
        let event = self.bytes[..pos].to_vec();
        self.bytes.drain(..pos + delim);
        Some(event)
    }
}

/// The event's `data:` lines joined by `\n`, or `None` if it has none.
pub(crate) fn data_payload(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .filter_map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            line.strip_prefix("data:")
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

pub(crate) async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Drives `parser` over `stream` until a terminal event, an error, or the
/// receiver going away. Every exit path except a dropped receiver sends
/// exactly one terminal event (`Done` or `Error`).
pub(crate) async fn pump_events<S, B, E, P>(
    stream: S,
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    P: SseParser,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = SseBuffer::default();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            tracing::warn!(
                provider = parser.provider_name(),
                idle_secs = idle_timeout.as_secs(),
                "SSE stream idle timeout"
            );
            let _ = send_event(tx, StreamEvent::Error("Stream idle timeout".to_string())).await;
            return;
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = send_event(tx, StreamEvent::Error(format!("Stream read failed: {e}"))).await;
                return;
            }
        };

        if buffer.push(chunk.as_ref()).is_err() {
            let _ = send_event(
                tx,
                StreamEvent::Error("SSE buffer exceeded maximum size (4 MiB)".to_string()),
            )
            .await;
            return;
        }

        while let Some(raw) = buffer.next_event() {
            let Ok(text) = std::str::from_utf8(&raw) else {
                let _ = send_event(
                    tx,
                    StreamEvent::Error("Received invalid UTF-8 from SSE stream".to_string()),
                )
                .await;
                return;
            };

            let Some(data) = data_payload(text) else {
                continue;
            };
            if data == "[DONE]" {
                let _ = send_event(tx, StreamEvent::Done).await;
                return;
            }

            let json = match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(json) => {
                    parse_errors = 0;
                    json
                }
                Err(e) => {
                    parse_errors += 1;
                    tracing::warn!(
                        %e,
                        payload_bytes = data.len(),
                        provider = parser.provider_name(),
                        "Invalid SSE JSON payload"
                    );
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        let _ = send_event(
                            tx,
                            StreamEvent::Error(format!("Invalid stream payload: {e}")),
                        )
                        .await;
                        return;
                    }
                    continue;
                }
            };

            match parser.parse(&json) {
                SseParseAction::Continue => {}
                SseParseAction::Emit(events) => {
                    for event in events {
                        let terminal = matches!(event, StreamEvent::Done | StreamEvent::Error(_));
                        if !send_event(tx, event).await || terminal {
                            return;
                        }
                    }
                }
                SseParseAction::Done => {
                    let _ = send_event(tx, StreamEvent::Done).await;
                    return;
                }
                SseParseAction::Error(msg) => {
                    let _ = send_event(tx, StreamEvent::Error(msg)).await;
                    return;
                }
            }
        }
    }

    let terminal = if parser.finished_on_eof() {
        StreamEvent::Done
    } else {
        StreamEvent::Error("Connection closed before stream completed".to_string())
    };
    let _ = send_event(tx, terminal).await;
}
