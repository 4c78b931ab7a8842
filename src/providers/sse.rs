//! Server-sent events decoding for streamed completions
//!
//! The HTTP body arrives as arbitrary byte chunks. Events are separated by a
//! blank line; each event's `data:` lines carry one JSON chunk in the
//! OpenAI streaming shape, and `data: [DONE]` terminates the stream.

use crate::error::{Result, ZenError};
use crate::providers::base::{StreamEvent, TokenUsage};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// What one SSE event contributed
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ParsedEvent {
    pub deltas: Vec<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
    pub done: bool,
}

/// Remove every complete event block from the front of `buffer`
///
/// Carriage returns are dropped so `\r\n\r\n` separators work too.
pub(crate) fn drain_event_blocks(buffer: &mut Vec<u8>) -> Vec<String> {
    buffer.retain(|b| *b != b'\r');
    let mut blocks = Vec::new();
    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let block: Vec<u8> = buffer.drain(..pos + 2).collect();
        // Separators are ASCII, so a block never splits a UTF-8 sequence.
        blocks.push(String::from_utf8_lossy(&block[..pos]).into_owned());
    }
    blocks
}

/// Decode one event block
pub(crate) fn parse_event_block(block: &str) -> ParsedEvent {
    let data_lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();

    let mut parsed = ParsedEvent::default();
    if data_lines.is_empty() {
        // Comments, `event:`/`id:` only blocks, keep-alives.
        return parsed;
    }

    let data = data_lines.join("\n");
    if data == "[DONE]" {
        parsed.done = true;
        return parsed;
    }

    match serde_json::from_str::<StreamChunk>(&data) {
        Ok(chunk) => {
            for choice in chunk.choices {
                if let Some(content) = choice.delta.and_then(|d| d.content) {
                    if !content.is_empty() {
                        parsed.deltas.push(content);
                    }
                }
                if choice.finish_reason.is_some() {
                    parsed.finish_reason = choice.finish_reason;
                }
            }
            parsed.usage = chunk.usage;
        }
        Err(e) => {
            tracing::warn!("Skipping malformed stream chunk: {}", e);
        }
    }
    parsed
}

/// Read SSE events from `byte_stream` and forward them over `events_tx`
///
/// Runs until `[DONE]`, end of body, a transport error, an idle gap longer
/// than `idle_timeout`, or the receiver going away. Exactly one terminal
/// item (`Finished` or `Err`) is sent unless the receiver was dropped.
pub(crate) async fn forward_sse_stream<S>(
    byte_stream: S,
    events_tx: mpsc::Sender<Result<StreamEvent>>,
    idle_timeout: Duration,
) where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut finish_reason = None;
    let mut usage = None;
    let mut delta_count = 0usize;

    tokio::pin!(byte_stream);

    loop {
        let next = match tokio::time::timeout(idle_timeout, byte_stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                let _ = events_tx
                    .send(Err(ZenError::NetworkFailure(format!(
                        "no data received for {}s",
                        idle_timeout.as_secs()
                    ))))
                    .await;
                return;
            }
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::error!("Completion stream broke after {} deltas: {}", delta_count, e);
                let err = match ZenError::from(e) {
                    ZenError::ServerError { status: None, message } => {
                        ZenError::NetworkFailure(message)
                    }
                    other => other,
                };
                let _ = events_tx.send(Err(err)).await;
                return;
            }
            None => break,
        };

        buffer.extend_from_slice(&chunk);
        for block in drain_event_blocks(&mut buffer) {
            let parsed = parse_event_block(&block);
            for delta in parsed.deltas {
                delta_count += 1;
                if events_tx.send(Ok(StreamEvent::Delta(delta))).await.is_err() {
                    tracing::debug!("Stream receiver dropped; stopping SSE reader");
                    return;
                }
            }
            if parsed.finish_reason.is_some() {
                finish_reason = parsed.finish_reason;
            }
            if parsed.usage.is_some() {
                usage = parsed.usage;
            }
            if parsed.done {
                tracing::debug!("Stream finished after {} deltas", delta_count);
                let _ = events_tx
                    .send(Ok(StreamEvent::Finished {
                        finish_reason,
                        usage,
                    }))
                    .await;
                return;
            }
        }
    }

    // Body ended without [DONE]; flush a trailing unterminated event.
    let tail = String::from_utf8_lossy(&buffer).into_owned();
    if !tail.trim().is_empty() {
        let parsed = parse_event_block(&tail);
        for delta in parsed.deltas {
            if events_tx.send(Ok(StreamEvent::Delta(delta))).await.is_err() {
                return;
            }
        }
        finish_reason = parsed.finish_reason.or(finish_reason);
        usage = parsed.usage.or(usage);
    }

    tracing::debug!("Stream body ended after {} deltas", delta_count);
    let _ = events_tx
        .send(Ok(StreamEvent::Finished {
            finish_reason,
            usage,
        }))
        .await;
}
