//! Incremental server-sent-events decoding.
//!
//! Both vendors stream replies as `text/event-stream`. Network chunks do not
//! align with event boundaries (an event, a line, or even a UTF-8 sequence can
//! be split across chunks), so bytes are buffered until a blank line closes
//! the event. Only `data:` fields are kept; comments, `event:`, `id:`, and
//! `retry:` fields are ignored.

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the data payloads of every event completed
    /// by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_blank_line(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = parse_event(&raw[..end]) {
                events.push(data);
            }
        }
        events
    }

    /// Flush an event left open when the stream ended without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        parse_event(&raw)
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn parse_event(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let mut data: Option<String> = None;
    for line in text.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data
}

struct EventState {
    bytes: BoxStream<'static, Result<Vec<u8>>>,
    decoder: SseDecoder,
    ready: VecDeque<String>,
    done: bool,
}

/// Turn a streaming HTTP response into a stream of event data payloads.
pub fn events(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    let bytes = response
        .bytes_stream()
        .map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .context("Failed to read event stream")
        })
        .boxed();
    decode(bytes)
}

/// Decode an arbitrary byte stream. A read error is yielded once and ends
/// the stream.
pub fn decode(bytes: BoxStream<'static, Result<Vec<u8>>>) -> BoxStream<'static, Result<String>> {
    let state = EventState {
        bytes,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.ready.pop_front() {
                return Some((Ok(data), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let completed = state.decoder.push(&chunk);
                    state.ready.extend(completed);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}
