//! Server-Sent Events (SSE) processing for streaming chat completions.
//!
//! The endpoint speaks the OpenAI-compatible dialect: every event is a single `data:` line
//! holding one JSON chunk, and the stream ends with `data: [DONE]`.  Errors raised after the
//! response headers were sent arrive as a `data:` payload with an `error` object.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_EVENTS};
use crate::types::ChatCompletionChunk;
use crate::{Error, Result};

const DONE_MARKER: &str = "[DONE]";

/// Process a stream of bytes into a stream of chat completion chunks.
///
/// Bytes are buffered until a complete event (terminated by a blank line) is available, so
/// events and multi-byte characters may be split arbitrarily across network reads.  The
/// returned stream ends at `[DONE]` or when the byte stream ends.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<ChatCompletionChunk>>
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        (byte_stream, buffer, false),
        move |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                // First check if we have a complete event in the buffer
                if let Some(event) = extract_event(&mut buffer) {
                    match parse_event(&event) {
                        Parsed::Skip => continue,
                        Parsed::Done => return None,
                        Parsed::Item(item) => {
                            count_item(&item);
                            return Some((item, (stream, buffer, false)));
                        }
                    }
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        return Some((Err(e), (stream, buffer, true)));
                    }
                    None => {
                        // A final event may lack its trailing blank line.
                        if buffer.iter().all(u8::is_ascii_whitespace) {
                            return None;
                        }
                        let event = std::mem::take(&mut buffer);
                        return match parse_event(&event) {
                            Parsed::Item(item) => {
                                count_item(&item);
                                Some((item, (stream, buffer, true)))
                            }
                            Parsed::Skip | Parsed::Done => None,
                        };
                    }
                }
            }
        },
    )
}

fn count_item(item: &Result<ChatCompletionChunk>) {
    match item {
        Ok(_) => STREAM_EVENTS.click(),
        Err(_) => STREAM_ERRORS.click(),
    }
}

/// Remove and return the bytes of the first complete event in `buffer`.
fn extract_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let event = buffer[..end].to_vec();
    buffer.drain(..end + 2);
    Some(event)
}

enum Parsed {
    Skip,
    Done,
    Item(Result<ChatCompletionChunk>),
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<serde_json::Value>,
    message: Option<String>,
}

fn parse_event(event: &[u8]) -> Parsed {
    let text = match std::str::from_utf8(event) {
        Ok(text) => text,
        Err(e) => {
            return Parsed::Item(Err(Error::encoding(
                format!("Invalid UTF-8 in stream: {e}"),
                Some(Box::new(e)),
            )));
        }
    };

    // Multiple data lines in one event are joined with newlines; comments and other
    // fields are ignored.
    let mut data: Option<String> = None;
    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    let Some(data) = data else {
        return Parsed::Skip;
    };
    let data = data.trim();
    if data == DONE_MARKER {
        return Parsed::Done;
    }
    if data.is_empty() {
        return Parsed::Skip;
    }

    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(data) {
        let detail = payload.error;
        let error_type = detail
            .error_type
            .or_else(|| detail.code.map(|code| code.to_string().trim_matches('"').to_string()))
            .or_else(|| Some("stream_error".to_string()));
        let message = detail.message.unwrap_or_else(|| data.to_string());
        return Parsed::Item(Err(Error::api(500, error_type, message, None)));
    }

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => Parsed::Item(Ok(chunk)),
        Err(e) => Parsed::Item(Err(Error::serialization(
            format!("Failed to parse event JSON: {e}"),
            Some(Box::new(e)),
        ))),
    }
}
