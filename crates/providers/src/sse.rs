//! Shared SSE streaming infrastructure for provider adapters.
//!
//! Receive a `reqwest::Response`, buffer raw bytes, split on blank lines, extract
//! `data:` payloads, and feed each payload to a provider-specific parser that
//! returns `Vec<Result<Fragment>>`.
//!
//! This module extracts that shared logic into two functions:
//! - [`drain_data_lines`] -- pull complete `data:` payloads from an SSE buffer
//! - [`sse_response_stream`] -- build a `BoxStream` from a response + parser closure

use crate::util::from_reqwest;
use ct_domain::error::{Error, Result};
use ct_domain::stream::{BoxStream, Fragment};

/// Extract complete `data:` payloads from an SSE byte buffer.
///
/// An event ends at the first blank line; both `\n` and `\r\n` line
/// endings are accepted, including a `\r\n` pair split across chunks.  Each
/// event block may contain `event:`, `data:`, `id:`, or `retry:` lines.  We
/// only care about `data:` lines.
///
/// The buffer holds raw bytes so a multi-byte character split across network
/// chunks is decoded only once the whole event has arrived.  A complete event
/// that is not valid UTF-8 is an error.
///
/// The buffer is drained in-place: consumed bytes are removed and any
/// trailing partial event remains for the next call.
pub(crate) fn drain_data_lines(buffer: &mut Vec<u8>) -> Result<Vec<String>> {
    let mut data_lines = Vec::new();

    while let Some((block_end, consumed)) = find_event_end(buffer) {
        let block: Vec<u8> = buffer.drain(..consumed).take(block_end).collect();
        let block = String::from_utf8(block)
            .map_err(|e| Error::Http(format!("SSE event is not valid UTF-8: {e}")))?;

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    Ok(data_lines)
}

/// Locate the first blank line.  Returns the length of the event block
/// before it and the number of bytes to consume including the blank line.
fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b != b'\n' {
            continue;
        }
        let line = &buf[line_start..i];
        if line.is_empty() || line == b"\r" {
            return Some((line_start, i + 1));
        }
        line_start = i + 1;
    }
    None
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a provider-specific
/// parser closure.
///
/// The closure receives each `data:` payload string and returns zero or more
/// fragments.  It is `FnMut` so a parser may keep state across payloads.
///
/// The stream buffers incoming chunks and drains complete SSE events, then
/// flushes the remaining buffer when the response body closes.  A transport
/// error after the response started is yielded once and ends the stream.
/// Exhaustion is signalled by the stream ending; no terminal fragment is
/// synthesized.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<Fragment>>
where
    F: FnMut(&str) -> Vec<Result<Fragment>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.extend_from_slice(&bytes);

                    match drain_data_lines(&mut buffer) {
                        Ok(lines) => {
                            for data in lines {
                                for fragment in parse_data(&data) {
                                    yield fragment;
                                }
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed -- flush any trailing event without a blank line.
                    if buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                        buffer.extend_from_slice(b"\n\n");
                        match drain_data_lines(&mut buffer) {
                            Ok(lines) => {
                                for data in lines {
                                    for fragment in parse_data(&data) {
                                        yield fragment;
                                    }
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(mid_stream_error(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

/// Mid-stream failures keep the reqwest classification but make clear the
/// body was cut short.
fn mid_stream_error(e: reqwest::Error) -> Error {
    match from_reqwest(e) {
        Error::Timeout(msg) => Error::Timeout(format!("response body: {msg}")),
        Error::Http(msg) => Error::Http(format!("response body: {msg}")),
        other => other,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
