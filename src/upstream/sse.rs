//! Line-oriented SSE scanning over an upstream streaming body, with
//! usage-injection on the terminal chunk (§4.E, §9 "streaming pass-through").
//!
//! This never buffers the whole body: each `data:` line is inspected,
//! patched if it's the final `finish_reason="stop"` chunk missing `usage`,
//! and handed back to the caller to flush immediately. The `[DONE]`
//! terminator line passes through byte-for-byte.

use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::error::GatewayError;
use crate::estimator::TokenEstimator;

/// The result of scanning one line of the upstream SSE body.
pub enum ScannedLine {
    /// A `data:` line to emit verbatim (not a completion-ending chunk needing patch).
    PassThrough(String),
    /// A `data:` line whose JSON chunk was rewritten to carry synthesized usage.
    Patched(String),
    /// The `data: [DONE]` terminator, emitted unchanged.
    Done,
    /// A non-`data:` line (SSE comment, blank keep-alive, etc.), emitted unchanged.
    Other(String),
}

const DONE_LINE: &str = "data: [DONE]";

/// Scan one line from the upstream body, feeding any delta text into
/// `estimator` and synthesizing `usage` onto the terminal chunk if the
/// upstream omitted it.
pub fn scan_line(line: &str, estimator: &mut TokenEstimator) -> ScannedLine {
    if line.trim_end() == DONE_LINE {
        return ScannedLine::Done;
    }

    let Some(payload) = line.strip_prefix("data:") else {
        return ScannedLine::Other(line.to_string());
    };
    let payload = payload.trim_start();

    let Ok(mut chunk) = serde_json::from_str::<Value>(payload) else {
        return ScannedLine::PassThrough(line.to_string());
    };

    let delta_text = chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("");
    estimator.feed_delta(delta_text);

    let finish_reason = chunk
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(Value::as_str);

    let has_usage = chunk.get("usage").is_some();

    if finish_reason == Some("stop") && !has_usage {
        let usage = estimator.finish();
        if let Some(obj) = chunk.as_object_mut() {
            obj.insert("usage".to_string(), serde_json::to_value(usage).unwrap());
        }
        return ScannedLine::Patched(format!("data: {}", chunk));
    }

    ScannedLine::PassThrough(line.to_string())
}

/// Turn a streaming [`reqwest::Response`] body into a stream of complete
/// lines, buffering partial reads across chunk boundaries.
///
/// This is the only place bytes get buffered; once a line is complete it is
/// handed to the caller immediately so the router can flush it without
/// waiting for more of the body to arrive.
pub fn line_stream(response: reqwest::Response) -> impl Stream<Item = Result<String, GatewayError>> {
    let byte_stream = response.bytes_stream();
    stream::unfold((byte_stream, Vec::<u8>::new(), false), |(mut byte_stream, mut buffer, mut ended)| async move {
        loop {
            if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line_bytes).trim_end_matches(['\r', '\n']).to_string();
                if line.is_empty() {
                    continue;
                }
                return Some((Ok(line), (byte_stream, buffer, ended)));
            }

            if ended {
                if buffer.is_empty() {
                    return None;
                }
                let line = String::from_utf8_lossy(&buffer).trim_end_matches(['\r', '\n']).to_string();
                buffer.clear();
                if line.is_empty() {
                    return None;
                }
                return Some((Ok(line), (byte_stream, buffer, ended)));
            }

            match byte_stream.next().await {
                Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    return Some((Err(GatewayError::classify_transport(err.to_string())), (byte_stream, buffer, true)))
                }
                None => ended = true,
            }
        }
    })
}
