//! SSE parsing for streamed generation responses.
//!
//! The streaming endpoint (`alt=sse`) emits one `data: {json}` line per
//! fragment. Each fragment carries structured candidate parts; a bare `text`
//! field is accepted as a fallback when no parts are present.

use futures_util::{StreamExt, TryStreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::warn;

use super::{Fragment, FragmentStream, GeminiError, Segment};

const DATA_PREFIX: &str = "data: ";

/// Turn an open SSE response into a stream of fragments.
///
/// A reader task owns the response body; it exits when the body ends, the
/// body errors, or the consumer drops the stream.
pub(super) fn fragments_from_response(response: reqwest::Response) -> FragmentStream {
    let (tx, rx) = mpsc::channel::<Result<Fragment, GeminiError>>(32);

    tokio::spawn(async move {
        let bytes = response.bytes_stream().map_err(std::io::Error::other);
        let mut lines = BufReader::new(StreamReader::new(bytes)).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
                        continue;
                    };

                    let value: serde_json::Value = match serde_json::from_str(data) {
                        Ok(value) => value,
                        Err(e) => {
                            let _ = tx.send(Err(GeminiError::Parse(e.to_string()))).await;
                            return;
                        }
                    };

                    if let Some(message) = value["error"]["message"].as_str() {
                        warn!(message = %message, "Remote error mid-stream");
                        let _ = tx.send(Err(GeminiError::Stream(message.to_string()))).await;
                        return;
                    }

                    if let Some(fragment) = parse_fragment(&value) {
                        if tx.send(Ok(fragment)).await.is_err() {
                            // Consumer went away; stop reading the body.
                            return;
                        }
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let _ = tx.send(Err(GeminiError::Stream(e.to_string()))).await;
                    return;
                }
            }
        }
    });

    ReceiverStream::new(rx).boxed()
}

/// Parse one SSE fragment into text segments.
///
/// Structured candidate parts win; the flat `text` field is consulted only
/// when no structured segment is present, so a fragment never double-emits.
/// Fragments with neither (e.g. usage-only chunks) yield `None`.
pub(super) fn parse_fragment(value: &serde_json::Value) -> Option<Fragment> {
    let mut segments = Vec::new();

    if let Some(parts) = value["candidates"][0]["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    segments.push(Segment {
                        text: text.to_string(),
                        thought: part["thought"].as_bool().unwrap_or(false),
                    });
                }
            }
        }
    }

    if !segments.is_empty() {
        return Some(Fragment::Segments(segments));
    }

    match value["text"].as_str() {
        Some(text) if !text.is_empty() => Some(Fragment::Flat(text.to_string())),
        _ => None,
    }
}
