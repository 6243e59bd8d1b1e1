//! Vendor Stream Decoders
//!
//! Pure state machines that turn wire lines into [`CanonicalEvent`]s. One
//! variant per wire-protocol family, chosen when the decoder is built:
//!
//! - **SSE-delta**: chat-completion deltas (`choices[0].delta`)
//! - **SSE-content-block**: explicit block lifecycle events
//! - **JSON lines**: one complete JSON message per line
//!
//! [`StreamDecoder`] wraps the family and owns the terminal discipline: it
//! forwards events up to and including the first `Done` or `Error` and
//! ignores everything after it. Adding a vendor family means adding a
//! [`WireFormat`] variant and a state struct; nothing else changes.
//!
//! # Usage
//!
//! ```
//! use conductor_stream::decoder::{StreamDecoder, WireFormat};
//!
//! let mut decoder = StreamDecoder::new(WireFormat::SseDelta);
//! let events = decoder.decode_line(r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#);
//! assert_eq!(events[0].as_text_delta(), Some("hi"));
//! ```

mod content_block;
pub mod frame;
mod json_lines;
mod sse_delta;
pub mod tool_calls;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use content_block::ContentBlockDecoder;
pub use frame::{LineBuffer, SseLine};
pub use json_lines::JsonLinesDecoder;
pub use sse_delta::SseDeltaDecoder;
pub use tool_calls::{synthetic_call_id, ToolCallAccumulator};

use crate::error::ConductorError;
use crate::events::CanonicalEvent;

/// Wire-protocol family of a response body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// SSE frames carrying chat-completion deltas
    SseDelta,
    /// SSE frames carrying content-block lifecycle events
    SseContentBlock,
    /// One JSON document per line
    JsonLines,
}

impl WireFormat {
    /// Whether bodies of this family are server-sent events
    #[must_use]
    pub fn is_sse(self) -> bool {
        matches!(self, Self::SseDelta | Self::SseContentBlock)
    }
}

/// Per-family decoder state
#[derive(Debug)]
enum DecoderFamily {
    SseDelta(SseDeltaDecoder),
    ContentBlock(ContentBlockDecoder),
    JsonLines(JsonLinesDecoder),
}

/// Decoder for one request
///
/// Created per request and discarded at termination.
#[derive(Debug)]
pub struct StreamDecoder {
    family: DecoderFamily,
    terminated: bool,
}

impl StreamDecoder {
    /// Create a decoder for the given wire format
    #[must_use]
    pub fn new(format: WireFormat) -> Self {
        let family = match format {
            WireFormat::SseDelta => DecoderFamily::SseDelta(SseDeltaDecoder::new()),
            WireFormat::SseContentBlock => {
                DecoderFamily::ContentBlock(ContentBlockDecoder::new())
            }
            WireFormat::JsonLines => DecoderFamily::JsonLines(JsonLinesDecoder::new()),
        };
        Self {
            family,
            terminated: false,
        }
    }

    /// Whether a terminal event has already been produced
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Decode one complete line
    ///
    /// Malformed lines produce no events. Once a terminal event has been
    /// returned every further call returns nothing.
    pub fn decode_line(&mut self, line: &str) -> Vec<CanonicalEvent> {
        if self.terminated {
            return Vec::new();
        }

        let mut out = Vec::new();
        match &mut self.family {
            DecoderFamily::SseDelta(d) => d.decode_line(line, &mut out),
            DecoderFamily::ContentBlock(d) => d.decode_line(line, &mut out),
            DecoderFamily::JsonLines(d) => d.decode_line(line, &mut out),
        }
        self.seal(out)
    }

    /// Signal that the body ended
    ///
    /// Returns a terminal error if no completion marker was seen.
    pub fn finish(&mut self) -> Option<CanonicalEvent> {
        if self.terminated {
            return None;
        }
        tracing::warn!("Stream ended before completion marker");
        self.fail(ConductorError::connection("stream ended before completion marker"))
    }

    /// Terminate with an error, discarding any partial state
    pub fn fail(&mut self, err: ConductorError) -> Option<CanonicalEvent> {
        if self.terminated {
            return None;
        }
        match &mut self.family {
            DecoderFamily::SseDelta(d) => d.discard(),
            DecoderFamily::ContentBlock(d) => d.discard(),
            DecoderFamily::JsonLines(d) => d.discard(),
        }
        self.terminated = true;
        Some(CanonicalEvent::Error(err))
    }

    /// Cut the batch after its first terminal event
    fn seal(&mut self, mut out: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
        if let Some(pos) = out.iter().position(CanonicalEvent::is_terminal) {
            out.truncate(pos + 1);
            self.terminated = true;
            if let CanonicalEvent::Error(err) = &out[pos] {
                match &mut self.family {
                    DecoderFamily::SseDelta(d) => d.discard(),
                    DecoderFamily::ContentBlock(d) => d.discard(),
                    DecoderFamily::JsonLines(d) => d.discard(),
                }
                tracing::warn!(error = %err, "Vendor reported an error mid-stream");
            }
        }
        out
    }
}

/// Extract an in-band vendor error (`{"error": "..."}` or `{"error": {"message": ...}}`)
pub(crate) fn vendor_error(json: &Value) -> Option<ConductorError> {
    let error = json.get("error").filter(|e| !e.is_null())?;
    let message = match error {
        Value::String(text) => text.clone(),
        Value::Object(fields) => {
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            match fields.get("type").and_then(Value::as_str) {
                Some(kind) => format!("{kind}: {message}"),
                None => message.to_string(),
            }
        }
        other => other.to_string(),
    };
    let status = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok());
    Some(ConductorError::Transport { status, message })
}

/// Read a non-negative integer field, defaulting to zero
pub(crate) fn read_u64(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FinishReason;

    #[test]
    fn test_events_after_terminal_are_ignored() {
        let mut decoder = StreamDecoder::new(WireFormat::SseDelta);
        let events = decoder.decode_line(r#"data: {"choices":[{"delta":{"content":"a"},"finish_reason":"stop"}]}"#);
        assert_eq!(events.len(), 2);
        assert!(decoder.is_terminated());

        assert!(decoder.decode_line("data: [DONE]").is_empty());
        assert!(decoder.finish().is_none());
        assert!(decoder.fail(ConductorError::Cancelled).is_none());
    }

    #[test]
    fn test_finish_without_marker_is_error() {
        let mut decoder = StreamDecoder::new(WireFormat::JsonLines);
        decoder.decode_line(r#"{"message":{"content":"partial"},"done":false}"#);
        assert!(matches!(decoder.finish(), Some(CanonicalEvent::Error(_))));
        assert!(decoder.is_terminated());
    }

    #[test]
    fn test_fail_discards_pending_tool_calls() {
        let mut decoder = StreamDecoder::new(WireFormat::SseContentBlock);
        decoder.decode_line(r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"f"}}"#);
        decoder.decode_line(r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#);

        let err = decoder.fail(ConductorError::connection("reset"));
        assert!(matches!(err, Some(CanonicalEvent::Error(_))));
        // No ToolCallComplete can follow
        assert!(decoder
            .decode_line(r#"data: {"type":"content_block_stop","index":0}"#)
            .is_empty());
    }

    #[test]
    fn test_vendor_error_shapes() {
        let err = vendor_error(&serde_json::json!({"error": "boom"})).unwrap();
        assert_eq!(err.to_string(), "Transport failure: boom");

        let err = vendor_error(&serde_json::json!({
            "error": {"type": "overloaded_error", "message": "busy", "code": 529}
        }))
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Transport failure (HTTP 529): overloaded_error: busy"
        );
        assert!(vendor_error(&serde_json::json!({"error": null})).is_none());
    }

    #[test]
    fn test_done_reason_defaults_to_stop() {
        let mut decoder = StreamDecoder::new(WireFormat::SseContentBlock);
        let events = decoder.decode_line(r#"data: {"type":"message_stop"}"#);
        assert!(matches!(
            events.as_slice(),
            [CanonicalEvent::Done { finish_reason: FinishReason::Stop }]
        ));
    }
}
