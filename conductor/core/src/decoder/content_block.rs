//! SSE-Content-Block Decoder (block-lifecycle style)
//!
//! Every frame is an envelope `{"type": <event>, "content_block": {...}?, "delta": {...}?}`.
//! Block events select which accumulator is active:
//!
//! | Event                 | Effect                                              |
//! |-----------------------|-----------------------------------------------------|
//! | `message_start`       | input usage                                         |
//! | `content_block_start` | opens a text, thinking, redacted, or tool-use block |
//! | `content_block_delta` | `text_delta`, `thinking_delta`, `signature_delta`, `input_json_delta` |
//! | `content_block_stop`  | flushes the open block (tool JSON parsed here)      |
//! | `message_delta`       | stop reason, output usage                           |
//! | `message_stop`        | Done                                                |
//! | `error`               | Error                                               |

use serde_json::Value;

use super::frame::SseLine;
use super::tool_calls::{synthetic_call_id, ToolCallAccumulator};
use super::{read_u64, vendor_error};
use crate::error::ConductorError;
use crate::events::{CanonicalEvent, FinishReason, ReasoningKind, Usage};

/// The block currently receiving deltas
#[derive(Debug)]
enum ActiveBlock {
    Text,
    Thinking {
        /// Signature text accumulated so far
        signature: String,
        signature_emitted: bool,
    },
    Redacted,
    ToolUse {
        id: String,
    },
    Unknown,
}

/// Decoder state for the SSE-content-block family
#[derive(Debug, Default)]
pub struct ContentBlockDecoder {
    active: Option<ActiveBlock>,
    calls: ToolCallAccumulator,
    usage: Option<Usage>,
    stop_reason: Option<FinishReason>,
}

impl ContentBlockDecoder {
    /// Create a fresh decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one SSE line
    pub fn decode_line(&mut self, line: &str, out: &mut Vec<CanonicalEvent>) {
        let SseLine::Data(data) = SseLine::parse(line) else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }

        let json: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed content-block frame");
                return;
            }
        };

        match json.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                if let Some(usage) = json.get("message").and_then(|m| m.get("usage")) {
                    self.merge_usage(usage);
                }
            }
            "content_block_start" => {
                self.flush_active(out);
                if let Some(block) = json.get("content_block") {
                    self.start_block(block, out);
                }
            }
            "content_block_delta" => {
                if let Some(delta) = json.get("delta") {
                    self.apply_delta(delta, out);
                }
            }
            "content_block_stop" => self.flush_active(out),
            "message_delta" => {
                if let Some(reason) = json
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    self.stop_reason = Some(FinishReason::from_vendor(reason));
                }
                if let Some(usage) = json.get("usage") {
                    self.merge_usage(usage);
                }
            }
            "message_stop" => {
                self.flush_active(out);
                out.extend(
                    self.calls
                        .close_all()
                        .into_iter()
                        .map(CanonicalEvent::ToolCallComplete),
                );
                if let Some(usage) = self.usage.take() {
                    out.push(CanonicalEvent::UsageFinal(usage));
                }
                out.push(CanonicalEvent::done(
                    self.stop_reason.take().unwrap_or_default(),
                ));
            }
            "error" => {
                let err = vendor_error(&json).unwrap_or_else(|| {
                    ConductorError::connection("vendor error event without details")
                });
                out.push(CanonicalEvent::Error(err));
            }
            "ping" => {}
            other => tracing::debug!(event = other, "Ignoring content-block event"),
        }
    }

    fn start_block(&mut self, block: &Value, out: &mut Vec<CanonicalEvent>) {
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
        self.active = Some(match block_type {
            "text" => {
                if let Some(text) = non_empty_str(block, "text") {
                    out.push(CanonicalEvent::TextDelta(text.to_string()));
                }
                ActiveBlock::Text
            }
            "thinking" => {
                if let Some(text) = non_empty_str(block, "thinking") {
                    out.push(CanonicalEvent::ReasoningDelta {
                        text: text.to_string(),
                        signature: None,
                        kind: ReasoningKind::Thinking,
                    });
                }
                ActiveBlock::Thinking {
                    signature: non_empty_str(block, "signature")
                        .unwrap_or_default()
                        .to_string(),
                    signature_emitted: false,
                }
            }
            "redacted_thinking" => {
                out.push(CanonicalEvent::ReasoningDelta {
                    text: non_empty_str(block, "data").unwrap_or_default().to_string(),
                    signature: None,
                    kind: ReasoningKind::Redacted,
                });
                ActiveBlock::Redacted
            }
            "tool_use" | "server_tool_use" => {
                let id = non_empty_str(block, "id")
                    .map_or_else(synthetic_call_id, str::to_string);
                self.calls.open(&id, non_empty_str(block, "name"));
                if let Some(input) = block
                    .get("input")
                    .filter(|i| i.as_object().is_some_and(|o| !o.is_empty()))
                {
                    self.calls.seed(&id, input.clone());
                }
                ActiveBlock::ToolUse { id }
            }
            other => {
                tracing::debug!(block_type = other, "Unknown content block type");
                ActiveBlock::Unknown
            }
        });
    }

    fn apply_delta(&mut self, delta: &Value, out: &mut Vec<CanonicalEvent>) {
        match delta.get("type").and_then(Value::as_str).unwrap_or("") {
            "text_delta" => {
                if let Some(text) = non_empty_str(delta, "text") {
                    out.push(CanonicalEvent::TextDelta(text.to_string()));
                }
            }
            "thinking_delta" => {
                let Some(text) = non_empty_str(delta, "thinking") else {
                    return;
                };
                let signature = match &mut self.active {
                    Some(ActiveBlock::Thinking {
                        signature,
                        signature_emitted,
                    }) if !signature.is_empty() && !*signature_emitted => {
                        *signature_emitted = true;
                        Some(signature.clone())
                    }
                    _ => None,
                };
                out.push(CanonicalEvent::ReasoningDelta {
                    text: text.to_string(),
                    signature,
                    kind: ReasoningKind::Thinking,
                });
            }
            "signature_delta" => {
                let Some(fragment) = non_empty_str(delta, "signature") else {
                    return;
                };
                match &mut self.active {
                    Some(ActiveBlock::Thinking {
                        signature,
                        signature_emitted: false,
                    }) => signature.push_str(fragment),
                    Some(ActiveBlock::Thinking { .. }) => {
                        tracing::debug!("Ignoring signature after it was emitted");
                    }
                    _ => tracing::debug!("Signature delta outside a thinking block"),
                }
            }
            "input_json_delta" => {
                let fragment = delta
                    .get("partial_json")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let Some(ActiveBlock::ToolUse { id }) = &self.active else {
                    tracing::debug!("Tool argument delta outside a tool-use block");
                    return;
                };
                if fragment.is_empty() {
                    return;
                }
                let id = id.clone();
                self.calls.append(&id, fragment);
                out.push(CanonicalEvent::ToolCallDelta {
                    name: self.calls.name_of(&id),
                    id,
                    arguments_fragment: fragment.to_string(),
                });
            }
            other => tracing::debug!(delta_type = other, "Ignoring content-block delta"),
        }
    }

    /// Close the active block, emitting whatever it still holds
    fn flush_active(&mut self, out: &mut Vec<CanonicalEvent>) {
        match self.active.take() {
            Some(ActiveBlock::Thinking {
                signature,
                signature_emitted: false,
            }) if !signature.is_empty() => {
                out.push(CanonicalEvent::ReasoningDelta {
                    text: String::new(),
                    signature: Some(signature),
                    kind: ReasoningKind::Thinking,
                });
            }
            Some(ActiveBlock::ToolUse { id }) => {
                if let Some(call) = self.calls.close(&id) {
                    out.push(CanonicalEvent::ToolCallComplete(call));
                }
            }
            _ => {}
        }
    }

    fn merge_usage(&mut self, usage: &Value) {
        let current = self.usage.get_or_insert_with(Usage::default);
        if usage.get("input_tokens").is_some() {
            current.input_tokens = read_u64(usage, "input_tokens");
        }
        if usage.get("output_tokens").is_some() {
            current.output_tokens = read_u64(usage, "output_tokens");
        }
    }

    /// Discard partial state after a transport failure
    pub fn discard(&mut self) {
        self.active = None;
        self.calls.clear();
        self.usage = None;
        self.stop_reason = None;
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
