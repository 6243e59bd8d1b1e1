//! SSE-Delta Decoder (chat-completion style)
//!
//! Wire format:
//! - `data: {"choices":[{"delta":{"content":"Hello"}}]}` -> TextDelta
//! - `data: {"choices":[{"delta":{"reasoning_content":"..."}}]}` -> ReasoningDelta
//! - `data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read","arguments":"{\"p"}}]}}]}`
//!   -> ToolCallDelta, accumulated until the stream completes
//! - `data: {"choices":[{"finish_reason":"stop"}]}` or `"tool_calls"` -> Done
//! - `data: [DONE]` -> Done
//!
//! Continuation fragments usually carry only `index`, so the decoder keeps an
//! index-to-id map; the first fragment for an index opens the call.
//!
//! A `finish_reason` of "stop" or "tool_calls" completes the stream on the
//! spot. Usage is only reported if it arrived on or before that frame; a
//! trailing usage-only chunk (`stream_options.include_usage`) comes after the
//! terminal and is dropped. Any other reason, such as "length", is held until
//! `[DONE]` so the trailing usage chunk is still picked up.

use std::collections::HashMap;

use serde_json::Value;

use super::frame::SseLine;
use super::tool_calls::{synthetic_call_id, ToolCallAccumulator};
use super::{vendor_error, read_u64};
use crate::events::{CanonicalEvent, FinishReason, ReasoningKind, Usage};

/// Literal sentinel frame marking the end of the stream
const DONE_SENTINEL: &str = "[DONE]";

/// Decoder state for the SSE-delta family
#[derive(Debug, Default)]
pub struct SseDeltaDecoder {
    calls: ToolCallAccumulator,
    /// Vendor `index` -> call id
    slots: HashMap<u64, String>,
    /// Non-terminal finish reason awaiting the sentinel
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl SseDeltaDecoder {
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

        if data == DONE_SENTINEL {
            let reason = self.finish_reason.take().unwrap_or_else(|| {
                if self.calls.is_empty() {
                    FinishReason::Stop
                } else {
                    FinishReason::ToolCalls
                }
            });
            self.complete(reason, out);
            return;
        }

        let json: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed SSE-delta frame");
                return;
            }
        };

        if let Some(err) = vendor_error(&json) {
            out.push(CanonicalEvent::Error(err));
            return;
        }

        if let Some(usage) = json.get("usage").filter(|u| u.is_object()) {
            self.usage = Some(Usage {
                input_tokens: read_u64(usage, "prompt_tokens"),
                output_tokens: read_u64(usage, "completion_tokens"),
            });
        }

        let Some(choice) = json.get("choices").and_then(|c| c.get(0)) else {
            return;
        };

        if let Some(delta) = choice.get("delta") {
            self.decode_delta(delta, out);
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            match reason {
                // Completes now; a later usage-only chunk is not seen
                "stop" | "tool_calls" => self.complete(FinishReason::from_vendor(reason), out),
                other => self.finish_reason = Some(FinishReason::from_vendor(other)),
            }
        }
    }

    fn decode_delta(&mut self, delta: &Value, out: &mut Vec<CanonicalEvent>) {
        if let Some(reasoning) = delta
            .get("reasoning_content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            out.push(CanonicalEvent::ReasoningDelta {
                text: reasoning.to_string(),
                signature: None,
                kind: ReasoningKind::Thinking,
            });
        }

        if let Some(content) = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            out.push(CanonicalEvent::TextDelta(content.to_string()));
        }

        let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) else {
            return;
        };

        for (position, entry) in tool_calls.iter().enumerate() {
            let index = entry
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(position as u64);
            let function = entry.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());
            let fragment = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or("");

            let id = self.resolve_id(index, entry.get("id").and_then(Value::as_str));
            self.calls.open(&id, name);

            if !fragment.is_empty() {
                self.calls.append(&id, fragment);
                out.push(CanonicalEvent::ToolCallDelta {
                    name: self.calls.name_of(&id),
                    id,
                    arguments_fragment: fragment.to_string(),
                });
            }
        }
    }

    fn resolve_id(&mut self, index: u64, vendor_id: Option<&str>) -> String {
        if let Some(id) = vendor_id.filter(|s| !s.is_empty()) {
            self.slots.insert(index, id.to_string());
            return id.to_string();
        }
        self.slots
            .entry(index)
            .or_insert_with(synthetic_call_id)
            .clone()
    }

    fn complete(&mut self, reason: FinishReason, out: &mut Vec<CanonicalEvent>) {
        out.extend(
            self.calls
                .close_all()
                .into_iter()
                .map(CanonicalEvent::ToolCallComplete),
        );
        if let Some(usage) = self.usage.take() {
            out.push(CanonicalEvent::UsageFinal(usage));
        }
        out.push(CanonicalEvent::done(reason));
    }

    /// Discard partial state after a transport failure
    pub fn discard(&mut self) {
        self.calls.clear();
        self.slots.clear();
        self.finish_reason = None;
        self.usage = None;
    }
}
