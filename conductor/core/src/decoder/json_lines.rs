//! Line-Delimited JSON Decoder (Ollama style)
//!
//! Each line is one complete message increment:
//!
//! ```text
//! {"message":{"role":"assistant","content":"Hel"},"done":false}
//! {"message":{"role":"assistant","content":"lo"},"done":false}
//! {"message":{"content":""},"done":true,"done_reason":"stop","prompt_eval_count":9,"eval_count":2}
//! ```
//!
//! Tool calls arrive whole inside `message.tool_calls[]`, so there is nothing
//! to accumulate. The `/api/generate` shape (`"response": "..."`) is accepted
//! as text as well.

use serde_json::Value;

use super::tool_calls::synthetic_call_id;
use super::{read_u64, vendor_error};
use crate::error::ConductorError;
use crate::events::{CanonicalEvent, FinishReason, ReasoningKind, ToolCall, Usage};

/// Decoder state for the line-delimited JSON family
#[derive(Debug, Default)]
pub struct JsonLinesDecoder {
    saw_tool_calls: bool,
}

impl JsonLinesDecoder {
    /// Create a fresh decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one line
    pub fn decode_line(&mut self, line: &str, out: &mut Vec<CanonicalEvent>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let data: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed JSON line");
                return;
            }
        };

        if let Some(err) = vendor_error(&data) {
            out.push(CanonicalEvent::Error(err));
            return;
        }

        let message = data.get("message");

        if let Some(thinking) = message
            .and_then(|m| m.get("thinking"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
        {
            out.push(CanonicalEvent::ReasoningDelta {
                text: thinking.to_string(),
                signature: None,
                kind: ReasoningKind::Thinking,
            });
        }

        let content = message
            .and_then(|m| m.get("content"))
            .or_else(|| data.get("response"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        if let Some(token) = content {
            out.push(CanonicalEvent::TextDelta(token.to_string()));
        }

        if let Some(calls) = message
            .and_then(|m| m.get("tool_calls"))
            .and_then(Value::as_array)
        {
            for entry in calls {
                if let Some(call) = parse_tool_call(entry) {
                    self.saw_tool_calls = true;
                    out.push(CanonicalEvent::ToolCallComplete(call));
                }
            }
        }

        // Check if done
        if data
            .get("done")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            if data.get("prompt_eval_count").is_some() || data.get("eval_count").is_some() {
                out.push(CanonicalEvent::UsageFinal(Usage {
                    input_tokens: read_u64(&data, "prompt_eval_count"),
                    output_tokens: read_u64(&data, "eval_count"),
                }));
            }
            let reason = match data.get("done_reason").and_then(Value::as_str) {
                Some(reason) => FinishReason::from_vendor(reason),
                None if self.saw_tool_calls => FinishReason::ToolCalls,
                None => FinishReason::Stop,
            };
            out.push(CanonicalEvent::done(reason));
        }
    }

    /// Discard partial state after a transport failure
    pub fn discard(&mut self) {
        self.saw_tool_calls = false;
    }
}

fn parse_tool_call(entry: &Value) -> Option<ToolCall> {
    let function = entry.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?.to_string();
    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map_or_else(synthetic_call_id, str::to_string);

    let arguments = match function.get("arguments") {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(Value::String(text)) => match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                let err = ConductorError::ToolArguments {
                    call_id: id,
                    message: e.to_string(),
                };
                tracing::warn!(error = %err, "Dropping tool call");
                return None;
            }
        },
        Some(value) => value.clone(),
    };

    Some(ToolCall {
        id,
        name,
        arguments,
    })
}
