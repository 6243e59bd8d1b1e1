//! Tool-Call Argument Accumulation
//!
//! Vendors stream tool-call arguments as raw JSON text split at arbitrary
//! points. Fragments are concatenated in arrival order and parsed exactly once
//! when the call closes. A call whose text does not parse is dropped on its
//! own; the other calls are unaffected.

use serde_json::Value;
use uuid::Uuid;

use crate::error::ConductorError;
use crate::events::ToolCall;

/// Generate an identifier for a tool call the vendor left unnamed
#[must_use]
pub fn synthetic_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: Option<String>,
    arguments: String,
    /// Arguments delivered whole at open time (used when no fragments follow)
    seed: Option<Value>,
}

/// Open tool calls keyed by id, in the order they were opened
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PendingCall>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a call, or update the name of one already open
    pub fn open(&mut self, id: &str, name: Option<&str>) {
        if let Some(call) = self.find_mut(id) {
            if call.name.is_none() {
                call.name = name.map(str::to_string);
            }
            return;
        }
        self.calls.push(PendingCall {
            id: id.to_string(),
            name: name.map(str::to_string),
            arguments: String::new(),
            seed: None,
        });
    }

    /// Record arguments that arrived complete with the opening frame
    pub fn seed(&mut self, id: &str, arguments: Value) {
        if let Some(call) = self.find_mut(id) {
            call.seed = Some(arguments);
        }
    }

    /// Append an argument fragment; opens the call if it is unknown
    pub fn append(&mut self, id: &str, fragment: &str) {
        if self.find_mut(id).is_none() {
            self.open(id, None);
        }
        if let Some(call) = self.find_mut(id) {
            call.arguments.push_str(fragment);
        }
    }

    /// Name recorded for a call so far
    #[must_use]
    pub fn name_of(&self, id: &str) -> Option<String> {
        self.calls
            .iter()
            .find(|c| c.id == id)
            .and_then(|c| c.name.clone())
    }

    /// Whether a call with this id is open
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.calls.iter().any(|c| c.id == id)
    }

    /// Number of open calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no calls are open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Close one call and parse its arguments
    ///
    /// Returns `None` if the call is unknown or its arguments do not parse.
    pub fn close(&mut self, id: &str) -> Option<ToolCall> {
        let pos = self.calls.iter().position(|c| c.id == id)?;
        let call = self.calls.remove(pos);
        finalize(call)
    }

    /// Close every open call in opening order
    pub fn close_all(&mut self) -> Vec<ToolCall> {
        self.calls.drain(..).filter_map(finalize).collect()
    }

    /// Discard all open calls without parsing them
    pub fn clear(&mut self) {
        if !self.calls.is_empty() {
            tracing::debug!(discarded = self.calls.len(), "Discarding partial tool calls");
        }
        self.calls.clear();
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut PendingCall> {
        self.calls.iter_mut().find(|c| c.id == id)
    }
}

fn finalize(call: PendingCall) -> Option<ToolCall> {
    let arguments = if call.arguments.trim().is_empty() {
        call.seed
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    } else {
        match serde_json::from_str::<Value>(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                let err = ConductorError::ToolArguments {
                    call_id: call.id.clone(),
                    message: e.to_string(),
                };
                tracing::warn!(error = %err, "Dropping tool call");
                return None;
            }
        }
    };

    Some(ToolCall {
        id: call.id,
        name: call.name.unwrap_or_default(),
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_fragments_parse_once_at_close() {
        let mut acc = ToolCallAccumulator::new();
        acc.open("call_1", Some("read"));
        for piece in ["{\"pa", "th\": \"/tm", "p\", \"n\"", ": 2}"] {
            acc.append("call_1", piece);
        }

        let call = acc.close("call_1").unwrap();
        assert_eq!(call.name, "read");
        assert_eq!(call.arguments, json!({"path": "/tmp", "n": 2}));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_corrupt_call_dropped_alone() {
        let mut acc = ToolCallAccumulator::new();
        acc.open("good", Some("a"));
        acc.open("bad", Some("b"));
        acc.append("good", "{\"x\":1}");
        acc.append("bad", "{\"x\":");

        let calls = acc.close_all();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "good");
    }

    #[test]
    fn test_empty_arguments_use_seed_or_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.open("a", Some("noop"));
        acc.open("b", Some("seeded"));
        acc.seed("b", json!({"q": "rust"}));

        let calls = acc.close_all();
        assert_eq!(calls[0].arguments, json!({}));
        assert_eq!(calls[1].arguments, json!({"q": "rust"}));
    }

    #[test]
    fn test_synthetic_ids_are_unique() {
        let a = synthetic_call_id();
        let b = synthetic_call_id();
        assert!(a.starts_with("call_"));
        assert_ne!(a, b);
    }
}
