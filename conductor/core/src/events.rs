//! Canonical Events
//!
//! The vendor-independent representation of "the model is generating output".
//! Every decoder, whatever its wire format, produces a sequence of these
//! events terminated by exactly one [`CanonicalEvent::Done`] or
//! [`CanonicalEvent::Error`].
//!
//! ```text
//! TextDelta* | ReasoningDelta* | ToolCallDelta* | ToolCallComplete*
//!        ... UsageFinal? ...
//!        Done | Error          <-- exactly one, always last
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConductorError;

/// One unit of streamed model output
#[derive(Clone, Debug)]
pub enum CanonicalEvent {
    /// Visible text fragment
    TextDelta(String),

    /// Reasoning ("thinking") fragment
    ReasoningDelta {
        /// Reasoning text (opaque payload for redacted blocks)
        text: String,
        /// Block signature, attached at most once per block
        signature: Option<String>,
        /// Which kind of reasoning block produced this fragment
        kind: ReasoningKind,
    },

    /// Raw fragment of a tool call's JSON arguments
    ToolCallDelta {
        /// Tool call identifier (vendor supplied or synthetic)
        id: String,
        /// Tool name, when known at this point
        name: Option<String>,
        /// Argument text exactly as it arrived
        arguments_fragment: String,
    },

    /// A tool call whose arguments parsed successfully at block close
    ToolCallComplete(ToolCall),

    /// Final token accounting reported by the vendor
    UsageFinal(Usage),

    /// Successful end of the request
    Done {
        /// Why generation ended
        finish_reason: FinishReason,
    },

    /// Failed end of the request
    Error(ConductorError),
}

impl CanonicalEvent {
    /// Whether this event ends the request
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }

    /// Text payload of a `TextDelta`
    #[must_use]
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::TextDelta(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Shorthand for a `Done` event
    #[must_use]
    pub fn done(finish_reason: FinishReason) -> Self {
        Self::Done { finish_reason }
    }
}

/// Kind of reasoning block
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningKind {
    /// Plain reasoning text
    #[default]
    Thinking,
    /// Vendor-encrypted reasoning; the text is opaque data
    Redacted,
}

/// A fully assembled tool call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call identifier
    pub id: String,
    /// Tool name
    pub name: String,
    /// Parsed arguments
    pub arguments: serde_json::Value,
}

/// Token usage for one request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Generated tokens
    pub output_tokens: u64,
}

impl Usage {
    /// Total tokens
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Why generation ended
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of output
    #[default]
    Stop,
    /// The model is waiting on tool results
    ToolCalls,
    /// Output hit the token limit
    Length,
    /// Output was filtered by the vendor
    ContentFilter,
    /// A local stop condition ended the stream early
    StopCondition,
    /// Any vendor reason without a canonical mapping
    Other(String),
}

impl FinishReason {
    /// Map a vendor reason string onto the canonical set
    #[must_use]
    pub fn from_vendor(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" => Self::Stop,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "length" | "max_tokens" => Self::Length,
            "content_filter" | "refusal" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}
