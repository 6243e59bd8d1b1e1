//! Non-Streaming Aggregation
//!
//! A non-streaming call drains the same decoder as a streaming one, but folds
//! events into a single [`AggregatedResponse`] instead of forwarding them.
//! The caller gets either a fully populated response or an error, never a
//! partial result.

use async_trait::async_trait;
use futures::StreamExt;

use super::pump::{drive, EventSink};
use super::source::{ChunkSource, OpenResponse};
use super::EventStream;
use crate::decoder::WireFormat;
use crate::error::{ConductorError, Result};
use crate::events::{CanonicalEvent, FinishReason, ToolCall, Usage};

/// Complete result of one request
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregatedResponse {
    /// Concatenated visible text
    pub text: String,
    /// Concatenated reasoning text
    pub reasoning: String,
    /// Signatures of the reasoning blocks, in order
    pub reasoning_signatures: Vec<String>,
    /// Completed tool calls, in order
    pub tool_calls: Vec<ToolCall>,
    /// Token usage, if the vendor reported it
    pub usage: Option<Usage>,
    /// Why generation ended
    pub finish_reason: FinishReason,
}

/// Sink that folds events into an [`AggregatedResponse`]
#[derive(Debug, Default)]
pub struct Aggregator {
    partial: AggregatedResponse,
    outcome: Option<Result<FinishReason>>,
}

impl Aggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event; returns `false` once a terminal event was seen
    pub fn push(&mut self, event: CanonicalEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        match event {
            CanonicalEvent::TextDelta(text) => self.partial.text.push_str(&text),
            CanonicalEvent::ReasoningDelta {
                text, signature, ..
            } => {
                self.partial.reasoning.push_str(&text);
                if let Some(signature) = signature {
                    self.partial.reasoning_signatures.push(signature);
                }
            }
            CanonicalEvent::ToolCallDelta { .. } => {}
            CanonicalEvent::ToolCallComplete(call) => self.partial.tool_calls.push(call),
            CanonicalEvent::UsageFinal(usage) => self.partial.usage = Some(usage),
            CanonicalEvent::Done { finish_reason } => self.outcome = Some(Ok(finish_reason)),
            CanonicalEvent::Error(err) => self.outcome = Some(Err(err)),
        }
        self.outcome.is_none()
    }

    /// Finish aggregation
    ///
    /// # Errors
    ///
    /// Returns the terminal error, or a transport error if no terminal event
    /// arrived at all.
    pub fn into_result(self) -> Result<AggregatedResponse> {
        match self.outcome {
            Some(Ok(finish_reason)) => Ok(AggregatedResponse {
                finish_reason,
                ..self.partial
            }),
            Some(Err(err)) => Err(err),
            None => Err(ConductorError::connection(
                "event stream closed without a terminal event",
            )),
        }
    }
}

#[async_trait]
impl EventSink for Aggregator {
    async fn send(&mut self, event: CanonicalEvent) -> bool {
        self.push(event)
    }
}

/// Decode a response body straight into an [`AggregatedResponse`]
///
/// # Errors
///
/// Returns the request's terminal error (non-success status, vendor error,
/// transport failure, or a body that ended without a completion marker).
pub async fn aggregate_response<S: ChunkSource>(
    response: OpenResponse<S>,
    format: WireFormat,
) -> Result<AggregatedResponse> {
    let mut aggregator = Aggregator::new();
    drive(response, format, &mut aggregator).await;
    aggregator.into_result()
}

/// Drain an event stream into an [`AggregatedResponse`]
///
/// # Errors
///
/// Returns the stream's terminal error.
pub async fn aggregate_stream(mut stream: EventStream) -> Result<AggregatedResponse> {
    let mut aggregator = Aggregator::new();
    while let Some(event) = stream.next().await {
        if !aggregator.push(event) {
            break;
        }
    }
    aggregator.into_result()
}
