//! Conductor Stream - Canonical LLM Streaming Pipeline
//!
//! This crate turns vendor-specific model output streams into one canonical
//! event sequence, and governs that sequence with stop conditions,
//! cancellation, timeouts, retries, and bounded batch concurrency. It never
//! builds or sends requests; it consumes an already-open HTTP response.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    Open HTTP response                            │
//! │            (status, headers, byte chunks)                        │
//! └───────────────────────────┬──────────────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────────────┐
//! │                     CONDUCTOR STREAM                             │
//! │  ┌────────────────────────┴────────────────────────────────────┐ │
//! │  │  decoder: SSE-delta │ SSE-content-block │ line JSON         │ │
//! │  └────────────────────────┬────────────────────────────────────┘ │
//! │                    CanonicalEvent stream                         │
//! │  ┌────────────────────────┴────────────────────────────────────┐ │
//! │  │  stop conditions  →  orchestrator (cancel / timeout / retry)│ │
//! │  └────────────────────────┬────────────────────────────────────┘ │
//! │                 batch scheduler (N requests, C in flight)        │
//! └───────────────────────────┼──────────────────────────────────────┘
//!                             │
//!               events, or one aggregated result
//! ```
//!
//! # Key Types
//!
//! - [`CanonicalEvent`]: decoder-independent unit of streamed output
//! - [`StreamDecoder`]: per-vendor state machine selected by [`WireFormat`]
//! - [`StopCondition`]: stateful predicate that can end a stream early
//! - [`CancellationToken`]: shared one-way flag with observers
//! - [`RunOptions`] / [`run`]: timeout, cancellation, and retry around an operation
//! - [`BatchScheduler`]: bounded concurrency with input-ordered results
//!
//! # Quick Start
//!
//! ```ignore
//! use conductor_stream::{
//!     spawn_event_stream, with_stop_condition, ChannelCapacity, OpenResponse,
//!     StopConditionBuilder, WireFormat,
//! };
//! use futures::StreamExt;
//!
//! let response = OpenResponse::from_reqwest(reqwest_response);
//! let events = spawn_event_stream(response, WireFormat::SseDelta, ChannelCapacity::Unbounded);
//! let stop = StopConditionBuilder::new().substring("</answer>").build();
//! let mut events = with_stop_condition(events, stop);
//!
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod stop;
pub mod streaming;

// Re-exports for convenience
pub use error::{ConductorError, Result};
pub use events::{CanonicalEvent, FinishReason, ReasoningKind, ToolCall, Usage};

// Decoder exports
pub use decoder::{StreamDecoder, WireFormat};

// Streaming exports
pub use streaming::{
    aggregate_response, aggregate_stream, spawn_event_stream, AggregatedResponse,
    ChannelCapacity, ChunkSource, EventSink, EventStream, OpenResponse, StreamSource,
};

// Stop-condition exports
pub use stop::{with_stop_condition, StopCondition, StopConditionBuilder};

// Orchestrator exports
pub use orchestrator::{
    govern_stream, run, run_stream, CancellationToken, RetryPolicy, RunOptions,
};

// Batch exports
pub use batch::{BatchScheduler, PermitPool};

// Config exports
pub use config::{
    default_config_path, load_settings, load_settings_from_path, ConductorSettings,
    ConductorToml, ConfigError, ConfigSource,
};
