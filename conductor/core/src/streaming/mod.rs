//! Streaming Pipeline
//!
//! Connects an already-open response to a decoder and exposes the result
//! either as a lazy [`EventStream`] or as one [`AggregatedResponse`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   chunks   ┌────────────┐  lines  ┌───────────────┐
//! │ OpenResponse │──────────▶│ LineBuffer │────────▶│ StreamDecoder │
//! │ (ChunkSource)│            └────────────┘         └───────┬───────┘
//! └──────────────┘                                           │ events
//!                                        ┌───────────────────┴──────────┐
//!                                        ▼                              ▼
//!                               mpsc channel (task)              Aggregator
//!                                        │                              │
//!                                   EventStream              AggregatedResponse
//! ```
//!
//! The producer task and its consumer talk over a single-producer,
//! single-consumer channel: unbounded by default, or bounded to block the
//! producer when the consumer falls behind.
//!
//! # Example
//!
//! ```ignore
//! use conductor_stream::streaming::{spawn_event_stream, ChannelCapacity, OpenResponse};
//! use conductor_stream::decoder::WireFormat;
//! use futures::StreamExt;
//!
//! let response = OpenResponse::from_reqwest(http_response);
//! let mut events = spawn_event_stream(response, WireFormat::SseDelta, ChannelCapacity::Unbounded);
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! ```

mod aggregate;
mod pump;
mod source;

use futures::stream::BoxStream;

pub use aggregate::{aggregate_response, aggregate_stream, AggregatedResponse, Aggregator};
pub use pump::{drive, spawn_event_stream, ChannelCapacity, EventSink};
pub use source::{ChunkSource, OpenResponse, StreamSource};

use crate::events::CanonicalEvent;

/// Boxed stream of canonical events, terminated by exactly one Done or Error
pub type EventStream = BoxStream<'static, CanonicalEvent>;
