//! Decode Loop
//!
//! Reads body chunks, splits them into lines, runs the decoder, and hands each
//! event to a sink. The same loop feeds the event channel of a streaming call
//! and the aggregator of a non-streaming call.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

use super::source::{ChunkSource, OpenResponse};
use super::EventStream;
use crate::decoder::{LineBuffer, StreamDecoder, WireFormat};
use crate::error::ConductorError;
use crate::events::CanonicalEvent;

/// Destination for decoded events
#[async_trait]
pub trait EventSink: Send {
    /// Deliver an event; returns `false` once the consumer has gone away
    async fn send(&mut self, event: CanonicalEvent) -> bool;
}

#[async_trait]
impl EventSink for mpsc::Sender<CanonicalEvent> {
    async fn send(&mut self, event: CanonicalEvent) -> bool {
        mpsc::Sender::send(self, event).await.is_ok()
    }
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<CanonicalEvent> {
    async fn send(&mut self, event: CanonicalEvent) -> bool {
        mpsc::UnboundedSender::send(self, event).is_ok()
    }
}

/// Buffering between the decode task and its consumer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelCapacity {
    /// Never block the producer
    #[default]
    Unbounded,
    /// Block the producer once this many events are waiting
    Bounded(usize),
}

/// Decode a whole response into `sink`
///
/// The sink receives exactly one terminal event unless it goes away first.
pub async fn drive<S, K>(mut response: OpenResponse<S>, format: WireFormat, sink: &mut K)
where
    S: ChunkSource,
    K: EventSink + ?Sized,
{
    if !response.status.is_success() {
        let status = response.status.as_u16();
        let body = response.read_error_body().await;
        tracing::warn!(status, body = %body, "Backend returned non-success status");
        sink.send(CanonicalEvent::Error(ConductorError::status(status, body)))
            .await;
        return;
    }

    let mut decoder = StreamDecoder::new(format);
    let mut lines = LineBuffer::new();

    loop {
        match response.body.next_chunk().await {
            Some(Ok(bytes)) => {
                lines.push(&bytes);
                while let Some(line) = lines.next_line() {
                    if !forward(&mut decoder, &line, sink).await {
                        return;
                    }
                }
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "Transport failed mid-stream");
                if let Some(event) = decoder.fail(err) {
                    sink.send(event).await;
                }
                return;
            }
            None => break,
        }
    }

    if let Some(line) = lines.take_remainder() {
        if !forward(&mut decoder, &line, sink).await {
            return;
        }
    }
    if let Some(event) = decoder.finish() {
        sink.send(event).await;
    }
}

/// Decode one line; returns `false` when decoding should stop
async fn forward<K>(decoder: &mut StreamDecoder, line: &str, sink: &mut K) -> bool
where
    K: EventSink + ?Sized,
{
    for event in decoder.decode_line(line) {
        if !sink.send(event).await {
            tracing::debug!("Event consumer dropped, stopping decoder");
            return false;
        }
    }
    !decoder.is_terminated()
}

/// Spawn the decode loop and return its events as a stream
///
/// Dropping the returned stream stops the producer at its next send.
pub fn spawn_event_stream<S>(
    response: OpenResponse<S>,
    format: WireFormat,
    capacity: ChannelCapacity,
) -> EventStream
where
    S: ChunkSource + 'static,
{
    match capacity {
        ChannelCapacity::Unbounded => {
            let (mut tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(async move { drive(response, format, &mut tx).await });
            UnboundedReceiverStream::new(rx).boxed()
        }
        ChannelCapacity::Bounded(size) => {
            let (mut tx, rx) = mpsc::channel(size.max(1));
            tokio::spawn(async move { drive(response, format, &mut tx).await });
            ReceiverStream::new(rx).boxed()
        }
    }
}
