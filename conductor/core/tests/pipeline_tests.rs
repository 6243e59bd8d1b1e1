//! Decoder Pipeline Tests
//!
//! Drive complete vendor bodies through the streaming pipeline, split into
//! arbitrary chunk sizes, and check the canonical output.

use bytes::Bytes;
use futures::stream::{self, Iter, StreamExt};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::json;

use conductor_stream::stop::SubstringStop;
use conductor_stream::{
    aggregate_response, aggregate_stream, spawn_event_stream, with_stop_condition,
    CanonicalEvent, ChannelCapacity, ConductorError, FinishReason, OpenResponse, StreamSource,
    Usage, WireFormat,
};

// =============================================================================
// Fixtures
// =============================================================================

type ChunkStream = Iter<std::vec::IntoIter<Result<Bytes, String>>>;

/// Split `body` into `chunk_size`-byte pieces, ignoring UTF-8 boundaries
fn chunked(body: &str, chunk_size: usize) -> Vec<Result<Bytes, String>> {
    body.as_bytes()
        .chunks(chunk_size)
        .map(|piece| Ok(Bytes::copy_from_slice(piece)))
        .collect()
}

fn response_from(
    status: StatusCode,
    chunks: Vec<Result<Bytes, String>>,
) -> OpenResponse<StreamSource<ChunkStream>> {
    OpenResponse::new(status, StreamSource(stream::iter(chunks)))
}

fn ok_response(body: &str, chunk_size: usize) -> OpenResponse<StreamSource<ChunkStream>> {
    response_from(StatusCode::OK, chunked(body, chunk_size))
}

const SSE_DELTA_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\r\n\r\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Héllo\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" wörld\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{\\\"q\\\":\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"rust\\\"}\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: [DONE]\n\n",
);

const CONTENT_BLOCK_BODY: &str = concat!(
    "event: message_start\n",
    "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12,\"output_tokens\":1}}}\n\n",
    "event: content_block_start\n",
    "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"Checking\"}}\n\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"signature_delta\",\"signature\":\"sig==\"}}\n\n",
    "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
    "event: ping\n",
    "data: {\"type\":\"ping\"}\n\n",
    "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_bad\",\"name\":\"broken\",\"input\":{}}}\n\n",
    "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"a\\\":\"}}\n\n",
    "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
    "data: {\"type\":\"content_block_start\",\"index\":2,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_ok\",\"name\":\"get_weather\",\"input\":{}}}\n\n",
    "data: {\"type\":\"content_block_delta\",\"index\":2,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"city\\\": \"}}\n\n",
    "data: {\"type\":\"content_block_delta\",\"index\":2,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"Oslo\\\"}\"}}\n\n",
    "data: {\"type\":\"content_block_stop\",\"index\":2}\n\n",
    "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":30}}\n\n",
    "data: {\"type\":\"message_stop\"}\n\n",
);

const JSON_LINES_BODY: &str = concat!(
    "{\"message\":{\"role\":\"assistant\",\"content\":\"The answer\"},\"done\":false}\n",
    "{\"message\":{\"role\":\"assistant\",\"content\":\" is 42.\"},\"done\":false}\n",
    "{\"message\":{\"role\":\"assistant\",\"content\":\" More text\"},\"done\":false}\n",
    "{\"message\":{\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":9,\"eval_count\":3}",
);

/// Route decoder logs to the test output (`RUST_LOG=conductor_stream=debug`)
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("conductor_stream=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn terminal_count(events: &[CanonicalEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

// =============================================================================
// Aggregation
// =============================================================================

#[tokio::test]
async fn test_sse_delta_any_chunking_aggregates_identically() {
    init_tracing();
    for chunk_size in 1..=9 {
        let result = aggregate_response(ok_response(SSE_DELTA_BODY, chunk_size), WireFormat::SseDelta)
            .await
            .unwrap_or_else(|e| panic!("chunk size {chunk_size}: {e}"));

        assert_eq!(result.text, "Héllo wörld", "chunk size {chunk_size}");
        assert_eq!(result.finish_reason, FinishReason::ToolCalls);
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id, "call_1");
        assert_eq!(result.tool_calls[0].name, "lookup");
        assert_eq!(result.tool_calls[0].arguments, json!({"q": "rust"}));
    }
}

#[tokio::test]
async fn test_content_block_drops_only_corrupted_call() {
    init_tracing();
    let result = aggregate_response(ok_response(CONTENT_BLOCK_BODY, 17), WireFormat::SseContentBlock)
        .await
        .unwrap();

    assert_eq!(result.reasoning, "Checking");
    assert_eq!(result.reasoning_signatures, vec!["sig==".to_string()]);
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].id, "toolu_ok");
    assert_eq!(result.tool_calls[0].arguments, json!({"city": "Oslo"}));
    assert_eq!(result.finish_reason, FinishReason::ToolCalls);
    assert_eq!(
        result.usage,
        Some(Usage {
            input_tokens: 12,
            output_tokens: 30,
        })
    );
}

#[tokio::test]
async fn test_json_lines_through_spawned_stream() {
    let events = spawn_event_stream(
        ok_response(JSON_LINES_BODY, 5),
        WireFormat::JsonLines,
        ChannelCapacity::Bounded(1),
    );
    let result = aggregate_stream(events).await.unwrap();

    assert_eq!(result.text, "The answer is 42. More text");
    assert_eq!(result.finish_reason, FinishReason::Stop);
    assert_eq!(
        result.usage,
        Some(Usage {
            input_tokens: 9,
            output_tokens: 3,
        })
    );
}

// =============================================================================
// Terminal events
// =============================================================================

#[tokio::test]
async fn test_exactly_one_terminal_for_every_family() {
    for (format, body) in [
        (WireFormat::SseDelta, SSE_DELTA_BODY),
        (WireFormat::SseContentBlock, CONTENT_BLOCK_BODY),
        (WireFormat::JsonLines, JSON_LINES_BODY),
    ] {
        for chunk_size in [1, 3, 64, 4096] {
            let events: Vec<_> = spawn_event_stream(
                ok_response(body, chunk_size),
                format,
                ChannelCapacity::Unbounded,
            )
            .collect()
            .await;

            assert_eq!(terminal_count(&events), 1, "{format:?} / {chunk_size}");
            assert!(events.last().is_some_and(CanonicalEvent::is_terminal));
        }
    }
}

#[tokio::test]
async fn test_non_success_status_is_single_transport_error() {
    let response = response_from(
        StatusCode::SERVICE_UNAVAILABLE,
        chunked(r#"{"error":{"message":"overloaded"}}"#, 8),
    );
    let events: Vec<_> =
        spawn_event_stream(response, WireFormat::SseDelta, ChannelCapacity::Unbounded)
            .collect()
            .await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        CanonicalEvent::Error(ConductorError::Transport { status, message }) => {
            assert_eq!(*status, Some(503));
            assert!(message.contains("overloaded"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_truncated_body_ends_with_error() {
    init_tracing();
    let cut = &SSE_DELTA_BODY[..SSE_DELTA_BODY.find("finish_reason").unwrap_or(0)];
    let err = aggregate_response(ok_response(cut, 11), WireFormat::SseDelta)
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Transport { status: None, .. }));
}

#[tokio::test]
async fn test_mid_stream_transport_failure() {
    init_tracing();
    let mut chunks = chunked("{\"response\":\"partial\",\"done\":false}\n", 64);
    chunks.push(Err("connection reset by peer".to_string()));
    chunks.push(Ok(Bytes::from_static(b"{\"done\":true}\n")));

    let events: Vec<_> = spawn_event_stream(
        response_from(StatusCode::OK, chunks),
        WireFormat::JsonLines,
        ChannelCapacity::Unbounded,
    )
    .collect()
    .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].as_text_delta(), Some("partial"));
    assert!(matches!(
        &events[1],
        CanonicalEvent::Error(ConductorError::Transport { message, .. }) if message.contains("reset")
    ));
}

// =============================================================================
// Stop conditions on decoded output
// =============================================================================

#[tokio::test]
async fn test_stop_condition_cuts_decoded_stream() {
    let events = spawn_event_stream(
        ok_response(JSON_LINES_BODY, 7),
        WireFormat::JsonLines,
        ChannelCapacity::Bounded(1),
    );
    let events: Vec<_> = with_stop_condition(events, Box::new(SubstringStop::new("42")))
        .collect()
        .await;

    let texts: Vec<_> = events.iter().filter_map(CanonicalEvent::as_text_delta).collect();
    assert_eq!(texts, vec!["The answer", " is 42."]);
    assert!(matches!(
        events.last(),
        Some(CanonicalEvent::Done {
            finish_reason: FinishReason::StopCondition
        })
    ));
    assert_eq!(terminal_count(&events), 1);
}
