//! Cancellation / Timeout / Retry Orchestrator
//!
//! Wraps single-result operations and event streams with a cancellation
//! token, a per-attempt deadline, and capped backoff retry.
//!
//! ```text
//!   run(options, op)
//!     │
//!     ├─ root cancelled? ───────────────▶ Err(Cancelled)
//!     ├─ attempt n under child token
//!     │     └─ race(op, timer) ──ok────▶ Ok(value)
//!     │              │
//!     │              └─err─ Cancelled ─▶ Err(Cancelled)   (never retried)
//!     ├─ attempts left? no ─────────────▶ Err(RetryExhausted { attempts, last_error })
//!     └─ sleep(backoff) or root cancelled, then next attempt
//! ```
//!
//! Streams get the same retry around opening, then [`govern_stream`] checks
//! cancellation and the overall deadline before forwarding every event.

mod cancellation;
mod retry;
mod timeout;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};

pub use cancellation::CancellationToken;
pub use retry::RetryPolicy;
pub use timeout::race_timeout;

use crate::error::{ConductorError, Result};
use crate::events::CanonicalEvent;
use crate::streaming::EventStream;

// ============================================================================
// Options
// ============================================================================

/// Controls for one orchestrated operation
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Deadline for each attempt (falls back to the policy's attempt timeout)
    pub timeout: Option<Duration>,

    /// Root token for the whole operation, including retries
    pub token: CancellationToken,

    /// Retry policy
    pub retry: RetryPolicy,

    /// Deadline for consuming an opened stream, measured from when it opened
    pub stream_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            token: CancellationToken::new(),
            retry: RetryPolicy::none(),
            stream_timeout: None,
        }
    }
}

impl RunOptions {
    /// Single attempt, no deadline, fresh token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use an existing token
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the stream consumption deadline
    #[must_use]
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        self.timeout.or(self.retry.attempt_timeout)
    }
}

// ============================================================================
// Single result
// ============================================================================

/// Run `operation` under the options' token, deadline, and retry policy
///
/// Each attempt receives a child of the root token; a timed-out attempt has
/// its child cancelled and its late result discarded. Cancellation is checked
/// before every attempt and during backoff, and is never retried.
///
/// # Errors
///
/// - [`ConductorError::Cancelled`] when the root token is cancelled or an
///   attempt reports cancellation
/// - the attempt's own error (including [`ConductorError::Timeout`]) when the
///   policy allows a single attempt
/// - [`ConductorError::RetryExhausted`] when every attempt failed
pub async fn run<T, F, Fut>(options: &RunOptions, mut operation: F) -> Result<T>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let root = &options.token;
    let max_attempts = options.retry.attempts();
    let limit = options.attempt_timeout();
    let mut attempt = 0;

    loop {
        if root.is_cancelled() {
            tracing::debug!(attempt, "Operation cancelled before attempt");
            return Err(ConductorError::Cancelled);
        }
        attempt += 1;

        let token = root.child();
        let error = match race_timeout(limit, &token, operation(token.clone())).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.is_cancellation() {
            tracing::debug!(attempt, "Operation cancelled");
            return Err(error);
        }
        if attempt >= max_attempts {
            if max_attempts == 1 {
                return Err(error);
            }
            tracing::warn!(attempts = attempt, error = %error, "Retries exhausted");
            return Err(ConductorError::RetryExhausted {
                attempts: attempt,
                last_error: Box::new(error),
            });
        }

        let delay = options.retry.delay_for_attempt(attempt - 1);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying"
        );

        tokio::select! {
            biased;
            () = root.cancelled() => {
                tracing::debug!(attempt, "Cancelled during backoff");
                return Err(ConductorError::Cancelled);
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

// ============================================================================
// Streams
// ============================================================================

/// Open a stream with retry, then govern it with [`govern_stream`]
///
/// Only the opening is retried; once events flow, a failure is reported in
/// band as a terminal [`CanonicalEvent::Error`].
///
/// # Errors
///
/// Same as [`run`], for the opening step.
pub async fn run_stream<F, Fut>(options: &RunOptions, open: F) -> Result<EventStream>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<EventStream>>,
{
    let stream = run(options, open).await?;
    Ok(govern_stream(
        stream,
        options.token.clone(),
        options.stream_timeout,
    ))
}

struct Governed {
    inner: Option<EventStream>,
    token: CancellationToken,
    cancelled: oneshot::Receiver<()>,
    deadline: Option<(Pin<Box<Sleep>>, Duration)>,
}

enum Step {
    Cancelled,
    Expired(Duration),
    Event(Option<CanonicalEvent>),
}

async fn expire(deadline: &mut Option<(Pin<Box<Sleep>>, Duration)>) -> Duration {
    match deadline {
        Some((sleep, limit)) => {
            sleep.as_mut().await;
            *limit
        }
        None => std::future::pending().await,
    }
}

/// Forward `stream` while checking `token` and an optional deadline per event
///
/// Cancellation becomes a terminal `Error(Cancelled)`, deadline expiry a
/// terminal `Error(Timeout)`, and an upstream that ends without a terminal
/// event a terminal transport error. Nothing is forwarded after a terminal.
pub fn govern_stream(
    stream: EventStream,
    token: CancellationToken,
    timeout: Option<Duration>,
) -> EventStream {
    // Registered on a child so dropping the stream releases the observer
    let token = token.child();
    let (tx, cancelled) = oneshot::channel();
    token.on_cancel(move || {
        let _ = tx.send(());
    });

    let state = Governed {
        inner: Some(stream),
        token,
        cancelled,
        deadline: timeout.map(|limit| {
            let sleep = Box::pin(tokio::time::sleep_until(Instant::now() + limit));
            (sleep, limit)
        }),
    };

    futures::stream::unfold(state, |mut state| async move {
        let inner = state.inner.as_mut()?;

        let step = if state.token.is_cancelled() {
            Step::Cancelled
        } else {
            tokio::select! {
                biased;
                _ = &mut state.cancelled => Step::Cancelled,
                limit = expire(&mut state.deadline) => Step::Expired(limit),
                event = inner.next() => Step::Event(event),
            }
        };

        let event = match step {
            Step::Cancelled => {
                tracing::debug!("Stream cancelled");
                CanonicalEvent::Error(ConductorError::Cancelled)
            }
            Step::Expired(limit) => {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "Stream timed out");
                CanonicalEvent::Error(ConductorError::Timeout(limit))
            }
            Step::Event(Some(event)) if !event.is_terminal() => return Some((event, state)),
            Step::Event(Some(terminal)) => terminal,
            Step::Event(None) => CanonicalEvent::Error(ConductorError::connection(
                "stream ended before completion marker",
            )),
        };

        state.inner = None;
        Some((event, state))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use futures::stream;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::events::FinishReason;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = RunOptions::new().with_retry(fast_retry(3));

        let counter = Arc::clone(&calls);
        let value = run(&options, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ConductorError::status(503, "busy"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(value.ok(), Some("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = RunOptions::new().with_retry(fast_retry(3));

        let counter = Arc::clone(&calls);
        let outcome: Result<()> = run(&options, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(ConductorError::connection("reset")),
                    _ => Err(ConductorError::Cancelled),
                }
            }
        })
        .await;

        assert!(matches!(outcome, Err(ConductorError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_error_and_count() {
        let options = RunOptions::new().with_retry(fast_retry(3));
        let outcome: Result<()> =
            run(&options, |_| async { Err(ConductorError::status(500, "boom")) }).await;

        match outcome {
            Err(ConductorError::RetryExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(
                    *last_error,
                    ConductorError::Transport { status: Some(500), .. }
                ));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_attempt_passes_error_through() {
        let options = RunOptions::new().with_timeout(Duration::from_millis(10));
        let outcome: Result<()> = run(&options, |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(outcome, Err(ConductorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_timed_out_attempt_sees_cancelled_child() {
        let options = RunOptions::new()
            .with_timeout(Duration::from_millis(10))
            .with_retry(fast_retry(2));
        let seen: Arc<parking_lot::Mutex<Vec<CancellationToken>>> = Arc::default();

        let tokens = Arc::clone(&seen);
        let outcome: Result<()> = run(&options, move |token| {
            tokens.lock().push(token.clone());
            async move {
                token.cancelled().await;
                Err(ConductorError::connection("unreachable"))
            }
        })
        .await;

        assert!(matches!(
            outcome,
            Err(ConductorError::RetryExhausted { attempts: 2, .. })
        ));
        assert!(seen.lock().iter().all(CancellationToken::is_cancelled));
        assert!(!options.token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_root_skips_operation() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = RunOptions::new();
        options.token.cancel();

        let counter = Arc::clone(&calls);
        let outcome: Result<()> = run(&options, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert!(matches!(outcome, Err(ConductorError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let options = RunOptions::new().with_retry(
            RetryPolicy::default()
                .with_max_attempts(5)
                .with_delay(Duration::from_secs(30)),
        );
        let token = options.token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let outcome: Result<()> = tokio::time::timeout(
            Duration::from_secs(2),
            run(&options, |_| async { Err(ConductorError::connection("down")) }),
        )
        .await
        .expect("backoff should be interrupted");
        assert!(matches!(outcome, Err(ConductorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_governed_stream_cancels_mid_stream() {
        let token = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let upstream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx).boxed();
        let mut governed = govern_stream(upstream, token.clone(), None);

        tx.send(CanonicalEvent::TextDelta("a".into())).unwrap();
        let first = governed.next().await;
        assert_eq!(first.as_ref().and_then(CanonicalEvent::as_text_delta), Some("a"));

        token.cancel();
        tx.send(CanonicalEvent::TextDelta("b".into())).unwrap();
        assert!(matches!(
            governed.next().await,
            Some(CanonicalEvent::Error(ConductorError::Cancelled))
        ));
        assert!(governed.next().await.is_none());
    }

    #[tokio::test]
    async fn test_governed_stream_deadline() {
        let upstream = stream::pending::<CanonicalEvent>().boxed();
        let events: Vec<_> = govern_stream(
            upstream,
            CancellationToken::new(),
            Some(Duration::from_millis(20)),
        )
        .collect()
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CanonicalEvent::Error(ConductorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_governed_stream_requires_terminal() {
        let upstream = stream::iter(vec![CanonicalEvent::TextDelta("x".into())]).boxed();
        let events: Vec<_> = govern_stream(upstream, CancellationToken::new(), None)
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            CanonicalEvent::Error(ConductorError::Transport { status: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_run_stream_retries_open() {
        let opens = Arc::new(AtomicU32::new(0));
        let options = RunOptions::new().with_retry(fast_retry(3));

        let counter = Arc::clone(&opens);
        let stream = run_stream(&options, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(ConductorError::status(429, "slow down"));
                }
                Ok(stream::iter(vec![
                    CanonicalEvent::TextDelta("hi".into()),
                    CanonicalEvent::done(FinishReason::Stop),
                ])
                .boxed())
            }
        })
        .await
        .expect("stream should open on second attempt");

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shared_root_sheds_observers_after_runs() {
        let options = RunOptions::new().with_retry(fast_retry(3));
        for _ in 0..50 {
            let outcome: Result<()> =
                run(&options, |_| async { Err(ConductorError::connection("down")) }).await;
            assert!(outcome.is_err());
        }
        // Attempt children and backoff waits are all gone
        assert_eq!(options.token.pending_observers(), 0);
    }

    #[tokio::test]
    async fn test_dropped_governed_stream_releases_observer() {
        let token = CancellationToken::new();
        let upstream = stream::iter(vec![CanonicalEvent::TextDelta("x".into())]).boxed();
        let governed = govern_stream(upstream, token.clone(), None);
        assert_eq!(token.pending_observers(), 1);

        drop(governed);
        assert_eq!(token.pending_observers(), 0);
    }
}
