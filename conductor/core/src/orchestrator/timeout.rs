//! Timeout race between an operation and a timer.

use std::future::Future;
use std::time::Duration;

use super::CancellationToken;
use crate::error::{ConductorError, Result};

/// Race `operation` against `limit`
///
/// Whichever finishes first decides the outcome. When the timer wins, `token`
/// is cancelled so a cooperative operation can stop; the operation future is
/// dropped, so any result it would have produced is discarded. Without a
/// limit the operation simply runs to completion.
pub async fn race_timeout<T, F>(
    limit: Option<Duration>,
    token: &CancellationToken,
    operation: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(limit) = limit else {
        return operation.await;
    };

    tokio::select! {
        biased;
        outcome = operation => outcome,
        () = tokio::time::sleep(limit) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Operation timed out");
            token.cancel();
            Err(ConductorError::Timeout(limit))
        }
    }
}
