//! Bounded-concurrency batch execution with input-ordered results.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

use super::PermitPool;
use crate::error::Result;
use crate::orchestrator::{self, CancellationToken, RunOptions};

/// Runs independent requests with at most `max_concurrency` in flight
#[derive(Clone, Debug)]
pub struct BatchScheduler {
    permits: PermitPool,
}

impl BatchScheduler {
    /// Create a scheduler (a ceiling of zero behaves as one)
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: PermitPool::new(max_concurrency),
        }
    }

    /// The concurrency ceiling
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.permits.capacity()
    }

    /// Run `f` over every input; results come back in input order
    ///
    /// All requests are dispatched at once and park on the permit pool, so
    /// completion order is free but no more than the ceiling run together.
    pub async fn run_all<I, T, F, Fut>(&self, inputs: Vec<I>, f: F) -> Vec<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T>,
    {
        let total = inputs.len();
        let mut pending: FuturesUnordered<_> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                let permits = &self.permits;
                let f = &f;
                async move {
                    let _permit = permits.acquire().await;
                    (index, f(input).await)
                }
            })
            .collect();

        let mut results = Vec::with_capacity(total);
        while let Some(tagged) = pending.next().await {
            results.push(tagged);
            tracing::debug!(completed = results.len(), total, "Batch request finished");
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, value)| value).collect()
    }

    /// Run every input through the orchestrator under shared options
    ///
    /// Each request gets its own retries and per-attempt deadline; all share
    /// `options.token`, so cancelling it stops the whole batch.
    pub async fn run_governed<I, T, F, Fut>(
        &self,
        inputs: Vec<I>,
        options: &RunOptions,
        op: F,
    ) -> Vec<Result<T>>
    where
        I: Clone,
        F: Fn(I, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let op = &op;
        self.run_all(inputs, |input| async move {
            orchestrator::run(options, |token| op(input.clone(), token)).await
        })
        .await
    }
}
