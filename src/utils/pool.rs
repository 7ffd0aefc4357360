//! Bounded-concurrency fan-out for batches of independent RPC calls.

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Default cap on in-flight calls against the upstream provider.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Applies `f` to every item with at most `concurrency` futures in flight.
/// Results come back in input order.
pub async fn bounded_map<I, T, F, Fut>(items: I, concurrency: usize, f: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(items)
        .map(f)
        .buffered(concurrency.max(1))
        .collect()
        .await
}
