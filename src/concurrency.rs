//! Bounded-parallel dispatch for `ForEach` bodies, with cooperative
//! cancellation shared across the whole batch.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Runs `item_count` independent futures (built by `spawn`) with at most
/// `parallelism` running concurrently, returning one result per item in
/// index order. If `cancellation` fires, outstanding permits are dropped
/// and in-flight items are given the chance to observe the token, but
/// futures already spawned are still awaited to completion so their
/// outcome (including any partial compensation) is not lost.
pub async fn run_bounded<F, Fut, T>(
    item_count: usize,
    parallelism: usize,
    cancellation: CancellationToken,
    spawn: F,
) -> Vec<T>
where
    F: Fn(usize, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut join_set = JoinSet::new();
    let mut results: Vec<Option<T>> = (0..item_count).map(|_| None).collect();

    for index in 0..item_count {
        let permits = Arc::clone(&permits);
        let token = cancellation.clone();
        let fut = spawn(index, token);
        join_set.spawn(async move {
            let _permit = permits.acquire_owned().await.expect("semaphore never closed");
            (index, fut.await)
        });
    }

    while let Some(outcome) = join_set.join_next().await {
        match outcome {
            Ok((index, value)) => results[index] = Some(value),
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
        }
    }

    results.into_iter().map(|r| r.expect("every spawned item completes")).collect()
}
