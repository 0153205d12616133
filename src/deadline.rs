//! Cancellation/deadline propagation: every contract operation
//! on `CacheStore`/`FileStore` takes one of these as its first parameter
//! so a caller can bound how long it is willing to wait, or cancel an
//! in-flight call outright, without the driver needing its own notion of
//! "this call is taking too long."
//!
//! Pairs an `Option<Duration>`-style wall-clock bound with a
//! `tokio_util::sync::CancellationToken`, so a caller that wants to cancel
//! many in-flight operations at once (e.g. on shutdown) can do so with a
//! single `cancel()` rather than racing each call against its own timer.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// An optional wall-clock deadline plus an optional cooperative
/// cancellation signal. Either firing aborts the in-flight operation
/// before it completes; the operation is never retried on timeout or
/// cancellation.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    token: Option<CancellationToken>,
}

impl Deadline {
    /// No deadline, no cancellation. The common case for internal calls
    /// and tests that don't care about bounding how long a call may run.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(timeout: Duration) -> Self {
        Self { at: Instant::now().checked_add(timeout), token: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant), token: None }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// True if the deadline has already elapsed or the token has already
    /// fired. Useful as a cheap up-front check before doing any work at
    /// all, which is all a non-blocking driver (the in-memory cache) can
    /// meaningfully do with a deadline.
    pub fn is_expired(&self) -> bool {
        self.at.map(|at| Instant::now() >= at).unwrap_or(false)
            || self.token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    /// Races `fut` against the deadline/cancellation. Returns `None` if
    /// either fires first, in which case `fut` is dropped without being
    /// polled to completion.
    pub async fn race<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        match (&self.at, &self.token) {
            (None, None) => Some(fut.await),
            (Some(at), None) => tokio::time::timeout_at(tokio::time::Instant::from_std(*at), fut).await.ok(),
            (None, Some(token)) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    result = fut => Some(result),
                }
            }
            (Some(at), Some(token)) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    result = tokio::time::timeout_at(tokio::time::Instant::from_std(*at), fut) => result.ok(),
                }
            }
        }
    }
}

/// Runs `fut` under `deadline`, mapping a timeout/cancellation to
/// `timeout_err` rather than the future's own `Result` type. Shared by
/// both subsystems since `CacheError`/`StorageError` each need their own
/// "deadline exceeded" variant.
pub async fn guard<T, E>(deadline: &Deadline, timeout_err: E, fut: impl Future<Output = Result<T, E>>) -> Result<T, E> {
    if deadline.is_expired() {
        return Err(timeout_err);
    }
    match deadline.race(fut).await {
        Some(result) => result,
        None => Err(timeout_err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn race_returns_the_future_result_when_no_deadline_is_set() {
        let deadline = Deadline::none();
        let result = deadline.race(async { 42 }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn race_times_out_a_slow_future() {
        let deadline = Deadline::after(Duration::from_millis(5));
        let result = deadline
            .race(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                42
            })
            .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn race_honors_an_already_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();
        let deadline = Deadline::none().with_cancellation(token);
        let result = deadline.race(async { 42 }).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn guard_maps_expiry_to_the_caller_supplied_error() {
        let deadline = Deadline::after(Duration::from_millis(5));
        let result: Result<i32, &'static str> = guard(&deadline, "timed out", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        })
        .await;
        assert_eq!(result, Err("timed out"));
    }
}
