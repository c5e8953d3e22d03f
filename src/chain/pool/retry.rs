//! Bounded retry wrappers, synchronous and future-resubmitting.
//!
//! Grounded on the original `Retry`/`RetryDelayed<T>`: `Retry::run` calls a
//! closure in a loop, rethrowing once the retry budget is exhausted or the
//! error is classified as non-retryable; `RetryDelayed<T>` instead wraps a
//! closure that produces a future (here, a [`TaskHandle`]), submitting it
//! immediately on construction and, on `retrieve()`, resubmitting a fresh
//! future each time the previous one resolves to a retryable error.

use crate::chain::error::ChainError;
use crate::chain::pool::task_pool::TaskHandle;

/// Runs a fallible closure up to `n_retries + 1` times, stopping early on a
/// non-retryable error. `n_retries = 0` means exactly one attempt.
pub struct Retry {
    n_retries: u64,
}

impl Retry {
    pub fn new(n_retries: u64) -> Self {
        Self { n_retries }
    }

    /// Runs `f`, calling `on_retry(attempt_number, &error)` each time a
    /// retryable error triggers another attempt. Returns the first success,
    /// or the last error once the budget is exhausted or the error is
    /// classified non-retryable by [`ChainError::no_retry`].
    pub fn run<T>(
        &self,
        mut f: impl FnMut() -> Result<T, ChainError>,
        mut on_retry: impl FnMut(u64, &ChainError),
    ) -> Result<T, ChainError> {
        let mut attempt = 0u64;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempt += 1;
                    if attempt > self.n_retries || error.no_retry() {
                        return Err(error);
                    }
                    on_retry(attempt, &error);
                }
            }
        }
    }
}

/// Resubmits a future-producing closure on retryable failure instead of
/// re-running a plain closure. `func` is called once immediately to produce
/// the first in-flight `TaskHandle`, and again each time `retrieve` observes
/// a retryable failure.
pub struct DelayedRetry<T, F>
where
    F: FnMut() -> TaskHandle<Result<T, ChainError>>,
{
    n_retries: u64,
    n_try: u64,
    handle: Option<TaskHandle<Result<T, ChainError>>>,
    func: F,
}

impl<T, F> DelayedRetry<T, F>
where
    F: FnMut() -> TaskHandle<Result<T, ChainError>>,
    T: Send + 'static,
{
    /// Submits the first attempt immediately via `func`.
    pub fn new(n_retries: u64, mut func: F) -> Self {
        let handle = func();
        Self {
            n_retries,
            n_try: 0,
            handle: Some(handle),
            func,
        }
    }

    /// Blocks for the in-flight attempt's result, resubmitting via `func` on
    /// a retryable failure until the budget is exhausted.
    pub fn retrieve(mut self, mut on_retry: impl FnMut(u64, &ChainError)) -> Result<T, ChainError> {
        loop {
            let handle = self
                .handle
                .take()
                .expect("DelayedRetry always holds an in-flight handle between loop iterations");
            let outcome = match handle.get() {
                Ok(inner) => inner,
                Err(task_error) => Err(ChainError::Internal(task_error.to_string())),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(error) => {
                    self.n_try += 1;
                    if self.n_try > self.n_retries || error.no_retry() {
                        return Err(error);
                    }
                    on_retry(self.n_try, &error);
                    self.handle = Some((self.func)());
                }
            }
        }
    }
}
