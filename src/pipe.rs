//! Sequential retry pipe
//!
//! Applies an operation to each element of a sequence in order and collects
//! the failures instead of propagating them. A failure stops the run unless
//! the pipe is aggressive; an authentication failure (HTTP 401) stops it
//! regardless, since nothing that follows can succeed with the same
//! credentials.

use std::future::Future;

use crate::config::{PipeConfig, RetryConfig};
use crate::error::Error;
use crate::retry::with_retry;

/// In-order bulk runner that collects `(element, error)` pairs
#[derive(Clone, Debug, Default)]
pub struct SequentialPipe {
    aggressive: bool,
    retry: Option<RetryConfig>,
}

impl SequentialPipe {
    /// Create a pipe; `aggressive` keeps going past non-auth failures
    pub fn new(aggressive: bool) -> Self {
        Self {
            aggressive,
            retry: None,
        }
    }

    /// Create a pipe from configuration
    pub fn from_config(config: &PipeConfig) -> Self {
        Self::new(config.aggressive)
    }

    /// Attempt every element through [`with_retry`] before recording its failure
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Whether the pipe continues past non-auth failures
    pub fn is_aggressive(&self) -> bool {
        self.aggressive
    }

    /// Apply `operation` to each element, in order.
    ///
    /// Returns the failures accumulated before the run stopped. Elements left
    /// unprocessed after a stop are not reported.
    pub async fn run<T, F, Fut, O>(
        &self,
        items: impl IntoIterator<Item = T>,
        mut operation: F,
    ) -> Vec<(T, Error)>
    where
        F: FnMut(&T) -> Fut,
        Fut: Future<Output = Result<O, Error>>,
    {
        let mut failures = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            let result = match &self.retry {
                Some(retry) => with_retry(retry, || operation(&item)).await,
                None => operation(&item).await,
            };

            let Err(e) = result else { continue };

            let stop = e.is_auth_rejected() || !self.aggressive;
            if e.is_auth_rejected() {
                tracing::error!(index, error = %e, "Authentication rejected, stopping pipe");
            } else if stop {
                tracing::warn!(index, error = %e, "Element failed, stopping pipe");
            } else {
                tracing::warn!(index, error = %e, "Element failed, continuing");
            }

            failures.push((item, e));
            if stop {
                break;
            }
        }

        failures
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn status(code: u16) -> Error {
        Error::HttpStatus {
            status: code,
            url: "https://host.example.com/item".into(),
        }
    }

    /// Runs 1..=5, failing the elements listed in `failing` with `code`
    async fn run_five(pipe: &SequentialPipe, failing: &[u32], code: u16) -> (Vec<u32>, Vec<u32>) {
        let visited = Mutex::new(Vec::new());
        let failures = pipe
            .run(1..=5u32, |item| {
                visited.lock().unwrap().push(*item);
                let fail = failing.contains(item);
                async move { if fail { Err(status(code)) } else { Ok(()) } }
            })
            .await;
        let failed = failures.into_iter().map(|(item, _)| item).collect();
        (visited.into_inner().unwrap(), failed)
    }

    #[tokio::test]
    async fn non_aggressive_stops_at_first_failure() {
        let pipe = SequentialPipe::new(false);
        let (visited, failed) = run_five(&pipe, &[2, 4], 500).await;
        assert_eq!(visited, vec![1, 2]);
        assert_eq!(failed, vec![2]);
    }

    #[tokio::test]
    async fn aggressive_continues_past_transient_failures() {
        let pipe = SequentialPipe::new(true);
        let (visited, failed) = run_five(&pipe, &[2, 4], 500).await;
        assert_eq!(visited, vec![1, 2, 3, 4, 5]);
        assert_eq!(failed, vec![2, 4]);
    }

    #[tokio::test]
    async fn auth_failure_stops_even_when_aggressive() {
        let pipe = SequentialPipe::new(true);
        let (visited, failed) = run_five(&pipe, &[2], 401).await;
        assert_eq!(visited, vec![1, 2]);
        assert_eq!(failed, vec![2]);
    }

    #[tokio::test]
    async fn all_successes_report_nothing() {
        let pipe = SequentialPipe::from_config(&PipeConfig { aggressive: false });
        let (visited, failed) = run_five(&pipe, &[], 500).await;
        assert_eq!(visited.len(), 5);
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn retrying_pipe_recovers_transient_failure() {
        let pipe = SequentialPipe::new(false).with_retry(RetryConfig::immediate(3));
        let calls = Mutex::new(0u32);
        let failures = pipe
            .run(["only"], |_| {
                let mut n = calls.lock().unwrap();
                *n += 1;
                let attempt = *n;
                async move { if attempt < 3 { Err(status(503)) } else { Ok(attempt) } }
            })
            .await;
        assert!(failures.is_empty());
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn retrying_pipe_never_retries_auth_failure() {
        let pipe = SequentialPipe::new(true).with_retry(RetryConfig::immediate(5));
        let calls = Mutex::new(0u32);
        let failures = pipe
            .run(["a", "b"], |_| {
                *calls.lock().unwrap() += 1;
                async { Err::<(), _>(status(401)) }
            })
            .await;
        assert_eq!(failures.len(), 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
