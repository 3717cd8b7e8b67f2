//! Bounded retries around store access.
//!
//! Two layers:
//! - [`RetryPolicy::store`] wraps a single store call with a timeout and
//!   retries transient failures (`Unavailable`, `Timeout`).
//! - [`RetryPolicy::cycle`] re-runs a whole read-validate-write cycle when its
//!   write lost a version race.

use crate::config::EngineConfig;
use crate::error::Error;
use ledger::StoreError;
use metrics::counter;
use std::future::Future;
use std::time::Duration;

/// Outcome of one cycle attempt.
#[derive(Debug)]
pub(crate) enum CycleError {
    /// The plan hit a version conflict or a duplicate settlement; re-read and
    /// try again.
    Retry(StoreError),
    Fail(Error),
}

impl From<Error> for CycleError {
    fn from(err: Error) -> Self {
        CycleError::Fail(err)
    }
}

impl From<StoreError> for CycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } | StoreError::Duplicate(_) => CycleError::Retry(err),
            other => CycleError::Fail(other.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            retries: config.store_retries,
            backoff: config.retry_backoff(),
            timeout: config.store_timeout(),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Run `f` with a per-attempt timeout, retrying transient failures.
    pub async fn store<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            };

            match result {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    counter!("commonpool.store.retries.total", "op" => op, "reason" => "transient")
                        .increment(1);
                    tracing::debug!(op, attempt, error = %e, "retrying store call");
                    tokio::time::sleep(self.delay(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Run a cycle, starting over on version conflicts. Exhaustion surfaces
    /// as `StoreUnavailable`.
    pub(crate) async fn cycle<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CycleError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(CycleError::Fail(e)) => return Err(e),
                Err(CycleError::Retry(e)) if attempt < self.retries => {
                    attempt += 1;
                    counter!("commonpool.store.retries.total", "op" => op, "reason" => "conflict")
                        .increment(1);
                    tracing::debug!(op, attempt, error = %e, "write conflict, re-running");
                    tokio::time::sleep(self.delay(attempt)).await;
                }
                Err(CycleError::Retry(e)) => {
                    return Err(Error::StoreUnavailable(format!(
                        "{} gave up after {} attempts: {}",
                        op,
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            retries: 2,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = quick()
            .store("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Unavailable("busy".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = quick()
            .store("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Unavailable("down".to_string()))
            })
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_calls_time_out() {
        let err = quick()
            .store("test", move || async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Timeout));
        assert!(matches!(Error::from(err), Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = quick()
            .store("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Serialize("bad row".to_string()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Serialize(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cycle_reruns_on_conflict() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = quick()
            .cycle("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CycleError::from(StoreError::VersionConflict {
                        entity: "request",
                        id: Uuid::nil(),
                        expected: 1,
                        found: 2,
                    }))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cycle_conflict_exhaustion() {
        let result: Result<(), Error> = quick()
            .cycle("test", || async {
                Err(CycleError::from(StoreError::Duplicate("tx".to_string())))
            })
            .await;

        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_cycle_business_errors_pass_through() {
        let result: Result<(), Error> = quick()
            .cycle("test", || async {
                Err(CycleError::from(Error::Forbidden("no".to_string())))
            })
            .await;

        assert_eq!(result, Err(Error::Forbidden("no".to_string())));
    }
}
