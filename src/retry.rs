//! Deadline-bounded retry with linear backoff.
//!
//! The [`Retrier`] invokes an async operation until it succeeds, fails with an
//! error the classifier does not consider retryable, or the deadline passes.
//! Between retryable failures it sleeps, growing the delay by a fixed
//! increment each time.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hemmer_convergence::{Backoff, ErrorClassifier, RemoteError, Retrier};
//!
//! # tokio_test::block_on(async {
//! let retrier = Retrier::new(
//!     Arc::new(ErrorClassifier::default()),
//!     Backoff::linear(Duration::from_millis(1), Duration::from_millis(1)),
//! );
//!
//! let mut calls = 0;
//! let value = retrier
//!     .retry_for("create", "proj:logstore", Duration::from_secs(1), || {
//!         calls += 1;
//!         let result = if calls < 3 {
//!             Err(RemoteError::new("Throttling", "slow down"))
//!         } else {
//!             Ok("created")
//!         };
//!         async move { result }
//!     })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(value, "created");
//! assert_eq!(calls, 3);
//! # });
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::classify::{ErrorClass, ErrorClassifier};
use crate::error::{ConvergenceError, RemoteError};

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Added to the delay after every retryable failure.
    pub increment: Duration,
}

impl Backoff {
    /// Linear backoff: `initial`, `initial + step`, `initial + 2 * step`, ...
    pub fn linear(initial: Duration, step: Duration) -> Self {
        Self {
            initial_delay: initial,
            increment: step,
        }
    }

    /// The same delay between every attempt.
    pub fn constant(delay: Duration) -> Self {
        Self::linear(delay, Duration::ZERO)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::linear(Duration::from_secs(1), Duration::from_secs(1))
    }
}

/// Why a retried operation gave up, before identity context is attached.
#[derive(Debug)]
pub(crate) enum RetryFailure {
    /// The classifier said not to retry (fatal or not-found).
    Rejected { class: ErrorClass, error: RemoteError },
    /// Retryable failures lasted until the deadline.
    Exhausted {
        attempts: u32,
        class: ErrorClass,
        error: RemoteError,
    },
}

impl RetryFailure {
    pub(crate) fn into_error(self, operation: &str, identity: &str) -> ConvergenceError {
        match self {
            Self::Rejected { class, error } => {
                ConvergenceError::remote(operation, identity, class, error)
            },
            Self::Exhausted {
                attempts,
                class,
                error,
            } => ConvergenceError::TimeoutExceeded {
                operation: operation.to_string(),
                identity: identity.to_string(),
                attempts,
                class,
                last_error: error,
            },
        }
    }
}

/// Retries remote operations that fail with transient or conflict errors.
///
/// The retrier holds no mutable state and can be cloned freely; concurrent
/// resources each call [`Retrier::retry`] from their own task.
#[derive(Debug, Clone)]
pub struct Retrier {
    classifier: Arc<ErrorClassifier>,
    backoff: Backoff,
}

impl Retrier {
    /// Create a retrier that classifies errors with `classifier`.
    pub fn new(classifier: Arc<ErrorClassifier>, backoff: Backoff) -> Self {
        Self {
            classifier,
            backoff,
        }
    }

    /// The backoff schedule in use.
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// The classifier shared with this retrier.
    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// Run `op` until it succeeds, fails non-retryably, or `deadline` passes.
    ///
    /// Not-found errors are not retried; they are returned as
    /// [`ConvergenceError::Remote`] with class [`ErrorClass::NotFound`] so the
    /// caller can decide what absence means.
    ///
    /// # Errors
    ///
    /// - [`ConvergenceError::Remote`] for fatal and not-found failures, on the
    ///   attempt that produced them.
    /// - [`ConvergenceError::TimeoutExceeded`] wrapping the last error when
    ///   retryable failures persist past `deadline`.
    #[instrument(skip_all, name = "retry", fields(operation = %operation, identity = %identity))]
    pub async fn retry<T, F, Fut>(
        &self,
        operation: &str,
        identity: &str,
        deadline: Instant,
        op: F,
    ) -> Result<T, ConvergenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.run(deadline, op)
            .await
            .map_err(|failure| failure.into_error(operation, identity))
    }

    /// Like [`Retrier::retry`], with the deadline `timeout` from now.
    pub async fn retry_for<T, F, Fut>(
        &self,
        operation: &str,
        identity: &str,
        timeout: Duration,
        op: F,
    ) -> Result<T, ConvergenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.retry(operation, identity, Instant::now() + timeout, op)
            .await
    }

    pub(crate) async fn run<T, F, Fut>(&self, deadline: Instant, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut delay = self.backoff.initial_delay;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, "Invoking remote operation");

            let error = match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!(attempts, "Remote operation succeeded after retries");
                    }
                    return Ok(value);
                },
                Err(error) => error,
            };

            let class = self.classifier.classify(&error);
            if !class.is_retryable() {
                debug!(attempt = attempts, %class, code = %error.code, "Not retrying");
                return Err(RetryFailure::Rejected { class, error });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(attempts, %class, code = %error.code, "Retry deadline exceeded");
                return Err(RetryFailure::Exhausted {
                    attempts,
                    class,
                    error,
                });
            }

            // Never sleep past the deadline; the final attempt lands on it.
            let pause = delay.min(deadline - now);
            warn!(
                attempt = attempts,
                %class,
                code = %error.code,
                delay_ms = pause.as_millis() as u64,
                "Retryable failure, backing off"
            );
            sleep(pause).await;
            delay += self.backoff.increment;
        }
    }
}
