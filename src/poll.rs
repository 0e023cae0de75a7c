//! Polling a remote object until it reaches a target status.
//!
//! A [`PollSpec`] sorts every status string into one of three buckets:
//! pending, target or fail. The [`Poller`] calls a describe function on an
//! interval and stops when the status lands in the target or fail bucket, the
//! object disappears during a deletion wait, or the timeout elapses.
//!
//! Statuses that are in none of the buckets keep the poll waiting, so a
//! provider introducing a new intermediate status does not break applies.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hemmer_convergence::{ErrorClassifier, PollSpec, Poller, RemoteError};
//!
//! # tokio_test::block_on(async {
//! let poller = Poller::new(Arc::new(ErrorClassifier::default()));
//! let spec = PollSpec::new(Duration::from_millis(1), Duration::from_secs(1))
//!     .pending(["Creating"])
//!     .target(["Active"])
//!     .fail(["CreateFailed"]);
//!
//! let mut statuses = vec!["Active", "Creating"];
//! let status = poller
//!     .wait_for_state("fc:trigger", &spec, || {
//!         let next = statuses.pop().unwrap_or("Active").to_string();
//!         async move { Ok::<_, RemoteError>(next) }
//!     })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(status, "Active");
//! # });
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument};

use crate::classify::{ErrorClass, ErrorClassifier};
use crate::error::{ConvergenceError, RemoteError};
use crate::retry::{Retrier, RetryFailure};

/// Pulls the status string out of a described resource.
///
/// Resolved once per resource type, so status access is checked by the
/// compiler instead of being looked up by field name at runtime.
pub type StatusExtractor<R> = fn(&R) -> &str;

/// Describes what a poll is waiting for.
///
/// The three status sets must be disjoint; [`PollSpec::validate`] checks this
/// and [`Poller`] refuses to run an invalid spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// Statuses that mean "still working on it".
    pub pending: BTreeSet<String>,
    /// Statuses that end the poll successfully. Empty for deletion waits.
    pub target: BTreeSet<String>,
    /// Statuses that end the poll with [`ConvergenceError::FailedToReachTargetStatus`].
    pub fail: BTreeSet<String>,
    /// Time between describe calls.
    pub interval: Duration,
    /// Total time allowed before [`ConvergenceError::WaitTimeout`].
    pub timeout: Duration,
    /// How long after the poll starts a not-found describe still counts as pending.
    pub not_found_grace: Duration,
}

/// The bucket a status falls into under a [`PollSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    /// Listed as pending.
    Pending,
    /// Listed as a target.
    Target,
    /// Listed as a failure.
    Fail,
    /// Not listed anywhere; treated as pending.
    Unknown,
}

impl PollSpec {
    /// Default window during which a freshly created object may still be invisible.
    pub const DEFAULT_NOT_FOUND_GRACE: Duration = Duration::from_secs(10);

    /// An empty spec polling every `interval` for at most `timeout`.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            pending: BTreeSet::new(),
            target: BTreeSet::new(),
            fail: BTreeSet::new(),
            interval,
            timeout,
            not_found_grace: Self::DEFAULT_NOT_FOUND_GRACE,
        }
    }

    /// A deletion wait: succeeds once the object is gone.
    pub fn deletion(interval: Duration, timeout: Duration) -> Self {
        Self::new(interval, timeout)
    }

    /// Add pending statuses.
    pub fn pending<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Add target statuses.
    pub fn target<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Add failure statuses.
    pub fn fail<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fail.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Override the not-found grace window.
    pub fn not_found_grace(mut self, grace: Duration) -> Self {
        self.not_found_grace = grace;
        self
    }

    /// Whether this spec waits for the object to disappear.
    pub fn is_deletion_wait(&self) -> bool {
        self.target.is_empty()
    }

    /// Sort a status into its bucket.
    pub fn bucket(&self, status: &str) -> StatusBucket {
        if self.fail.contains(status) {
            StatusBucket::Fail
        } else if self.target.contains(status) {
            StatusBucket::Target
        } else if self.pending.contains(status) {
            StatusBucket::Pending
        } else {
            StatusBucket::Unknown
        }
    }

    /// Check that no status appears in more than one bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergenceError::Configuration`] naming the first overlapping
    /// status, or when the interval is zero.
    pub fn validate(&self) -> Result<(), ConvergenceError> {
        if self.interval.is_zero() {
            return Err(ConvergenceError::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }

        let pairs = [
            ("pending", &self.pending, "target", &self.target),
            ("pending", &self.pending, "fail", &self.fail),
            ("target", &self.target, "fail", &self.fail),
        ];
        for (left_name, left, right_name, right) in pairs {
            if let Some(status) = left.intersection(right).next() {
                return Err(ConvergenceError::Configuration(format!(
                    "status '{}' is listed as both {} and {}",
                    status, left_name, right_name
                )));
            }
        }

        Ok(())
    }

    fn expected(&self) -> Vec<String> {
        self.target.iter().cloned().collect()
    }
}

/// Waits for remote objects to converge on a target status.
#[derive(Debug, Clone)]
pub struct Poller {
    classifier: Arc<ErrorClassifier>,
    retrier: Option<Retrier>,
}

impl Poller {
    /// A poller that classifies describe errors with `classifier`.
    ///
    /// Any describe error other than a not-found inside the grace window ends
    /// the poll.
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            classifier,
            retrier: None,
        }
    }

    /// Run every describe call through `retrier`, bounded by the poll deadline,
    /// so transient describe failures do not end the poll.
    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = Some(retrier);
        self
    }

    /// Poll a describe function that returns the status directly.
    ///
    /// Returns the target status reached, or an empty string when a deletion
    /// wait observed the object gone.
    ///
    /// # Errors
    ///
    /// See [`Poller::wait_for_resource`].
    pub async fn wait_for_state<F, Fut>(
        &self,
        identity: &str,
        spec: &PollSpec,
        describe: F,
    ) -> Result<String, ConvergenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, RemoteError>>,
    {
        let status = self
            .wait_for_resource(identity, spec, describe, String::as_str)
            .await?;
        Ok(status.unwrap_or_default())
    }

    /// Poll a describe function returning a full resource, reading its status
    /// with `extract`.
    ///
    /// Returns the resource as last described, or `None` when a deletion wait
    /// observed the object gone.
    ///
    /// # Errors
    ///
    /// - [`ConvergenceError::Configuration`] if the spec is invalid.
    /// - [`ConvergenceError::FailedToReachTargetStatus`] when a fail status is seen.
    /// - [`ConvergenceError::WaitTimeout`] with the last status when the timeout elapses.
    /// - [`ConvergenceError::Remote`] for describe errors, including not-found
    ///   after the grace window.
    #[instrument(skip_all, name = "poll", fields(identity = %identity))]
    pub async fn wait_for_resource<R, F, Fut>(
        &self,
        identity: &str,
        spec: &PollSpec,
        mut describe: F,
        extract: StatusExtractor<R>,
    ) -> Result<Option<R>, ConvergenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, RemoteError>>,
    {
        spec.validate()?;

        let started = Instant::now();
        let deadline = started + spec.timeout;
        let mut last_status: Option<String> = None;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            let described = match &self.retrier {
                Some(retrier) => retrier.run(deadline, &mut describe).await,
                None => describe().await.map_err(|error| RetryFailure::Rejected {
                    class: self.classifier.classify(&error),
                    error,
                }),
            };

            match described {
                Ok(resource) => {
                    let status = extract(&resource).to_string();
                    match spec.bucket(&status) {
                        StatusBucket::Target => {
                            info!(polls, status = %status, "Reached target status");
                            return Ok(Some(resource));
                        },
                        StatusBucket::Fail => {
                            return Err(ConvergenceError::FailedToReachTargetStatus {
                                identity: identity.to_string(),
                                status,
                                expected: spec.expected(),
                            });
                        },
                        StatusBucket::Pending => {
                            debug!(polls, status = %status, "Still pending");
                        },
                        StatusBucket::Unknown => {
                            debug!(polls, status = %status, "Unrecognised status, still waiting");
                        },
                    }
                    last_status = Some(status);
                },
                Err(RetryFailure::Rejected {
                    class: ErrorClass::NotFound,
                    error,
                }) => {
                    if spec.is_deletion_wait() {
                        info!(polls, "Object is gone");
                        return Ok(None);
                    }
                    if started.elapsed() >= spec.not_found_grace {
                        return Err(ConvergenceError::remote(
                            "describe",
                            identity,
                            ErrorClass::NotFound,
                            error,
                        ));
                    }
                    debug!(polls, code = %error.code, "Not visible yet, still waiting");
                },
                Err(failure) => return Err(failure.into_error("describe", identity)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConvergenceError::WaitTimeout {
                    identity: identity.to_string(),
                    last_status,
                    expected: spec.expected(),
                    timeout: spec.timeout,
                });
            }
            sleep(spec.interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use crate::testing::Script;
    use tokio_test::{assert_err, assert_ok};

    fn poller() -> Poller {
        Poller::new(Arc::new(ErrorClassifier::default()))
    }

    fn ok(status: &str) -> Result<String, RemoteError> {
        Ok(status.to_string())
    }

    fn create_spec() -> PollSpec {
        PollSpec::new(Duration::from_secs(1), Duration::from_secs(10))
            .pending(["Creating"])
            .target(["Active"])
            .fail(["CreateFailed"])
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_pending() {
        let script = Script::new(vec![ok("Creating"), ok("Creating"), ok("Active")]);
        let start = Instant::now();

        let status = poller()
            .wait_for_state("fc:trigger", &create_spec(), || script.call())
            .await;

        assert_eq!(assert_ok!(status), "Active");
        assert_eq!(script.calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_status_returns_without_sleeping() {
        let script = Script::new(vec![ok("CreateFailed")]);
        let start = Instant::now();

        let err = assert_err!(
            poller()
                .wait_for_state("fc:trigger", &create_spec(), || script.call())
                .await
        );

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(script.calls(), 1);
        assert_eq!(err.last_status(), Some("CreateFailed"));
        assert_eq!(err.identity(), Some("fc:trigger"));
        assert!(matches!(
            err,
            ConvergenceError::FailedToReachTargetStatus { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_keeps_waiting() {
        let script = Script::new(vec![ok("Creating"), ok("Provisioning"), ok("Active")]);

        let status = poller()
            .wait_for_state("fc:trigger", &create_spec(), || script.call())
            .await;

        assert_eq!(assert_ok!(status), "Active");
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_status() {
        let script = Script::new(vec![ok("Creating")]);
        let start = Instant::now();

        let err = assert_err!(
            poller()
                .wait_for_state("fc:trigger", &create_spec(), || script.call())
                .await
        );

        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(err.last_status(), Some("Creating"));
        assert!(matches!(err, ConvergenceError::WaitTimeout { .. }));
        // One describe at t=0 and one after each of the ten one-second sleeps.
        assert_eq!(script.calls(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_wait_succeeds_on_not_found() {
        let script = Script::new(vec![ok("Deleting"), Err(RemoteError::not_found("gone"))]);
        let spec = PollSpec::deletion(Duration::from_secs(1), Duration::from_secs(10))
            .pending(["Deleting"])
            .fail(["DeleteFailed"]);

        let status = poller()
            .wait_for_state("proj:store", &spec, || script.call())
            .await;

        assert_eq!(assert_ok!(status), "");
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_within_grace_is_pending() {
        let script = Script::new(vec![
            Err(RemoteError::new("IndexConfigNotExist", "index missing")),
            Err(RemoteError::new("IndexConfigNotExist", "index missing")),
            ok("Active"),
        ]);

        let status = poller()
            .wait_for_state("proj:store", &create_spec(), || script.call())
            .await;

        assert_eq!(assert_ok!(status), "Active");
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_after_grace_fails() {
        let script: Script<String> =
            Script::new(vec![Err(RemoteError::new("IndexConfigNotExist", "index missing"))]);
        let spec = create_spec().not_found_grace(Duration::from_secs(3));
        let start = Instant::now();

        let err = assert_err!(
            poller()
                .wait_for_state("proj:store", &spec, || script.call())
                .await
        );

        assert!(err.is_not_found());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(script.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_describe_error_ends_unlayered_poll() {
        let script = Script::new(vec![Err(RemoteError::new("Throttling", "slow")), ok("Active")]);

        let err = assert_err!(
            poller()
                .wait_for_state("a:b", &create_spec(), || script.call())
                .await
        );

        assert_eq!(err.class(), Some(ErrorClass::Transient));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_layered_retrier_absorbs_transient_describe_errors() {
        let classifier = Arc::new(ErrorClassifier::default());
        let poller = Poller::new(classifier.clone()).with_retrier(Retrier::new(
            classifier,
            Backoff::constant(Duration::from_millis(100)),
        ));
        let script = Script::new(vec![
            ok("Creating"),
            Err(RemoteError::new("Throttling", "slow")),
            ok("Active"),
        ]);

        let status = poller
            .wait_for_state("a:b", &create_spec(), || script.call())
            .await;

        assert_eq!(assert_ok!(status), "Active");
        assert_eq!(script.calls(), 3);
    }

    #[derive(Debug, Clone)]
    struct Index {
        name: String,
        state: String,
    }

    fn index_state(index: &Index) -> &str {
        &index.state
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_resource_uses_extractor() {
        let script = Script::new(vec![
            Ok(Index {
                name: "idx".to_string(),
                state: "Creating".to_string(),
            }),
            Ok(Index {
                name: "idx".to_string(),
                state: "Available".to_string(),
            }),
        ]);
        let spec = PollSpec::new(Duration::from_secs(1), Duration::from_secs(10))
            .pending(["Creating"])
            .target(["Available"]);

        let index = poller()
            .wait_for_resource("proj:store", &spec, || script.call(), index_state)
            .await;

        let index = assert_ok!(index).expect("target reached");
        assert_eq!(index.name, "idx");
        assert_eq!(index.state, "Available");
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let spec = PollSpec::new(Duration::from_secs(1), Duration::from_secs(10))
            .pending(["Creating", "Active"])
            .target(["Active"]);

        let err = assert_err!(spec.validate());
        assert!(err.to_string().contains("'Active'"));

        let spec = PollSpec::new(Duration::ZERO, Duration::from_secs(10));
        assert_err!(spec.validate());

        assert_ok!(create_spec().validate());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_spec_never_describes() {
        let script = Script::new(vec![ok("Active")]);
        let spec = create_spec().fail(["Active"]);

        assert_err!(
            poller()
                .wait_for_state("a:b", &spec, || script.call())
                .await
        );
        assert_eq!(script.calls(), 0);
    }

    #[test]
    fn test_bucket() {
        let spec = create_spec();
        assert_eq!(spec.bucket("Creating"), StatusBucket::Pending);
        assert_eq!(spec.bucket("Active"), StatusBucket::Target);
        assert_eq!(spec.bucket("CreateFailed"), StatusBucket::Fail);
        assert_eq!(spec.bucket("Rebooting"), StatusBucket::Unknown);
        assert!(!spec.is_deletion_wait());
        assert!(PollSpec::deletion(Duration::from_secs(1), Duration::from_secs(1)).is_deletion_wait());
    }
}
