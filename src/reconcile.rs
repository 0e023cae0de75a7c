//! Create-or-adopt reconciliation.
//!
//! Applying the same configuration twice must be safe even when an earlier
//! apply failed half-way or the object was created outside of Hemmer. The
//! [`Reconciler`] therefore never creates blindly: it first checks whether the
//! object exists and, if so, patches only the fields the configuration owns.
//!
//! ```text
//! exists? ──NotFound──▶ create ──▶ wait for target status ──▶ Created
//!    │
//!    └──────found─────▶ adopt(desired fields) ──▶ wait ──────▶ Adopted
//! ```
//!
//! Every remote call goes through the [`Retrier`]; fatal errors abort the
//! reconcile with the identity and operation name attached. The sequence is
//! not transactional: two concurrent reconciles of the same identity can both
//! see the object absent, and the loser's create fails with an
//! `AlreadyExists`-class error, which is surfaced rather than adopted.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::error::{ConvergenceError, RemoteError};
use crate::id::IdCodec;
use crate::poll::{PollSpec, Poller};
use crate::retry::Retrier;

/// The remote side of a managed resource.
///
/// Resource handlers implement this over their API client. Every method is
/// one remote call; retries, polling and identity handling are done by the
/// [`Reconciler`].
#[async_trait]
pub trait ConvergenceTarget: Send + Sync {
    /// Check whether the object with this natural key exists.
    ///
    /// Absence must be reported as an error the classifier maps to
    /// not-found, e.g. [`RemoteError::not_found`].
    async fn exists(&self, natural_key: &[String]) -> Result<(), RemoteError>;

    /// Create the object. `desired` holds the fields the configuration owns;
    /// the handler adds whatever else the create request needs.
    ///
    /// Returns the natural key of the created object, which may include
    /// server-assigned components.
    async fn create(
        &self,
        natural_key: &[String],
        desired: &Map<String, Value>,
    ) -> Result<Vec<String>, RemoteError>;

    /// Patch an existing object with only the `desired` fields.
    async fn adopt(
        &self,
        natural_key: &[String],
        desired: &Map<String, Value>,
    ) -> Result<(), RemoteError>;

    /// Read the coarse status of the object, for polling.
    async fn status(&self, natural_key: &[String]) -> Result<String, RemoteError>;

    /// Delete the object.
    async fn delete(&self, natural_key: &[String]) -> Result<(), RemoteError>;
}

/// What a reconcile should converge.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceRequest {
    /// Natural-key components identifying the remote object.
    pub natural_key: Vec<String>,
    /// Fields owned by the configuration. Adoption patches only these.
    pub desired_fields: Map<String, Value>,
    /// Status to wait for after create or adopt; `None` skips the wait.
    pub wait: Option<PollSpec>,
}

impl ConvergenceRequest {
    /// A request for the object identified by `natural_key`.
    pub fn new<I, S>(natural_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            natural_key: natural_key.into_iter().map(Into::into).collect(),
            desired_fields: Map::new(),
            wait: None,
        }
    }

    /// Add one owned field.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.desired_fields.insert(name.into(), value);
        self
    }

    /// Replace the owned fields.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.desired_fields = fields;
        self
    }

    /// Wait for `spec` after the mutation.
    pub fn wait_for(mut self, spec: PollSpec) -> Self {
        self.wait = Some(spec);
        self
    }
}

/// Which path a reconcile took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The object did not exist and was created.
    Created,
    /// The object existed and its owned fields were patched.
    Adopted,
}

/// The result of a successful reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciled {
    /// Composite identifier to persist as the resource id.
    pub identity: String,
    /// Whether the object was created or adopted.
    pub outcome: ReconcileOutcome,
    /// Target status reached, if the request waited for one.
    pub final_status: Option<String>,
}

/// Per-operation deadlines, like a Terraform `timeouts` block.
///
/// The existence check runs before it is known whether a create or an adopt
/// follows, so it is bounded by the shorter of `create` and `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Existence check and create.
    pub create: Duration,
    /// Existence check and adopt.
    pub update: Duration,
    /// Delete.
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(600),
            update: Duration::from_secs(600),
            delete: Duration::from_secs(600),
        }
    }
}

/// Drives [`ConvergenceTarget`]s to the desired state.
#[derive(Debug, Clone)]
pub struct Reconciler {
    retrier: Retrier,
    poller: Poller,
    codec: IdCodec,
    timeouts: Timeouts,
}

impl Reconciler {
    /// Build a reconciler. `poller` should normally carry `retrier` via
    /// [`Poller::with_retrier`] so that status reads tolerate throttling.
    pub fn new(retrier: Retrier, poller: Poller, codec: IdCodec, timeouts: Timeouts) -> Self {
        Self {
            retrier,
            poller,
            codec,
            timeouts,
        }
    }

    /// The codec used to build identities.
    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    /// Create the object, or adopt it if it already exists, then wait for
    /// the requested status.
    ///
    /// Exactly one of `create` and `adopt` is invoked (possibly several
    /// times, by the retrier).
    ///
    /// # Errors
    ///
    /// - [`ConvergenceError::InvalidComponent`] if a natural-key component
    ///   contains the identifier separator, including a server-assigned key
    ///   returned by `create`. The error carries the full key so the created
    ///   object can be found.
    /// - [`ConvergenceError::InvalidRequest`] if the wait spec is invalid;
    ///   nothing is called on the target.
    /// - Any retrier or poller error, with the identity attached.
    #[instrument(skip_all, name = "reconcile", fields(identity = tracing::field::Empty))]
    pub async fn reconcile<T>(
        &self,
        target: &T,
        request: &ConvergenceRequest,
    ) -> Result<Reconciled, ConvergenceError>
    where
        T: ConvergenceTarget + ?Sized,
    {
        let requested = self.codec.try_encode(&request.natural_key)?;
        tracing::Span::current().record("identity", requested.as_str());

        if let Some(spec) = &request.wait {
            spec.validate()
                .map_err(|err| ConvergenceError::InvalidRequest {
                    identity: requested.clone(),
                    reason: err.to_string(),
                })?;
        }

        let key = request.natural_key.as_slice();
        let desired = &request.desired_fields;
        let started = Instant::now();
        let exists_deadline = started + self.timeouts.create.min(self.timeouts.update);

        let exists = match self
            .retrier
            .retry("exists", &requested, exists_deadline, move || {
                target.exists(key)
            })
            .await
        {
            Ok(()) => true,
            Err(err) if err.is_not_found() => false,
            Err(err) => return Err(err),
        };

        if exists {
            info!(fields = desired.len(), "Object exists, adopting");
            self.retrier
                .retry("adopt", &requested, started + self.timeouts.update, move || {
                    target.adopt(key, desired)
                })
                .await?;

            let final_status = self
                .wait(target, key, &requested, request.wait.as_ref())
                .await?;
            info!("Adopted");
            return Ok(Reconciled {
                identity: requested,
                outcome: ReconcileOutcome::Adopted,
                final_status,
            });
        }

        info!("Object not found, creating");
        let created = self
            .retrier
            .retry("create", &requested, started + self.timeouts.create, move || {
                target.create(key, desired)
            })
            .await?;
        let identity = self.codec.try_encode(&created).map_err(|err| {
            warn!(created = ?created, error = %err, "Created object has an unencodable identity");
            err
        })?;

        let final_status = self
            .wait(target, &created, &identity, request.wait.as_ref())
            .await?;
        info!(identity = %identity, "Created");
        Ok(Reconciled {
            identity,
            outcome: ReconcileOutcome::Created,
            final_status,
        })
    }

    /// Delete the object and, if `wait` is given, wait for it to disappear.
    ///
    /// Deleting an object that is already gone succeeds.
    ///
    /// # Errors
    ///
    /// Any non-not-found retrier error from the delete, or poller error from
    /// the wait.
    #[instrument(skip_all, name = "destroy", fields(identity = tracing::field::Empty))]
    pub async fn destroy<T>(
        &self,
        target: &T,
        natural_key: &[String],
        wait: Option<&PollSpec>,
    ) -> Result<(), ConvergenceError>
    where
        T: ConvergenceTarget + ?Sized,
    {
        let identity = self.codec.encode(natural_key);
        tracing::Span::current().record("identity", identity.as_str());

        let deleted = self
            .retrier
            .retry_for("delete", &identity, self.timeouts.delete, move || {
                target.delete(natural_key)
            })
            .await;
        match deleted {
            Ok(()) => {},
            Err(err) if err.is_not_found() => {
                info!("Object already gone");
                return Ok(());
            },
            Err(err) => return Err(err),
        }

        self.wait(target, natural_key, &identity, wait).await?;
        info!("Deleted");
        Ok(())
    }

    async fn wait<T>(
        &self,
        target: &T,
        key: &[String],
        identity: &str,
        spec: Option<&PollSpec>,
    ) -> Result<Option<String>, ConvergenceError>
    where
        T: ConvergenceTarget + ?Sized,
    {
        let Some(spec) = spec else {
            return Ok(None);
        };
        let status = self
            .poller
            .wait_for_state(identity, spec, move || target.status(key))
            .await?;
        Ok(Some(status))
    }
}
