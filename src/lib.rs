//! Hemmer Convergence
//!
//! This crate provides the asynchronous convergence engine shared by Hemmer
//! provider resource handlers. Cloud control planes are eventually
//! consistent and flaky, so every create, update and delete is really a
//! protocol: issue a mutation, then poll until the remote state converges or
//! a deadline passes, retrying transient failures and classifying terminal
//! ones correctly.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Error classification**: one [`ErrorClassifier`] table mapping provider
//!   error codes to [`ErrorClass`]
//! - **Retry**: [`Retrier`], deadline-bounded retry with linear backoff
//! - **Polling**: [`Poller`] and [`PollSpec`], waiting for target statuses
//! - **Reconciliation**: [`Reconciler`], idempotent create-or-adopt
//! - **Identifiers**: [`IdCodec`], the persisted composite resource id format
//! - **Configuration**: [`EngineConfig`] and [`Engine`]
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_convergence::{ConvergenceRequest, ConvergenceTarget, Engine, RemoteError};
//! use serde_json::{json, Map, Value};
//!
//! struct LogStore {
//!     client: SlsClient,
//! }
//!
//! #[hemmer_convergence::async_trait]
//! impl ConvergenceTarget for LogStore {
//!     async fn exists(&self, key: &[String]) -> Result<(), RemoteError> {
//!         self.client.get_logstore(&key[0], &key[1]).await.map(|_| ())
//!     }
//!     // ... create, adopt, status, delete
//! }
//!
//! let engine = Engine::from_value(provider_config)?;
//! let spec = engine
//!     .config()
//!     .poll_spec(engine.config().timeouts().create)
//!     .pending(["Creating"])
//!     .target(["Active"]);
//! let request = ConvergenceRequest::new([project, logstore])
//!     .with_field("ttl", json!(30))
//!     .wait_for(spec);
//!
//! let reconciled = engine.reconciler().reconcile(&handler, &request).await?;
//! state["id"] = json!(reconciled.identity);
//! ```
//!
//! # Concurrency
//!
//! The engine holds no shared mutable state. Retries and polls suspend only
//! the calling task; independent resources are converged concurrently by
//! running several reconciles on separate tasks. Deadlines are computed once
//! when a call starts and only decide whether the engine keeps retrying or
//! polling: a remote call that is already in flight is never aborted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod id;
pub mod logging;
pub mod poll;
pub mod reconcile;
pub mod retry;
pub mod testing;

// Re-export main types at crate root
pub use classify::{ErrorClass, ErrorClassifier};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ConvergenceError, RemoteError};
pub use id::{IdCodec, LegacyIdRule, DEFAULT_SEPARATOR};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use poll::{PollSpec, Poller, StatusBucket, StatusExtractor};
pub use reconcile::{
    ConvergenceRequest, ConvergenceTarget, ReconcileOutcome, Reconciled, Reconciler, Timeouts,
};
pub use retry::{Backoff, Retrier};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
