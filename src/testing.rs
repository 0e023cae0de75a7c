//! Testing utilities for code built on the convergence engine.
//!
//! This module provides scripted remote calls and an in-memory
//! [`ConvergenceTarget`] so retry, poll and reconcile behaviour can be
//! exercised without a cloud account. Combine them with
//! `#[tokio::test(start_paused = true)]` to make every sleep instantaneous and
//! every elapsed-time assertion exact.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_convergence::testing::Script;
//! use hemmer_convergence::RemoteError;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_retries_throttling() {
//!     let script = Script::new(vec![
//!         Err(RemoteError::new("Throttling", "slow down")),
//!         Ok("created".to_string()),
//!     ]);
//!
//!     let engine = Engine::default();
//!     let value = engine
//!         .retrier()
//!         .retry_for("create", "proj:store", Duration::from_secs(30), || script.call())
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(value, "created");
//!     assert_eq!(script.calls(), 2);
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::classify::ErrorClass;
use crate::error::{ConvergenceError, RemoteError};
use crate::reconcile::ConvergenceTarget;

/// A scripted sequence of remote responses.
///
/// Each call returns the next response. Once the script runs out, the last
/// response is repeated, so `Script::new(vec![Err(throttled)])` describes an
/// operation that always fails.
#[derive(Debug)]
pub struct Script<T> {
    responses: Mutex<VecDeque<Result<T, RemoteError>>>,
    calls: AtomicU32,
}

impl<T: Clone> Script<T> {
    /// Create a script. An empty script answers every call with not-found.
    pub fn new(responses: Vec<Result<T, RemoteError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Take the next response and count the call.
    pub fn respond(&self) -> Result<T, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = lock(&self.responses);
        if responses.len() > 1 {
            if let Some(response) = responses.pop_front() {
                return response;
            }
        }
        responses
            .front()
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::not_found("script is empty")))
    }

    /// The next response as an already-completed future, for use as an
    /// operation closure: `|| script.call()`.
    pub fn call(&self) -> Ready<Result<T, RemoteError>> {
        ready(self.respond())
    }

    /// How many times the script has been called.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// An object held by [`InMemoryTarget`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    /// All fields of the object, managed or not.
    pub fields: Map<String, Value>,
    /// Status reported by [`ConvergenceTarget::status`].
    pub status: String,
}

/// An in-memory remote API implementing [`ConvergenceTarget`].
///
/// Creates merge the desired fields over a set of base fields, adoptions patch
/// only the desired fields, and a missing object is reported with
/// [`RemoteError::not_found`].
#[derive(Debug)]
pub struct InMemoryTarget {
    objects: Mutex<HashMap<Vec<String>, RemoteObject>>,
    base_fields: Map<String, Value>,
    ready_status: String,
    delete_failures: Mutex<VecDeque<RemoteError>>,
    create_calls: AtomicU32,
    adopt_calls: AtomicU32,
    delete_calls: AtomicU32,
}

impl InMemoryTarget {
    /// An empty remote whose objects report `ready_status` once created.
    pub fn new(ready_status: impl Into<String>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            base_fields: Map::new(),
            ready_status: ready_status.into(),
            delete_failures: Mutex::new(VecDeque::new()),
            create_calls: AtomicU32::new(0),
            adopt_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
        }
    }

    /// A field the handler always sends on create but does not manage.
    pub fn with_base_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.base_fields.insert(name.into(), value);
        self
    }

    /// Seed an object that already exists remotely.
    pub fn with_existing(self, natural_key: Vec<String>, fields: Map<String, Value>) -> Self {
        let object = RemoteObject {
            fields,
            status: self.ready_status.clone(),
        };
        lock(&self.objects).insert(natural_key, object);
        self
    }

    /// Make the next delete fail with `error` before touching the object.
    pub fn fail_next_delete(&self, error: RemoteError) {
        lock(&self.delete_failures).push_back(error);
    }

    /// A snapshot of the object, if it exists.
    pub fn object(&self, natural_key: &[String]) -> Option<RemoteObject> {
        lock(&self.objects).get(natural_key).cloned()
    }

    /// Number of create calls received.
    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of adopt calls received.
    pub fn adopt_calls(&self) -> u32 {
        self.adopt_calls.load(Ordering::SeqCst)
    }

    /// Number of delete calls received.
    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConvergenceTarget for InMemoryTarget {
    async fn exists(&self, natural_key: &[String]) -> Result<(), RemoteError> {
        if lock(&self.objects).contains_key(natural_key) {
            Ok(())
        } else {
            Err(missing(natural_key))
        }
    }

    async fn create(
        &self,
        natural_key: &[String],
        desired: &Map<String, Value>,
    ) -> Result<Vec<String>, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = lock(&self.objects);
        if objects.contains_key(natural_key) {
            return Err(RemoteError::new(
                "ResourceAlreadyExist",
                format!("{} already exists", natural_key.join("/")),
            ));
        }

        let mut fields = self.base_fields.clone();
        fields.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
        objects.insert(
            natural_key.to_vec(),
            RemoteObject {
                fields,
                status: self.ready_status.clone(),
            },
        );
        Ok(natural_key.to_vec())
    }

    async fn adopt(
        &self,
        natural_key: &[String],
        desired: &Map<String, Value>,
    ) -> Result<(), RemoteError> {
        self.adopt_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = lock(&self.objects);
        let object = objects
            .get_mut(natural_key)
            .ok_or_else(|| missing(natural_key))?;
        for (name, value) in desired {
            object.fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn status(&self, natural_key: &[String]) -> Result<String, RemoteError> {
        lock(&self.objects)
            .get(natural_key)
            .map(|object| object.status.clone())
            .ok_or_else(|| missing(natural_key))
    }

    async fn delete(&self, natural_key: &[String]) -> Result<(), RemoteError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.delete_failures).pop_front() {
            return Err(error);
        }
        lock(&self.objects)
            .remove(natural_key)
            .map(|_| ())
            .ok_or_else(|| missing(natural_key))
    }
}

fn missing(natural_key: &[String]) -> RemoteError {
    RemoteError::not_found(format!("{} does not exist", natural_key.join("/")))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that an error carries the given class.
///
/// # Panics
///
/// Panics if the error has a different class or none.
pub fn assert_class(err: &ConvergenceError, expected: ErrorClass) {
    assert_eq!(
        err.class(),
        Some(expected),
        "Expected a {} error, got: {}",
        expected,
        err
    );
}

/// Assert that an error is a retry or poll timeout.
///
/// # Panics
///
/// Panics if the error is neither [`ConvergenceError::TimeoutExceeded`] nor
/// [`ConvergenceError::WaitTimeout`].
pub fn assert_timeout(err: &ConvergenceError) {
    assert!(
        matches!(
            err,
            ConvergenceError::TimeoutExceeded { .. } | ConvergenceError::WaitTimeout { .. }
        ),
        "Expected a timeout, got: {}",
        err
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_script_repeats_last_response() {
        let script = Script::new(vec![Err(RemoteError::new("Throttling", "slow")), Ok(1)]);

        assert!(script.respond().is_err());
        assert_eq!(script.respond(), Ok(1));
        assert_eq!(script.respond(), Ok(1));
        assert_eq!(script.calls(), 3);
    }

    #[test]
    fn test_empty_script_is_not_found() {
        let script: Script<()> = Script::new(vec![]);
        let err = script.respond().unwrap_err();
        assert_eq!(err.code, RemoteError::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_in_memory_target_lifecycle() {
        let target = InMemoryTarget::new("Available").with_base_field("region", json!("eu"));
        let key = vec!["proj".to_string(), "store".to_string()];
        let mut desired = Map::new();
        desired.insert("ttl".to_string(), json!(30));

        assert!(target.exists(&key).await.is_err());
        assert_eq!(target.create(&key, &desired).await, Ok(key.clone()));
        assert_eq!(target.status(&key).await, Ok("Available".to_string()));
        assert!(target.create(&key, &desired).await.is_err());

        let object = target.object(&key).expect("created");
        assert_eq!(object.fields["region"], json!("eu"));
        assert_eq!(object.fields["ttl"], json!(30));

        assert_eq!(target.delete(&key).await, Ok(()));
        assert!(target.object(&key).is_none());
        assert_eq!(target.create_calls(), 2);
        assert_eq!(target.delete_calls(), 1);
    }

    #[test]
    fn test_assert_timeout() {
        let err = ConvergenceError::TimeoutExceeded {
            operation: "create".to_string(),
            identity: "a:b".to_string(),
            attempts: 4,
            class: ErrorClass::Transient,
            last_error: RemoteError::new("Throttling", "slow"),
        };
        assert_timeout(&err);
        assert_class(&err, ErrorClass::Transient);
    }

    #[test]
    #[should_panic(expected = "Expected a timeout")]
    fn test_assert_timeout_fails() {
        assert_timeout(&ConvergenceError::Configuration("bad".to_string()));
    }
}
