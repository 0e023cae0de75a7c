//! Error types for the convergence engine.

use std::time::Duration;

use thiserror::Error;

use crate::classify::ErrorClass;

/// A failure returned by a remote operation or describe call.
///
/// The engine never inspects transport details; it only needs the provider
/// error code (and optionally the HTTP status) to classify the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    /// Provider error code, e.g. `Throttling` or `IndexConfigNotExist`.
    pub code: String,
    /// Human-readable message returned by the provider.
    pub message: String,
    /// HTTP status of the failed call, if the transport exposed one.
    pub http_status: Option<u16>,
    /// Provider request id, useful when filing support tickets.
    pub request_id: Option<String>,
}

impl RemoteError {
    /// Error code used by [`RemoteError::not_found`].
    pub const NOT_FOUND: &'static str = "NotFound";

    /// Create a remote error from a provider code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status: None,
            request_id: None,
        }
    }

    /// The explicit not-found sentinel for describe functions that detect
    /// absence without a provider error (e.g. an empty list response).
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, message)
    }

    /// Attach the HTTP status of the failed call.
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Attach the provider request id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Errors surfaced by the retrier, poller, reconciler and identifier codec.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// A remote call failed with an error that is not retried.
    #[error("{operation} on {identity} failed ({class}): {source}")]
    Remote {
        /// Name of the remote operation, e.g. `create` or `describe`.
        operation: String,
        /// Resource identity the operation targeted.
        identity: String,
        /// Class assigned by the classifier.
        class: ErrorClass,
        /// The underlying provider error.
        #[source]
        source: RemoteError,
    },

    /// Retryable failures persisted until the deadline.
    #[error("{operation} on {identity} still failing after {attempts} attempt(s): {last_error}")]
    TimeoutExceeded {
        /// Name of the remote operation.
        operation: String,
        /// Resource identity the operation targeted.
        identity: String,
        /// Number of times the operation was invoked.
        attempts: u32,
        /// Class of the last error, either transient or conflict.
        class: ErrorClass,
        /// The last retryable error observed.
        #[source]
        last_error: RemoteError,
    },

    /// The resource reached a status listed as a failure state.
    #[error("{identity} reached failure status '{status}' while waiting for {expected:?}")]
    FailedToReachTargetStatus {
        /// Resource identity being polled.
        identity: String,
        /// The failure status that was observed.
        status: String,
        /// The target statuses the poll was waiting for.
        expected: Vec<String>,
    },

    /// The poll deadline elapsed before a target status was observed.
    #[error(
        "timeout after {timeout:?} waiting for {identity} to reach {expected:?} (last status: {})",
        .last_status.as_deref().unwrap_or("<none>")
    )]
    WaitTimeout {
        /// Resource identity being polled.
        identity: String,
        /// The last status the describe call returned, if any.
        last_status: Option<String>,
        /// The target statuses the poll was waiting for.
        expected: Vec<String>,
        /// The poll timeout that elapsed.
        timeout: Duration,
    },

    /// A persisted identifier does not have the expected number of parts.
    #[error("malformed identifier '{id}': expected {expected} part(s), found {actual}")]
    MalformedIdentifier {
        /// The identifier as stored.
        id: String,
        /// Number of components the caller expected.
        expected: usize,
        /// Number of components actually found.
        actual: usize,
    },

    /// An identifier component contains the separator and cannot be encoded.
    #[error("identifier component '{component}' of {key:?} contains separator '{separator}'")]
    InvalidComponent {
        /// The offending component.
        component: String,
        /// The full natural key the component belongs to.
        key: Vec<String>,
        /// The codec separator.
        separator: char,
    },

    /// An identifier must have at least one component.
    #[error("identifier has no components")]
    EmptyIdentifier,

    /// A reconcile request cannot be executed as given.
    #[error("invalid request for {identity}: {reason}")]
    InvalidRequest {
        /// Resource identity the request targets.
        identity: String,
        /// What is wrong with the request.
        reason: String,
    },

    /// Engine configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConvergenceError {
    /// Build a [`ConvergenceError::Remote`] from its parts.
    pub fn remote(
        operation: impl Into<String>,
        identity: impl Into<String>,
        class: ErrorClass,
        source: RemoteError,
    ) -> Self {
        Self::Remote {
            operation: operation.into(),
            identity: identity.into(),
            class,
            source,
        }
    }

    /// The class of the underlying remote failure, if there was one.
    ///
    /// Timeouts report the class of their last error.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Remote { class, .. } | Self::TimeoutExceeded { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Whether the remote object was reported absent.
    pub fn is_not_found(&self) -> bool {
        self.class() == Some(ErrorClass::NotFound)
    }

    /// The resource identity named by this error, if any.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Remote { identity, .. }
            | Self::TimeoutExceeded { identity, .. }
            | Self::FailedToReachTargetStatus { identity, .. }
            | Self::WaitTimeout { identity, .. }
            | Self::InvalidRequest { identity, .. } => Some(identity),
            Self::MalformedIdentifier { id, .. } => Some(id),
            Self::InvalidComponent { .. }
            | Self::EmptyIdentifier
            | Self::Configuration(_)
            | Self::Serialization(_) => None,
        }
    }

    /// The last remote status observed before the error, if the error came
    /// from a poll.
    pub fn last_status(&self) -> Option<&str> {
        match self {
            Self::FailedToReachTargetStatus { status, .. } => Some(status),
            Self::WaitTimeout { last_status, .. } => last_status.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new("Throttling", "too many requests").with_http_status(429);
        assert_eq!(format!("{}", err), "Throttling: too many requests");
        assert_eq!(err.http_status, Some(429));

        let err = RemoteError::not_found("no such logstore");
        assert_eq!(err.code, RemoteError::NOT_FOUND);
    }

    #[test]
    fn test_error_display_names_identity() {
        let err = ConvergenceError::remote(
            "create",
            "proj:logstore",
            ErrorClass::Fatal,
            RemoteError::new("Forbidden", "no permission"),
        );
        assert_eq!(
            format!("{}", err),
            "create on proj:logstore failed (fatal): Forbidden: no permission"
        );

        let err = ConvergenceError::WaitTimeout {
            identity: "fc:trigger".to_string(),
            last_status: Some("Creating".to_string()),
            expected: vec!["Active".to_string()],
            timeout: Duration::from_secs(5),
        };
        let display = format!("{}", err);
        assert!(display.contains("fc:trigger"));
        assert!(display.contains("last status: Creating"));

        let err = ConvergenceError::WaitTimeout {
            identity: "fc:trigger".to_string(),
            last_status: None,
            expected: vec![],
            timeout: Duration::from_secs(5),
        };
        assert!(format!("{}", err).contains("last status: <none>"));
    }

    #[test]
    fn test_accessors() {
        let err = ConvergenceError::remote(
            "describe",
            "a:b",
            ErrorClass::NotFound,
            RemoteError::not_found("gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.identity(), Some("a:b"));
        assert_eq!(err.last_status(), None);

        let err = ConvergenceError::FailedToReachTargetStatus {
            identity: "a:b".to_string(),
            status: "Failed".to_string(),
            expected: vec!["Active".to_string()],
        };
        assert_eq!(err.class(), None);
        assert_eq!(err.last_status(), Some("Failed"));

        let err = ConvergenceError::MalformedIdentifier {
            id: "a:b:c".to_string(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            format!("{}", err),
            "malformed identifier 'a:b:c': expected 2 part(s), found 3"
        );
    }
}
