//! Centralized classification of remote errors.
//!
//! Every retry and poll decision in the engine goes through one
//! [`ErrorClassifier`], so the retry policy for a provider is declared in a
//! single table instead of being repeated at each call site.
//!
//! # Example
//!
//! ```
//! use hemmer_convergence::{ErrorClass, ErrorClassifier, RemoteError};
//!
//! let classifier = ErrorClassifier::default().with_code("SlbBusy", ErrorClass::Transient);
//!
//! assert_eq!(classifier.classify(&RemoteError::new("SlbBusy", "")), ErrorClass::Transient);
//! assert_eq!(
//!     classifier.classify(&RemoteError::new("IndexConfigNotExist", "")),
//!     ErrorClass::NotFound
//! );
//! assert_eq!(classifier.classify(&RemoteError::new("Forbidden.RAM", "")), ErrorClass::Fatal);
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// The bucket a remote error falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rate limiting or a service-side hiccup; retried.
    Transient,
    /// The remote object does not exist. Meaning depends on the caller.
    NotFound,
    /// The object is being mutated by another operation; retried.
    Conflict,
    /// Permission, validation, quota and everything unrecognised. Never retried.
    Fatal,
}

impl ErrorClass {
    /// Whether the retrier should try again after this class of error.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Conflict)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codes that resolve without configuration changes.
const TRANSIENT_CODES: &[&str] = &[
    "ServiceUnavailable",
    "InternalError",
    "InternalServerError",
    "ServerBusy",
    "SystemBusy",
    "OperationTimeout",
    "RequestTimeout",
    "UnknownError",
    "LimitExceeded",
    "TooManyRequests",
    // The object is mid-transition; the previous operation is still applying.
    "IncorrectStatus",
    "IncorrectInstanceStatus",
    "IncorrectVpcStatus",
    "LastTokenProcessing",
];

/// Codes raised when another party is mutating the same object.
const CONFLICT_CODES: &[&str] = &[
    "OperationConflict",
    "TaskConflict",
    "ConcurrentUpdate",
    "OperationDenied.ConcurrentOperation",
];

/// Maps provider error codes to an [`ErrorClass`].
///
/// Lookup order is: exact code, suffix rules, prefix rules, HTTP status.
/// Anything left over is [`ErrorClass::Fatal`]. Rules are consulted in the
/// order they were added, so more specific rules should be registered first.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    codes: HashMap<String, ErrorClass>,
    suffixes: Vec<(String, ErrorClass)>,
    prefixes: Vec<(String, ErrorClass)>,
    use_http_status: bool,
}

impl ErrorClassifier {
    /// An empty classifier: every error is fatal except the explicit
    /// [`RemoteError::not_found`] sentinel.
    pub fn empty() -> Self {
        let mut codes = HashMap::new();
        codes.insert(RemoteError::NOT_FOUND.to_string(), ErrorClass::NotFound);
        Self {
            codes,
            suffixes: Vec::new(),
            prefixes: Vec::new(),
            use_http_status: false,
        }
    }

    /// Classify a single code exactly. Overrides any previous entry.
    pub fn with_code(mut self, code: impl Into<String>, class: ErrorClass) -> Self {
        self.codes.insert(code.into(), class);
        self
    }

    /// Classify every code ending in `suffix`.
    pub fn with_suffix(mut self, suffix: impl Into<String>, class: ErrorClass) -> Self {
        self.suffixes.push((suffix.into(), class));
        self
    }

    /// Classify every code starting with `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>, class: ErrorClass) -> Self {
        self.prefixes.push((prefix.into(), class));
        self
    }

    /// Fall back to the HTTP status when no code rule matches.
    pub fn with_http_status_fallback(mut self, enabled: bool) -> Self {
        self.use_http_status = enabled;
        self
    }

    /// Classify a remote error. Pure function of the error value.
    pub fn classify(&self, err: &RemoteError) -> ErrorClass {
        let code = err.code.as_str();

        if let Some(class) = self.codes.get(code) {
            return *class;
        }

        if let Some((_, class)) = self.suffixes.iter().find(|(s, _)| code.ends_with(s.as_str())) {
            return *class;
        }

        if let Some((_, class)) = self.prefixes.iter().find(|(p, _)| code.starts_with(p.as_str())) {
            return *class;
        }

        if self.use_http_status {
            if let Some(class) = err.http_status.and_then(classify_http_status) {
                return class;
            }
        }

        ErrorClass::Fatal
    }
}

impl Default for ErrorClassifier {
    /// The provider-wide table shared by every resource.
    fn default() -> Self {
        let mut classifier = Self::empty().with_http_status_fallback(true);

        for code in TRANSIENT_CODES {
            classifier = classifier.with_code(*code, ErrorClass::Transient);
        }
        for code in CONFLICT_CODES {
            classifier = classifier.with_code(*code, ErrorClass::Conflict);
        }

        classifier
            .with_suffix("AlreadyExist", ErrorClass::Fatal)
            .with_suffix("AlreadyExists", ErrorClass::Fatal)
            .with_suffix("NotExist", ErrorClass::NotFound)
            .with_suffix("NotExists", ErrorClass::NotFound)
            .with_suffix("NotFound", ErrorClass::NotFound)
            .with_prefix("Throttling", ErrorClass::Transient)
            .with_prefix("IncorrectStatus.", ErrorClass::Transient)
            .with_prefix("ServiceUnavailable.", ErrorClass::Transient)
    }
}

fn classify_http_status(status: u16) -> Option<ErrorClass> {
    match status {
        404 => Some(ErrorClass::NotFound),
        409 => Some(ErrorClass::Conflict),
        429 | 500 | 502 | 503 | 504 => Some(ErrorClass::Transient),
        _ => None,
    }
}
