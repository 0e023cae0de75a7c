//! Engine configuration.
//!
//! Providers receive their configuration as JSON in `configure`; the
//! convergence settings live in the same payload. Every field is optional and
//! durations are given in milliseconds:
//!
//! ```json
//! {
//!   "create_timeout_ms": 600000,
//!   "update_timeout_ms": 600000,
//!   "delete_timeout_ms": 600000,
//!   "initial_delay_ms": 1000,
//!   "delay_increment_ms": 1000,
//!   "poll_interval_ms": 5000,
//!   "not_found_grace_ms": 10000,
//!   "separator": ":"
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConvergenceError;
use crate::id::DEFAULT_SEPARATOR;
use crate::poll::PollSpec;
use crate::reconcile::Timeouts;
use crate::retry::Backoff;

/// Settings shared by the retrier, poller, reconciler and codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for existence check plus create.
    pub create_timeout_ms: u64,
    /// Deadline for existence check plus adopt.
    pub update_timeout_ms: u64,
    /// Deadline for delete.
    pub delete_timeout_ms: u64,
    /// First retry delay.
    pub initial_delay_ms: u64,
    /// Added to the retry delay after each retryable failure.
    pub delay_increment_ms: u64,
    /// Time between status polls.
    pub poll_interval_ms: u64,
    /// How long a freshly created object may be reported missing.
    pub not_found_grace_ms: u64,
    /// Composite identifier separator.
    pub separator: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_timeout_ms: 600_000,
            update_timeout_ms: 600_000,
            delete_timeout_ms: 600_000,
            initial_delay_ms: 1_000,
            delay_increment_ms: 1_000,
            poll_interval_ms: 5_000,
            not_found_grace_ms: 10_000,
            separator: DEFAULT_SEPARATOR,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration payload. `null` yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergenceError::Serialization`] for malformed JSON and
    /// [`ConvergenceError::Configuration`] for out-of-range values.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConvergenceError> {
        let config: Self = if value.is_null() {
            Self::default()
        } else {
            serde_json::from_value(value)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that timeouts and interval are non-zero and the separator is
    /// usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergenceError::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConvergenceError> {
        let non_zero = [
            ("create_timeout_ms", self.create_timeout_ms),
            ("update_timeout_ms", self.update_timeout_ms),
            ("delete_timeout_ms", self.delete_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConvergenceError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.separator.is_alphanumeric() || self.separator.is_whitespace() {
            return Err(ConvergenceError::Configuration(format!(
                "separator '{}' must be a punctuation character",
                self.separator
            )));
        }

        Ok(())
    }

    /// Per-operation deadlines.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            create: Duration::from_millis(self.create_timeout_ms),
            update: Duration::from_millis(self.update_timeout_ms),
            delete: Duration::from_millis(self.delete_timeout_ms),
        }
    }

    /// The retry schedule.
    pub fn backoff(&self) -> Backoff {
        Backoff::linear(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.delay_increment_ms),
        )
    }

    /// An empty poll spec with the configured interval and grace window.
    pub fn poll_spec(&self, timeout: Duration) -> PollSpec {
        PollSpec::new(Duration::from_millis(self.poll_interval_ms), timeout)
            .not_found_grace(Duration::from_millis(self.not_found_grace_ms))
    }
}
