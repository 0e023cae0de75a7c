//! Logging and tracing setup.
//!
//! The engine emits `tracing` events under the `hemmer_convergence` target:
//! `debug` for every attempt and poll, `warn` for retryable failures with the
//! chosen delay, `info` for the create/adopt decision and for convergence.
//! Spans named `retry`, `poll`, `reconcile` and `destroy` carry the resource
//! identity, so every line of a stuck convergence can be attributed.
//!
//! Output goes to **stderr**; providers reserve stdout for the handshake.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g. `hemmer_convergence=debug`)
//!
//! # Examples
//!
//! ```bash
//! # Watch every retry attempt and poll
//! RUST_LOG=hemmer_convergence=debug ./my-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVE: &str = "hemmer_convergence=info";

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Install the stderr subscriber, filtered by `RUST_LOG` or
/// [`DEFAULT_DIRECTIVE`].
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_DIRECTIVE);
}

/// Like [`init_logging`] with a custom filter for when `RUST_LOG` is unset,
/// e.g. `"hemmer_convergence=debug"`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_directive: &str) {
    tracing_subscriber::registry()
        .with(filter(default_directive))
        .with(stderr_layer())
        .init();
}

/// Try to install the stderr subscriber.
///
/// Returns `false` instead of panicking when a subscriber is already set,
/// which makes it safe to call from every test.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(filter(DEFAULT_DIRECTIVE))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVE).is_ok());
        assert!(EnvFilter::try_new("hemmer_convergence=debug").is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_convergence[reconcile]=debug").is_ok());
    }

    #[test]
    fn test_try_init_is_idempotent() {
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
