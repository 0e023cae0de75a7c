//! One-stop assembly of the convergence components.
//!
//! A provider builds one [`Engine`] in `configure` and hands its parts to
//! every resource handler. The engine is immutable; all handlers share the
//! same classifier table and timing settings.

use std::sync::Arc;

use tracing::debug;

use crate::classify::ErrorClassifier;
use crate::config::EngineConfig;
use crate::error::ConvergenceError;
use crate::id::IdCodec;
use crate::poll::Poller;
use crate::reconcile::Reconciler;
use crate::retry::Retrier;

/// Shared configuration and classifier for a provider.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    classifier: Arc<ErrorClassifier>,
    codec: IdCodec,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// An engine with the provider-wide default classifier.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_classifier(config, ErrorClassifier::default())
    }

    /// An engine with a custom classifier table.
    pub fn with_classifier(config: EngineConfig, classifier: ErrorClassifier) -> Self {
        debug!(?config, "Building convergence engine");
        let codec = IdCodec::new(config.separator);
        Self {
            config,
            classifier: Arc::new(classifier),
            codec,
        }
    }

    /// Parse the provider configuration payload and build an engine.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_value`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConvergenceError> {
        Ok(Self::new(EngineConfig::from_value(value)?))
    }

    /// Replace the identifier codec, e.g. to register legacy formats.
    pub fn with_codec(mut self, codec: IdCodec) -> Self {
        self.codec = codec;
        self
    }

    /// The configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared classifier.
    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// A retrier using the configured backoff.
    pub fn retrier(&self) -> Retrier {
        Retrier::new(self.classifier.clone(), self.config.backoff())
    }

    /// A poller without a retrier underneath its describe calls.
    pub fn poller(&self) -> Poller {
        Poller::new(self.classifier.clone())
    }

    /// The identifier codec.
    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    /// A reconciler whose status polls retry transient describe failures.
    pub fn reconciler(&self) -> Reconciler {
        let retrier = self.retrier();
        let poller = self.poller().with_retrier(retrier.clone());
        Reconciler::new(retrier, poller, self.codec.clone(), self.config.timeouts())
    }
}
