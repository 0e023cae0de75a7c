//! Composite resource identifiers.
//!
//! Many remote objects are addressed by several natural-key components, e.g.
//! a project and a logstore, or a function and a trigger. The provider
//! persists them as one string, `component_1:component_2[:...]`, which is the
//! resource identity stored in state. [`IdCodec`] is the only place that
//! format is produced or parsed.
//!
//! Components are not escaped. [`IdCodec::encode`] joins whatever it is
//! given, matching identifiers already in state; [`IdCodec::try_encode`]
//! refuses components that contain the separator, since those would not
//! decode back to the same parts.
//!
//! # Example
//!
//! ```
//! use hemmer_convergence::IdCodec;
//!
//! let codec = IdCodec::default();
//! let id = codec.encode(&["proj", "logstore"]);
//! assert_eq!(id, "proj:logstore");
//! assert_eq!(codec.decode(&id, 2).unwrap(), vec!["proj", "logstore"]);
//! assert!(codec.decode("proj:logstore:extra", 2).is_err());
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::error::ConvergenceError;

/// The separator used by identifiers the provider has always written.
pub const DEFAULT_SEPARATOR: char = ':';

type Rewrite = dyn Fn(&str) -> Vec<String> + Send + Sync;

/// Rewrites an identifier written by an older provider version into the
/// current multi-part form.
///
/// A rule fires only when the identifier starts with its prefix and the
/// current format failed to decode.
#[derive(Clone)]
pub struct LegacyIdRule {
    name: String,
    prefix: String,
    rewrite: Arc<Rewrite>,
}

impl LegacyIdRule {
    /// Create a rule named `name` for identifiers starting with `prefix`.
    ///
    /// `rewrite` receives the whole stored identifier and returns the
    /// components of the current format.
    pub fn new<F>(name: impl Into<String>, prefix: impl Into<String>, rewrite: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            rewrite: Arc::new(rewrite),
        }
    }

    /// The rule name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, id: &str) -> bool {
        id.starts_with(&self.prefix)
    }
}

impl fmt::Debug for LegacyIdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyIdRule")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Encodes and decodes composite identifiers.
#[derive(Debug, Clone)]
pub struct IdCodec {
    separator: char,
    legacy: Vec<LegacyIdRule>,
}

impl Default for IdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl IdCodec {
    /// A codec joining components with `separator`.
    pub fn new(separator: char) -> Self {
        Self {
            separator,
            legacy: Vec::new(),
        }
    }

    /// Register a legacy format consulted by [`IdCodec::decode_with_legacy`].
    pub fn with_legacy_rule(mut self, rule: LegacyIdRule) -> Self {
        self.legacy.push(rule);
        self
    }

    /// The separator character.
    pub fn separator(&self) -> char {
        self.separator
    }

    /// Join components with the separator.
    pub fn encode<S: AsRef<str>>(&self, components: &[S]) -> String {
        let mut id = String::new();
        for (i, component) in components.iter().enumerate() {
            if i > 0 {
                id.push(self.separator);
            }
            id.push_str(component.as_ref());
        }
        id
    }

    /// Join components, rejecting any that contain the separator.
    ///
    /// # Errors
    ///
    /// - [`ConvergenceError::EmptyIdentifier`] if `components` is empty.
    /// - [`ConvergenceError::InvalidComponent`] naming the first component
    ///   containing the separator.
    pub fn try_encode<S: AsRef<str>>(&self, components: &[S]) -> Result<String, ConvergenceError> {
        if components.is_empty() {
            return Err(ConvergenceError::EmptyIdentifier);
        }
        if let Some(component) = components
            .iter()
            .map(AsRef::as_ref)
            .find(|c| c.contains(self.separator))
        {
            return Err(ConvergenceError::InvalidComponent {
                component: component.to_string(),
                key: components.iter().map(|c| c.as_ref().to_string()).collect(),
                separator: self.separator,
            });
        }
        Ok(self.encode(components))
    }

    /// Split an identifier into exactly `expected` components.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergenceError::MalformedIdentifier`] when the part count
    /// differs. An empty identifier is one empty component.
    pub fn decode(&self, id: &str, expected: usize) -> Result<Vec<String>, ConvergenceError> {
        let parts: Vec<String> = id.split(self.separator).map(str::to_string).collect();

        if parts.len() != expected {
            return Err(ConvergenceError::MalformedIdentifier {
                id: id.to_string(),
                expected,
                actual: parts.len(),
            });
        }
        Ok(parts)
    }

    /// Decode, falling back to registered legacy formats.
    ///
    /// The current format is tried first. Only if it fails is each legacy
    /// rule whose prefix matches consulted, in registration order; the first
    /// rewrite producing `expected` components wins and is logged.
    ///
    /// # Errors
    ///
    /// Returns the original [`ConvergenceError::MalformedIdentifier`] when no
    /// legacy rule applies.
    pub fn decode_with_legacy(
        &self,
        id: &str,
        expected: usize,
    ) -> Result<Vec<String>, ConvergenceError> {
        let err = match self.decode(id, expected) {
            Ok(parts) => return Ok(parts),
            Err(err) => err,
        };

        for rule in self.legacy.iter().filter(|rule| rule.matches(id)) {
            let parts = (rule.rewrite)(id);
            if parts.len() == expected {
                info!(id, rule = %rule.name, "Decoded legacy identifier");
                return Ok(parts);
            }
        }

        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn snat_rule() -> LegacyIdRule {
        LegacyIdRule::new("snat-entry", "snat-", |id| {
            vec!["stb-default".to_string(), id.to_string()]
        })
    }

    #[test]
    fn test_encode() {
        let codec = IdCodec::default();
        assert_eq!(codec.encode(&["proj", "logstore"]), "proj:logstore");
        assert_eq!(codec.encode(&["fn", "trigger", "v1"]), "fn:trigger:v1");
        assert_eq!(codec.encode(&["single"]), "single");
        assert_eq!(codec.encode::<&str>(&[]), "");
    }

    #[test]
    fn test_decode_exact_parts() {
        let codec = IdCodec::default();
        assert_eq!(
            assert_ok!(codec.decode("proj:logstore", 2)),
            vec!["proj".to_string(), "logstore".to_string()]
        );
    }

    #[test]
    fn test_decode_rejects_extra_parts() {
        let codec = IdCodec::default();
        let err = assert_err!(codec.decode("proj:logstore:extra", 2));
        match err {
            ConvergenceError::MalformedIdentifier {
                id,
                expected,
                actual,
            } => {
                assert_eq!(id, "proj:logstore:extra");
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            },
            other => panic!("expected MalformedIdentifier, got {other:?}"),
        }

        let err = assert_err!(codec.decode("a:b:c", 2));
        assert!(err.to_string().contains("expected 2 part(s), found 3"));
    }

    #[test]
    fn test_decode_rejects_missing_parts() {
        let codec = IdCodec::default();
        assert_err!(codec.decode("proj", 2));
        let err = assert_err!(codec.decode("", 2));
        assert!(err.to_string().contains("found 1"));
    }

    #[test]
    fn test_try_encode_rejects_empty_key() {
        let codec = IdCodec::default();
        let empty: &[&str] = &[];
        let err = assert_err!(codec.try_encode(empty));
        assert!(matches!(err, ConvergenceError::EmptyIdentifier));
    }

    #[test]
    fn test_round_trip() {
        let codec = IdCodec::default();
        let cases: &[&[&str]] = &[
            &["proj", "logstore"],
            &["service", "function", "trigger"],
            &["vpc-123"],
            &["a", "", "c"],
            &[""],
            &["", ""],
        ];
        for components in cases {
            let id = assert_ok!(codec.try_encode(components));
            let decoded = assert_ok!(codec.decode(&id, components.len()));
            assert_eq!(decoded, components.to_vec());
        }
    }

    #[test]
    fn test_try_encode_rejects_separator() {
        let codec = IdCodec::default();
        let err = assert_err!(codec.try_encode(&["acs:ram::123:role/x", "policy"]));
        assert!(matches!(
            err,
            ConvergenceError::InvalidComponent { separator: ':', .. }
        ));
        if let ConvergenceError::InvalidComponent { key, .. } = &err {
            assert_eq!(key, &vec!["acs:ram::123:role/x".to_string(), "policy".to_string()]);
        }

        // The lenient form still joins, matching identifiers already in state.
        assert_eq!(codec.encode(&["a:b", "c"]), "a:b:c");
    }

    #[test]
    fn test_custom_separator() {
        let codec = IdCodec::new('/');
        let id = assert_ok!(codec.try_encode(&["acs:ram::123", "role"]));
        assert_eq!(id, "acs:ram::123/role");
        assert_eq!(
            assert_ok!(codec.decode(&id, 2)),
            vec!["acs:ram::123".to_string(), "role".to_string()]
        );
    }

    #[test]
    fn test_legacy_rule_rewrites_old_identifier() {
        let codec = IdCodec::default().with_legacy_rule(snat_rule());

        assert_eq!(
            assert_ok!(codec.decode_with_legacy("snat-abc", 2)),
            vec!["stb-default".to_string(), "snat-abc".to_string()]
        );

        // Current-format identifiers never reach the legacy branch.
        assert_eq!(
            assert_ok!(codec.decode_with_legacy("stb-1:snat-abc", 2)),
            vec!["stb-1".to_string(), "snat-abc".to_string()]
        );
    }

    #[test]
    fn test_legacy_rule_does_not_guess() {
        let codec = IdCodec::default().with_legacy_rule(snat_rule());

        // Prefix does not match.
        assert_err!(codec.decode_with_legacy("dnat-abc", 2));
        // Rewrite produces the wrong part count.
        assert_err!(codec.decode_with_legacy("snat-abc", 3));
        // Plain decode ignores legacy rules entirely.
        assert_err!(codec.decode("snat-abc", 2));
    }

    #[test]
    fn test_legacy_rule_debug() {
        let rule = snat_rule();
        assert_eq!(rule.name(), "snat-entry");
        assert!(format!("{:?}", rule).contains("snat-"));
    }
}
