//! Scope-tagged value containers.
//!
//! An [`Owned`] carries a value together with the scope it was produced in,
//! a validated confidence and a trace id. The raw value is only reachable
//! through [`ScopeContext::use_value`](crate::ScopeContext::use_value), which
//! checks the scope, so holding an `Owned` never grants access by itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MullionError, Result};

/// Scope given to the output of a merge.
pub const MERGED_SCOPE: &str = "merged";

/// Name of a trust boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeName(String);

impl ScopeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScopeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScopeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&ScopeName> for ScopeName {
    fn from(s: &ScopeName) -> Self {
        s.clone()
    }
}

impl PartialEq<str> for ScopeName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ScopeName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A confidence score in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0.0);
    pub const ONE: Confidence = Confidence(1.0);

    /// Validate `value`; NaN and anything outside `[0, 1]` is rejected.
    pub fn new(value: f64) -> Result<Self> {
        Self::checked(value, "value")
    }

    pub(crate) fn checked(value: f64, context: &str) -> Result<Self> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(MullionError::ConfidenceRange {
                value,
                context: context.to_string(),
            })
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Confidence::new(value).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn new_trace_id() -> String {
    mullion_telemetry::new_trace_id()
}

/// A value stamped with its origin scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Owned<T> {
    value: T,
    confidence: Confidence,
    scope: ScopeName,
    trace_id: String,
}

impl<T> Owned<T> {
    /// Full confidence, fresh trace id.
    pub fn new(value: T, scope: impl Into<ScopeName>) -> Self {
        Self {
            value,
            confidence: Confidence::ONE,
            scope: scope.into(),
            trace_id: new_trace_id(),
        }
    }

    pub fn with_confidence(value: T, scope: impl Into<ScopeName>, confidence: f64) -> Result<Self> {
        Self::builder(value, scope).confidence(confidence).build()
    }

    pub fn builder(value: T, scope: impl Into<ScopeName>) -> OwnedBuilder<T> {
        OwnedBuilder {
            value,
            scope: scope.into(),
            confidence: 1.0,
            trace_id: None,
        }
    }

    pub(crate) fn from_parts(
        value: T,
        confidence: Confidence,
        scope: ScopeName,
        trace_id: String,
    ) -> Self {
        Self {
            value,
            confidence,
            scope,
            trace_id,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.confidence.get()
    }

    pub fn scope(&self) -> &ScopeName {
        &self.scope
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Whether this value may be used in `scope` without bridging.
    pub fn belongs_to(&self, scope: &str) -> bool {
        self.scope == scope
    }

    /// Derive a new value inside the same scope, keeping confidence and trace id.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Owned<U> {
        Owned {
            value: f(self.value),
            confidence: self.confidence,
            scope: self.scope,
            trace_id: self.trace_id,
        }
    }

    pub(crate) fn value_ref(&self) -> &T {
        &self.value
    }

    pub(crate) fn into_value(self) -> T {
        self.value
    }
}

impl<T: Clone> Owned<T> {
    /// Copy with a new scope tag; the original is untouched.
    pub(crate) fn restamp(&self, scope: ScopeName) -> Owned<T> {
        Owned {
            value: self.value.clone(),
            confidence: self.confidence,
            scope,
            trace_id: self.trace_id.clone(),
        }
    }
}

/// Builder for [`Owned`].
#[derive(Debug)]
pub struct OwnedBuilder<T> {
    value: T,
    scope: ScopeName,
    confidence: f64,
    trace_id: Option<String>,
}

impl<T> OwnedBuilder<T> {
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn build(self) -> Result<Owned<T>> {
        let confidence = Confidence::checked(self.confidence, "owned value")?;
        Ok(Owned {
            value: self.value,
            confidence,
            scope: self.scope,
            trace_id: self.trace_id.unwrap_or_else(new_trace_id),
        })
    }
}

/// One of the answers the model considered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative<T> {
    pub value: T,
    pub confidence: Confidence,
}

impl<T> Alternative<T> {
    pub fn new(value: T, confidence: f64) -> Result<Self> {
        Ok(Self {
            value,
            confidence: Confidence::checked(confidence, "alternative")?,
        })
    }
}

/// An [`Owned`] value plus the alternatives and reasoning behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticValue<T> {
    #[serde(flatten)]
    owned: Owned<T>,
    alternatives: Vec<Alternative<T>>,
    reasoning: String,
}

impl<T> SemanticValue<T> {
    /// Alternatives are given as `(value, confidence)` pairs and validated.
    pub fn new(
        owned: Owned<T>,
        alternatives: Vec<(T, f64)>,
        reasoning: impl Into<String>,
    ) -> Result<Self> {
        let alternatives = alternatives
            .into_iter()
            .map(|(value, confidence)| Alternative::new(value, confidence))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            owned,
            alternatives,
            reasoning: reasoning.into(),
        })
    }

    pub(crate) fn from_parts(
        owned: Owned<T>,
        alternatives: Vec<Alternative<T>>,
        reasoning: String,
    ) -> Self {
        Self {
            owned,
            alternatives,
            reasoning,
        }
    }

    pub fn owned(&self) -> &Owned<T> {
        &self.owned
    }

    pub fn into_owned(self) -> Owned<T> {
        self.owned
    }

    pub fn confidence(&self) -> f64 {
        self.owned.confidence()
    }

    pub fn scope(&self) -> &ScopeName {
        self.owned.scope()
    }

    pub fn trace_id(&self) -> &str {
        self.owned.trace_id()
    }

    pub fn alternatives(&self) -> &[Alternative<T>] {
        &self.alternatives
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Highest-confidence alternative; the earliest wins ties.
    pub fn best_alternative(&self) -> Option<&Alternative<T>> {
        self.alternatives.iter().fold(None, |best, alt| match best {
            Some(b) if b.confidence.get() >= alt.confidence.get() => Some(b),
            _ => Some(alt),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bounds() {
        assert!(Confidence::new(0.0).is_ok());
        assert!(Confidence::new(1.0).is_ok());
        assert!(Confidence::new(0.5).is_ok());
        assert!(Confidence::new(-0.01).is_err());
        assert!(Confidence::new(1.0001).is_err());
        assert!(Confidence::new(f64::NAN).is_err());
        assert!(Confidence::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_builder_rejects_out_of_range() {
        let err = Owned::builder("x", "admin").confidence(1.5).build().unwrap_err();
        assert!(matches!(err, MullionError::ConfidenceRange { value, .. } if value == 1.5));
    }

    #[test]
    fn test_builder_keeps_trace_id() {
        let owned = Owned::builder(1, "a").trace_id("trace-1").build().unwrap();
        assert_eq!(owned.trace_id(), "trace-1");
        assert_eq!(owned.confidence(), 1.0);
        assert!(owned.belongs_to("a"));
    }

    #[test]
    fn test_new_generates_distinct_trace_ids() {
        let a = Owned::new(1, "s");
        let b = Owned::new(1, "s");
        assert_ne!(a.trace_id(), b.trace_id());
    }

    #[test]
    fn test_map_stays_in_scope() {
        let owned = Owned::with_confidence(21, "calc", 0.7).unwrap();
        let trace = owned.trace_id().to_string();
        let doubled = owned.map(|v| v * 2);
        assert_eq!(*doubled.value_ref(), 42);
        assert_eq!(doubled.scope(), &ScopeName::from("calc"));
        assert_eq!(doubled.trace_id(), trace);
        assert_eq!(doubled.confidence(), 0.7);
    }

    #[test]
    fn test_semantic_alternatives_validated() {
        let owned = Owned::new("cat", "vision");
        assert!(SemanticValue::new(owned.clone(), vec![("dog", 0.3)], "fur").is_ok());
        let err = SemanticValue::new(owned, vec![("dog", 2.0)], "fur").unwrap_err();
        assert!(matches!(err, MullionError::ConfidenceRange { .. }));
    }

    #[test]
    fn test_best_alternative_prefers_first_on_tie() {
        let semantic = SemanticValue::new(
            Owned::new("a", "s"),
            vec![("b", 0.4), ("c", 0.6), ("d", 0.6)],
            "",
        )
        .unwrap();
        assert_eq!(semantic.best_alternative().map(|a| a.value), Some("c"));
    }

    #[test]
    fn test_confidence_deserialize_validates() {
        assert!(serde_json::from_str::<Confidence>("0.25").is_ok());
        assert!(serde_json::from_str::<Confidence>("3").is_err());
    }

    #[test]
    fn test_owned_serializes_camel_case() {
        let owned = Owned::builder("v", "s").trace_id("t").build().unwrap();
        let json = serde_json::to_value(&owned).unwrap();
        assert_eq!(json["traceId"], "t");
        assert_eq!(json["scope"], "s");
        assert_eq!(json["confidence"], 1.0);
    }
}
