//! Helpers for handing owned values to logs, spans and other sinks.
//!
//! Sinks outside the pipeline (log lines, span attributes, analytics) should
//! never receive the raw value of an [`Owned`]. Wrap it with [`redact`] or
//! [`summarize`] first, or gate it with [`assert_safe_for`] when the sink is
//! only cleared for particular scopes.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{MullionError, Result};
use crate::owned::{Owned, ScopeName};

/// Placeholder for an owned value. `Debug`, `Display` and `Serialize` all
/// print `[REDACTED:<scope>]`.
///
/// ```
/// use mullion::{Owned, redact};
///
/// let ssn = Owned::new("123-45-6789", "admin");
/// assert_eq!(format!("{}", redact(&ssn)), "[REDACTED:admin]");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted {
    scope: ScopeName,
    trace_id: String,
}

impl Redacted {
    pub fn scope(&self) -> &ScopeName {
        &self.scope
    }

    /// Trace id of the hidden value, safe to log.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED:{}]", self.scope)
    }
}

impl fmt::Display for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED:{}]", self.scope)
    }
}

impl Serialize for Redacted {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Replace the value with a scope-tagged placeholder.
pub fn redact<T>(owned: &Owned<T>) -> Redacted {
    Redacted {
        scope: owned.scope().clone(),
        trace_id: owned.trace_id().to_string(),
    }
}

/// Shape-only description of an owned value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedSummary {
    pub scope: ScopeName,
    pub confidence: f64,
    pub trace_id: String,
    /// JSON kind of the value: `object`, `array`, `string`, `number`,
    /// `boolean`, `null`, or `unserializable`.
    pub kind: &'static str,
    /// Byte length of the value's JSON encoding.
    pub size: usize,
}

/// Describe an owned value without exposing it.
pub fn summarize<T: Serialize>(owned: &Owned<T>) -> OwnedSummary {
    let (kind, size) = match serde_json::to_value(owned.value_ref()) {
        Ok(value) => (json_kind(&value), value.to_string().len()),
        Err(_) => ("unserializable", 0),
    };
    OwnedSummary {
        scope: owned.scope().clone(),
        confidence: owned.confidence(),
        trace_id: owned.trace_id().to_string(),
        kind,
        size,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Pass `owned` through only if its scope is one of `allowed`.
pub fn assert_safe_for<'a, T>(owned: &'a Owned<T>, allowed: &[&str]) -> Result<&'a Owned<T>> {
    if allowed.iter().any(|scope| owned.belongs_to(scope)) {
        return Ok(owned);
    }
    tracing::warn!(
        scope = %owned.scope(),
        trace_id = owned.trace_id(),
        "blocked value from unsafe sink"
    );
    Err(MullionError::UnsafeSink {
        scope: owned.scope().to_string(),
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redact_hides_value() {
        let owned = Owned::new(json!({"ssn": "123-45-6789"}), "admin");
        let redacted = redact(&owned);
        assert_eq!(format!("{:?}", redacted), "[REDACTED:admin]");
        assert_eq!(format!("{}", redacted), "[REDACTED:admin]");
        let json = serde_json::to_string(&redacted).unwrap();
        assert_eq!(json, "\"[REDACTED:admin]\"");
        assert!(!json.contains("123-45"));
        assert_eq!(redacted.trace_id(), owned.trace_id());
    }

    #[test]
    fn test_summarize_reports_shape() {
        let owned = Owned::with_confidence(json!({"ssn": "123-45-6789"}), "admin", 0.9).unwrap();
        let summary = summarize(&owned);
        assert_eq!(summary.kind, "object");
        assert_eq!(summary.size, r#"{"ssn":"123-45-6789"}"#.len());
        assert_eq!(summary.confidence, 0.9);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("123-45"));
        assert!(json.contains("traceId"));
    }

    #[test]
    fn test_assert_safe_for() {
        let owned = Owned::new("report", "public");
        assert!(assert_safe_for(&owned, &["public", "internal"]).is_ok());

        let secret = Owned::new("key", "admin");
        let err = assert_safe_for(&secret, &["public"]).unwrap_err();
        assert!(err.is_boundary_violation());
        assert!(err.to_string().contains("admin"));
        assert!(assert_safe_for(&secret, &[]).is_err());
    }
}
