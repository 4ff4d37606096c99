//! OTel-shaped span records.
//!
//! A [`SpanContext`] lives between `start_span` and `end_span`; ending it
//! produces an immutable [`MullionSpan`] that waits in the collector buffer
//! for export.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Attribute bag keyed by dotted attribute names.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A typed span attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringArray(Vec<String>),
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(v: usize) -> Self {
        AttributeValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(v: Vec<String>) -> Self {
        AttributeValue::StringArray(v)
    }
}

/// Span kind, as in OpenTelemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

/// Final span status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
    #[default]
    Unset,
}

/// A span that has been started but not yet ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    /// Microseconds since the Unix epoch.
    pub start_time: u64,
    pub attributes: Attributes,
    recording: bool,
}

impl SpanContext {
    pub(crate) fn new(
        name: String,
        kind: SpanKind,
        trace_id: String,
        parent_span_id: Option<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            trace_id,
            span_id: new_span_id(),
            parent_span_id,
            name,
            kind,
            start_time: now_micros(),
            attributes,
            recording: true,
        }
    }

    /// Placeholder handed out by a disabled collector.
    pub fn inert(name: impl Into<String>) -> Self {
        Self {
            trace_id: String::new(),
            span_id: String::new(),
            parent_span_id: None,
            name: name.into(),
            kind: SpanKind::Internal,
            start_time: 0,
            attributes: Attributes::new(),
            recording: false,
        }
    }

    /// False for contexts produced while tracing was disabled.
    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

/// An ended, immutable span awaiting export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MullionSpan {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: u64,
    pub end_time: u64,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub attributes: Attributes,
}

impl MullionSpan {
    /// Duration in microseconds.
    pub fn duration_micros(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// Options for starting a span.
#[derive(Debug, Clone, Default)]
pub struct StartSpanOptions {
    pub name: String,
    pub kind: SpanKind,
    /// Parent span; its trace id is inherited.
    pub parent: Option<SpanContext>,
    /// Explicit trace id for root spans.
    pub trace_id: Option<String>,
    pub attributes: Attributes,
}

impl StartSpanOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn parent(mut self, parent: &SpanContext) -> Self {
        if parent.is_recording() {
            self.parent = Some(parent.clone());
        }
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Options for ending a span.
#[derive(Debug, Clone, Default)]
pub struct EndSpanOptions {
    pub status: SpanStatus,
    pub status_message: Option<String>,
    pub attributes: Attributes,
}

impl EndSpanOptions {
    pub fn ok() -> Self {
        Self {
            status: SpanStatus::Ok,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SpanStatus::Error,
            status_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// 32 hex characters.
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 16 hex characters.
pub fn new_span_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shapes() {
        let trace = new_trace_id();
        let span = new_span_id();
        assert_eq!(trace.len(), 32);
        assert_eq!(span.len(), 16);
        assert!(trace.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(span.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_inert_context_is_not_recording() {
        let ctx = SpanContext::inert("noop");
        assert!(!ctx.is_recording());
        assert!(ctx.trace_id.is_empty());

        // An inert parent is ignored rather than propagated
        let opts = StartSpanOptions::new("child").parent(&ctx);
        assert!(opts.parent.is_none());
    }

    #[test]
    fn test_span_serializes_camel_case() {
        let span = MullionSpan {
            trace_id: "t".into(),
            span_id: "s".into(),
            parent_span_id: None,
            name: "mullion.scope".into(),
            kind: SpanKind::Internal,
            start_time: 10,
            end_time: 25,
            status: SpanStatus::Ok,
            status_message: None,
            attributes: Attributes::new(),
        };
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["traceId"], "t");
        assert_eq!(json["status"], "ok");
        assert!(json.get("parentSpanId").is_none());
        assert_eq!(span.duration_micros(), 15);
    }
}
