//! The inference seam.
//!
//! The core never calls a model itself. An [`InferenceClient`] returns raw
//! JSON output plus token usage; [`ScopeContext::infer`](crate::ScopeContext::infer)
//! validates it and stamps the scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::metrics::TokenUsage;
use crate::owned::ScopeName;

/// One call to the model.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    /// Scope the result will be stamped with.
    pub scope: ScopeName,
    pub prompt: String,
    /// Structural descriptor of the expected output.
    pub schema: Value,
    /// Model override; `None` uses the client's default.
    pub model: Option<String>,
}

/// Raw model output plus usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub output: Value,
    /// Model-reported confidence; treated as 1.0 when absent.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub model: Option<String>,
    /// Other candidate outputs with their confidences.
    #[serde(default)]
    pub alternatives: Vec<(Value, f64)>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl InferenceResponse {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_alternative(mut self, output: Value, confidence: f64) -> Self {
        self.alternatives.push((output, confidence));
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// Provider wrapper that performs the actual model call.
///
/// Timeouts and retries belong to the implementation; a timeout surfaces
/// as an ordinary error.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Client name used in logs.
    fn name(&self) -> &str {
        "inference"
    }

    /// Model used when the request does not name one.
    fn default_model(&self) -> Option<&str> {
        None
    }

    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse>;
}
