//! Scripted inference client for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::{MullionError, Result};
use crate::inference::{InferenceClient, InferenceRequest, InferenceResponse};
use crate::metrics::TokenUsage;
use crate::owned::ScopeName;
use crate::tokens::estimate_tokens;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(InferenceResponse),
    Failure(String),
}

impl From<InferenceResponse> for MockReply {
    fn from(response: InferenceResponse) -> Self {
        MockReply::Response(response)
    }
}

impl From<Value> for MockReply {
    fn from(output: Value) -> Self {
        MockReply::Response(InferenceResponse::new(output))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    Start,
    End,
}

/// Call lifecycle event, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEvent {
    pub scope: ScopeName,
    pub kind: MockEventKind,
}

/// A mock inference client.
///
/// Can be configured with:
/// - Cycling replies, or replies keyed by scope
/// - Failure injection
/// - Artificial latency
/// - A simulated provider prompt cache
pub struct MockInference {
    name: String,
    model: String,
    replies: RwLock<Vec<MockReply>>,
    scoped: RwLock<HashMap<String, MockReply>>,
    reply_index: AtomicUsize,
    call_count: AtomicUsize,
    latency: Option<Duration>,
    cache_min_tokens: Option<u64>,
    warm_prefixes: Mutex<HashSet<String>>,
    events: Mutex<Vec<MockEvent>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl MockInference {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            model: "mock-model".to_string(),
            replies: RwLock::new(vec![MockReply::from(Value::Null)]),
            scoped: RwLock::new(HashMap::new()),
            reply_index: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
            latency: None,
            cache_min_tokens: None,
            warm_prefixes: Mutex::new(HashSet::new()),
            events: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Model reported as the client default and used for token estimates.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a single fixed reply.
    pub fn with_reply(self, reply: impl Into<MockReply>) -> Self {
        self.with_replies(vec![reply.into()])
    }

    /// Set multiple replies (cycles through them).
    pub fn with_replies(self, replies: Vec<MockReply>) -> Self {
        *self.replies.write() = replies;
        self
    }

    /// Cycle through raw outputs.
    pub fn with_outputs(self, outputs: Vec<Value>) -> Self {
        self.with_replies(outputs.into_iter().map(MockReply::from).collect())
    }

    /// Reply for calls from a scope whose name is `key` or ends in `.key`.
    pub fn with_scope_reply(self, key: impl Into<String>, reply: impl Into<MockReply>) -> Self {
        self.scoped.write().insert(key.into(), reply.into());
        self
    }

    /// Fail calls from the matching scope.
    pub fn with_scope_failure(self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.with_scope_reply(key, MockReply::Failure(message.into()))
    }

    /// Sleep before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate a provider prompt cache.
    ///
    /// The cacheable prefix is the prompt up to its last blank line. A
    /// prefix of at least `min_tokens` is written on first use and read by
    /// any call that starts after a call with the same prefix completed.
    pub fn with_prompt_cache(mut self, min_tokens: u64) -> Self {
        self.cache_min_tokens = Some(min_tokens);
        self
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().clone()
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().clone()
    }

    /// Position of the first event of `kind` for a scope ending in `key`.
    pub fn event_position(&self, key: &str, kind: MockEventKind) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|e| e.kind == kind && scope_matches(&e.scope, key))
    }

    fn record(&self, scope: &ScopeName, kind: MockEventKind) {
        self.events.lock().push(MockEvent {
            scope: scope.clone(),
            kind,
        });
    }

    fn pick(&self, scope: &ScopeName) -> MockReply {
        if let Some(reply) = self
            .scoped
            .read()
            .iter()
            .find(|(key, _)| scope_matches(scope, key))
            .map(|(_, reply)| reply.clone())
        {
            return reply;
        }
        let replies = self.replies.read();
        if replies.is_empty() {
            return MockReply::Failure("mock has no replies configured".to_string());
        }
        let index = self.reply_index.fetch_add(1, Ordering::Relaxed) % replies.len();
        replies[index].clone()
    }

    fn cacheable_prefix<'a>(&self, prompt: &'a str, model: &str) -> Option<&'a str> {
        let min_tokens = self.cache_min_tokens?;
        let prefix = prompt.rsplit_once("\n\n").map_or(prompt, |(head, _)| head);
        (estimate_tokens(prefix, model) >= min_tokens).then_some(prefix)
    }
}

fn scope_matches(scope: &ScopeName, key: &str) -> bool {
    let scope = scope.as_str();
    scope == key
        || scope
            .strip_suffix(key)
            .is_some_and(|head| head.ends_with('.'))
}

impl Default for MockInference {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> Option<&str> {
        Some(&self.model)
    }

    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.record(&request.scope, MockEventKind::Start);
        self.requests.lock().push(request.clone());

        let reply = self.pick(&request.scope);
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let prefix = self.cacheable_prefix(&request.prompt, &model);
        let warm = prefix.is_some_and(|p| self.warm_prefixes.lock().contains(p));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.record(&request.scope, MockEventKind::End);

        let mut response = match reply {
            MockReply::Response(response) => response,
            MockReply::Failure(message) => return Err(MullionError::inference(message)),
        };

        if response.usage == TokenUsage::default() {
            let mut usage = TokenUsage::new(
                estimate_tokens(&request.prompt, &model),
                estimate_tokens(&response.output.to_string(), &model),
            );
            if let Some(prefix) = prefix {
                let prefix_tokens = estimate_tokens(prefix, &model);
                usage = if warm {
                    usage.with_cache_read(prefix_tokens).with_cache_write(0)
                } else {
                    usage.with_cache_read(0).with_cache_write(prefix_tokens)
                };
            }
            response.usage = usage;
        }
        if let Some(prefix) = prefix {
            self.warm_prefixes.lock().insert(prefix.to_string());
        }
        if response.model.is_none() {
            response.model = Some(model);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(scope: &str, prompt: &str) -> InferenceRequest {
        InferenceRequest {
            scope: scope.into(),
            prompt: prompt.to_string(),
            schema: Value::Null,
            model: None,
        }
    }

    #[tokio::test]
    async fn test_mock_cycling_replies() {
        let mock = MockInference::new().with_outputs(vec![json!("first"), json!("second")]);
        let mut outputs = Vec::new();
        for _ in 0..3 {
            outputs.push(mock.infer(request("s", "hi")).await.unwrap().output);
        }
        assert_eq!(outputs, vec![json!("first"), json!("second"), json!("first")]);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scope_replies_and_failures() {
        let mock = MockInference::new()
            .with_reply(json!("default"))
            .with_scope_reply("b", json!("for b"))
            .with_scope_failure("c", "rate limited");

        let a = mock.infer(request("fork.a", "x")).await.unwrap();
        let b = mock.infer(request("fork.b", "x")).await.unwrap();
        let c = mock.infer(request("fork.c", "x")).await.unwrap_err();
        assert_eq!(a.output, json!("default"));
        assert_eq!(b.output, json!("for b"));
        assert!(c.to_string().contains("rate limited"));
        // `ab` must not match key `b`
        assert_eq!(mock.infer(request("fork.ab", "x")).await.unwrap().output, json!("default"));
    }

    #[tokio::test]
    async fn test_prompt_cache_simulation() {
        let context = "x".repeat(4000);
        let mock = MockInference::new()
            .with_model("gpt-4o")
            .with_prompt_cache(500);
        let first = mock
            .infer(request("s", &format!("{context}\n\nquestion one")))
            .await
            .unwrap();
        let second = mock
            .infer(request("s", &format!("{context}\n\nquestion two")))
            .await
            .unwrap();
        assert_eq!(first.usage.cache_read_tokens, Some(0));
        assert_eq!(first.usage.cache_write_tokens, Some(1000));
        assert_eq!(second.usage.cache_read_tokens, Some(1000));

        let short = mock.infer(request("s", "tiny\n\nprompt")).await.unwrap();
        assert_eq!(short.usage.cache_read_tokens, None);
    }

    #[tokio::test]
    async fn test_records_events() {
        let mock = MockInference::new();
        mock.infer(request("root.a", "x")).await.unwrap();
        assert_eq!(mock.event_position("a", MockEventKind::Start), Some(0));
        assert_eq!(mock.event_position("a", MockEventKind::End), Some(1));
        assert_eq!(mock.requests().len(), 1);
    }
}
