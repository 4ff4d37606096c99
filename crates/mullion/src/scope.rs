//! Scopes: named execution contexts that gate access to owned values.
//!
//! A [`ScopeContext`] is handed to the closure passed to [`scope`] or
//! [`Session::scope`]. Inside it, [`ScopeContext::use_value`] is the only way
//! to read the raw value of an [`Owned`], and it refuses values stamped for
//! any other scope. Moving a value across the boundary takes an explicit
//! [`ScopeContext::bridge`].

use std::future::Future;
use std::sync::Arc;

use mullion_telemetry::{EndSpanOptions, SpanContext, StartSpanOptions, TraceCollector, attributes};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bridge::{self, BridgeMetadata};
use crate::catalog::{ModelCatalog, Provider};
use crate::error::{MullionError, Result};
use crate::inference::{InferenceClient, InferenceRequest};
use crate::metrics::TokenUsage;
use crate::owned::{Alternative, Confidence, Owned, ScopeName, SemanticValue};
use crate::schema::Schema;

/// Collaborators shared by every scope opened from it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    inference: Option<Arc<dyn InferenceClient>>,
    collector: Option<TraceCollector>,
    catalog: Arc<ModelCatalog>,
    default_model: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("inference", &self.inner.inference.as_ref().map(|c| c.name().to_string()))
            .field("collector", &self.inner.collector.is_some())
            .field("default_model", &self.inner.default_model)
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn inference(&self) -> Option<&Arc<dyn InferenceClient>> {
        self.inner.inference.as_ref()
    }

    pub fn collector(&self) -> Option<&TraceCollector> {
        self.inner.collector.as_ref()
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.inner.catalog
    }

    /// Session default model, falling back to the client's default.
    pub fn default_model(&self) -> Option<&str> {
        self.inner
            .default_model
            .as_deref()
            .or_else(|| self.inner.inference.as_ref().and_then(|c| c.default_model()))
    }

    /// Run `f` inside a new root scope.
    ///
    /// Whatever `f` returns, including errors, is passed through unchanged.
    /// The scope span ends `error` with the error's message when `f` fails.
    pub async fn scope<F, Fut, T, E>(
        &self,
        name: impl Into<ScopeName>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(ScopeContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        ScopeContext::open(self.clone(), name.into(), None).enter(f).await
    }
}

/// Builder for [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    inference: Option<Arc<dyn InferenceClient>>,
    collector: Option<TraceCollector>,
    catalog: Option<Arc<ModelCatalog>>,
    default_model: Option<String>,
}

impl SessionBuilder {
    pub fn inference(mut self, client: impl InferenceClient + 'static) -> Self {
        self.inference = Some(Arc::new(client));
        self
    }

    pub fn shared_inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    pub fn collector(mut self, collector: TraceCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn catalog(mut self, catalog: Arc<ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                inference: self.inference,
                collector: self.collector,
                catalog: self.catalog.unwrap_or_else(ModelCatalog::shared),
                default_model: self.default_model,
            }),
        }
    }
}

/// Run `f` inside a detached root scope with no collaborators.
pub async fn scope<F, Fut, T, E>(name: impl Into<ScopeName>, f: F) -> std::result::Result<T, E>
where
    F: FnOnce(ScopeContext) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    Session::default().scope(name, f).await
}

/// Handle to the current scope.
#[derive(Clone)]
pub struct ScopeContext {
    name: ScopeName,
    parent: Option<ScopeName>,
    depth: usize,
    trace_id: String,
    session: Session,
    span: Option<SpanContext>,
    usage: Arc<Mutex<Vec<TokenUsage>>>,
}

impl std::fmt::Debug for ScopeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeContext")
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("depth", &self.depth)
            .field("trace_id", &self.trace_id)
            .finish()
    }
}

impl ScopeContext {
    fn open(session: Session, name: ScopeName, parent: Option<&ScopeContext>) -> Self {
        let trace_id = parent
            .map(|p| p.trace_id.clone())
            .unwrap_or_else(crate::owned::new_trace_id);
        let depth = parent.map(|p| p.depth + 1).unwrap_or(0);

        let span = session.collector().map(|collector| {
            let mut options = StartSpanOptions::new("mullion.scope")
                .trace_id(trace_id.clone())
                .attribute(attributes::SCOPE_NAME, name.as_str())
                .attribute(attributes::SCOPE_DEPTH, depth);
            if let Some(parent) = parent {
                options = options.attribute(attributes::SCOPE_PARENT, parent.name.as_str());
                if let Some(parent_span) = &parent.span {
                    options = options.parent(parent_span);
                }
            }
            collector.start_span(options)
        });

        Self {
            name,
            parent: parent.map(|p| p.name.clone()),
            depth,
            trace_id,
            session,
            span,
            usage: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) async fn enter<F, Fut, T, E>(self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(ScopeContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        debug!(scope = %self.name, depth = self.depth, "entering scope");
        let result = f(self.clone()).await;
        if let (Some(collector), Some(span)) = (self.session.collector(), self.span.clone()) {
            let options = match &result {
                Ok(_) => EndSpanOptions::ok(),
                Err(err) => EndSpanOptions::error(err.to_string()),
            };
            collector.end_span(span, options);
        }
        result
    }

    /// Open a nested scope. Collaborators and trace id are inherited.
    pub async fn scope<F, Fut, T, E>(
        &self,
        name: impl Into<ScopeName>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(ScopeContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        self.child(name.into()).enter(f).await
    }

    pub(crate) fn child(&self, name: ScopeName) -> ScopeContext {
        ScopeContext::open(self.session.clone(), name, Some(self))
    }

    pub fn name(&self) -> &ScopeName {
        &self.name
    }

    pub fn parent(&self) -> Option<&ScopeName> {
        self.parent.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn collector(&self) -> Option<&TraceCollector> {
        self.session.collector()
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        self.session.catalog()
    }

    pub(crate) fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    /// Borrow the raw value of `owned`.
    ///
    /// Fails with [`MullionError::ScopeMismatch`] unless `owned` is stamped
    /// with this scope's name.
    pub fn use_value<'a, T>(&self, owned: &'a Owned<T>) -> Result<&'a T> {
        self.check(owned)?;
        Ok(owned.value_ref())
    }

    /// Consume `owned` and return its raw value, with the same check as
    /// [`use_value`](Self::use_value).
    pub fn take_value<T>(&self, owned: Owned<T>) -> Result<T> {
        self.check(&owned)?;
        Ok(owned.into_value())
    }

    fn check<T>(&self, owned: &Owned<T>) -> Result<()> {
        if owned.scope() != &self.name {
            warn!(
                scope = %self.name,
                value_scope = %owned.scope(),
                trace_id = owned.trace_id(),
                "blocked cross-scope use"
            );
            return Err(MullionError::scope_mismatch(
                self.name.as_str(),
                owned.scope().as_str(),
            ));
        }
        Ok(())
    }

    /// Copy `owned` into this scope. Value, confidence and trace id are kept.
    pub fn bridge<T: Clone>(&self, owned: &Owned<T>) -> Owned<T> {
        let bridged = bridge::bridge(owned, self.name.clone());
        self.record_bridge(owned.scope(), None);
        bridged
    }

    /// [`bridge`](Self::bridge) for a [`SemanticValue`]; alternatives survive.
    pub fn bridge_semantic<T: Clone>(&self, value: &SemanticValue<T>) -> SemanticValue<T> {
        let bridged = bridge::bridge_semantic(value, self.name.clone());
        self.record_bridge(value.scope(), None);
        bridged
    }

    /// Bridge and produce an audit record.
    pub fn bridge_with_metadata<T: Clone>(
        &self,
        owned: &Owned<T>,
        reason: Option<&str>,
    ) -> (Owned<T>, BridgeMetadata) {
        let (bridged, metadata) = bridge::bridge_with_metadata(owned, self.name.clone(), reason);
        self.record_bridge(owned.scope(), reason);
        (bridged, metadata)
    }

    fn record_bridge(&self, source: &ScopeName, reason: Option<&str>) {
        let Some(collector) = self.collector() else {
            return;
        };
        let mut options = StartSpanOptions::new("mullion.bridge")
            .trace_id(self.trace_id.clone())
            .attribute(attributes::BRIDGE_SOURCE, source.as_str())
            .attribute(attributes::BRIDGE_TARGET, self.name.as_str());
        if let Some(parent) = &self.span {
            options = options.parent(parent);
        }
        if let Some(reason) = reason {
            options = options.attribute(attributes::BRIDGE_REASON, reason);
        }
        let span = collector.start_span(options);
        collector.end_span(span, EndSpanOptions::ok());
    }

    /// Record provider usage for calls made outside [`infer`](Self::infer).
    pub fn record_usage(&self, usage: TokenUsage) {
        self.usage.lock().push(usage);
    }

    /// Usage recorded in this scope (not in nested scopes).
    pub fn usage(&self) -> Vec<TokenUsage> {
        self.usage.lock().clone()
    }

    /// Ask the inference client for a value matching `schema`, stamped with
    /// this scope.
    pub async fn infer<T, S>(&self, schema: &S, prompt: impl Into<String>) -> Result<Owned<T>>
    where
        S: Schema<T> + ?Sized,
    {
        let (response, span) = self.call_model(schema, prompt.into()).await?;
        let parsed = schema.parse(&response.output);
        self.finish_infer_span(span, parsed.as_ref().err().map(|e| e.to_string()));

        let confidence = Confidence::checked(response.confidence.unwrap_or(1.0), "inference")?;
        Ok(Owned::from_parts(
            parsed?,
            confidence,
            self.name.clone(),
            self.trace_id.clone(),
        ))
    }

    /// Like [`infer`](Self::infer) but keeps the alternatives and reasoning.
    ///
    /// Alternatives that fail validation are dropped with a debug log.
    pub async fn infer_semantic<T, S>(
        &self,
        schema: &S,
        prompt: impl Into<String>,
    ) -> Result<SemanticValue<T>>
    where
        S: Schema<T> + ?Sized,
    {
        let (response, span) = self.call_model(schema, prompt.into()).await?;
        let parsed = schema.parse(&response.output);
        self.finish_infer_span(span, parsed.as_ref().err().map(|e| e.to_string()));

        let confidence = Confidence::checked(response.confidence.unwrap_or(1.0), "inference")?;
        let owned = Owned::from_parts(
            parsed?,
            confidence,
            self.name.clone(),
            self.trace_id.clone(),
        );

        let mut alternatives = Vec::with_capacity(response.alternatives.len());
        for (raw, confidence) in &response.alternatives {
            match schema.parse(raw) {
                Ok(value) => alternatives.push(Alternative {
                    value,
                    confidence: Confidence::checked(*confidence, "alternative")?,
                }),
                Err(err) => {
                    debug!(scope = %self.name, error = %err, "dropping invalid alternative");
                }
            }
        }

        Ok(SemanticValue::from_parts(
            owned,
            alternatives,
            response.reasoning.unwrap_or_default(),
        ))
    }

    async fn call_model<T, S>(
        &self,
        schema: &S,
        prompt: String,
    ) -> Result<(crate::inference::InferenceResponse, Option<SpanContext>)>
    where
        S: Schema<T> + ?Sized,
    {
        let client = self.session.inference().ok_or_else(|| {
            MullionError::inference("no inference client configured for this session")
        })?;
        let model = self.session.default_model().map(str::to_string);

        let span = self.collector().map(|collector| {
            let mut options = StartSpanOptions::new("mullion.infer")
                .kind(mullion_telemetry::SpanKind::Client)
                .trace_id(self.trace_id.clone())
                .attribute(attributes::SCOPE_NAME, self.name.as_str())
                .attribute(attributes::GEN_AI_OPERATION_NAME, "chat");
            if let Some(model) = &model {
                options = options
                    .attribute(attributes::GEN_AI_REQUEST_MODEL, model.as_str())
                    .attribute(attributes::GEN_AI_SYSTEM, Provider::detect(model).as_str());
            }
            if let Some(parent) = &self.span {
                options = options.parent(parent);
            }
            collector.start_span(options)
        });

        let request = InferenceRequest {
            scope: self.name.clone(),
            prompt,
            schema: schema.descriptor(),
            model: model.clone(),
        };
        let request_model = model;

        let response = match client.infer(request).await {
            Ok(response) => response,
            Err(err) => {
                if let (Some(collector), Some(span)) = (self.collector(), span) {
                    collector.end_span(span, EndSpanOptions::error(err.to_string()));
                }
                return Err(err);
            }
        };
        self.record_usage(response.usage);
        let priced_model = response.model.as_deref().or(request_model.as_deref());

        let span = match (self.collector(), span) {
            (Some(collector), Some(span)) => {
                let mut attrs = mullion_telemetry::Attributes::new();
                attrs.insert(
                    attributes::GEN_AI_USAGE_INPUT_TOKENS.to_string(),
                    response.usage.input_tokens.into(),
                );
                attrs.insert(
                    attributes::GEN_AI_USAGE_OUTPUT_TOKENS.to_string(),
                    response.usage.output_tokens.into(),
                );
                if let Some(model) = &response.model {
                    attrs.insert(
                        attributes::GEN_AI_RESPONSE_MODEL.to_string(),
                        model.as_str().into(),
                    );
                }
                if let Some(model) = priced_model {
                    let cost = self.catalog().calculate_cost(&response.usage, None, model);
                    attrs.insert(attributes::COST_TOTAL_USD.to_string(), cost.total_cost.into());
                }
                collector.set_attributes(&span, attrs);
                Some(span)
            }
            _ => None,
        };

        Ok((response, span))
    }

    fn finish_infer_span(&self, span: Option<SpanContext>, error: Option<String>) {
        if let (Some(collector), Some(span)) = (self.collector(), span) {
            let options = match error {
                Some(message) => EndSpanOptions::error(message),
                None => EndSpanOptions::ok(),
            };
            collector.end_span(span, options);
        }
    }
}
