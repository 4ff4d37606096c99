//! In-memory span buffer feeding pluggable exporters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::CollectorConfig;
use crate::exporter::SpanExporter;
use crate::span::{
    Attributes, EndSpanOptions, MullionSpan, SpanContext, StartSpanOptions, new_trace_id,
    now_micros,
};

/// Collects finished spans and hands them to exporters.
///
/// Cloning is cheap; clones share the same buffer. A disabled collector hands
/// out inert contexts and never touches its buffer.
#[derive(Clone)]
pub struct TraceCollector {
    inner: Arc<Inner>,
}

struct Inner {
    config: CollectorConfig,
    exporters: Vec<Arc<dyn SpanExporter>>,
    state: Mutex<State>,
    /// Serializes flushes so re-buffered spans keep their order.
    flush_lock: tokio::sync::Mutex<()>,
    shut_down: AtomicBool,
}

#[derive(Default)]
struct State {
    buffer: Vec<MullionSpan>,
    active: HashMap<String, SpanContext>,
    /// Spans an exporter has not accepted yet, indexed like `exporters`.
    backlog: Vec<Vec<MullionSpan>>,
}

impl std::fmt::Debug for TraceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TraceCollector")
            .field("enabled", &self.inner.config.enabled)
            .field("exporters", &self.inner.exporters.len())
            .field("buffered", &state.buffer.len())
            .field("active", &state.active.len())
            .finish()
    }
}

impl TraceCollector {
    pub fn builder() -> TraceCollectorBuilder {
        TraceCollectorBuilder::new()
    }

    /// Collector with the given config and no exporters.
    pub fn new(config: CollectorConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Collector that records nothing.
    pub fn disabled() -> Self {
        Self::new(CollectorConfig::disabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled && !self.inner.shut_down.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.inner.config
    }

    /// Start a span and track it as active.
    pub fn start_span(&self, options: StartSpanOptions) -> SpanContext {
        if !self.is_enabled() {
            return SpanContext::inert(options.name);
        }

        let (trace_id, parent_span_id) = match options.parent {
            Some(parent) => (parent.trace_id, Some(parent.span_id)),
            None => (options.trace_id.unwrap_or_else(new_trace_id), None),
        };
        let ctx = SpanContext::new(
            options.name,
            options.kind,
            trace_id,
            parent_span_id,
            options.attributes,
        );

        self.inner
            .state
            .lock()
            .active
            .insert(ctx.span_id.clone(), ctx.clone());
        ctx
    }

    /// Merge attributes into an active span. Unknown or ended spans are ignored.
    pub fn set_attributes(&self, ctx: &SpanContext, attributes: Attributes) {
        if !ctx.is_recording() {
            return;
        }
        let mut state = self.inner.state.lock();
        if let Some(active) = state.active.get_mut(&ctx.span_id) {
            active.attributes.extend(attributes);
        }
    }

    /// End an active span and buffer it for export.
    ///
    /// Ending a span twice is a no-op. When the buffer reaches
    /// `max_buffer_size` and auto-flush is on, a flush is scheduled on the
    /// current tokio runtime (if any).
    pub fn end_span(&self, ctx: SpanContext, options: EndSpanOptions) {
        if !ctx.is_recording() || !self.inner.config.enabled {
            return;
        }

        let should_flush = {
            let mut state = self.inner.state.lock();
            let Some(mut active) = state.active.remove(&ctx.span_id) else {
                debug!(
                    span_id = %ctx.span_id,
                    name = %ctx.name,
                    "end_span on inactive span ignored"
                );
                return;
            };
            if self.inner.shut_down.load(Ordering::Acquire) {
                debug!(
                    span_id = %ctx.span_id,
                    name = %ctx.name,
                    "span ended after shutdown dropped"
                );
                return;
            }
            active.attributes.extend(options.attributes);

            state.buffer.push(MullionSpan {
                trace_id: active.trace_id,
                span_id: active.span_id,
                parent_span_id: active.parent_span_id,
                name: active.name,
                kind: active.kind,
                start_time: active.start_time,
                end_time: now_micros().max(active.start_time),
                status: options.status,
                status_message: options.status_message,
                attributes: active.attributes,
            });
            enforce_retention(&mut state.buffer, self.inner.config.max_retained_spans);

            self.inner.config.auto_flush
                && state.buffer.len() >= self.inner.config.max_buffer_size
        };

        if should_flush {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let collector = self.clone();
                handle.spawn(async move {
                    collector.flush().await;
                });
            }
            Err(_) => debug!("no tokio runtime; auto-flush deferred to explicit flush"),
        }
    }

    /// Export every buffered span.
    ///
    /// Each exporter receives the new spans after whatever it failed to
    /// accept on earlier flushes. A failing exporter keeps its own backlog;
    /// exporters that succeeded never see the same span twice. Returns the
    /// number of spans that reached every exporter, which is 0 when any
    /// exporter failed. Errors are logged, never propagated.
    pub async fn flush(&self) -> usize {
        if !self.inner.config.enabled {
            return 0;
        }
        let _guard = self.inner.flush_lock.lock().await;

        let (batch, mut backlog) = {
            let mut state = self.inner.state.lock();
            let batch = std::mem::take(&mut state.buffer);
            let backlog = std::mem::take(&mut state.backlog);
            (batch, backlog)
        };
        if self.inner.exporters.is_empty() {
            if !batch.is_empty() {
                debug!(spans = batch.len(), "no exporters configured; dropping spans");
            }
            return 0;
        }
        backlog.resize_with(self.inner.exporters.len(), Vec::new);

        let mut failed = false;
        let mut delivered = 0;
        for (exporter, pending) in self.inner.exporters.iter().zip(backlog.iter_mut()) {
            pending.extend(batch.iter().cloned());
            if pending.is_empty() {
                continue;
            }
            match exporter.export(pending.as_slice()).await {
                Ok(()) => {
                    delivered = delivered.max(pending.len());
                    pending.clear();
                }
                Err(err) => {
                    warn!(
                        exporter = exporter.name(),
                        spans = pending.len(),
                        error = %err,
                        "span export failed; re-buffering"
                    );
                    enforce_retention(pending, self.inner.config.max_retained_spans);
                    failed = true;
                }
            }
        }

        self.inner.state.lock().backlog = backlog;
        if failed {
            return 0;
        }
        if delivered > 0 {
            debug!(spans = delivered, "spans exported");
        }
        delivered
    }

    /// Flush, then shut down every exporter. Later spans are not recorded.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let active = self.active_len();
        if active > 0 {
            warn!(active, "collector shut down with spans still active");
        }
        self.flush().await;
        for exporter in &self.inner.exporters {
            if let Err(err) = exporter.shutdown().await {
                warn!(exporter = exporter.name(), error = %err, "exporter shutdown failed");
            }
        }
    }

    /// Spans waiting for export: those ended since the last flush plus the
    /// largest backlog any exporter still owes.
    pub fn buffered_len(&self) -> usize {
        let state = self.inner.state.lock();
        let owed = state.backlog.iter().map(Vec::len).max().unwrap_or(0);
        state.buffer.len() + owed
    }

    /// Spans started but not yet ended.
    pub fn active_len(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Copy of the spans ended since the last flush.
    pub fn buffered_spans(&self) -> Vec<MullionSpan> {
        self.inner.state.lock().buffer.clone()
    }
}

fn enforce_retention(buffer: &mut Vec<MullionSpan>, max: usize) {
    if buffer.len() > max {
        let excess = buffer.len() - max;
        warn!(dropped = excess, "span buffer over capacity; dropping oldest spans");
        buffer.drain(..excess);
    }
}

/// Builder for [`TraceCollector`].
#[derive(Default)]
pub struct TraceCollectorBuilder {
    config: CollectorConfig,
    exporters: Vec<Arc<dyn SpanExporter>>,
}

impl TraceCollectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn exporter(mut self, exporter: impl SpanExporter + 'static) -> Self {
        self.exporters.push(Arc::new(exporter));
        self
    }

    pub fn shared_exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn build(self) -> TraceCollector {
        TraceCollector {
            inner: Arc::new(Inner {
                config: self.config,
                exporters: self.exporters,
                state: Mutex::new(State::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }
}
