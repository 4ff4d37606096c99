//! Span exporter interface and built-in exporters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::error::Result;
use crate::span::MullionSpan;

/// Destination for finished spans.
///
/// OTLP and vendor exporters implement this outside the workspace.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    /// Exporter name used in logs.
    fn name(&self) -> &str;

    /// Export a batch. An error makes the collector keep the batch for retry.
    async fn export(&self, spans: &[MullionSpan]) -> Result<()>;

    /// Release exporter resources.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps exported spans in memory.
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<MullionSpan>>>,
    export_calls: Arc<AtomicUsize>,
    shut_down: Arc<AtomicUsize>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything exported so far.
    pub fn spans(&self) -> Vec<MullionSpan> {
        self.spans.lock().clone()
    }

    pub fn spans_named(&self, name: &str) -> Vec<MullionSpan> {
        self.spans
            .lock()
            .iter()
            .filter(|span| span.name == name)
            .cloned()
            .collect()
    }

    pub fn export_calls(&self) -> usize {
        self.export_calls.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Relaxed) > 0
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl std::fmt::Debug for InMemoryExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryExporter")
            .field("spans", &self.spans.lock().len())
            .field("export_calls", &self.export_calls())
            .finish()
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn export(&self, spans: &[MullionSpan]) -> Result<()> {
        self.export_calls.fetch_add(1, Ordering::Relaxed);
        self.spans.lock().extend_from_slice(spans);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Emits each span as a `tracing` event on the `mullion::spans` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExporter;

#[async_trait]
impl SpanExporter for LogExporter {
    fn name(&self) -> &str {
        "log"
    }

    async fn export(&self, spans: &[MullionSpan]) -> Result<()> {
        for span in spans {
            let attributes = serde_json::to_string(&span.attributes)?;
            info!(
                target: "mullion::spans",
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = span.parent_span_id.as_deref().unwrap_or(""),
                name = %span.name,
                status = ?span.status,
                duration_us = span.duration_micros(),
                attributes = %attributes,
                "span finished"
            );
        }
        Ok(())
    }
}
