//! Collector lifecycle tests: flushing, export failure, shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mullion_telemetry::{
    CollectorConfig, EndSpanOptions, InMemoryExporter, MullionSpan, SpanExporter, SpanStatus,
    StartSpanOptions, TelemetryError, TraceCollector, attributes,
};
use pretty_assertions::assert_eq;

/// Fails until told otherwise, recording what it would have exported.
#[derive(Clone, Default)]
struct FlakyExporter {
    healthy: Arc<AtomicBool>,
    inner: InMemoryExporter,
}

#[async_trait]
impl SpanExporter for FlakyExporter {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn export(&self, spans: &[MullionSpan]) -> mullion_telemetry::Result<()> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(TelemetryError::export("flaky", "collector unreachable"));
        }
        self.inner.export(spans).await
    }
}

fn record(collector: &TraceCollector, name: &str) {
    let span = collector.start_span(
        StartSpanOptions::new(name).attribute(attributes::SCOPE_NAME, "admin"),
    );
    collector.end_span(span, EndSpanOptions::ok());
}

#[tokio::test]
async fn failed_export_rebuffers_spans() {
    let exporter = FlakyExporter::default();
    let collector = TraceCollector::builder()
        .config(CollectorConfig::default().with_auto_flush(false))
        .exporter(exporter.clone())
        .build();

    record(&collector, "first");
    record(&collector, "second");

    assert_eq!(collector.flush().await, 0);
    assert_eq!(collector.buffered_len(), 2);

    // Spans ended after the failure queue behind the re-buffered batch
    record(&collector, "third");
    exporter.healthy.store(true, Ordering::SeqCst);

    assert_eq!(collector.flush().await, 3);
    assert_eq!(collector.buffered_len(), 0);
    let names: Vec<_> = exporter.inner.spans().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn partial_failure_retries_only_the_failing_exporter() {
    let steady = InMemoryExporter::new();
    let flaky = FlakyExporter::default();
    let collector = TraceCollector::builder()
        .config(CollectorConfig::default().with_auto_flush(false))
        .exporter(steady.clone())
        .exporter(flaky.clone())
        .build();

    record(&collector, "first");
    assert_eq!(collector.flush().await, 0);
    assert_eq!(steady.spans().len(), 1);
    assert_eq!(collector.buffered_len(), 1);

    record(&collector, "second");
    flaky.healthy.store(true, Ordering::SeqCst);
    assert_eq!(collector.flush().await, 2);
    assert_eq!(collector.buffered_len(), 0);

    let steady_names: Vec<_> = steady.spans().into_iter().map(|s| s.name).collect();
    assert_eq!(steady_names, vec!["first", "second"]);
    let flaky_names: Vec<_> = flaky.inner.spans().into_iter().map(|s| s.name).collect();
    assert_eq!(flaky_names, vec!["first", "second"]);
}

#[tokio::test]
async fn auto_flush_triggers_at_buffer_size() {
    let exporter = InMemoryExporter::new();
    let collector = TraceCollector::builder()
        .config(CollectorConfig::default().with_max_buffer_size(2))
        .exporter(exporter.clone())
        .build();

    record(&collector, "a");
    assert_eq!(exporter.spans().len(), 0);
    record(&collector, "b");

    for _ in 0..50 {
        if exporter.spans().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(exporter.spans().len(), 2);
    assert_eq!(collector.buffered_len(), 0);
}

#[tokio::test]
async fn shutdown_flushes_and_stops_recording() {
    let exporter = InMemoryExporter::new();
    let collector = TraceCollector::builder()
        .config(CollectorConfig::default().with_auto_flush(false))
        .exporter(exporter.clone())
        .build();

    let errored = collector.start_span(StartSpanOptions::new("failing-op"));
    collector.end_span(errored, EndSpanOptions::error("boom"));
    collector.shutdown().await;

    let spans = exporter.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, SpanStatus::Error);
    assert_eq!(spans[0].status_message.as_deref(), Some("boom"));
    assert!(exporter.is_shut_down());

    let late = collector.start_span(StartSpanOptions::new("late"));
    assert!(!late.is_recording());
    assert!(!collector.is_enabled());
}

#[tokio::test]
async fn span_ended_after_shutdown_is_dropped() {
    let exporter = InMemoryExporter::new();
    let collector = TraceCollector::builder()
        .config(CollectorConfig::default().with_auto_flush(false))
        .exporter(exporter.clone())
        .build();

    let straggler = collector.start_span(StartSpanOptions::new("straggler"));
    collector.shutdown().await;
    collector.end_span(straggler, EndSpanOptions::ok());

    assert_eq!(collector.buffered_len(), 0);
    assert_eq!(collector.active_len(), 0);
    assert!(exporter.spans_named("straggler").is_empty());
}

#[tokio::test]
async fn global_collector_lifecycle() {
    let exporter = InMemoryExporter::new();
    let installed = mullion_telemetry::init_global(
        TraceCollector::builder()
            .config(CollectorConfig::default().with_auto_flush(false))
            .exporter(exporter.clone())
            .build(),
    );

    record(&mullion_telemetry::global(), "via-global");
    assert_eq!(installed.buffered_len(), 1);

    mullion_telemetry::shutdown_global().await;
    assert_eq!(exporter.spans_named("via-global").len(), 1);
}
