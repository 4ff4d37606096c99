//! Tracing support for scoped LLM pipelines.
//!
//! Provides:
//! - A span collector with OTel-shaped records and pluggable exporters
//! - The `mullion.*` / `gen_ai.*` attribute names exporters rely on
//! - Structured logging with JSON (bunyan-style) or pretty terminal output
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mullion_telemetry::{
//!     CollectorConfig, EndSpanOptions, LogExporter, StartSpanOptions, TraceCollector,
//! };
//!
//! # async fn run() {
//! mullion_telemetry::init_default("my_app");
//!
//! let collector = TraceCollector::builder()
//!     .config(CollectorConfig::from_env())
//!     .exporter(LogExporter)
//!     .build();
//!
//! let span = collector.start_span(StartSpanOptions::new("mullion.scope"));
//! collector.end_span(span, EndSpanOptions::ok());
//! collector.shutdown().await;
//! # }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG` - Log filter directive (default: "info")
//! - `LOG_FORMAT` - Output format: "json" or "pretty" (default: "pretty")
//! - `TEST_LOG` - If set, enables logs in test mode
//! - `MULLION_TRACING_ENABLED` - Turns the collector on or off
//! - `MULLION_TRACE_BUFFER_SIZE` - Spans buffered before auto-flush
//! - `MULLION_TRACE_AUTO_FLUSH` - Whether a full buffer triggers a flush

pub mod attributes;
pub mod collector;
pub mod config;
pub mod error;
pub mod exporter;
pub mod global;
pub mod layers;
pub mod span;

pub use collector::{TraceCollector, TraceCollectorBuilder};
pub use config::{CollectorConfig, LogFormat, TelemetryConfig};
pub use error::{Result, TelemetryError};
pub use exporter::{InMemoryExporter, LogExporter, SpanExporter};
pub use global::{global, init_global, shutdown_global};
pub use span::{
    AttributeValue, Attributes, EndSpanOptions, MullionSpan, SpanContext, SpanKind, SpanStatus,
    StartSpanOptions, new_span_id, new_trace_id,
};

use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Initialize logging from environment variables.
pub fn init_default(name: &str) {
    init_with_config(name, TelemetryConfig::from_env());
}

/// Initialize logging with a custom default filter.
///
/// `RUST_LOG` still wins when set.
pub fn init_with_filter(name: &str, default_filter: &str) {
    let config = TelemetryConfig::from_env().with_filter(default_filter);
    init_with_config(name, config);
}

/// Initialize logging with full configuration control.
///
/// Returns an error if a global subscriber is already installed.
pub fn try_init_with_config(name: &str, config: TelemetryConfig) -> Result<()> {
    // Redirect log crate to tracing
    let _ = LogTracer::init();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let installed = match config.format {
        LogFormat::Json => {
            let (storage_layer, formatting_layer) = layers::JsonLayer::layers(name);
            let subscriber = Registry::default()
                .with(env_filter)
                .with(storage_layer)
                .with(formatting_layer);
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Pretty => {
            let formatting_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false);
            let subscriber = Registry::default().with(env_filter).with(formatting_layer);
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    installed.map_err(|e| TelemetryError::Config(e.to_string()))
}

/// Like [`try_init_with_config`], but logs instead of failing when a
/// subscriber already exists.
pub fn init_with_config(name: &str, config: TelemetryConfig) {
    if let Err(err) = try_init_with_config(name, config) {
        tracing::debug!(error = %err, "subscriber already installed");
    }
}

/// Initialize logging for tests.
///
/// Logs are suppressed unless `TEST_LOG` is set.
pub fn init_test() {
    let config = TelemetryConfig::from_env().with_test_mode(true);

    if config.should_suppress_logs() {
        return;
    }

    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = LogTracer::init();

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

        let formatting_layer = fmt::layer().with_target(true).with_test_writer();

        let subscriber = Registry::default().with(env_filter).with(formatting_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
