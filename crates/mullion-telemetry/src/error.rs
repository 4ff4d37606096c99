//! Telemetry error types.

use thiserror::Error;

/// Telemetry result type.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised by the collector, its exporters, or subscriber setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An exporter rejected a batch of spans.
    #[error("exporter '{exporter}' failed: {message}")]
    Export { exporter: String, message: String },

    /// The collector has already been shut down.
    #[error("trace collector is shut down")]
    ShutDown,

    /// Subscriber or configuration problem.
    #[error("invalid telemetry configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TelemetryError {
    /// Create an export error.
    pub fn export(exporter: impl Into<String>, message: impl Into<String>) -> Self {
        TelemetryError::Export {
            exporter: exporter.into(),
            message: message.into(),
        }
    }
}
