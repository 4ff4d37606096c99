//! Logging and collector configuration.

use std::env;

/// Default number of finished spans held before an automatic flush.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 100;

/// Default ceiling on spans retained after repeated export failures.
pub const DEFAULT_MAX_RETAINED_SPANS: usize = 10_000;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Bunyan-style JSON lines.
    Json,
    /// Human readable terminal output.
    #[default]
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "bunyan" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Running under a test harness.
    pub test_mode: bool,
    /// `TEST_LOG` was set.
    pub test_log: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryConfig {
    pub fn new() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
            test_mode: false,
            test_log: false,
        }
    }

    /// Read `RUST_LOG`, `LOG_FORMAT` and `TEST_LOG`.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(filter) = env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                config.filter = filter;
            }
        }
        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = LogFormat::parse(&format);
        }
        config.test_log = env::var("TEST_LOG").is_ok();
        config
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Tests stay quiet unless `TEST_LOG` is present.
    pub fn should_suppress_logs(&self) -> bool {
        self.test_mode && !self.test_log
    }
}

/// Trace collector configuration.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// When false every collector operation is a no-op.
    pub enabled: bool,
    /// Finished spans buffered before an automatic flush is scheduled.
    pub max_buffer_size: usize,
    /// Schedule a flush on the current tokio runtime when the buffer fills.
    pub auto_flush: bool,
    /// Hard ceiling on buffered spans; the oldest are dropped past it.
    pub max_retained_spans: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            auto_flush: true,
            max_retained_spans: DEFAULT_MAX_RETAINED_SPANS,
        }
    }
}

impl CollectorConfig {
    /// A configuration whose collector records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Read `MULLION_TRACING_ENABLED`, `MULLION_TRACE_BUFFER_SIZE` and
    /// `MULLION_TRACE_AUTO_FLUSH`. Unparseable values keep the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(enabled) = env_bool("MULLION_TRACING_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(size) = env::var("MULLION_TRACE_BUFFER_SIZE")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|size| *size > 0)
        {
            config.max_buffer_size = size;
        }
        if let Some(auto_flush) = env_bool("MULLION_TRACE_AUTO_FLUSH") {
            config.auto_flush = auto_flush;
        }
        config
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size.max(1);
        self
    }

    pub fn with_auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    pub fn with_max_retained_spans(mut self, max: usize) -> Self {
        self.max_retained_spans = max.max(1);
        self
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Pretty);
    }

    #[test]
    fn test_suppression_only_in_test_mode() {
        let config = TelemetryConfig::new().with_test_mode(true);
        assert!(config.should_suppress_logs());

        let config = TelemetryConfig {
            test_log: true,
            ..TelemetryConfig::new().with_test_mode(true)
        };
        assert!(!config.should_suppress_logs());

        assert!(!TelemetryConfig::new().should_suppress_logs());
    }

    #[test]
    fn test_collector_builders_clamp() {
        let config = CollectorConfig::default()
            .with_max_buffer_size(0)
            .with_max_retained_spans(0);
        assert_eq!(config.max_buffer_size, 1);
        assert_eq!(config.max_retained_spans, 1);
        assert!(!CollectorConfig::disabled().enabled);
    }
}
