//! Bunyan-style JSON output.

use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};

type StdoutWriter = fn() -> std::io::Stdout;

/// Factory for the JSON storage + formatting layer pair.
pub struct JsonLayer;

impl JsonLayer {
    /// Build the storage and formatting layers writing to stdout.
    ///
    /// The storage layer must be registered before the formatting layer so
    /// span fields are available when events are rendered.
    pub fn layers(name: &str) -> (JsonStorageLayer, BunyanFormattingLayer<StdoutWriter>) {
        let formatting =
            BunyanFormattingLayer::new(name.to_string(), std::io::stdout as StdoutWriter);
        (JsonStorageLayer, formatting)
    }
}
