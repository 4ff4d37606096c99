//! Process-wide collector for the outermost application layer.
//!
//! Library code takes a [`TraceCollector`] explicitly; only binaries should
//! reach for these helpers.

use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::collector::TraceCollector;
use crate::config::CollectorConfig;

static GLOBAL: OnceLock<RwLock<Option<TraceCollector>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<TraceCollector>> {
    GLOBAL.get_or_init(|| RwLock::new(None))
}

/// Install `collector` as the global instance, replacing any previous one.
pub fn init_global(collector: TraceCollector) -> TraceCollector {
    *slot().write() = Some(collector.clone());
    collector
}

/// The global collector, created from [`CollectorConfig::from_env`] on first use.
pub fn global() -> TraceCollector {
    if let Some(collector) = slot().read().as_ref() {
        return collector.clone();
    }
    let mut guard = slot().write();
    guard
        .get_or_insert_with(|| TraceCollector::new(CollectorConfig::from_env()))
        .clone()
}

/// Flush and shut down the global collector, then clear the slot.
pub async fn shutdown_global() {
    let collector = slot().write().take();
    if let Some(collector) = collector {
        collector.shutdown().await;
    }
}
