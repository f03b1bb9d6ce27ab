//! Structured logging for collections.
//!
//! With the `tracing` feature enabled, collections run inside a debug span
//! and emit summary events; without it this module compiles to no-ops.

#[cfg(feature = "tracing")]
pub(crate) mod internal {
    use tracing::{span, Level};

    use crate::metrics::CollectMetrics;

    /// Span covering one whole collection.
    pub fn collect_span() -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect").entered()
    }

    /// Summary event at the end of a collection.
    pub fn log_collect_end(metrics: &CollectMetrics) {
        tracing::debug!(
            scanned = metrics.records_scanned,
            reclaimed = metrics.records_reclaimed,
            surviving = metrics.records_surviving,
            rescued = metrics.records_rescued,
            duration_us = metrics.duration.as_micros() as u64,
            "collect_end"
        );
    }

    /// A context was dropped while records were still externally referenced.
    pub fn log_detached(count: usize) {
        tracing::warn!(count, "context dropped with live records, detaching them");
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) mod internal {
    use crate::metrics::CollectMetrics;

    pub fn collect_span() {}

    pub fn log_collect_end(_metrics: &CollectMetrics) {}

    pub fn log_detached(_count: usize) {}
}
