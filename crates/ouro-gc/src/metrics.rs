//! Collection statistics.

use std::time::Duration;

/// Statistics from the most recent collection of a
/// [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectMetrics {
    /// Wall-clock duration of the collection.
    pub duration: Duration,
    /// Records on the registry when the collection started.
    pub records_scanned: usize,
    /// Records destroyed and freed.
    pub records_reclaimed: usize,
    /// Records remaining on the registry afterwards.
    pub records_surviving: usize,
    /// Records provisionally doomed, then spliced back because a survivor
    /// still referenced them.
    pub records_rescued: usize,
    /// Collections run by this context since its creation.
    pub total_collections: usize,
}

impl CollectMetrics {
    /// Metrics with all fields zeroed, as reported before the first
    /// collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            records_scanned: 0,
            records_reclaimed: 0,
            records_surviving: 0,
            records_rescued: 0,
            total_collections: 0,
        }
    }
}

impl Default for CollectMetrics {
    fn default() -> Self {
        Self::new()
    }
}
