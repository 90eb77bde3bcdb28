use crate::Tracker;

/// Configures and creates a [`Tracker`].
///
/// # Examples
///
/// ```
/// use alloc_sites::Tracker;
///
/// let tracker = Tracker::builder()
///     .active(true)
///     .request_capacity(1024)
///     .build();
///
/// assert!(tracker.is_active());
/// ```
#[derive(Debug, Default)]
#[must_use]
pub struct TrackerBuilder {
    active: bool,
    request_capacity: usize,
}

impl TrackerBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether the tracker starts in the active state, recording events right away.
    ///
    /// Defaults to `false`, in which case [`Tracker::start()`] must be called before any event
    /// is recorded.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Number of outstanding allocations the tracker can correlate before its request index
    /// needs to grow.
    ///
    /// Pre-sizing keeps the index from reallocating while events are being recorded. The
    /// capacity is retained across clearing reports.
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }

    /// Creates the tracker.
    #[must_use]
    pub fn build(self) -> Tracker {
        Tracker::from_builder(self.active, self.request_capacity)
    }
}
