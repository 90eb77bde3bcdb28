//! The tracking engine that hook layers feed with allocation events.

use std::mem;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::aggregate::SiteAggregate;
use crate::request_index::RequestIndex;
use crate::{
    AllocationEvent, DeallocationEvent, Error, FileId, Kind, Line, Report, ReportRow, RequestId,
    Result, TrackerBuilder,
};

/// Tracks outstanding allocations per call site and reports them on demand.
///
/// A tracker is fed by a hook layer that observes the allocations and deallocations of a
/// program. Each allocation is counted under its size, source file, source line and allocation
/// API. Each deallocation is matched to its allocation through the request ID and removes it
/// from the count again. What remains at report time are the allocations still outstanding.
///
/// # Epochs
///
/// A new tracker is idle and ignores events until [`start()`](Self::start) is called (or it was
/// built as [active](TrackerBuilder::active)). Recording continues until a report is taken with
/// `clear` set, which forgets all bookkeeping and returns the tracker to the idle state.
///
/// # Thread safety
///
/// All state is guarded by one lock, so events may be recorded from any number of threads and
/// reports never observe a half-applied event. The critical sections perform no I/O.
///
/// # Examples
///
/// ```
/// use alloc_sites::{FileId, Kind, Line, Tracker};
///
/// let tracker = Tracker::new();
/// tracker.start();
///
/// let file = FileId::from_raw(0);
/// let line = Line::new(10).unwrap();
///
/// tracker.on_allocate(8, file, line, Kind::PrimaryAllocator, 1);
/// tracker.on_allocate(8, file, line, Kind::PrimaryAllocator, 2);
/// tracker.on_deallocate(file, line, Kind::PrimaryAllocator, 1);
///
/// let report = tracker.snapshot(true);
/// assert_eq!(report.total_count(), 1);
///
/// // The clearing report ended the epoch.
/// assert!(!tracker.is_active());
/// assert!(tracker.snapshot(false).is_empty());
/// ```
#[derive(Debug)]
pub struct Tracker {
    state: Mutex<TrackerState>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Idle,
    Active,
}

#[derive(Debug)]
struct TrackerState {
    lifecycle: Lifecycle,
    aggregate: SiteAggregate,
    requests: RequestIndex,
    anomalies: Anomalies,
}

/// Counts of events a [`Tracker`] rejected since it was created.
///
/// Rejected events leave the allocation counts untouched. The counters are not reset by
/// clearing reports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Anomalies {
    unknown_requests: u64,
    duplicate_requests: u64,
    inactive_events: u64,
    invariant_violations: u64,
}

impl Anomalies {
    /// Deallocations whose request ID was not bound to any outstanding allocation.
    #[must_use]
    pub fn unknown_requests(&self) -> u64 {
        self.unknown_requests
    }

    /// Allocations that reused the request ID of an outstanding allocation.
    #[must_use]
    pub fn duplicate_requests(&self) -> u64 {
        self.duplicate_requests
    }

    /// Events that arrived while the tracker was idle.
    #[must_use]
    pub fn inactive_events(&self) -> u64 {
        self.inactive_events
    }

    /// Deallocations that matched no live count for their call site, or that found the
    /// tracker state inconsistent.
    #[must_use]
    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations
    }

    /// Sum of all counters.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.unknown_requests
            .saturating_add(self.duplicate_requests)
            .saturating_add(self.inactive_events)
            .saturating_add(self.invariant_violations)
    }

    fn note(&mut self, error: &Error) {
        let counter = match error {
            Error::UnknownRequest { .. } => &mut self.unknown_requests,
            Error::DuplicateRequest { .. } => &mut self.duplicate_requests,
            Error::Inactive => &mut self.inactive_events,
            Error::NegativeCount { .. }
            | Error::CorruptAggregate { .. }
            | Error::LineOutOfRange { .. }
            | Error::UnknownKindTag { .. } => &mut self.invariant_violations,
        };

        *counter = counter.saturating_add(1);
    }
}

impl Tracker {
    /// Creates an idle tracker with default settings.
    ///
    /// Use [`builder()`](Self::builder) to customize the tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a new tracker.
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::new()
    }

    pub(crate) fn from_builder(active: bool, request_capacity: usize) -> Self {
        let lifecycle = if active {
            Lifecycle::Active
        } else {
            Lifecycle::Idle
        };

        Self {
            state: Mutex::new(TrackerState {
                lifecycle,
                aggregate: SiteAggregate::new(),
                requests: RequestIndex::with_capacity(request_capacity),
                anomalies: Anomalies::default(),
            }),
        }
    }

    /// Begins recording events.
    ///
    /// Calling this on a tracker that is already active has no effect; in particular, the data
    /// recorded so far is kept.
    pub fn start(&self) {
        let previous = mem::replace(&mut self.state.lock().lifecycle, Lifecycle::Active);

        if previous == Lifecycle::Idle {
            debug!("allocation tracking started");
        }
    }

    /// Whether the tracker is currently recording events.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Active
    }

    /// Counts an allocation under its call site and remembers its request ID.
    ///
    /// Allocations of kind [`Kind::Ignored`] are dropped without any effect, whether or not the
    /// tracker is active.
    ///
    /// # Errors
    ///
    /// * [`Error::Inactive`] if the tracker is idle.
    /// * [`Error::DuplicateRequest`] if the request ID belongs to an outstanding allocation.
    ///
    /// Nothing is recorded when an error is returned.
    pub fn record_allocation(&self, event: AllocationEvent) -> Result<()> {
        if event.key().kind().is_ignored() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let result = state.record_allocation(&event);

        if let Err(error) = &result {
            state.anomalies.note(error);
        }

        result
    }

    /// Removes a freed allocation from the count of its call site.
    ///
    /// Deallocations of kind [`Kind::Ignored`] are dropped without any effect, whether or not
    /// the tracker is active.
    ///
    /// # Errors
    ///
    /// * [`Error::Inactive`] if the tracker is idle.
    /// * [`Error::UnknownRequest`] if no outstanding allocation has the request ID.
    /// * [`Error::NegativeCount`] if the call site of the event has no live count for the size
    ///   the request was allocated with. The request stays bound in that case.
    ///
    /// Nothing is recorded when an error is returned.
    pub fn record_deallocation(&self, event: DeallocationEvent) -> Result<()> {
        if event.kind().is_ignored() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let result = state.record_deallocation(&event);

        if let Err(error) = &result {
            state.anomalies.note(error);
        }

        result
    }

    /// Hook entry point for allocations.
    ///
    /// Equivalent to [`record_allocation()`](Self::record_allocation) except that rejected
    /// events are logged instead of returned, making this safe to call from inside an
    /// allocation path that has no way to handle errors.
    pub fn on_allocate(
        &self,
        size: u64,
        file: FileId,
        line: Line,
        kind: Kind,
        request_id: RequestId,
    ) {
        if let Err(error) =
            self.record_allocation(AllocationEvent::new(size, file, line, kind, request_id))
        {
            log_rejected(&error);
        }
    }

    /// Hook entry point for deallocations.
    ///
    /// Equivalent to [`record_deallocation()`](Self::record_deallocation) except that rejected
    /// events are logged instead of returned, making this safe to call from inside a
    /// deallocation path that has no way to handle errors.
    pub fn on_deallocate(&self, file: FileId, line: Line, kind: Kind, request_id: RequestId) {
        if let Err(error) =
            self.record_deallocation(DeallocationEvent::new(file, line, kind, request_id))
        {
            log_rejected(&error);
        }
    }

    /// Captures the outstanding allocations, optionally ending the epoch.
    ///
    /// If `clear` is set, all counts and request IDs are forgotten and the tracker becomes idle.
    /// An idle tracker holds no data, so reporting on it yields an empty report.
    #[must_use]
    pub fn report(&self, clear: bool) -> Report {
        let mut state = self.state.lock();

        let report = Report::from_rows(
            state
                .aggregate
                .leaves()
                .map(|(key, count)| ReportRow::new(key, count)),
        );

        if !clear {
            return report;
        }

        state.aggregate.clear();
        state.requests.clear();
        let previous = mem::replace(&mut state.lifecycle, Lifecycle::Idle);
        drop(state);

        if previous == Lifecycle::Active {
            debug!(
                call_sites = report.len(),
                outstanding = report.total_count(),
                "allocation tracking epoch ended"
            );
        }

        report
    }

    /// Hook entry point for reports. Equivalent to [`report()`](Self::report).
    #[must_use]
    pub fn snapshot(&self, clear: bool) -> Report {
        self.report(clear)
    }

    /// Number of allocations currently awaiting their deallocation.
    #[must_use]
    pub fn live_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Counts of events rejected since the tracker was created.
    #[must_use]
    pub fn anomalies(&self) -> Anomalies {
        self.state.lock().anomalies
    }

    /// Checks the internal bookkeeping for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptAggregate`] describing the first inconsistency found.
    pub fn verify(&self) -> Result<()> {
        self.state.lock().verify()
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerState {
    fn record_allocation(&mut self, event: &AllocationEvent) -> Result<()> {
        if self.lifecycle == Lifecycle::Idle {
            return Err(Error::Inactive);
        }

        let request_id = event.request_id();

        // Checked up front so a rejected event leaves the counts untouched.
        if self.requests.contains(request_id) {
            return Err(Error::DuplicateRequest { request_id });
        }

        let bucket = self.aggregate.record_allocation(&event.key());
        self.requests.bind(request_id, bucket)
    }

    fn record_deallocation(&mut self, event: &DeallocationEvent) -> Result<()> {
        if self.lifecycle == Lifecycle::Idle {
            return Err(Error::Inactive);
        }

        let request_id = event.request_id();

        let bucket = self
            .requests
            .resolve(request_id)
            .ok_or(Error::UnknownRequest { request_id })?;

        let size = self
            .aggregate
            .size_of(bucket)
            .ok_or_else(|| Error::CorruptAggregate {
                detail: format!("request {request_id} is bound to a size bucket of an earlier epoch"),
            })?;

        self.aggregate
            .record_deallocation(&event.key_with_size(size))?;
        self.requests.unbind(request_id)?;

        Ok(())
    }

    fn verify(&self) -> Result<()> {
        self.aggregate.verify()?;

        for (request_id, bucket) in self.requests.iter() {
            if self.aggregate.size_of(bucket).is_none() {
                return Err(Error::CorruptAggregate {
                    detail: format!("request {request_id} is bound to a missing size bucket"),
                });
            }
        }

        if self.lifecycle == Lifecycle::Idle
            && (!self.requests.is_empty() || !self.aggregate.is_empty())
        {
            return Err(Error::CorruptAggregate {
                detail: "idle tracker still holds allocation data".to_string(),
            });
        }

        Ok(())
    }
}

fn log_rejected(error: &Error) {
    match error {
        Error::UnknownRequest { request_id } => {
            warn!(request_id, "ignoring deallocation of unknown request");
        }
        Error::DuplicateRequest { request_id } => {
            warn!(
                request_id,
                "ignoring allocation that reuses the request ID of an outstanding allocation"
            );
        }
        Error::Inactive => {
            trace!("ignoring event received while tracker is idle");
        }
        Error::NegativeCount { key } => {
            error!(%key, "deallocation matched no live allocation of its call site");
        }
        Error::CorruptAggregate { .. }
        | Error::LineOutOfRange { .. }
        | Error::UnknownKindTag { .. } => {
            error!(%error, "allocation event rejected");
        }
    }
}
