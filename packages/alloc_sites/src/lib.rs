#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Call-site-resolved tracking of outstanding memory allocations.
//!
//! This package attributes every tracked allocation to the tuple of block size, source file,
//! source line and allocation API that produced it, keeps a live count per tuple and reports
//! the allocations that are still outstanding. It is meant for hunting leaks and unexpected
//! retention during development and testing.
//!
//! The core functionality includes:
//! - [`Tracker`] - Records allocation and deallocation events and produces reports
//! - [`Report`] - Outstanding allocations grouped by call site, in a reproducible order
//! - [`FileRegistry`] - Interns source file names into compact [`FileId`]s
//! - [`PackedLine`] - Codec for call-site tags that carry the allocation API in the line number
//!
//! # Feeding the tracker
//!
//! The tracker does not intercept allocations by itself. A hook layer (for example, a wrapper
//! around a platform debug heap or a tagged allocation macro) observes allocations and frees
//! and forwards them to [`Tracker::on_allocate()`] and [`Tracker::on_deallocate()`]. Each
//! allocation carries a request ID that its deallocation repeats; deallocations do not need
//! to carry the block size.
//!
//! Only allocations tagged with a [`Kind`] other than [`Kind::Ignored`] are tracked.
//!
//! ```
//! use alloc_sites::{FileRegistry, Kind, Line, Tracker};
//!
//! let files = FileRegistry::new();
//! let tracker = Tracker::new();
//! tracker.start();
//!
//! let main_rs = files.intern("src/main.rs");
//!
//! // Four allocations from the same call site, three of which are freed again.
//! for request_id in 1..=4 {
//!     tracker.on_allocate(8, main_rs, Line::new(10).unwrap(), Kind::PrimaryAllocator, request_id);
//! }
//! for request_id in 1..=3 {
//!     tracker.on_deallocate(main_rs, Line::new(10).unwrap(), Kind::PrimaryAllocator, request_id);
//! }
//!
//! // Untagged allocations are not tracked.
//! tracker.on_allocate(100, main_rs, Line::new(11).unwrap(), Kind::Ignored, 5);
//!
//! let report = tracker.snapshot(false);
//! assert_eq!(report.len(), 1);
//! assert_eq!(report.total_count(), 1);
//!
//! print!("{}", report.with_file_names(&files));
//! ```
//!
//! # Anomalies
//!
//! The hook entry points never panic and never return errors, as they are called from inside
//! someone else's allocation path. Events that cannot be applied (a free of an unknown request
//! ID, a reused request ID, an event while the tracker is idle) are dropped, logged through
//! `tracing` and counted in [`Tracker::anomalies()`]. The [`Tracker::record_allocation()`] and
//! [`Tracker::record_deallocation()`] methods offer the same behavior with the error returned.
//!
//! # Thread safety
//!
//! A [`Tracker`] may be shared between any number of threads. All bookkeeping is guarded by a
//! single lock held only for the short, allocation-count-sized critical sections of each event.

mod aggregate;
mod builder;
mod call_site;
mod error;
mod event;
mod file_registry;
mod report;
mod request_index;
mod tracker;

pub use builder::*;
pub use call_site::*;
pub use error::*;
pub use event::*;
pub use file_registry::*;
pub use report::*;
pub use tracker::*;
