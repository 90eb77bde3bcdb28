use thiserror::Error;

use crate::{CallSiteKey, RequestId};

/// Errors that can occur when recording allocation events or inspecting tracker state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A deallocation event referred to a request ID that has no live allocation bound to it.
    ///
    /// Typical causes are a double free, freeing memory that was allocated before tracking
    /// started or a request ID that did not come from the allocation it claims to free.
    #[error("no outstanding allocation is bound to request {request_id}")]
    UnknownRequest {
        /// The request ID carried by the deallocation event.
        request_id: RequestId,
    },

    /// An allocation event reused a request ID that is still bound to a live allocation.
    #[error("request {request_id} is already bound to an outstanding allocation")]
    DuplicateRequest {
        /// The request ID carried by the allocation event.
        request_id: RequestId,
    },

    /// A deallocation matched no live count for its call site.
    ///
    /// Applying it would have made the count negative. This indicates that the event stream
    /// is inconsistent (the free does not describe the same call site as its allocation).
    #[error("no live allocation recorded for {key}, decrement would make the count negative")]
    NegativeCount {
        /// The call site the deallocation was attributed to.
        key: CallSiteKey,
    },

    /// An event was recorded while the tracker was idle.
    #[error("the tracker is idle; call start() before recording events")]
    Inactive,

    /// The tracker state failed a structural self-check.
    #[error("tracker state is corrupt: {detail}")]
    CorruptAggregate {
        /// A human-readable description of the violated invariant.
        detail: String,
    },

    /// A line number does not fit into the 24 bits available for it.
    #[error("line {line} exceeds the maximum line number {max}", max = crate::Line::MAX)]
    LineOutOfRange {
        /// The rejected line number.
        line: u32,
    },

    /// A packed call-site tag carried a kind tag that does not name any known allocation API.
    #[error("unknown allocation kind tag {tag}")]
    UnknownKindTag {
        /// The rejected tag value.
        tag: u8,
    },
}

/// A specialized `Result` type for tracker operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{FileId, Kind, Line};

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn unknown_request_names_the_request() {
        let error = Error::UnknownRequest { request_id: 42 };

        assert!(error.to_string().contains("42"));
    }

    #[test]
    fn negative_count_names_the_call_site() {
        let key = CallSiteKey::new(
            8,
            FileId::from_raw(3),
            Line::new(10).unwrap(),
            Kind::PrimaryAllocator,
        );

        let message = Error::NegativeCount { key }.to_string();

        assert!(message.contains("#3:10"), "{message}");
    }

    #[test]
    fn line_out_of_range_mentions_limit() {
        let message = Error::LineOutOfRange { line: 0x0100_0000 }.to_string();

        assert!(message.contains(&Line::MAX.to_string()), "{message}");
    }
}
