use crate::{CallSiteKey, FileId, Kind, Line, RequestId};

/// A block was allocated by a call site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocationEvent {
    key: CallSiteKey,
    request_id: RequestId,
}

impl AllocationEvent {
    /// Describes an allocation of `size` bytes requested at `file:line` through the `kind` API.
    ///
    /// The `request_id` must be unique among all outstanding allocations and is repeated by the
    /// [`DeallocationEvent`] that frees the block.
    #[must_use]
    pub const fn new(
        size: u64,
        file: FileId,
        line: Line,
        kind: Kind,
        request_id: RequestId,
    ) -> Self {
        Self {
            key: CallSiteKey::new(size, file, line, kind),
            request_id,
        }
    }

    /// The size and call site of the allocation.
    #[must_use]
    pub const fn key(&self) -> CallSiteKey {
        self.key
    }

    /// Identifier of the allocated block.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }
}

/// A previously allocated block was freed.
///
/// The event carries the call site recorded with the block but not its size; the tracker
/// recovers the size from the allocation with the same request ID.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeallocationEvent {
    file: FileId,
    line: Line,
    kind: Kind,
    request_id: RequestId,
}

impl DeallocationEvent {
    /// Describes the release of the block identified by `request_id`, which was allocated at
    /// `file:line` through the `kind` API.
    #[must_use]
    pub const fn new(file: FileId, line: Line, kind: Kind, request_id: RequestId) -> Self {
        Self {
            file,
            line,
            kind,
            request_id,
        }
    }

    /// The source file recorded with the block.
    #[must_use]
    pub const fn file(&self) -> FileId {
        self.file
    }

    /// The source line recorded with the block.
    #[must_use]
    pub const fn line(&self) -> Line {
        self.line
    }

    /// The allocation API recorded with the block.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Identifier of the freed block.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// The call site key of the freed block, given the size it was allocated with.
    pub(crate) const fn key_with_size(&self, size: u64) -> CallSiteKey {
        CallSiteKey::new(size, self.file, self.line, self.kind)
    }
}
