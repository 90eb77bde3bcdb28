//! Correlation of deallocation events with the allocations they free.

use std::collections::hash_map::Entry;

use foldhash::{HashMap, HashMapExt};

use crate::aggregate::SizeBucketKey;
use crate::{Error, RequestId, Result};

/// Maps the request ID of every outstanding allocation to the size bucket it was counted in.
///
/// Deallocation events do not carry the block size, so the size is recovered through this index.
#[derive(Debug, Default)]
pub(crate) struct RequestIndex {
    buckets: HashMap<RequestId, SizeBucketKey>,
}

impl RequestIndex {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: HashMap::with_capacity(capacity),
        }
    }

    /// Associates a new outstanding allocation with its size bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequest`] if the request ID is already bound. The existing
    /// binding is kept.
    pub(crate) fn bind(&mut self, request_id: RequestId, bucket: SizeBucketKey) -> Result<()> {
        match self.buckets.entry(request_id) {
            Entry::Occupied(_) => Err(Error::DuplicateRequest { request_id }),
            Entry::Vacant(entry) => {
                entry.insert(bucket);
                Ok(())
            }
        }
    }

    pub(crate) fn resolve(&self, request_id: RequestId) -> Option<SizeBucketKey> {
        self.buckets.get(&request_id).copied()
    }

    pub(crate) fn contains(&self, request_id: RequestId) -> bool {
        self.buckets.contains_key(&request_id)
    }

    /// Removes the binding of a freed allocation, returning the bucket it was bound to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRequest`] if the request ID is not bound.
    pub(crate) fn unbind(&mut self, request_id: RequestId) -> Result<SizeBucketKey> {
        self.buckets
            .remove(&request_id)
            .ok_or(Error::UnknownRequest { request_id })
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (RequestId, SizeBucketKey)> + '_ {
        self.buckets
            .iter()
            .map(|(request_id, bucket)| (*request_id, *bucket))
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
    }
}
