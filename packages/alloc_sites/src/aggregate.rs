//! Live allocation counts, nested by size, file, line and allocation kind.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::num::NonZero;

use crate::{CallSiteKey, Error, FileId, Kind, Line, Result};

/// Stable reference to a size bucket of a [`SiteAggregate`].
///
/// Keys are stamped with the epoch that issued them. Once the aggregate is cleared, keys from
/// the previous epoch no longer resolve, even though the slot number may be reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct SizeBucketKey {
    slot: usize,
    epoch: u64,
}

type KindCounts = BTreeMap<Kind, NonZero<u64>>;
type LineBuckets = BTreeMap<Line, KindCounts>;
type FileBuckets = BTreeMap<FileId, LineBuckets>;

#[derive(Debug)]
struct SizeBucket {
    size: u64,
    files: FileBuckets,
}

/// The nested counting structure behind a tracker.
///
/// Size buckets live in an arena that only grows during an epoch, so a [`SizeBucketKey`] stays
/// valid until [`clear()`](Self::clear) even if every count in its bucket drops to zero. Within
/// a size bucket, empty file and line buckets are pruned as soon as their last count is removed.
#[derive(Debug, Default)]
pub(crate) struct SiteAggregate {
    // Ascending by size. Values are slots in `buckets`.
    sizes: BTreeMap<u64, usize>,
    buckets: Vec<SizeBucket>,
    epoch: u64,
}

impl SiteAggregate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds one live allocation to the call site, creating any missing buckets on the way.
    ///
    /// Returns the key of the size bucket that was touched.
    pub(crate) fn record_allocation(&mut self, key: &CallSiteKey) -> SizeBucketKey {
        let slot = match self.sizes.entry(key.size()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let slot = self.buckets.len();
                self.buckets.push(SizeBucket {
                    size: key.size(),
                    files: FileBuckets::new(),
                });
                *entry.insert(slot)
            }
        };

        let bucket = self
            .buckets
            .get_mut(slot)
            .expect("size index only ever refers to slots that exist in the arena");

        let counts = bucket
            .files
            .entry(key.file())
            .or_default()
            .entry(key.line())
            .or_default();

        match counts.entry(key.kind()) {
            Entry::Vacant(entry) => {
                entry.insert(NonZero::<u64>::MIN);
            }
            Entry::Occupied(mut entry) => {
                // Saturates instead of panicking; 2^64 live blocks cannot exist.
                let incremented = entry.get().saturating_add(1);
                entry.insert(incremented);
            }
        }

        SizeBucketKey {
            slot,
            epoch: self.epoch,
        }
    }

    /// Removes one live allocation from the call site.
    ///
    /// A count that reaches zero is removed, along with any line or file bucket that becomes
    /// empty as a result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NegativeCount`] if the call site has no live allocation. Nothing is
    /// modified in that case.
    pub(crate) fn record_deallocation(&mut self, key: &CallSiteKey) -> Result<()> {
        let missing = || Error::NegativeCount { key: *key };

        let slot = *self.sizes.get(&key.size()).ok_or_else(missing)?;
        let bucket = self.buckets.get_mut(slot).ok_or_else(missing)?;
        let lines = bucket.files.get_mut(&key.file()).ok_or_else(missing)?;
        let counts = lines.get_mut(&key.line()).ok_or_else(missing)?;
        let count = counts.get_mut(&key.kind()).ok_or_else(missing)?;

        if let Some(decremented) = NonZero::new(count.get().saturating_sub(1)) {
            *count = decremented;
            return Ok(());
        }

        counts.remove(&key.kind());

        if counts.is_empty() {
            lines.remove(&key.line());

            if lines.is_empty() {
                bucket.files.remove(&key.file());
            }
        }

        Ok(())
    }

    /// The block size of the bucket, if the key was issued during the current epoch.
    pub(crate) fn size_of(&self, key: SizeBucketKey) -> Option<u64> {
        if key.epoch != self.epoch {
            return None;
        }

        self.buckets.get(key.slot).map(|bucket| bucket.size)
    }

    /// Iterates over every live count in canonical order: ascending by size, then file, then
    /// line, then kind.
    pub(crate) fn leaves(&self) -> impl Iterator<Item = (CallSiteKey, NonZero<u64>)> + '_ {
        self.sizes
            .values()
            .filter_map(|slot| self.buckets.get(*slot))
            .flat_map(|bucket| {
                bucket.files.iter().flat_map(move |(file, lines)| {
                    lines.iter().flat_map(move |(line, counts)| {
                        counts.iter().map(move |(kind, count)| {
                            (CallSiteKey::new(bucket.size, *file, *line, *kind), *count)
                        })
                    })
                })
            })
    }

    /// Whether there is no live count at all.
    ///
    /// Empty size buckets may still exist in the arena.
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.files.is_empty())
    }

    /// Removes all buckets and starts a new epoch.
    pub(crate) fn clear(&mut self) {
        self.sizes.clear();
        self.buckets.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Checks that the size index and the arena agree with each other.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptAggregate`] describing the first violation found.
    pub(crate) fn verify(&self) -> Result<()> {
        if self.sizes.len() != self.buckets.len() {
            return Err(Error::CorruptAggregate {
                detail: format!(
                    "{} sizes are indexed but the arena holds {} buckets",
                    self.sizes.len(),
                    self.buckets.len()
                ),
            });
        }

        let mut seen = vec![false; self.buckets.len()];

        for (size, slot) in &self.sizes {
            let Some(bucket) = self.buckets.get(*slot) else {
                return Err(Error::CorruptAggregate {
                    detail: format!("size {size} refers to missing slot {slot}"),
                });
            };

            if bucket.size != *size {
                return Err(Error::CorruptAggregate {
                    detail: format!(
                        "size {size} refers to slot {slot} which holds size {}",
                        bucket.size
                    ),
                });
            }

            if let Some(already_seen) = seen.get_mut(*slot) {
                if *already_seen {
                    return Err(Error::CorruptAggregate {
                        detail: format!("slot {slot} is indexed by more than one size"),
                    });
                }

                *already_seen = true;
            }

            if bucket.files.values().any(BTreeMap::is_empty)
                || bucket
                    .files
                    .values()
                    .flat_map(BTreeMap::values)
                    .any(BTreeMap::is_empty)
            {
                return Err(Error::CorruptAggregate {
                    detail: format!("size {size} holds an empty file or line bucket"),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const FILE_A: FileId = FileId::from_raw(0);
    const FILE_B: FileId = FileId::from_raw(1);

    fn key(size: u64, file: FileId, line: u32, kind: Kind) -> CallSiteKey {
        CallSiteKey::new(size, file, Line::new(line).unwrap(), kind)
    }

    fn counts(aggregate: &SiteAggregate) -> Vec<(CallSiteKey, u64)> {
        aggregate
            .leaves()
            .map(|(key, count)| (key, count.get()))
            .collect()
    }

    #[test]
    fn new_aggregate_is_empty() {
        let aggregate = SiteAggregate::new();

        assert!(aggregate.is_empty());
        assert_eq!(aggregate.leaves().count(), 0);
        aggregate.verify().unwrap();
    }

    #[test]
    fn first_allocation_materializes_full_path() {
        let mut aggregate = SiteAggregate::new();
        let site = key(8, FILE_A, 10, Kind::PrimaryAllocator);

        let bucket = aggregate.record_allocation(&site);

        assert_eq!(aggregate.size_of(bucket), Some(8));
        assert_eq!(counts(&aggregate), vec![(site, 1)]);
        aggregate.verify().unwrap();
    }

    #[test]
    fn repeated_allocation_increments_same_leaf() {
        let mut aggregate = SiteAggregate::new();
        let site = key(8, FILE_A, 10, Kind::PrimaryAllocator);

        let first = aggregate.record_allocation(&site);
        let second = aggregate.record_allocation(&site);

        assert_eq!(first, second);
        assert_eq!(counts(&aggregate), vec![(site, 2)]);
    }

    #[test]
    fn kinds_on_same_line_are_counted_separately() {
        let mut aggregate = SiteAggregate::new();
        let primary = key(8, FILE_A, 10, Kind::PrimaryAllocator);
        let raw = key(8, FILE_A, 10, Kind::RawAllocator);

        aggregate.record_allocation(&raw);
        aggregate.record_allocation(&primary);

        assert_eq!(counts(&aggregate), vec![(primary, 1), (raw, 1)]);
    }

    #[test]
    fn deallocation_decrements_then_removes_leaf() {
        let mut aggregate = SiteAggregate::new();
        let site = key(8, FILE_A, 10, Kind::PrimaryAllocator);
        aggregate.record_allocation(&site);
        aggregate.record_allocation(&site);

        aggregate.record_deallocation(&site).unwrap();
        assert_eq!(counts(&aggregate), vec![(site, 1)]);

        aggregate.record_deallocation(&site).unwrap();
        assert!(aggregate.is_empty());
        aggregate.verify().unwrap();
    }

    #[test]
    fn deallocation_without_live_count_is_rejected() {
        let mut aggregate = SiteAggregate::new();
        let site = key(8, FILE_A, 10, Kind::PrimaryAllocator);
        aggregate.record_allocation(&site);
        aggregate.record_deallocation(&site).unwrap();

        let result = aggregate.record_deallocation(&site);

        assert!(matches!(result, Err(Error::NegativeCount { key }) if key == site));
        assert!(aggregate.is_empty());
    }

    #[test]
    fn deallocation_of_other_kind_leaves_counts_untouched() {
        let mut aggregate = SiteAggregate::new();
        let site = key(8, FILE_A, 10, Kind::PrimaryAllocator);
        aggregate.record_allocation(&site);

        let result = aggregate.record_deallocation(&key(8, FILE_A, 10, Kind::RawAllocator));

        assert!(matches!(result, Err(Error::NegativeCount { .. })));
        assert_eq!(counts(&aggregate), vec![(site, 1)]);
    }

    #[test]
    fn emptied_size_bucket_keeps_its_key() {
        let mut aggregate = SiteAggregate::new();
        let site = key(32, FILE_A, 1, Kind::SecondaryAllocator);
        let bucket = aggregate.record_allocation(&site);

        aggregate.record_deallocation(&site).unwrap();

        assert_eq!(aggregate.size_of(bucket), Some(32));
        aggregate.verify().unwrap();
    }

    #[test]
    fn leaves_are_in_canonical_order() {
        let mut aggregate = SiteAggregate::new();
        let sites = [
            key(64, FILE_A, 1, Kind::PrimaryAllocator),
            key(8, FILE_B, 1, Kind::PrimaryAllocator),
            key(8, FILE_A, 20, Kind::PrimaryAllocator),
            key(8, FILE_A, 3, Kind::RawAllocator),
            key(8, FILE_A, 3, Kind::PrimaryAllocator),
        ];

        for site in &sites {
            aggregate.record_allocation(site);
        }

        let mut expected = sites.to_vec();
        expected.sort();

        let actual: Vec<_> = aggregate.leaves().map(|(key, _)| key).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn clear_invalidates_keys_from_previous_epoch() {
        let mut aggregate = SiteAggregate::new();
        let site = key(8, FILE_A, 10, Kind::PrimaryAllocator);
        let old = aggregate.record_allocation(&site);

        aggregate.clear();
        let new = aggregate.record_allocation(&site);

        assert!(aggregate.size_of(old).is_none());
        assert_eq!(aggregate.size_of(new), Some(8));
        assert_eq!(counts(&aggregate), vec![(site, 1)]);
    }

    #[test]
    fn verify_detects_mismatched_bucket_size() {
        let mut aggregate = SiteAggregate::new();
        aggregate.record_allocation(&key(8, FILE_A, 10, Kind::PrimaryAllocator));

        aggregate.buckets.get_mut(0).unwrap().size = 16;

        assert!(matches!(
            aggregate.verify(),
            Err(Error::CorruptAggregate { .. })
        ));
    }

    #[test]
    fn verify_detects_unindexed_bucket() {
        let mut aggregate = SiteAggregate::new();
        aggregate.buckets.push(SizeBucket {
            size: 8,
            files: FileBuckets::new(),
        });

        assert!(matches!(
            aggregate.verify(),
            Err(Error::CorruptAggregate { .. })
        ));
    }
}
