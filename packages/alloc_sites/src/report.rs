//! Point-in-time reports of outstanding allocations.

use std::fmt::{self, Display};
use std::num::NonZero;

use crate::{CallSiteKey, FileId, FileRegistry, Kind, Line};

/// Outstanding allocations of one call site, as captured in a [`Report`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReportRow {
    key: CallSiteKey,
    count: NonZero<u64>,
}

impl ReportRow {
    pub(crate) fn new(key: CallSiteKey, count: NonZero<u64>) -> Self {
        Self { key, count }
    }

    /// The call site and block size this row describes.
    #[must_use]
    pub fn key(&self) -> CallSiteKey {
        self.key
    }

    /// Size of each block in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.key.size()
    }

    /// The source file that requested the blocks.
    #[must_use]
    pub fn file(&self) -> FileId {
        self.key.file()
    }

    /// The source line that requested the blocks.
    #[must_use]
    pub fn line(&self) -> Line {
        self.key.line()
    }

    /// The allocation API that was used.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.key.kind()
    }

    /// Number of blocks still outstanding. Never zero.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.get()
    }

    /// Total bytes held by the outstanding blocks, saturating at `u64::MAX`.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.size().saturating_mul(self.count())
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, file: &dyn Display) -> fmt::Result {
        writeln!(
            f,
            "SIZE: {:>6} | FILE: {:>25}:{:05} | OP: {:>12} | COUNT: {:>6}",
            self.size(),
            file,
            self.line(),
            self.kind(),
            self.count
        )
    }
}

/// Outstanding allocations grouped by call site.
///
/// Rows are ordered ascending by size, then file, then line, then allocation kind, so two
/// reports taken over identical event streams are identical. Only call sites with at least one
/// outstanding allocation are included.
///
/// For human-readable output, use the `Display` implementation (file names are shown as
/// `#<id>`) or [`with_file_names()`](Self::with_file_names) to resolve names through a
/// [`FileRegistry`]. For machine-readable output, inspect [`rows()`](Self::rows).
///
/// # Examples
///
/// ```
/// use alloc_sites::{FileRegistry, Kind, Line, Tracker};
///
/// let files = FileRegistry::new();
/// let tracker = Tracker::builder().active(true).build();
///
/// let file = files.intern("src/cache.rs");
/// let line = Line::new(17).unwrap();
/// tracker.on_allocate(64, file, line, Kind::RawAllocator, 1);
///
/// let report = tracker.snapshot(false);
/// assert_eq!(report.len(), 1);
/// assert_eq!(report.total_bytes(), 64);
///
/// println!("{}", report.with_file_names(&files));
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Report {
    // Canonical order.
    rows: Box<[ReportRow]>,
}

impl Report {
    pub(crate) fn from_rows(rows: impl IntoIterator<Item = ReportRow>) -> Self {
        let rows: Box<[ReportRow]> = rows.into_iter().collect();

        debug_assert!(
            rows.is_sorted_by_key(|row| row.key),
            "report rows must arrive in canonical order"
        );

        Self { rows }
    }

    /// Iterates over the rows in canonical order.
    pub fn rows(&self) -> impl Iterator<Item = &ReportRow> {
        self.rows.iter()
    }

    /// Number of call sites with outstanding allocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no allocation is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of outstanding blocks across all call sites.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.rows
            .iter()
            .fold(0_u64, |total, row| total.saturating_add(row.count()))
    }

    /// Bytes held by outstanding blocks across all call sites, saturating at `u64::MAX`.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.rows
            .iter()
            .fold(0_u64, |total, row| total.saturating_add(row.bytes()))
    }

    /// Renders the report with file names resolved through the registry.
    ///
    /// Files unknown to the registry are shown as `#<id>`.
    #[must_use]
    pub fn with_file_names<'a>(&'a self, files: &'a FileRegistry) -> NamedReport<'a> {
        NamedReport {
            report: self,
            files,
        }
    }

    /// Prints the report to stdout.
    ///
    /// Prints nothing if no allocation is outstanding.
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stdout output reliably - manually tested.
    pub fn print_to_stdout(&self) {
        if self.is_empty() {
            return;
        }

        print!("{self}");
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return writeln!(f, "No outstanding allocations.");
        }

        for row in &self.rows {
            row.write(f, &row.file())?;
        }

        Ok(())
    }
}

/// A [`Report`] paired with the [`FileRegistry`] used to show file names.
#[derive(Debug)]
pub struct NamedReport<'a> {
    report: &'a Report,
    files: &'a FileRegistry,
}

impl Display for NamedReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.report.is_empty() {
            return writeln!(f, "No outstanding allocations.");
        }

        for row in self.report.rows() {
            match self.files.name(row.file()) {
                Some(name) => row.write(f, &name)?,
                None => row.write(f, &row.file())?,
            }
        }

        Ok(())
    }
}
