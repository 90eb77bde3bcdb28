//! Value types that identify where and how an allocation happened.

use std::fmt;

use crate::{Error, FileId, Result};

/// Unique identifier of one outstanding allocation, reused by the deallocation that frees it.
pub type RequestId = u64;

/// The allocation API that produced a block.
///
/// The declaration order is the order in which kinds are reported for the same line.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[expect(
    clippy::exhaustive_enums,
    reason = "the set of tracked allocation APIs is part of the packed tag format and is closed"
)]
pub enum Kind {
    /// The block must not be tracked, either because it was allocated internally or because
    /// its call site was never tagged.
    Ignored,

    /// The primary allocation API (typed object allocation, reported as `new`).
    PrimaryAllocator,

    /// The secondary allocation API (untyped sized allocation, reported as `operator new`).
    SecondaryAllocator,

    /// The raw allocation API, reported as `malloc`.
    RawAllocator,
}

impl Kind {
    /// Decodes a numeric kind tag as found in the top byte of a packed call-site tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKindTag`] if the tag does not name a known allocation API.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Ignored),
            1 => Ok(Self::PrimaryAllocator),
            2 => Ok(Self::SecondaryAllocator),
            3 => Ok(Self::RawAllocator),
            _ => Err(Error::UnknownKindTag { tag }),
        }
    }

    /// The numeric tag of this kind, as stored in a packed call-site tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Ignored => 0,
            Self::PrimaryAllocator => 1,
            Self::SecondaryAllocator => 2,
            Self::RawAllocator => 3,
        }
    }

    /// Whether events of this kind are dropped by the tracker.
    #[must_use]
    pub const fn is_ignored(self) -> bool {
        matches!(self, Self::Ignored)
    }

    /// Short name of the allocation API, as shown in reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::PrimaryAllocator => "new",
            Self::SecondaryAllocator => "operator new",
            Self::RawAllocator => "malloc",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// A source line number, limited to the 24 bits a packed call-site tag reserves for it.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Line(u32);

impl Line {
    /// The largest representable line number.
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Creates a line number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LineOutOfRange`] if `line` is greater than [`Line::MAX`].
    pub fn new(line: u32) -> Result<Self> {
        if line > Self::MAX {
            return Err(Error::LineOutOfRange { line });
        }

        Ok(Self(line))
    }

    /// The line number as an integer.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Line {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The full identity of a tracked allocation: its size and the call site that requested it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CallSiteKey {
    // Field order is the canonical report order.
    size: u64,
    file: FileId,
    line: Line,
    kind: Kind,
}

impl CallSiteKey {
    /// Creates a key from its parts.
    #[must_use]
    pub const fn new(size: u64, file: FileId, line: Line, kind: Kind) -> Self {
        Self {
            size,
            file,
            line,
            kind,
        }
    }

    /// Size of the allocated block in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The source file that requested the allocation.
    #[must_use]
    pub const fn file(&self) -> FileId {
        self.file
    }

    /// The source line that requested the allocation.
    #[must_use]
    pub const fn line(&self) -> Line {
        self.line
    }

    /// The allocation API that was used.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }
}

impl fmt::Display for CallSiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes at {}:{} via {}",
            self.size, self.file, self.line, self.kind
        )
    }
}

/// Codec for the packed call-site tag used by instrumented call sites.
///
/// A call site that wants its allocations tracked passes a single 32-bit value in place of its
/// line number: the top 8 bits carry the [`Kind`] tag and the low 24 bits carry the line. Only
/// the hook layer that receives such values needs this codec; the tracker itself always works
/// with separated fields.
///
/// # Examples
///
/// ```
/// use alloc_sites::{Kind, Line, PackedLine};
///
/// let line = Line::new(42).unwrap();
/// let packed = PackedLine::pack(line, Kind::RawAllocator);
/// assert_eq!(packed, (3 << 24) | 42);
///
/// let (unpacked_line, kind) = PackedLine::unpack(packed).unwrap();
/// assert_eq!(unpacked_line, line);
/// assert_eq!(kind, Kind::RawAllocator);
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub struct PackedLine;

impl PackedLine {
    const KIND_SHIFT: u32 = 24;

    /// Combines a line number and an allocation kind into one packed tag.
    #[must_use]
    pub fn pack(line: Line, kind: Kind) -> u32 {
        (u32::from(kind.tag()) << Self::KIND_SHIFT) | line.get()
    }

    /// Splits a packed tag into its line number and allocation kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownKindTag`] if the top byte does not name a known allocation API.
    pub fn unpack(packed: u32) -> Result<(Line, Kind)> {
        let tag = u8::try_from(packed >> Self::KIND_SHIFT)
            .expect("a u32 shifted right by 24 bits always fits into u8");
        let kind = Kind::from_tag(tag)?;

        Ok((Line(packed & Line::MAX), kind))
    }
}
