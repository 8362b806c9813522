//! Placement records and the per-placement event state.
//!
//! A [`Placement`] is one alignment's overlap with the reference position
//! currently being visited. The source describes what the alignment does at
//! that position with a raw [`StateFlags`] bit set, which the formatter decodes
//! once into a [`PlacementEvent`].

use std::fmt;
use std::sync::Arc;

/// One alignment's overlap with the current reference position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Alignment id, unique within the store.
    pub id: i64,
    /// Mapping quality.
    pub mapq: u8,
    /// True if the alignment is on the reverse strand.
    pub reverse: bool,
    /// 0-based reference start of the whole alignment.
    pub ref_start: u64,
    /// Number of reference bases the alignment covers.
    pub ref_len: u32,
    /// Raw phred qualities of the read, cached when the alignment was loaded.
    pub qualities: Arc<[u8]>,
}

impl Placement {
    pub fn new(id: i64, mapq: u8, reverse: bool, ref_start: u64, ref_len: u32) -> Self {
        Self {
            id,
            mapq,
            reverse,
            ref_start,
            ref_len,
            qualities: Arc::from(Vec::new()),
        }
    }

    /// Attach read qualities (builder pattern).
    pub fn with_qualities(mut self, qualities: impl Into<Arc<[u8]>>) -> Self {
        self.qualities = qualities.into();
        self
    }

    /// Quality at `read_offset`, or [`MISSING_QUALITY`] past the cached length.
    #[inline]
    pub fn quality_at(&self, read_offset: u32) -> u8 {
        self.qualities
            .get(read_offset as usize)
            .copied()
            .unwrap_or(MISSING_QUALITY)
    }
}

/// Quality value used when the read has no quality at the offset.
pub const MISSING_QUALITY: u8 = 2;

/// Raw placement state bit set as reported by a placement source.
///
/// The low nibble carries the 4na code of the read base when the position is
/// a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateFlags(u32);

impl StateFlags {
    pub const BASE_MASK: u32 = 0x0F;
    pub const MISMATCH: u32 = 0x10;
    pub const MATCH: u32 = 0x20;
    pub const SKIP: u32 = 0x40;
    pub const INSERT: u32 = 0x80;
    pub const DELETE: u32 = 0x100;
    pub const FIRST: u32 = 0x200;
    pub const LAST: u32 = 0x400;
    pub const INVALID: u32 = 0x800;

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// A mismatch against the reference with the given 4na read base.
    #[inline]
    pub const fn mismatch(base: u8) -> Self {
        Self(Self::MISMATCH | (base as u32 & Self::BASE_MASK))
    }

    #[inline]
    pub const fn matched() -> Self {
        Self(Self::MATCH)
    }

    #[inline]
    pub const fn skipped() -> Self {
        Self(Self::SKIP)
    }

    #[inline]
    pub const fn invalid() -> Self {
        Self(Self::INVALID)
    }

    #[inline]
    pub const fn with(self, bits: u32) -> Self {
        Self(self.0 | bits)
    }

    #[inline]
    pub const fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    /// Decode the bit set into a structured event.
    pub fn decode(self) -> PlacementEvent {
        let call = if self.contains(Self::INVALID) {
            BaseCall::Invalid
        } else if self.contains(Self::SKIP) {
            BaseCall::Skip
        } else if self.contains(Self::MATCH) {
            BaseCall::Match
        } else {
            BaseCall::Mismatch((self.0 & Self::BASE_MASK) as u8)
        };
        PlacementEvent {
            call,
            first: self.contains(Self::FIRST),
            last: self.contains(Self::LAST),
            insert_follows: self.contains(Self::INSERT),
            delete_follows: self.contains(Self::DELETE),
        }
    }
}

impl fmt::Display for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#05x}", self.0)
    }
}

/// What the read shows at the current reference position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseCall {
    /// The placement cannot be interpreted here.
    Invalid,
    /// Reference skip, e.g. an intron in a spliced alignment.
    Skip,
    /// Read base equals the reference base.
    Match,
    /// Read base differs; carries the 4na read base.
    Mismatch(u8),
}

/// Decoded placement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementEvent {
    pub call: BaseCall,
    /// First reference position covered by the alignment.
    pub first: bool,
    /// Last reference position covered by the alignment.
    pub last: bool,
    pub insert_follows: bool,
    pub delete_follows: bool,
}

/// State of the current placement: flags plus the offset into the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlacementState {
    pub flags: StateFlags,
    pub read_offset: u32,
}

impl PlacementState {
    pub fn new(flags: StateFlags, read_offset: u32) -> Self {
        Self { flags, read_offset }
    }
}

/// Deleted reference bases following a placement, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedBases {
    /// 0-based reference position of the first deleted base.
    pub ref_pos: u64,
    /// 4na codes of the deleted bases.
    pub bases: Vec<u8>,
}
