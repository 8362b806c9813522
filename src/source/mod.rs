//! Interfaces the walker consumes: the placement source, the region filter
//! and the cooperative stop signal.
//!
//! Every `next_*` call returns `Ok(None)` when its level is exhausted ("done").
//! Any `Err` is a source failure and aborts the walk.

pub mod bed_source;
pub mod buffered;

pub use bed_source::{pile_alignments, pile_alignments_filtered};
pub use buffered::{BufferedSource, BufferedSourceBuilder};

use crate::error::Result;
use crate::placement::{DeletedBases, Placement, PlacementState};
use std::sync::atomic::{AtomicBool, Ordering};

/// A reference sequence requested for the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub length: u64,
}

impl Reference {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// A contiguous alignment-bearing sub-range of the current reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// 0-based start.
    pub start: u64,
    pub len: u64,
}

/// The reference position the source has advanced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 0-based coordinate.
    pub pos: u64,
    /// Number of placements overlapping the position.
    pub depth: u32,
    /// 4na code of the reference base.
    pub ref_base: u8,
}

/// Ordered stream of reference, window, position, spot-group and placement
/// events.
///
/// If the caller never asks for a spot group at a position, `next_placement`
/// yields every placement at that position as a single implicit group.
pub trait PlacementSource {
    fn next_reference(&mut self) -> Result<Option<Reference>>;

    fn next_window(&mut self) -> Result<Option<Window>>;

    /// Advance one coordinate. With `emit_empty` false, positions without
    /// placements are passed over.
    fn next_position(&mut self, emit_empty: bool) -> Result<Option<Position>>;

    fn next_spot_group(&mut self) -> Result<Option<String>>;

    fn next_placement(&mut self) -> Result<Option<Placement>>;

    /// State of `placement` at the current position.
    fn state(&self, placement: &Placement) -> PlacementState;

    /// 4na codes of the bases inserted after the current position.
    fn bases_inserted(&self, placement: &Placement) -> &[u8];

    /// Reference bases deleted after the current position, as an owned copy.
    fn bases_deleted(&mut self, placement: &Placement) -> Option<DeletedBases>;
}

/// Yes/no exclusion decision per reference position.
pub trait RegionFilter {
    /// Called when the walker starts a new reference.
    fn enter_reference(&mut self, _name: &str) {}

    /// True if the 1-based position `pos` must not be reported.
    fn is_skip_position(&mut self, pos: u64) -> bool;
}

/// Region filter that never skips.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegionFilter;

impl RegionFilter for NoRegionFilter {
    #[inline]
    fn is_skip_position(&mut self, _pos: u64) -> bool {
        false
    }
}

/// Cooperative cancellation, polled by the walker between windows and
/// positions.
pub trait StopSignal {
    fn should_stop(&self) -> bool;
}

/// Stop signal that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

impl StopSignal for NeverStop {
    #[inline]
    fn should_stop(&self) -> bool {
        false
    }
}

impl StopSignal for AtomicBool {
    #[inline]
    fn should_stop(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

impl<T: StopSignal + ?Sized> StopSignal for &T {
    #[inline]
    fn should_stop(&self) -> bool {
        (**self).should_stop()
    }
}
