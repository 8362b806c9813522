//! Options controlling what the pileup walker emits and which alignments it
//! sees.

use crate::bed::AlignmentRecord;

/// Walk options.
///
/// # Example
///
/// ```
/// use matepile::config::PileupOptions;
///
/// let options = PileupOptions::new()
///     .with_no_skip(true)
///     .with_omit_qualities(true);
/// assert!(options.no_skip);
/// assert!(!options.spot_groups);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PileupOptions {
    /// Report positions without placements, walking whole references.
    pub no_skip: bool,
    /// Append `(<id>:<start>-<end>/<offset>)` after every event.
    pub show_id: bool,
    /// Emit one block per spot group instead of one block per position.
    pub spot_groups: bool,
    /// Move the depth column into each group block.
    pub depth_per_spot_group: bool,
    /// Leave out the quality column.
    pub omit_qualities: bool,
}

impl PileupOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set no-skip mode (builder pattern).
    pub fn with_no_skip(mut self, no_skip: bool) -> Self {
        self.no_skip = no_skip;
        self
    }

    /// Set alignment-id annotation (builder pattern).
    pub fn with_show_id(mut self, show_id: bool) -> Self {
        self.show_id = show_id;
        self
    }

    /// Set grouping by spot group (builder pattern).
    pub fn with_spot_groups(mut self, spot_groups: bool) -> Self {
        self.spot_groups = spot_groups;
        self
    }

    /// Set per-group depth (builder pattern).
    pub fn with_depth_per_spot_group(mut self, depth_per_spot_group: bool) -> Self {
        self.depth_per_spot_group = depth_per_spot_group;
        self
    }

    /// Set quality suppression (builder pattern).
    pub fn with_omit_qualities(mut self, omit_qualities: bool) -> Self {
        self.omit_qualities = omit_qualities;
        self
    }
}

/// Alignment selection applied before alignments are piled up.
///
/// ```
/// use matepile::config::AlignmentFilter;
///
/// let filter = AlignmentFilter::new().with_min_mapq(20).with_spot_group("libA");
/// assert_eq!(filter.min_mapq, 20);
/// assert!(!filter.is_pass_all());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlignmentFilter {
    /// Alignments with a lower mapping quality are left out.
    pub min_mapq: u8,
    /// Keep only alignments of this spot group.
    pub spot_group: Option<String>,
}

impl AlignmentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum mapping quality (builder pattern).
    pub fn with_min_mapq(mut self, min_mapq: u8) -> Self {
        self.min_mapq = min_mapq;
        self
    }

    /// Restrict to one spot group (builder pattern).
    pub fn with_spot_group(mut self, spot_group: impl Into<String>) -> Self {
        self.spot_group = Some(spot_group.into());
        self
    }

    /// True if no alignment can be rejected.
    pub fn is_pass_all(&self) -> bool {
        self.min_mapq == 0 && self.spot_group.is_none()
    }

    /// Whether `rec` takes part in the pileup.
    ///
    /// Records without a spot group belong to the unnamed group `""`.
    #[inline]
    pub fn accepts(&self, rec: &AlignmentRecord) -> bool {
        if rec.mapq < self.min_mapq {
            return false;
        }
        match &self.spot_group {
            Some(wanted) => rec.spot_group.as_deref().unwrap_or("") == wanted,
            None => true,
        }
    }
}
