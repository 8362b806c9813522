// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]

//! matepile: samtools-style pileup with single-pass mate resolution
//!
//! This library walks alignment placements position by position and renders
//! the classic pileup text layout, and keeps a partitioned cache of mate
//! information so paired reads can be reported in one pass.
//!
//! # Features
//!
//! - **Pileup walker**: reference, window, position, spot-group and placement
//!   levels driven by any [`source::PlacementSource`]
//! - **Mate cache**: per-partition same-reference and unaligned namespaces
//!   with statistics
//! - **BED input**: ungapped alignments in BED6 (+spot group) piled up into
//!   an in-memory source
//!
//! # Example
//!
//! ```rust
//! use matepile::prelude::*;
//!
//! let records = parse_alignments("chr1\t4\t5\tr1\t30\t+\n").unwrap();
//! let mut source = pile_alignments(&records, None, false).unwrap();
//!
//! let options = PileupOptions::new().with_omit_qualities(true);
//! let mut out = Vec::new();
//! PileupWalker::new(options)
//!     .run(&mut source, &mut NoRegionFilter, &NeverStop, &mut out)
//!     .unwrap();
//! assert_eq!(out, b"chr1\t5\tN\t1\t^?.$\n");
//! ```

pub mod bases;
pub mod bed;
pub mod config;
pub mod error;
pub mod interval;
pub mod mate;
pub mod mate_cache;
pub mod placement;
pub mod reference;
pub mod regions;
pub mod source;
pub mod streaming;
pub mod walker;

// Re-export commonly used types
pub use bed::{read_alignments, read_regions, AlignmentRecord, BedReader};
pub use config::{AlignmentFilter, PileupOptions};
pub use error::{PileupError, Result};
pub use interval::{Interval, Strand};
pub use mate_cache::MateCache;
pub use walker::{PileupWalker, WalkStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bed::{parse_alignments, read_alignments, read_regions, BedReader};
    pub use crate::config::{AlignmentFilter, PileupOptions};
    pub use crate::error::{PileupError, Result};
    pub use crate::interval::{Interval, Strand};
    pub use crate::mate::{mate_flags, AlignedRead, MateResolver};
    pub use crate::mate_cache::MateCache;
    pub use crate::reference::ReferenceList;
    pub use crate::regions::SkipList;
    pub use crate::source::{
        pile_alignments, pile_alignments_filtered, BufferedSource, NeverStop, NoRegionFilter,
        PlacementSource, RegionFilter, StopSignal,
    };
    pub use crate::walker::{PileupWalker, WalkStats};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn test_basic_workflow() {
        let content = "chr1\t0\t3\tr1\t40\t+\nchr1\t1\t2\tr2\t40\t-\n";
        let records = parse_alignments(content).unwrap();
        let mut source = pile_alignments(&records, None, false).unwrap();

        let mut out = Vec::new();
        let stats = PileupWalker::new(PileupOptions::new().with_omit_qualities(true))
            .run(&mut source, &mut NoRegionFilter, &NeverStop, &mut out)
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "chr1\t1\tN\t1\t^I.\nchr1\t2\tN\t2\t.^I,$\nchr1\t3\tN\t1\t.$\n"
        );
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.placements, 4);
    }

    #[test]
    fn test_excluded_regions_workflow() {
        let records = parse_alignments("chr1\t0\t4\tr1\t0\t+\n").unwrap();
        let mut source = pile_alignments(&records, None, false).unwrap();
        let regions = crate::bed::parse_regions("chr1\t0\t2\n").unwrap();
        let mut filter = SkipList::from_regions(regions);

        let mut out = Vec::new();
        let stats = PileupWalker::default()
            .run(&mut source, &mut filter, &NeverStop, &mut out)
            .unwrap();

        assert_eq!(stats.skipped_filtered, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("chr1\t3\t"));
    }
}
