//! Exclusion regions consulted by the walker.
//!
//! Regions are merged per reference (overlapping or book-ended regions become
//! one range) and stored as 1-based inclusive ranges. Lookups walk a cursor
//! forward, so a walk that visits positions in ascending order costs O(1)
//! amortised per position.

use crate::interval::Interval;
use crate::source::RegionFilter;
use rustc_hash::FxHashMap;

/// 1-based inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SkipRange {
    start: u64,
    end: u64,
}

/// Per-reference skip list implementing [`RegionFilter`].
#[derive(Debug, Clone, Default)]
pub struct SkipList {
    ranges: FxHashMap<String, Vec<SkipRange>>,
    current: Option<String>,
    cursor: usize,
    last_pos: u64,
}

impl SkipList {
    /// Build a skip list from 0-based half-open regions in any order.
    pub fn from_regions<I: IntoIterator<Item = Interval>>(regions: I) -> Self {
        let mut by_ref: FxHashMap<String, Vec<(u64, u64)>> = FxHashMap::default();
        for region in regions {
            if region.is_empty() {
                continue;
            }
            by_ref
                .entry(region.chrom)
                .or_default()
                .push((region.start, region.end));
        }

        let ranges = by_ref
            .into_iter()
            .map(|(name, mut spans)| {
                spans.sort_unstable();
                (name, merge_spans(&spans))
            })
            .collect();

        Self {
            ranges,
            current: None,
            cursor: 0,
            last_pos: 0,
        }
    }

    /// Number of merged ranges on a reference.
    pub fn range_count(&self, name: &str) -> usize {
        self.ranges.get(name).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn current_ranges(&self) -> Option<&[SkipRange]> {
        self.current
            .as_ref()
            .and_then(|name| self.ranges.get(name))
            .map(Vec::as_slice)
    }
}

/// Merge sorted half-open spans into 1-based inclusive ranges.
fn merge_spans(spans: &[(u64, u64)]) -> Vec<SkipRange> {
    let mut merged: Vec<SkipRange> = Vec::with_capacity(spans.len());
    for &(start, end) in spans {
        match merged.last_mut() {
            // book-ended: [10,20) and [20,30) cover 11..=30 without a gap
            Some(last) if start <= last.end => {
                last.end = last.end.max(end);
            }
            _ => merged.push(SkipRange {
                start: start + 1,
                end,
            }),
        }
    }
    merged
}

impl RegionFilter for SkipList {
    fn enter_reference(&mut self, name: &str) {
        self.current = self.ranges.contains_key(name).then(|| name.to_string());
        self.cursor = 0;
        self.last_pos = 0;
    }

    fn is_skip_position(&mut self, pos: u64) -> bool {
        let rewind = pos < self.last_pos;
        self.last_pos = pos;
        let mut cursor = self.cursor;
        let Some(ranges) = self.current_ranges() else {
            return false;
        };
        if rewind {
            cursor = ranges.partition_point(|r| r.end < pos);
        }
        while cursor < ranges.len() && ranges[cursor].end < pos {
            cursor += 1;
        }
        let skip = cursor < ranges.len() && ranges[cursor].start <= pos;
        self.cursor = cursor;
        skip
    }
}
