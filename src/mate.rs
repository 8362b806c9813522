//! Mate resolution on top of [`MateCache`].
//!
//! Reads are visited in reference order. The first read of a same-reference
//! pair caches what its mate needs; when the mate arrives, the cached record
//! is consumed and the mate's columns come from the cache instead of the
//! alignment store.

use crate::bed::AlignmentRecord;
use crate::error::Result;
use crate::mate_cache::MateCache;
use log::debug;
use rustc_hash::FxHashMap;
use std::fmt;

pub const FLAG_PAIRED: u16 = 0x1;
pub const FLAG_PROPER_PAIR: u16 = 0x2;
pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_MATE_UNMAPPED: u16 = 0x8;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_MATE_REVERSE: u16 = 0x20;
pub const FLAG_FIRST_IN_PAIR: u16 = 0x40;
pub const FLAG_LAST_IN_PAIR: u16 = 0x80;
/// Secondary, QC-fail and duplicate bits.
const FLAG_PASSTHROUGH: u16 = 0x700;

/// SAM flags of the mate, derived from the flags of a read.
///
/// Unmapped and reverse bits are swapped with their mate counterparts and the
/// first/last-in-pair bits are flipped.
///
/// ```
/// use matepile::mate::mate_flags;
///
/// // paired, proper, first in pair, read reverse
/// assert_eq!(mate_flags(0x1 | 0x2 | 0x40 | 0x10), 0x1 | 0x2 | 0x80 | 0x20);
/// ```
pub fn mate_flags(flags: u16) -> u16 {
    let first_last = if flags & FLAG_FIRST_IN_PAIR != 0 {
        FLAG_LAST_IN_PAIR
    } else {
        FLAG_FIRST_IN_PAIR
    };
    (flags & FLAG_PAIRED)
        | (flags & FLAG_PROPER_PAIR)
        | ((flags & FLAG_MATE_UNMAPPED) >> 1)
        | ((flags & FLAG_UNMAPPED) << 1)
        | ((flags & FLAG_MATE_REVERSE) >> 1)
        | ((flags & FLAG_REVERSE) << 1)
        | first_last
        | (flags & FLAG_PASSTHROUGH)
}

/// The columns of an aligned read that mate resolution reads.
#[derive(Debug, Clone, Copy)]
pub struct AlignedRead<'a> {
    /// Alignment id, unique within the partition.
    pub id: i64,
    pub ref_name: &'a str,
    pub ref_idx: u32,
    /// 0-based alignment start.
    pub ref_pos: u32,
    pub sam_flags: u16,
    pub primary: bool,
    pub seq_spot_id: i64,
    /// Alignment id of the mate, if the mate is aligned.
    pub mate_align_id: Option<i64>,
    /// Reference of the mate; empty when the mate is unaligned.
    pub mate_ref_name: &'a str,
    pub mate_ref_pos: u32,
    pub tlen: i32,
}

/// Mate reference column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MateRef<'a> {
    /// Same reference as the read.
    Same,
    Other(&'a str),
    Unaligned,
}

impl fmt::Display for MateRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MateRef::Same => f.write_str("="),
            MateRef::Other(name) => f.write_str(name),
            MateRef::Unaligned => f.write_str("*"),
        }
    }
}

/// Resolved flag, mate and template-length columns of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MateInfo<'a> {
    pub sam_flags: u16,
    pub mate_ref: MateRef<'a>,
    pub mate_pos: u32,
    pub tlen: i32,
    /// True if the columns came from a cached record.
    pub from_cache: bool,
}

/// Resolves mate columns for the reads of one partition.
#[derive(Debug, Clone, Copy)]
pub struct MateResolver {
    pub partition: usize,
    pub use_cache: bool,
    /// Remember primary reads whose mate is unaligned.
    pub track_half_aligned: bool,
}

impl MateResolver {
    pub fn new(partition: usize) -> Self {
        Self {
            partition,
            use_cache: true,
            track_half_aligned: false,
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_half_aligned(mut self, track: bool) -> Self {
        self.track_half_aligned = track;
        self
    }

    /// Resolve the mate columns of `read`, updating the cache.
    pub fn resolve<'a>(
        &self,
        cache: &mut MateCache,
        read: &AlignedRead<'a>,
    ) -> Result<MateInfo<'a>> {
        if let (Some(mate_id), true) = (read.mate_align_id, self.use_cache) {
            if let Some(cached) = cache.lookup_same_ref(self.partition, mate_id)? {
                cache.remove_same_ref(self.partition, mate_id)?;
                return Ok(MateInfo {
                    sam_flags: cached.sam_flags,
                    mate_ref: MateRef::Same,
                    mate_pos: cached.ref_pos,
                    tlen: cached.tlen,
                    from_cache: true,
                });
            }
        }

        let mate_ref = if read.mate_ref_name.is_empty() {
            MateRef::Unaligned
        } else if read.mate_ref_name == read.ref_name {
            MateRef::Same
        } else {
            MateRef::Other(read.mate_ref_name)
        };

        if self.use_cache {
            match (read.mate_align_id, mate_ref) {
                (Some(_), MateRef::Same) => {
                    cache.insert_same_ref(
                        self.partition,
                        read.id,
                        read.ref_pos,
                        mate_flags(read.sam_flags),
                        read.tlen.wrapping_neg(),
                    )?;
                }
                (None, MateRef::Unaligned) if self.track_half_aligned && read.primary => {
                    cache.insert_unaligned(
                        self.partition,
                        read.id,
                        read.ref_pos,
                        read.ref_idx,
                        read.seq_spot_id,
                    )?;
                }
                _ => {}
            }
        }

        Ok(MateInfo {
            sam_flags: read.sam_flags,
            mate_ref,
            mate_pos: read.mate_ref_pos,
            tlen: read.tlen,
            from_cache: false,
        })
    }

    /// Drop the same-ref records once a reference is finished.
    pub fn finish_reference(&self, cache: &mut MateCache) {
        if let Ok(stats) = cache.partition_stats(self.partition) {
            debug!(
                "partition {}: dropping {} unmatched same-ref mates",
                self.partition, stats.same_ref.active
            );
        }
        cache.clear_same_ref();
    }
}

/// Counts from one [`resolve_named_pairs`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatePassStats {
    pub references: u64,
    pub reads: u64,
    /// Reads whose mate is on the same reference.
    pub same_ref: u64,
    pub other_ref: u64,
    /// Reads without a mate in the input.
    pub unaligned_mate: u64,
    /// Reads whose mate columns came from the cache.
    pub from_cache: u64,
}

impl fmt::Display for MatePassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "references={} reads={} same_ref={} other_ref={} unaligned_mate={} from_cache={}",
            self.references,
            self.reads,
            self.same_ref,
            self.other_ref,
            self.unaligned_mate,
            self.from_cache
        )
    }
}

/// Resolve mates of BED alignments paired by name.
///
/// A name carried by exactly two records makes them mates; the earlier record
/// in the input is first in pair. Every other record has an unaligned mate.
/// References are visited in order of first appearance, reads by start, and
/// the same-ref namespace is cleared after each reference. Alignment ids are
/// 1-based record numbers.
pub fn resolve_named_pairs(
    records: &[AlignmentRecord],
    cache: &mut MateCache,
    resolver: &MateResolver,
) -> Result<MatePassStats> {
    let mut by_name: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    let mut by_ref: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    let mut ref_order: Vec<&str> = Vec::new();
    for (idx, rec) in records.iter().enumerate() {
        if let Some(name) = rec.name.as_deref() {
            by_name.entry(name).or_default().push(idx);
        }
        by_ref
            .entry(rec.chrom())
            .or_insert_with(|| {
                ref_order.push(rec.chrom());
                Vec::new()
            })
            .push(idx);
    }

    let mut mate_of: Vec<Option<usize>> = vec![None; records.len()];
    for (name, ids) in &by_name {
        match ids.as_slice() {
            [a, b] => {
                mate_of[*a] = Some(*b);
                mate_of[*b] = Some(*a);
            }
            [_] => {}
            _ => debug!("{} records named {}: not treated as a pair", ids.len(), name),
        }
    }

    let mut stats = MatePassStats::default();
    for (ref_idx, name) in ref_order.iter().enumerate() {
        let mut members = by_ref.remove(name).unwrap_or_default();
        members.sort_by_key(|&i| records[i].start());

        for i in members {
            let read = aligned_read(records, i, ref_idx, mate_of[i]);
            let info = resolver.resolve(cache, &read)?;
            stats.reads += 1;
            match info.mate_ref {
                MateRef::Same => stats.same_ref += 1,
                MateRef::Other(_) => stats.other_ref += 1,
                MateRef::Unaligned => stats.unaligned_mate += 1,
            }
            if info.from_cache {
                stats.from_cache += 1;
            }
        }
        resolver.finish_reference(cache);
        stats.references += 1;
    }
    Ok(stats)
}

fn clamp_pos(pos: u64) -> u32 {
    pos.min(u32::MAX as u64) as u32
}

fn aligned_read(
    records: &[AlignmentRecord],
    idx: usize,
    ref_idx: usize,
    mate: Option<usize>,
) -> AlignedRead<'_> {
    let rec = &records[idx];
    let mut flags = FLAG_PAIRED;
    if rec.strand.is_reverse() {
        flags |= FLAG_REVERSE;
    }

    let Some(j) = mate else {
        return AlignedRead {
            id: idx as i64 + 1,
            ref_name: rec.chrom(),
            ref_idx: ref_idx as u32,
            ref_pos: clamp_pos(rec.start()),
            sam_flags: flags | FLAG_MATE_UNMAPPED | FLAG_FIRST_IN_PAIR,
            primary: true,
            seq_spot_id: idx as i64 + 1,
            mate_align_id: None,
            mate_ref_name: "",
            mate_ref_pos: 0,
            tlen: 0,
        };
    };

    let other = &records[j];
    flags |= if idx < j { FLAG_FIRST_IN_PAIR } else { FLAG_LAST_IN_PAIR };
    if other.strand.is_reverse() {
        flags |= FLAG_MATE_REVERSE;
    }
    let tlen = if rec.chrom() == other.chrom() {
        let span = rec.end().max(other.end()) - rec.start().min(other.start());
        let span = span.min(i32::MAX as u64) as i32;
        let leftmost = (rec.start(), idx) < (other.start(), j);
        if leftmost {
            span
        } else {
            -span
        }
    } else {
        0
    };

    AlignedRead {
        id: idx as i64 + 1,
        ref_name: rec.chrom(),
        ref_idx: ref_idx as u32,
        ref_pos: clamp_pos(rec.start()),
        sam_flags: flags,
        primary: true,
        seq_spot_id: idx.min(j) as i64 + 1,
        mate_align_id: Some(j as i64 + 1),
        mate_ref_name: other.chrom(),
        mate_ref_pos: clamp_pos(other.start()),
        tlen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bed::parse_alignments;

    fn read<'a>(id: i64, mate: Option<i64>, mate_ref: &'a str) -> AlignedRead<'a> {
        AlignedRead {
            id,
            ref_name: "chr1",
            ref_idx: 0,
            ref_pos: 100,
            sam_flags: FLAG_PAIRED | FLAG_PROPER_PAIR | FLAG_FIRST_IN_PAIR | FLAG_MATE_REVERSE,
            primary: true,
            seq_spot_id: 7,
            mate_align_id: mate,
            mate_ref_name: mate_ref,
            mate_ref_pos: 250,
            tlen: 200,
        }
    }

    #[test]
    fn test_mate_flags_swaps_bits() {
        assert_eq!(mate_flags(FLAG_UNMAPPED), FLAG_MATE_UNMAPPED | FLAG_FIRST_IN_PAIR);
        assert_eq!(mate_flags(FLAG_MATE_UNMAPPED), FLAG_UNMAPPED | FLAG_FIRST_IN_PAIR);
        assert_eq!(mate_flags(FLAG_REVERSE), FLAG_MATE_REVERSE | FLAG_FIRST_IN_PAIR);
        assert_eq!(
            mate_flags(FLAG_LAST_IN_PAIR | 0x400),
            FLAG_FIRST_IN_PAIR | 0x400
        );
        assert_eq!(mate_flags(FLAG_FIRST_IN_PAIR | 0x100), FLAG_LAST_IN_PAIR | 0x100);
    }

    #[test]
    fn test_pair_consumes_cached_record() {
        let mut cache = MateCache::new(1).unwrap();
        let resolver = MateResolver::new(0);

        let first = read(1, Some(2), "chr1");
        let info = resolver.resolve(&mut cache, &first).unwrap();
        assert_eq!(info.mate_ref, MateRef::Same);
        assert_eq!((info.mate_pos, info.tlen), (250, 200));
        assert!(!info.from_cache);
        assert_eq!(cache.partition_stats(0).unwrap().same_ref.active, 1);

        let mut second = read(2, Some(1), "chr1");
        second.ref_pos = 250;
        let info = resolver.resolve(&mut cache, &second).unwrap();
        assert!(info.from_cache);
        assert_eq!(info.mate_ref, MateRef::Same);
        assert_eq!(info.mate_pos, 100);
        assert_eq!(info.tlen, -200);
        assert_eq!(info.sam_flags, mate_flags(first.sam_flags));

        let stats = cache.partition_stats(0).unwrap();
        assert_eq!(stats.same_ref.active, 0);
        assert_eq!(stats.same_ref.finds, 1);
    }

    #[test]
    fn test_other_reference_not_cached() {
        let mut cache = MateCache::new(1).unwrap();
        let info = MateResolver::new(0)
            .resolve(&mut cache, &read(1, Some(9), "chr2"))
            .unwrap();
        assert_eq!(info.mate_ref, MateRef::Other("chr2"));
        assert_eq!(info.mate_ref.to_string(), "chr2");
        assert_eq!(cache.partition_stats(0).unwrap().same_ref.inserts, 0);
    }

    #[test]
    fn test_half_aligned_tracking() {
        let mut cache = MateCache::new(1).unwrap();
        let resolver = MateResolver::new(0).with_half_aligned(true);
        let info = resolver.resolve(&mut cache, &read(5, None, "")).unwrap();
        assert_eq!(info.mate_ref.to_string(), "*");

        let mut secondary = read(6, None, "");
        secondary.primary = false;
        resolver.resolve(&mut cache, &secondary).unwrap();

        let mut seen = Vec::new();
        cache
            .for_each_unaligned(0, |seq_id, id| seen.push((seq_id, id)))
            .unwrap();
        assert_eq!(seen, vec![(7, 5)]);
    }

    #[test]
    fn test_cache_disabled() {
        let mut cache = MateCache::new(1).unwrap();
        let resolver = MateResolver::new(0).with_cache(false).with_half_aligned(true);
        resolver.resolve(&mut cache, &read(1, Some(2), "chr1")).unwrap();
        resolver.resolve(&mut cache, &read(3, None, "")).unwrap();
        let stats = cache.partition_stats(0).unwrap();
        assert_eq!(stats.same_ref.inserts, 0);
        assert_eq!(stats.same_ref.lookups, 0);
        assert_eq!(stats.unaligned.inserts, 0);
    }

    #[test]
    fn test_finish_reference_drops_unmatched() {
        let mut cache = MateCache::new(1).unwrap();
        let resolver = MateResolver::new(0);
        resolver.resolve(&mut cache, &read(1, Some(2), "chr1")).unwrap();
        resolver.finish_reference(&mut cache);

        let info = resolver.resolve(&mut cache, &read(2, Some(1), "chr1")).unwrap();
        assert!(!info.from_cache);
        assert_eq!(cache.flush_count(), 1);
    }

    #[test]
    fn test_bad_partition_is_error() {
        let mut cache = MateCache::new(1).unwrap();
        assert!(MateResolver::new(4)
            .resolve(&mut cache, &read(1, Some(2), "chr1"))
            .is_err());
    }

    #[test]
    fn test_named_pairs_through_cache() {
        let records = parse_alignments(
            "chr1\t100\t150\tp1\t30\t+\n\
             chr1\t300\t350\tp1\t30\t-\n\
             chr1\t120\t170\tsolo\t30\t+\n\
             chr2\t10\t60\tx\t30\t+\n\
             chr1\t500\t550\tx\t30\t-\n",
        )
        .unwrap();
        let mut cache = MateCache::new(1).unwrap();
        let resolver = MateResolver::new(0).with_half_aligned(true);
        let stats = resolve_named_pairs(&records, &mut cache, &resolver).unwrap();

        assert_eq!(
            stats,
            MatePassStats {
                references: 2,
                reads: 5,
                same_ref: 2,
                other_ref: 2,
                unaligned_mate: 1,
                from_cache: 1,
            }
        );
        let p = cache.partition_stats(0).unwrap();
        assert_eq!((p.same_ref.inserts, p.same_ref.finds, p.same_ref.active), (1, 1, 0));
        assert_eq!(p.same_ref_high_water, 1);
        assert_eq!(p.unaligned.inserts, 1);
        assert_eq!(cache.flush_count(), 2);

        let mut half_aligned = Vec::new();
        cache
            .for_each_unaligned(0, |seq_id, id| half_aligned.push((seq_id, id)))
            .unwrap();
        assert_eq!(half_aligned, vec![(3, 3)]);
    }

    #[test]
    fn test_named_pair_columns() {
        let records =
            parse_alignments("chr1\t300\t350\tp\t30\t-\nchr1\t100\t150\tp\t30\t+\n").unwrap();
        let left = aligned_read(&records, 1, 0, Some(0));
        assert_eq!(left.sam_flags, FLAG_PAIRED | FLAG_LAST_IN_PAIR | FLAG_MATE_REVERSE);
        assert_eq!((left.tlen, left.mate_ref_pos, left.mate_align_id), (250, 300, Some(1)));

        let right = aligned_read(&records, 0, 0, Some(1));
        assert_eq!(right.sam_flags, mate_flags(left.sam_flags));
        assert_eq!(right.tlen, -250);
        assert_eq!(right.seq_spot_id, left.seq_spot_id);
    }

    #[test]
    fn test_repeated_name_is_not_a_pair() {
        let records = parse_alignments(
            "chr1\t0\t5\tdup\t30\t+\nchr1\t2\t7\tdup\t30\t+\nchr1\t4\t9\tdup\t30\t+\n",
        )
        .unwrap();
        let mut cache = MateCache::new(1).unwrap();
        let stats = resolve_named_pairs(&records, &mut cache, &MateResolver::new(0)).unwrap();
        assert_eq!((stats.reads, stats.unaligned_mate, stats.from_cache), (3, 3, 0));
        assert_eq!(cache.partition_stats(0).unwrap().same_ref.inserts, 0);
    }
}
