//! Per-run cache of mate information.
//!
//! When alignments are visited in reference order, the first read of a pair
//! is seen before its mate. Caching what the mate will need (position, flags,
//! template length) lets the second read be reported without going back to
//! the alignment store.
//!
//! The cache holds one partition per opened input. Each partition has two
//! namespaces:
//!
//! - **same-ref**: mates aligned to the current reference, keyed by the
//!   alignment id of the read that inserted them. Consumed entries are
//!   removed one at a time; the whole namespace is dropped in bulk with
//!   [`MateCache::clear_same_ref`] when a reference is finished.
//! - **unaligned**: reads whose mate is unaligned or aligned elsewhere. These
//!   survive reference boundaries and are visited in key order at the end of
//!   the run with [`MateCache::for_each_unaligned`].
//!
//! Partitions never observe each other's state. The cache has no internal
//! locking and expects exclusive access.

use crate::error::{PileupError, Result};
use log::error;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

/// Cached information about a mate on the same reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SameRefMate {
    pub ref_pos: u32,
    pub tlen: i32,
    pub sam_flags: u16,
}

/// Cached information about a read whose mate is unaligned or on another
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossRefMate {
    pub ref_pos: u32,
    pub ref_idx: u32,
    pub mate_seq_id: i64,
}

/// Counters for one namespace of one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceStats {
    /// Entries currently cached.
    pub active: u64,
    pub inserts: u64,
    pub lookups: u64,
    /// Lookups that found an entry.
    pub finds: u64,
}

/// Statistics of one partition.
///
/// Only the same-ref namespace tracks a high-water-mark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub same_ref: NamespaceStats,
    /// Largest same-ref active count reached.
    pub same_ref_high_water: u64,
    pub unaligned: NamespaceStats,
}

#[derive(Debug, Default)]
struct Partition {
    same_ref: FxHashMap<i64, SameRefMate>,
    unaligned: BTreeMap<i64, CrossRefMate>,
    stats: PartitionStats,
}

/// Mate cache with one isolated partition per input.
#[derive(Debug)]
pub struct MateCache {
    partitions: Vec<Partition>,
    flushes: u64,
}

impl MateCache {
    /// Create a cache with `count` partitions.
    pub fn new(count: usize) -> Result<Self> {
        let mut partitions = Vec::new();
        partitions.try_reserve_exact(count).map_err(|_| {
            error!("cannot allocate mate cache with {} partitions", count);
            PileupError::ResourceExhausted {
                what: "mate cache partitions",
                requested: count.saturating_mul(std::mem::size_of::<Partition>()),
            }
        })?;
        partitions.resize_with(count, Partition::default);
        Ok(Self {
            partitions,
            flushes: 0,
        })
    }

    /// Number of partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Number of times the same-ref namespace was cleared.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Statistics of one partition.
    pub fn partition_stats(&self, partition: usize) -> Result<&PartitionStats> {
        self.partition(partition).map(|p| &p.stats)
    }

    fn partition(&self, idx: usize) -> Result<&Partition> {
        let count = self.partitions.len();
        self.partitions
            .get(idx)
            .ok_or_else(|| out_of_range(idx, count))
    }

    fn partition_mut(&mut self, idx: usize) -> Result<&mut Partition> {
        let count = self.partitions.len();
        self.partitions
            .get_mut(idx)
            .ok_or_else(|| out_of_range(idx, count))
    }

    /// Cache a same-ref mate record under `key`.
    pub fn insert_same_ref(
        &mut self,
        partition: usize,
        key: i64,
        ref_pos: u32,
        sam_flags: u16,
        tlen: i32,
    ) -> Result<()> {
        let p = self.partition_mut(partition)?;
        p.same_ref.try_reserve(1).map_err(|_| {
            error!("cannot grow same-ref mate cache of partition {}", partition);
            PileupError::ResourceExhausted {
                what: "same-ref mate cache",
                requested: p.same_ref.len() + 1,
            }
        })?;
        p.same_ref.insert(
            key,
            SameRefMate {
                ref_pos,
                tlen,
                sam_flags,
            },
        );

        let stats = &mut p.stats;
        stats.same_ref.inserts += 1;
        stats.same_ref.active += 1;
        if stats.same_ref.active > stats.same_ref_high_water {
            stats.same_ref_high_water = stats.same_ref.active;
        }
        Ok(())
    }

    /// Look up a same-ref mate record. `Ok(None)` is a normal miss.
    pub fn lookup_same_ref(&mut self, partition: usize, key: i64) -> Result<Option<SameRefMate>> {
        let p = self.partition_mut(partition)?;
        p.stats.same_ref.lookups += 1;
        let found = p.same_ref.get(&key).copied();
        if found.is_some() {
            p.stats.same_ref.finds += 1;
        }
        Ok(found)
    }

    /// Remove a consumed same-ref record. Returns true if it was present.
    pub fn remove_same_ref(&mut self, partition: usize, key: i64) -> Result<bool> {
        let p = self.partition_mut(partition)?;
        let removed = p.same_ref.remove(&key).is_some();
        if removed {
            p.stats.same_ref.active = p.stats.same_ref.active.saturating_sub(1);
        }
        Ok(removed)
    }

    /// Drop every same-ref record of every partition.
    ///
    /// The maps are replaced rather than emptied key by key. Unaligned
    /// records and their counters are untouched.
    pub fn clear_same_ref(&mut self) {
        for p in &mut self.partitions {
            p.same_ref = FxHashMap::default();
            p.stats.same_ref.active = 0;
        }
        self.flushes += 1;
    }

    /// Cache an unaligned/cross-reference record under `key`.
    pub fn insert_unaligned(
        &mut self,
        partition: usize,
        key: i64,
        ref_pos: u32,
        ref_idx: u32,
        mate_seq_id: i64,
    ) -> Result<()> {
        let p = self.partition_mut(partition)?;
        p.unaligned.insert(
            key,
            CrossRefMate {
                ref_pos,
                ref_idx,
                mate_seq_id,
            },
        );
        p.stats.unaligned.inserts += 1;
        p.stats.unaligned.active += 1;
        Ok(())
    }

    /// Look up an unaligned/cross-reference record. `Ok(None)` is a normal miss.
    pub fn lookup_unaligned(&mut self, partition: usize, key: i64) -> Result<Option<CrossRefMate>> {
        let p = self.partition_mut(partition)?;
        p.stats.unaligned.lookups += 1;
        let found = p.unaligned.get(&key).copied();
        if found.is_some() {
            p.stats.unaligned.finds += 1;
        }
        Ok(found)
    }

    /// Visit every unaligned record of a partition in ascending key order,
    /// calling `f(mate_seq_id, alignment_id)`.
    pub fn for_each_unaligned<F>(&self, partition: usize, mut f: F) -> Result<()>
    where
        F: FnMut(i64, i64),
    {
        let p = self.partition(partition)?;
        for (&key, record) in &p.unaligned {
            f(record.mate_seq_id, key);
        }
        Ok(())
    }

    /// Write the statistics report.
    pub fn report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "{}", self)
    }
}

fn out_of_range(idx: usize, count: usize) -> PileupError {
    error!("mate cache partition {} out of range (count {})", idx, count);
    PileupError::Precondition(format!(
        "mate cache partition {} out of range (count {})",
        idx, count
    ))
}

impl fmt::Display for MateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mate-cache report: {} partition(s)", self.partitions.len())?;
        for (idx, p) in self.partitions.iter().enumerate() {
            let s = &p.stats;
            writeln!(
                f,
                "partition {}: same-ref high-water-mark = {}",
                idx, s.same_ref_high_water
            )?;
            writeln!(
                f,
                "partition {}: same-ref inserts = {}, lookups = {}, finds = {}",
                idx, s.same_ref.inserts, s.same_ref.lookups, s.same_ref.finds
            )?;
            writeln!(
                f,
                "partition {}: unaligned inserts = {}, lookups = {}, finds = {}",
                idx, s.unaligned.inserts, s.unaligned.lookups, s.unaligned.finds
            )?;
        }
        writeln!(f, "same-ref flushes = {}", self.flushes)
    }
}
