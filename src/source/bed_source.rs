//! Pile up ungapped BED alignments into a [`BufferedSource`].
//!
//! Every covered reference position is reported as a match. The first and
//! last covered positions of an alignment carry the first/last flags, and
//! alignment ids are 1-based record numbers. Reference bases are unknown and
//! reported as N.

use crate::bases;
use crate::bed::AlignmentRecord;
use crate::config::AlignmentFilter;
use crate::error::Result;
use crate::placement::{Placement, PlacementState, StateFlags};
use crate::reference::ReferenceList;
use crate::source::buffered::{BufferedSource, BufferedSourceBuilder};
use log::{debug, warn};
use rustc_hash::FxHashMap;

/// Build a fully buffered source from alignment records.
///
/// With a reference list, references are walked in list order and alignments
/// on unlisted references are dropped; otherwise references appear in input
/// order with their length taken from the furthest alignment end.
///
/// With `whole_reference`, each reference is one window from 0 to its length
/// (the furthest alignment end when no list is given); otherwise windows are
/// the merged coverage spans.
pub fn pile_alignments(
    records: &[AlignmentRecord],
    references: Option<&ReferenceList>,
    whole_reference: bool,
) -> Result<BufferedSource> {
    pile_alignments_filtered(records, references, whole_reference, &AlignmentFilter::default())
}

/// [`pile_alignments`] over the records `filter` accepts.
///
/// Rejected records keep their record number, so alignment ids do not shift.
/// A reference whose alignments are all rejected is still walked.
pub fn pile_alignments_filtered(
    records: &[AlignmentRecord],
    references: Option<&ReferenceList>,
    whole_reference: bool,
    filter: &AlignmentFilter,
) -> Result<BufferedSource> {
    let mut by_ref: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    let mut seen_order: Vec<&str> = Vec::new();
    let mut rejected = 0usize;
    for (idx, rec) in records.iter().enumerate() {
        let accepted = filter.accepts(rec);
        let entry = by_ref.entry(rec.chrom()).or_insert_with(|| {
            seen_order.push(rec.chrom());
            Vec::new()
        });
        if accepted {
            entry.push(idx);
        } else {
            rejected += 1;
        }
    }
    if rejected > 0 {
        debug!("{} of {} alignments rejected by the filter", rejected, records.len());
    }

    let walk_order: Vec<(String, u64)> = match references {
        Some(list) => {
            for name in &seen_order {
                if !list.contains(name) {
                    warn!("dropping alignments on {}: not in the reference list", name);
                }
            }
            list.references().map(|r| (r.name, r.length)).collect()
        }
        None => seen_order
            .iter()
            .map(|name| {
                let length = records
                    .iter()
                    .filter(|r| r.chrom() == *name)
                    .map(|r| r.end())
                    .max()
                    .unwrap_or(0);
                (name.to_string(), length)
            })
            .collect(),
    };

    let mut builder = BufferedSource::builder();
    for (name, length) in walk_order {
        let mut members = by_ref.remove(name.as_str()).unwrap_or_default();
        // stable: equal starts keep input order
        members.sort_by_key(|&i| records[i].start());

        builder = builder.reference(name.clone(), length);
        let windows = if whole_reference {
            if length > 0 {
                vec![(0, length)]
            } else {
                Vec::new()
            }
        } else {
            coverage_windows(records, &members)
        };
        debug!("{}: {} alignments in {} windows", name, members.len(), windows.len());

        for (start, end) in windows {
            builder = builder.window(start, end - start);
            builder = pile_window(builder, records, &members, start, end);
        }
    }
    builder.build()
}

/// Merged coverage spans of the (start-sorted) member alignments.
fn coverage_windows(records: &[AlignmentRecord], members: &[usize]) -> Vec<(u64, u64)> {
    let mut windows: Vec<(u64, u64)> = Vec::new();
    for &i in members {
        let (start, end) = (records[i].start(), records[i].end());
        match windows.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => windows.push((start, end)),
        }
    }
    windows
}

/// Sweep one window, adding a position for every covered coordinate.
fn pile_window(
    mut builder: BufferedSourceBuilder,
    records: &[AlignmentRecord],
    members: &[usize],
    start: u64,
    end: u64,
) -> BufferedSourceBuilder {
    let placements: FxHashMap<usize, Placement> = members
        .iter()
        .filter(|&&i| records[i].start() < end && records[i].end() > start)
        .map(|&i| (i, to_placement(i, &records[i])))
        .collect();

    let mut pending = members
        .iter()
        .copied()
        .filter(|i| placements.contains_key(i))
        .peekable();
    let mut active: Vec<usize> = Vec::new();
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();

    let mut pos = start;
    while pos < end {
        while let Some(&i) = pending.peek() {
            if records[i].start() > pos {
                break;
            }
            active.push(i);
            pending.next();
        }
        active.retain(|&i| records[i].end() > pos);

        if active.is_empty() {
            // jump over the coverage gap
            pos = match pending.peek() {
                Some(&i) => records[i].start().max(pos + 1),
                None => end,
            };
            continue;
        }

        groups.clear();
        for &i in &active {
            let name = records[i].spot_group.as_deref().unwrap_or("");
            match groups.iter_mut().find(|(g, _)| *g == name) {
                Some((_, ids)) => ids.push(i),
                None => groups.push((name, vec![i])),
            }
        }
        groups.sort_by(|a, b| a.0.cmp(b.0));

        builder = builder.position(pos, bases::N);
        for (name, ids) in &groups {
            builder = builder.group(*name);
            for &i in ids {
                let rec = &records[i];
                let mut flags = StateFlags::matched();
                if pos == rec.start() {
                    flags = flags.with(StateFlags::FIRST);
                }
                if pos + 1 == rec.end() {
                    flags = flags.with(StateFlags::LAST);
                }
                let offset = (pos - rec.start()).min(u32::MAX as u64) as u32;
                builder = builder.placement(placements[&i].clone(), PlacementState::new(flags, offset));
            }
        }
        pos += 1;
    }
    builder
}

fn to_placement(idx: usize, rec: &AlignmentRecord) -> Placement {
    let len = (rec.end() - rec.start()).min(u32::MAX as u64) as u32;
    Placement::new(
        idx as i64 + 1,
        rec.mapq,
        rec.strand.is_reverse(),
        rec.start(),
        len,
    )
}
