//! Position walker and pileup formatter.
//!
//! The walker drives a [`PlacementSource`] through its nested levels
//! (reference, window, position, spot group, placement) and writes one
//! samtools-style pileup line per reported position:
//!
//! ```text
//! chr1    5    N    2    ^?.$,    II
//! ```
//!
//! Columns are the reference name, the 1-based position, the reference base,
//! the depth, and one block of events (plus qualities) per spot group.

use crate::bases;
use crate::config::PileupOptions;
use crate::error::{PileupError, Result};
use crate::placement::{BaseCall, Placement};
use crate::source::{PlacementSource, Position, RegionFilter, StopSignal};
use crate::streaming::buffers::{
    event_capacity_for_depth, quality_capacity_for_depth, INITIAL_LINE_BUFFER,
};
use crate::streaming::line_buffer::LineBuffer;
use log::{debug, error, info};
use std::fmt;
use std::io::Write;

/// Highest quality value that still renders as printable ASCII after +33.
const MAX_PRINTABLE_QUALITY: u8 = 93;

/// Counters collected over one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub references: u64,
    pub windows: u64,
    /// Positions the source reported.
    pub positions: u64,
    /// Lines written.
    pub lines: u64,
    /// Positions without placements that were not reported.
    pub skipped_empty: u64,
    /// Positions dropped by the region filter.
    pub skipped_filtered: u64,
    pub placements: u64,
    /// The stop signal fired before the source was exhausted.
    pub cancelled: bool,
}

impl fmt::Display for WalkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "references={} windows={} positions={} lines={} skipped_empty={} skipped_filtered={} placements={}",
            self.references,
            self.windows,
            self.positions,
            self.lines,
            self.skipped_empty,
            self.skipped_filtered,
            self.placements
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// Line, event and quality buffers reused across the positions of one
/// reference.
struct PositionBuffers {
    line: LineBuffer,
    events: LineBuffer,
    qualities: LineBuffer,
}

impl PositionBuffers {
    fn new() -> Result<Self> {
        Ok(Self {
            line: LineBuffer::with_capacity("line", INITIAL_LINE_BUFFER)?,
            events: LineBuffer::with_capacity("events", INITIAL_LINE_BUFFER)?,
            qualities: LineBuffer::with_capacity("qualities", INITIAL_LINE_BUFFER)?,
        })
    }

    fn reset(&mut self) {
        self.line.reset();
        self.events.reset();
        self.qualities.reset();
    }

    /// Size the buffers for a position of `depth` placements.
    fn expand(&mut self, depth: u32) -> Result<()> {
        self.line.expand(event_capacity_for_depth(depth))?;
        self.events.expand(event_capacity_for_depth(depth))?;
        self.qualities.expand(quality_capacity_for_depth(depth))
    }
}

/// Where the walk is, for annotating source failures.
struct WalkContext {
    reference: String,
    /// Last 1-based position reached on `reference`.
    position: Option<u64>,
}

impl WalkContext {
    fn source_failed(&self, err: PileupError) -> PileupError {
        let reference = if self.reference.is_empty() {
            "-".to_string()
        } else {
            self.reference.clone()
        };
        match self.position {
            Some(pos) => error!("placement source failed at {}:{}: {}", reference, pos, err),
            None => error!("placement source failed at {}: {}", reference, err),
        }
        PileupError::Walk {
            reference,
            position: self.position,
            source: Box::new(err),
        }
    }
}

/// Walks a placement source and writes pileup lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PileupWalker {
    options: PileupOptions,
}

impl PileupWalker {
    pub fn new(options: PileupOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PileupOptions {
        &self.options
    }

    /// Walk every reference of `source`, writing lines to `out`.
    ///
    /// Source failures abort the walk and come back as [`PileupError::Walk`]
    /// wrapping the source's error. A fired stop signal ends the walk
    /// cleanly with [`WalkStats::cancelled`] set.
    pub fn run<S, F, T, W>(
        &self,
        source: &mut S,
        filter: &mut F,
        stop: &T,
        out: &mut W,
    ) -> Result<WalkStats>
    where
        S: PlacementSource + ?Sized,
        F: RegionFilter + ?Sized,
        T: StopSignal + ?Sized,
        W: Write,
    {
        let mut stats = WalkStats::default();
        let mut ctx = WalkContext {
            reference: String::new(),
            position: None,
        };

        while let Some(reference) = source.next_reference().map_err(|e| ctx.source_failed(e))? {
            ctx.reference = reference.name;
            ctx.position = None;
            stats.references += 1;
            filter.enter_reference(&ctx.reference);
            debug!("walking {} ({} bp)", ctx.reference, reference.length);

            self.walk_reference(source, filter, stop, out, &mut ctx, &mut stats)?;
            if stats.cancelled {
                info!("walk cancelled on {}", ctx.reference);
                break;
            }
        }
        Ok(stats)
    }

    fn walk_reference<S, F, T, W>(
        &self,
        source: &mut S,
        filter: &mut F,
        stop: &T,
        out: &mut W,
        ctx: &mut WalkContext,
        stats: &mut WalkStats,
    ) -> Result<()>
    where
        S: PlacementSource + ?Sized,
        F: RegionFilter + ?Sized,
        T: StopSignal + ?Sized,
        W: Write,
    {
        let mut buffers = PositionBuffers::new()?;
        loop {
            if stop.should_stop() {
                stats.cancelled = true;
                return Ok(());
            }
            if source.next_window().map_err(|e| ctx.source_failed(e))?.is_none() {
                return Ok(());
            }
            stats.windows += 1;

            while let Some(position) = source
                .next_position(self.options.no_skip)
                .map_err(|e| ctx.source_failed(e))?
            {
                ctx.position = Some(position.pos + 1);
                stats.positions += 1;
                self.walk_position(source, filter, out, &mut buffers, &position, ctx, stats)?;
                if stop.should_stop() {
                    stats.cancelled = true;
                    return Ok(());
                }
            }
        }
    }

    fn walk_position<S, F, W>(
        &self,
        source: &mut S,
        filter: &mut F,
        out: &mut W,
        buffers: &mut PositionBuffers,
        position: &Position,
        ctx: &WalkContext,
        stats: &mut WalkStats,
    ) -> Result<()>
    where
        S: PlacementSource + ?Sized,
        F: RegionFilter + ?Sized,
        W: Write,
    {
        buffers.reset();
        let depth = position.depth;
        if depth == 0 && !self.options.no_skip {
            stats.skipped_empty += 1;
            return Ok(());
        }
        if filter.is_skip_position(position.pos + 1) {
            stats.skipped_filtered += 1;
            return Ok(());
        }

        buffers.expand(depth)?;
        let line = &mut buffers.line;
        line.push_str(&ctx.reference)?;
        line.push_byte(b'\t')?;
        line.push_int(position.pos + 1)?;
        line.push_byte(b'\t')?;
        line.push_byte(bases::to_ascii(position.ref_base, false))?;
        if !self.options.depth_per_spot_group {
            line.push_byte(b'\t')?;
            line.push_int(depth)?;
        }

        if depth > 0 {
            if self.options.spot_groups {
                while source
                    .next_spot_group()
                    .map_err(|e| ctx.source_failed(e))?
                    .is_some()
                {
                    buffers.line.push_byte(b'\t')?;
                    self.walk_group(source, buffers, ctx, stats)?;
                }
            } else {
                buffers.line.push_byte(b'\t')?;
                self.walk_group(source, buffers, ctx, stats)?;
            }
        }

        buffers.line.push_byte(b'\n')?;
        buffers.line.write_to(out)?;
        stats.lines += 1;
        Ok(())
    }

    /// Append one group block: `[count \t] events [\t qualities]`.
    fn walk_group<S>(
        &self,
        source: &mut S,
        buffers: &mut PositionBuffers,
        ctx: &WalkContext,
        stats: &mut WalkStats,
    ) -> Result<()>
    where
        S: PlacementSource + ?Sized,
    {
        buffers.events.reset();
        buffers.qualities.reset();

        let mut count: u32 = 0;
        while let Some(placement) = source.next_placement().map_err(|e| ctx.source_failed(e))? {
            self.format_placement(source, &placement, buffers)?;
            count += 1;
        }
        stats.placements += u64::from(count);

        let line = &mut buffers.line;
        if self.options.depth_per_spot_group {
            line.push_int(count)?;
            line.push_byte(b'\t')?;
        }
        line.push_bytes(buffers.events.as_bytes())?;
        if !self.options.omit_qualities {
            line.push_byte(b'\t')?;
            for &q in buffers.qualities.as_bytes() {
                line.push_byte(q.min(MAX_PRINTABLE_QUALITY) + 33)?;
            }
        }
        Ok(())
    }

    /// Append the events of one placement and record its quality.
    fn format_placement<S>(
        &self,
        source: &mut S,
        placement: &Placement,
        buffers: &mut PositionBuffers,
    ) -> Result<()>
    where
        S: PlacementSource + ?Sized,
    {
        let state = source.state(placement);
        let event = state.flags.decode();
        let reverse = placement.reverse;
        let events = &mut buffers.events;

        if !self.options.omit_qualities {
            let offset = match event.call {
                // a skip reports the quality of the next read base
                BaseCall::Skip => state.read_offset.saturating_add(1),
                _ => state.read_offset,
            };
            buffers.qualities.push_byte(placement.quality_at(offset))?;
        }

        if event.call == BaseCall::Invalid {
            return events.push_byte(b'?');
        }

        if event.first {
            let mapq = (u32::from(placement.mapq) + 33).clamp(33, 126) as u8;
            events.push_byte(b'^')?;
            events.push_byte(mapq)?;
        }

        match event.call {
            BaseCall::Skip => events.push_byte(if reverse { b'<' } else { b'>' })?,
            BaseCall::Match => events.push_byte(if reverse { b',' } else { b'.' })?,
            BaseCall::Mismatch(base) => events.push_byte(bases::to_ascii(base, reverse))?,
            BaseCall::Invalid => {}
        }

        if event.insert_follows {
            let inserted = source.bases_inserted(placement);
            events.push_byte(b'+')?;
            events.push_int(inserted.len())?;
            for &b in inserted {
                events.push_byte(bases::to_ascii(b, reverse))?;
            }
        }

        if event.delete_follows {
            if let Some(deleted) = source.bases_deleted(placement) {
                events.push_byte(b'-')?;
                events.push_int(deleted.bases.len())?;
                for &b in &deleted.bases {
                    events.push_byte(bases::to_ascii(b, reverse))?;
                }
            }
        }

        if event.last {
            events.push_byte(b'$')?;
        }

        if self.options.show_id {
            events.push_fmt(format_args!(
                "({}:{}-{}/{})",
                placement.id,
                placement.ref_start + 1,
                placement.ref_start + u64::from(placement.ref_len),
                state.read_offset
            ))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::Interval;
    use crate::placement::{PlacementState, StateFlags};
    use crate::regions::SkipList;
    use crate::source::{BufferedSource, NeverStop, NoRegionFilter};
    use std::cell::Cell;

    fn walk(options: PileupOptions, source: &mut BufferedSource) -> String {
        let mut out = Vec::new();
        PileupWalker::new(options)
            .run(source, &mut NoRegionFilter, &NeverStop, &mut out)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    fn no_quals() -> PileupOptions {
        PileupOptions::new().with_omit_qualities(true)
    }

    fn single(flags: StateFlags, placement: Placement) -> BufferedSource {
        BufferedSource::builder()
            .reference("chr1", 100)
            .window(0, 100)
            .position(4, bases::A)
            .placement(placement, PlacementState::new(flags, 0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_first_match_last_line() {
        let flags = StateFlags::matched().with(StateFlags::FIRST | StateFlags::LAST);
        let mut source = BufferedSource::builder()
            .reference("chr1", 10)
            .window(4, 1)
            .position(4, bases::N)
            .placement(Placement::new(1, 30, false, 4, 1), PlacementState::new(flags, 0))
            .build()
            .unwrap();
        assert_eq!(walk(no_quals(), &mut source), "chr1\t5\tN\t1\t^?.$\n");
    }

    #[test]
    fn test_mapq_clamped() {
        let flags = StateFlags::matched().with(StateFlags::FIRST);
        let mut source = single(flags, Placement::new(1, 255, true, 4, 3));
        assert_eq!(walk(no_quals(), &mut source), "chr1\t5\tA\t1\t^~,\n");
    }

    #[test]
    fn test_mismatch_case_follows_strand() {
        let mut fwd = single(StateFlags::mismatch(bases::G), Placement::new(1, 0, false, 0, 9));
        assert_eq!(walk(no_quals(), &mut fwd), "chr1\t5\tA\t1\tG\n");
        let mut rev = single(StateFlags::mismatch(bases::G), Placement::new(1, 0, true, 0, 9));
        assert_eq!(walk(no_quals(), &mut rev), "chr1\t5\tA\t1\tg\n");
    }

    #[test]
    fn test_insert_and_delete_events() {
        let flags = StateFlags::matched().with(StateFlags::INSERT | StateFlags::DELETE);
        let mut source = BufferedSource::builder()
            .reference("chr1", 100)
            .window(0, 100)
            .position(4, bases::A)
            .placement(Placement::new(1, 0, false, 0, 9), PlacementState::new(flags, 0))
            .inserted(bases::encode("AC"))
            .deleted(5, bases::encode("GTT"))
            .placement(Placement::new(2, 0, true, 0, 9), PlacementState::new(flags, 0))
            .inserted(bases::encode("T"))
            .build()
            .unwrap();
        // the reverse placement has no deleted bases, so no delete event
        assert_eq!(walk(no_quals(), &mut source), "chr1\t5\tA\t2\t.+2AC-3GTT,+1t\n");
    }

    #[test]
    fn test_skip_and_invalid() {
        let mut source = BufferedSource::builder()
            .reference("chr1", 100)
            .window(0, 100)
            .position(4, bases::A)
            .placement(
                Placement::new(1, 0, false, 0, 9).with_qualities(vec![10, 20, 30]),
                PlacementState::new(StateFlags::skipped(), 0),
            )
            .placement(
                Placement::new(2, 0, true, 0, 9),
                PlacementState::new(StateFlags::skipped(), 0),
            )
            .placement(
                Placement::new(3, 0, false, 0, 9).with_qualities(vec![40]),
                PlacementState::new(
                    StateFlags::invalid().with(StateFlags::FIRST | StateFlags::LAST),
                    0,
                ),
            )
            .build()
            .unwrap();
        // skip quality comes from the next read base; missing qualities are 2
        assert_eq!(
            walk(PileupOptions::new(), &mut source),
            "chr1\t5\tA\t3\t><?\t5#I\n"
        );
    }

    #[test]
    fn test_quality_count_and_range() {
        let mut builder = BufferedSource::builder()
            .reference("chr1", 100)
            .window(0, 100)
            .position(4, bases::A);
        for id in 0..5u8 {
            builder = builder.placement(
                Placement::new(i64::from(id), 0, false, 0, 9).with_qualities(vec![id * 60]),
                PlacementState::new(StateFlags::matched(), 0),
            );
        }
        let text = walk(PileupOptions::new(), &mut builder.build().unwrap());
        let quals = text.trim_end().rsplit('\t').next().unwrap();
        assert_eq!(quals.len(), 5);
        assert!(quals.bytes().all(|q| (33..=126).contains(&q)));
        assert_eq!(quals, "!]~~~");
    }

    #[test]
    fn test_show_id() {
        let flags = StateFlags::matched();
        let mut source = BufferedSource::builder()
            .reference("chr1", 100)
            .window(0, 100)
            .position(4, bases::A)
            .placement(Placement::new(12, 0, false, 2, 5), PlacementState::new(flags, 2))
            .build()
            .unwrap();
        let options = no_quals().with_show_id(true);
        assert_eq!(walk(options, &mut source), "chr1\t5\tA\t1\t.(12:3-7/2)\n");
    }

    fn grouped_source() -> BufferedSource {
        let m = PlacementState::new(StateFlags::matched(), 0);
        BufferedSource::builder()
            .reference("chr1", 100)
            .window(0, 100)
            .position(9, bases::C)
            .group("libA")
            .placement(Placement::new(1, 0, false, 0, 20), m)
            .group("libB")
            .placement(Placement::new(2, 0, true, 0, 20), m)
            .placement(Placement::new(3, 0, false, 0, 20), m)
            .build()
            .unwrap()
    }

    #[test]
    fn test_spot_groups() {
        let options = no_quals().with_spot_groups(true);
        assert_eq!(
            walk(options, &mut grouped_source()),
            "chr1\t10\tC\t3\t.\t,.\n"
        );
        assert_eq!(walk(no_quals(), &mut grouped_source()), "chr1\t10\tC\t3\t.,.\n");
    }

    #[test]
    fn test_depth_per_spot_group() {
        let options = no_quals()
            .with_spot_groups(true)
            .with_depth_per_spot_group(true);
        assert_eq!(
            walk(options, &mut grouped_source()),
            "chr1\t10\tC\t1\t.\t2\t,.\n"
        );
    }

    #[test]
    fn test_empty_positions() {
        let flags = StateFlags::matched();
        let build = || {
            BufferedSource::builder()
                .reference("chr1", 3)
                .reference_bases(bases::encode("ACG"))
                .window(0, 3)
                .position(1, bases::C)
                .placement(Placement::new(1, 0, false, 1, 1), PlacementState::new(flags, 0))
                .build()
                .unwrap()
        };
        assert_eq!(walk(no_quals(), &mut build()), "chr1\t2\tC\t1\t.\n");
        assert_eq!(
            walk(no_quals().with_no_skip(true), &mut build()),
            "chr1\t1\tA\t0\nchr1\t2\tC\t1\t.\nchr1\t3\tG\t0\n"
        );
    }

    #[test]
    fn test_stored_empty_position_skipped() {
        let mut source = BufferedSource::builder()
            .reference("chr1", 10)
            .window(0, 10)
            .position(3, bases::A)
            .build()
            .unwrap();
        let mut out = Vec::new();
        let stats = PileupWalker::default()
            .run(&mut source, &mut NoRegionFilter, &NeverStop, &mut out)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(stats.skipped_empty, 1);
    }

    #[test]
    fn test_region_filter() {
        let flags = StateFlags::matched();
        let mut builder = BufferedSource::builder().reference("chr1", 10).window(0, 10);
        for pos in 0..4 {
            builder = builder
                .position(pos, bases::A)
                .placement(Placement::new(1, 0, false, 0, 4), PlacementState::new(flags, 0));
        }
        let mut source = builder.build().unwrap();
        // BED [1, 3) covers 1-based positions 2 and 3
        let mut filter = SkipList::from_regions(vec![Interval::new("chr1", 1, 3)]);
        let mut out = Vec::new();
        let stats = PileupWalker::new(no_quals())
            .run(&mut source, &mut filter, &NeverStop, &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "chr1\t1\tA\t1\t.\nchr1\t4\tA\t1\t.\n"
        );
        assert_eq!(stats.skipped_filtered, 2);
        assert_eq!(stats.lines, 2);
    }

    struct StopAfter {
        polls: Cell<u32>,
        limit: u32,
    }

    impl StopSignal for StopAfter {
        fn should_stop(&self) -> bool {
            self.polls.set(self.polls.get() + 1);
            self.polls.get() > self.limit
        }
    }

    #[test]
    fn test_cancellation_is_clean() {
        let flags = StateFlags::matched();
        let mut builder = BufferedSource::builder().reference("chr1", 10).window(0, 10);
        for pos in 0..5 {
            builder = builder
                .position(pos, bases::A)
                .placement(Placement::new(1, 0, false, 0, 5), PlacementState::new(flags, 0));
        }
        let mut source = builder.reference("chr2", 10).build().unwrap();
        // window start poll plus two position polls
        let stop = StopAfter {
            polls: Cell::new(0),
            limit: 2,
        };
        let mut out = Vec::new();
        let stats = PileupWalker::new(no_quals())
            .run(&mut source, &mut NoRegionFilter, &stop, &mut out)
            .unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.lines, 2);
        assert_eq!(stats.references, 1);
    }

    #[test]
    fn test_source_failure_annotated() {
        let flags = StateFlags::matched();
        let mut source = BufferedSource::builder()
            .reference("chr7", 10)
            .window(0, 10)
            .position(2, bases::A)
            .placement(Placement::new(1, 0, false, 0, 5), PlacementState::new(flags, 0))
            .position(3, bases::A)
            .placement(Placement::new(1, 0, false, 0, 5), PlacementState::new(flags, 0))
            .fail_at("chr7", 3, "column read failed")
            .build()
            .unwrap();
        let mut out = Vec::new();
        let err = PileupWalker::new(no_quals())
            .run(&mut source, &mut NoRegionFilter, &NeverStop, &mut out)
            .unwrap_err();
        match &err {
            PileupError::Walk {
                reference,
                position,
                source,
            } => {
                assert_eq!(reference, "chr7");
                assert_eq!(*position, Some(3));
                assert!(matches!(**source, PileupError::Source(ref m) if m == "column read failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // the line before the failure was already written
        assert_eq!(String::from_utf8(out).unwrap(), "chr7\t3\tA\t1\t.\n");
    }

    #[test]
    fn test_deterministic_output() {
        let mut source = grouped_source();
        let options = PileupOptions::new().with_spot_groups(true).with_show_id(true);
        let first = walk(options, &mut source);
        source.rewind();
        let second = walk(options, &mut source);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_stats_display() {
        let stats = WalkStats {
            references: 1,
            lines: 2,
            cancelled: true,
            ..WalkStats::default()
        };
        assert_eq!(
            stats.to_string(),
            "references=1 windows=0 positions=0 lines=2 skipped_empty=0 skipped_filtered=0 placements=0 (cancelled)"
        );
    }
}
