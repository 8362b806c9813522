//! Fully buffered, in-memory placement source.
//!
//! All events are materialised up front, so two walks over clones of the same
//! source see exactly the same stream. Used by the BED pile-up path and as a
//! deterministic stand-in for a real alignment store.
//!
//! Positions added explicitly through the builder are always reported, even
//! with zero placements; coordinates between them inside a window are only
//! reported (with depth 0) when the walker asks for empty positions.

use crate::bases;
use crate::error::{PileupError, Result};
use crate::placement::{DeletedBases, Placement, PlacementState};
use crate::source::{PlacementSource, Position, Reference, Window};

#[derive(Debug, Clone)]
struct BufferedPlacement {
    placement: Placement,
    state: PlacementState,
    inserted: Vec<u8>,
    deleted: Option<DeletedBases>,
}

#[derive(Debug, Clone)]
struct BufferedGroup {
    name: String,
    placements: Vec<BufferedPlacement>,
}

#[derive(Debug, Clone)]
struct BufferedPosition {
    pos: u64,
    ref_base: u8,
    groups: Vec<BufferedGroup>,
}

impl BufferedPosition {
    fn depth(&self) -> u32 {
        self.groups.iter().map(|g| g.placements.len() as u32).sum()
    }
}

#[derive(Debug, Clone)]
struct BufferedWindow {
    window: Window,
    positions: Vec<BufferedPosition>,
}

#[derive(Debug, Clone)]
struct BufferedReference {
    reference: Reference,
    bases: Vec<u8>,
    windows: Vec<BufferedWindow>,
}

impl BufferedReference {
    fn base_at(&self, pos: u64) -> u8 {
        self.bases.get(pos as usize).copied().unwrap_or(bases::N)
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    reference: String,
    pos: u64,
    message: String,
}

/// Iteration state, one field per nesting level.
#[derive(Debug, Clone, Default)]
struct Cursor {
    next_reference: usize,
    reference: Option<usize>,
    next_window: usize,
    window: Option<usize>,
    next_coord: u64,
    next_stored: usize,
    position: Option<usize>,
    grouped: bool,
    next_group: usize,
    group: Option<usize>,
    // (group index, placement index) of the next placement to hand out
    next_placement: (usize, usize),
    placement: Option<(usize, usize)>,
}

impl Cursor {
    fn enter_position(&mut self, stored: Option<usize>) {
        self.position = stored;
        self.grouped = false;
        self.next_group = 0;
        self.group = None;
        self.next_placement = (0, 0);
        self.placement = None;
    }
}

/// In-memory [`PlacementSource`].
#[derive(Debug, Clone)]
pub struct BufferedSource {
    references: Vec<BufferedReference>,
    failures: Vec<InjectedFailure>,
    cursor: Cursor,
}

impl BufferedSource {
    pub fn builder() -> BufferedSourceBuilder {
        BufferedSourceBuilder::default()
    }

    /// Number of references the source will yield.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Total number of placements over all positions.
    pub fn placement_count(&self) -> usize {
        self.references
            .iter()
            .flat_map(|r| r.windows.iter())
            .flat_map(|w| w.positions.iter())
            .map(|p| p.depth() as usize)
            .sum()
    }

    /// Rewind to the first reference.
    pub fn rewind(&mut self) {
        self.cursor = Cursor::default();
    }

    fn current_reference(&self) -> Option<&BufferedReference> {
        self.cursor.reference.map(|i| &self.references[i])
    }

    fn current_window(&self) -> Option<&BufferedWindow> {
        let reference = self.current_reference()?;
        self.cursor.window.map(|i| &reference.windows[i])
    }

    fn current_position(&self) -> Option<&BufferedPosition> {
        let window = self.current_window()?;
        self.cursor.position.map(|i| &window.positions[i])
    }

    fn current_placement(&self) -> Option<&BufferedPlacement> {
        let position = self.current_position()?;
        let (g, i) = self.cursor.placement?;
        position.groups.get(g)?.placements.get(i)
    }

    fn check_failure(&self, pos: u64) -> Result<()> {
        if let Some(reference) = self.current_reference() {
            let hit = self
                .failures
                .iter()
                .find(|f| f.pos == pos && f.reference == reference.reference.name);
            if let Some(failure) = hit {
                return Err(PileupError::Source(failure.message.clone()));
            }
        }
        Ok(())
    }
}

impl PlacementSource for BufferedSource {
    fn next_reference(&mut self) -> Result<Option<Reference>> {
        let idx = self.cursor.next_reference;
        if idx >= self.references.len() {
            self.cursor.reference = None;
            return Ok(None);
        }
        self.cursor = Cursor {
            next_reference: idx + 1,
            reference: Some(idx),
            ..Cursor::default()
        };
        Ok(Some(self.references[idx].reference.clone()))
    }

    fn next_window(&mut self) -> Result<Option<Window>> {
        let Some(ref_idx) = self.cursor.reference else {
            return Ok(None);
        };
        let windows = &self.references[ref_idx].windows;
        let idx = self.cursor.next_window;
        if idx >= windows.len() {
            self.cursor.window = None;
            return Ok(None);
        }
        let window = windows[idx].window;
        self.cursor.next_window = idx + 1;
        self.cursor.window = Some(idx);
        self.cursor.next_coord = window.start;
        self.cursor.next_stored = 0;
        self.cursor.enter_position(None);
        Ok(Some(window))
    }

    fn next_position(&mut self, emit_empty: bool) -> Result<Option<Position>> {
        let (Some(ref_idx), Some(win_idx)) = (self.cursor.reference, self.cursor.window) else {
            return Ok(None);
        };
        let reference = &self.references[ref_idx];
        let window = &reference.windows[win_idx];
        let end = window.window.start + window.window.len;

        loop {
            let coord = self.cursor.next_coord;
            if coord >= end {
                self.cursor.enter_position(None);
                return Ok(None);
            }

            let stored = window.positions.get(self.cursor.next_stored);
            match stored {
                Some(p) if p.pos < coord => {
                    self.cursor.next_stored += 1;
                }
                Some(p) if p.pos == coord => {
                    let idx = self.cursor.next_stored;
                    let position = Position {
                        pos: coord,
                        depth: p.depth(),
                        ref_base: p.ref_base,
                    };
                    self.check_failure(coord)?;
                    self.cursor.next_stored += 1;
                    self.cursor.next_coord = coord + 1;
                    self.cursor.enter_position(Some(idx));
                    return Ok(Some(position));
                }
                _ if emit_empty => {
                    let position = Position {
                        pos: coord,
                        depth: 0,
                        ref_base: reference.base_at(coord),
                    };
                    self.check_failure(coord)?;
                    self.cursor.next_coord = coord + 1;
                    self.cursor.enter_position(None);
                    return Ok(Some(position));
                }
                Some(p) => {
                    self.cursor.next_coord = p.pos;
                }
                None => {
                    self.cursor.next_coord = end;
                }
            }
        }
    }

    fn next_spot_group(&mut self) -> Result<Option<String>> {
        let Some(position) = self.current_position() else {
            return Ok(None);
        };
        let idx = self.cursor.next_group;
        let name = match position.groups.get(idx) {
            Some(group) => group.name.clone(),
            None => {
                self.cursor.group = None;
                return Ok(None);
            }
        };
        self.cursor.grouped = true;
        self.cursor.next_group = idx + 1;
        self.cursor.group = Some(idx);
        self.cursor.next_placement = (idx, 0);
        self.cursor.placement = None;
        Ok(Some(name))
    }

    fn next_placement(&mut self) -> Result<Option<Placement>> {
        let Some(position) = self.current_position() else {
            return Ok(None);
        };
        let (mut g, mut i) = self.cursor.next_placement;
        if self.cursor.grouped {
            if self.cursor.group != Some(g) {
                return Ok(None);
            }
        } else {
            // flat iteration: step over exhausted groups
            while g < position.groups.len() && i >= position.groups[g].placements.len() {
                g += 1;
                i = 0;
            }
        }
        let Some(entry) = position.groups.get(g).and_then(|grp| grp.placements.get(i)) else {
            self.cursor.placement = None;
            return Ok(None);
        };
        let placement = entry.placement.clone();
        self.cursor.placement = Some((g, i));
        self.cursor.next_placement = (g, i + 1);
        Ok(Some(placement))
    }

    fn state(&self, placement: &Placement) -> PlacementState {
        if let Some(current) = self.current_placement() {
            if current.placement.id == placement.id {
                return current.state;
            }
        }
        self.current_position()
            .and_then(|p| {
                p.groups
                    .iter()
                    .flat_map(|g| g.placements.iter())
                    .find(|bp| bp.placement.id == placement.id)
            })
            .map(|bp| bp.state)
            .unwrap_or_default()
    }

    fn bases_inserted(&self, placement: &Placement) -> &[u8] {
        match self.current_placement() {
            Some(current) if current.placement.id == placement.id => &current.inserted,
            _ => &[],
        }
    }

    fn bases_deleted(&mut self, placement: &Placement) -> Option<DeletedBases> {
        let current = self.current_placement()?;
        if current.placement.id != placement.id {
            return None;
        }
        current.deleted.clone()
    }
}

/// Builder for [`BufferedSource`].
///
/// Calls nest: `reference` > `window` > `position` > `group` > `placement`.
/// A placement added without a group lands in an unnamed group.
#[derive(Debug, Clone, Default)]
pub struct BufferedSourceBuilder {
    references: Vec<BufferedReference>,
    failures: Vec<InjectedFailure>,
    error: Option<String>,
}

impl BufferedSourceBuilder {
    /// Start a new reference.
    pub fn reference(mut self, name: impl Into<String>, length: u64) -> Self {
        self.references.push(BufferedReference {
            reference: Reference::new(name, length),
            bases: Vec::new(),
            windows: Vec::new(),
        });
        self
    }

    /// 4na bases of the current reference, used for empty positions.
    pub fn reference_bases(mut self, bases: Vec<u8>) -> Self {
        match self.references.last_mut() {
            Some(r) => r.bases = bases,
            None => self.fail("reference_bases() before reference()"),
        }
        self
    }

    /// Start a new window on the current reference.
    pub fn window(mut self, start: u64, len: u64) -> Self {
        match self.references.last_mut() {
            Some(r) => r.windows.push(BufferedWindow {
                window: Window { start, len },
                positions: Vec::new(),
            }),
            None => self.fail("window() before reference()"),
        }
        self
    }

    /// Add a reported position to the current window.
    pub fn position(mut self, pos: u64, ref_base: u8) -> Self {
        match self.references.last_mut().and_then(|r| r.windows.last_mut()) {
            Some(w) => w.positions.push(BufferedPosition {
                pos,
                ref_base,
                groups: Vec::new(),
            }),
            None => self.fail("position() before window()"),
        }
        self
    }

    /// Start a new spot group at the current position.
    pub fn group(mut self, name: impl Into<String>) -> Self {
        match self.last_position() {
            Some(p) => p.groups.push(BufferedGroup {
                name: name.into(),
                placements: Vec::new(),
            }),
            None => self.fail("group() before position()"),
        }
        self
    }

    /// Add a placement to the current group.
    pub fn placement(mut self, placement: Placement, state: PlacementState) -> Self {
        let entry = BufferedPlacement {
            placement,
            state,
            inserted: Vec::new(),
            deleted: None,
        };
        match self.last_position() {
            Some(position) => {
                if position.groups.is_empty() {
                    position.groups.push(BufferedGroup {
                        name: String::new(),
                        placements: Vec::new(),
                    });
                }
                if let Some(group) = position.groups.last_mut() {
                    group.placements.push(entry);
                }
            }
            None => self.fail("placement() before position()"),
        }
        self
    }

    /// Inserted bases following the last placement.
    pub fn inserted(mut self, bases: Vec<u8>) -> Self {
        match self.last_placement() {
            Some(p) => p.inserted = bases,
            None => self.fail("inserted() before placement()"),
        }
        self
    }

    /// Deleted reference bases following the last placement.
    pub fn deleted(mut self, ref_pos: u64, bases: Vec<u8>) -> Self {
        match self.last_placement() {
            Some(p) => p.deleted = Some(DeletedBases { ref_pos, bases }),
            None => self.fail("deleted() before placement()"),
        }
        self
    }

    /// Make the source fail when it reaches `pos` (0-based) on `reference`.
    pub fn fail_at(
        mut self,
        reference: impl Into<String>,
        pos: u64,
        message: impl Into<String>,
    ) -> Self {
        self.failures.push(InjectedFailure {
            reference: reference.into(),
            pos,
            message: message.into(),
        });
        self
    }

    pub fn build(self) -> Result<BufferedSource> {
        if let Some(message) = self.error {
            return Err(PileupError::InvalidFormat(message));
        }
        for r in &self.references {
            for w in &r.windows {
                let end = w.window.start + w.window.len;
                let mut prev: Option<u64> = None;
                for p in &w.positions {
                    if p.pos < w.window.start || p.pos >= end {
                        return Err(PileupError::InvalidFormat(format!(
                            "position {} outside window {}..{} on {}",
                            p.pos, w.window.start, end, r.reference.name
                        )));
                    }
                    if prev.is_some_and(|q| q >= p.pos) {
                        return Err(PileupError::InvalidFormat(format!(
                            "positions not ascending at {} on {}",
                            p.pos, r.reference.name
                        )));
                    }
                    prev = Some(p.pos);
                }
            }
        }
        Ok(BufferedSource {
            references: self.references,
            failures: self.failures,
            cursor: Cursor::default(),
        })
    }

    fn fail(&mut self, message: &str) {
        if self.error.is_none() {
            self.error = Some(message.to_string());
        }
    }

    fn last_position(&mut self) -> Option<&mut BufferedPosition> {
        self.references
            .last_mut()?
            .windows
            .last_mut()?
            .positions
            .last_mut()
    }

    fn last_placement(&mut self) -> Option<&mut BufferedPlacement> {
        self.last_position()?
            .groups
            .last_mut()?
            .placements
            .last_mut()
    }
}
