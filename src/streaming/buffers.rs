//! Buffer size constants for the pileup walk.
//!
//! The walker sizes its three per-reference buffers from these values and
//! grows them ahead of each position so that appends inside a position do
//! not reallocate.

/// Initial capacity of the line, events and qualities buffers (4 KB).
pub const INITIAL_LINE_BUFFER: usize = 4096;

/// Default output buffer size (2 MB).
pub const DEFAULT_OUTPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Default input buffer size (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Slack added to every per-position growth target.
pub const POSITION_SLACK: usize = 100;

/// Capacity the line and events buffers need for a position of `depth`.
///
/// Five bytes per placement covers `^`, the mapq byte, the base code and `$`
/// with room to spare; indels and id annotations grow the buffer further.
#[inline]
pub const fn event_capacity_for_depth(depth: u32) -> usize {
    5 * depth as usize + POSITION_SLACK
}

/// Capacity the qualities side buffer needs for a position of `depth`.
#[inline]
pub const fn quality_capacity_for_depth(depth: u32) -> usize {
    depth as usize + POSITION_SLACK
}
