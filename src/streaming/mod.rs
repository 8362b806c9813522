//! Low-level I/O helpers shared by the readers and the walker.
//!
//! - Zero-allocation BED field parsing
//! - Append-only line buffers with fallible growth
//! - Buffer sizing constants

pub mod buffers;
pub mod line_buffer;
pub mod parsing;

pub use line_buffer::LineBuffer;
pub use parsing::{parse_bed3_bytes, parse_bed3_bytes_with_rest, parse_u64_fast, should_skip_line};
