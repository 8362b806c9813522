//! Zero-allocation BED field parsing.
//!
//! These functions locate tab-separated fields with memchr and parse
//! integers straight from bytes, without heap allocation in the hot path.

use memchr::memchr;

/// Fast u64 parsing - no allocation, no error formatting.
///
/// Returns None if the input is empty or contains non-digit characters.
#[inline(always)]
pub fn parse_u64_fast(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        let d = b.wrapping_sub(b'0');
        if d > 9 {
            return None;
        }
        n = n.wrapping_mul(10).wrapping_add(d as u64);
    }
    Some(n)
}

/// Parse BED3 fields using memchr - zero allocation.
///
/// Returns (chrom_bytes, start, end) or None if parsing fails.
#[inline(always)]
pub fn parse_bed3_bytes(line: &[u8]) -> Option<(&[u8], u64, u64)> {
    parse_bed3_bytes_with_rest(line).map(|(chrom, start, end, _)| (chrom, start, end))
}

/// Parse BED3 fields and return the rest of line index.
///
/// Returns (chrom_bytes, start, end, rest_start_idx) where rest_start_idx
/// is the byte offset of the tab that precedes the fourth column (or the
/// line length if there is none).
#[inline(always)]
pub fn parse_bed3_bytes_with_rest(line: &[u8]) -> Option<(&[u8], u64, u64, usize)> {
    let tab1 = memchr(b'\t', line)?;
    let chrom = &line[..tab1];

    let rest1 = &line[tab1 + 1..];
    let tab2 = memchr(b'\t', rest1)?;
    let start = parse_u64_fast(&rest1[..tab2])?;

    let rest2 = &rest1[tab2 + 1..];
    let end_len = memchr(b'\t', rest2).unwrap_or(rest2.len());
    let end_len_trimmed = memchr(b'\n', &rest2[..end_len]).unwrap_or(end_len);
    let end = parse_u64_fast(&rest2[..end_len_trimmed])?;

    let rest_start = tab1 + 1 + tab2 + 1 + end_len;

    Some((chrom, start, end, rest_start))
}

/// Split the columns after BED3 into at most `N` fields.
///
/// `rest` is the slice starting at the tab before column four, as located by
/// [`parse_bed3_bytes_with_rest`]. Missing columns are `None`.
#[inline]
pub fn split_extra_fields<const N: usize>(rest: &[u8]) -> [Option<&[u8]>; N] {
    let mut fields = [None; N];
    let mut remaining = match rest.first() {
        Some(b'\t') => &rest[1..],
        _ => return fields,
    };
    for slot in fields.iter_mut() {
        let end = memchr(b'\t', remaining).unwrap_or(remaining.len());
        *slot = Some(&remaining[..end]);
        if end == remaining.len() {
            break;
        }
        remaining = &remaining[end + 1..];
    }
    fields
}

/// Check if a line should be skipped (empty, comment, or header).
#[inline(always)]
pub fn should_skip_line(line: &[u8]) -> bool {
    line.is_empty() || line[0] == b'#' || line.starts_with(b"track") || line.starts_with(b"browser")
}
