//! 4na base codes and their ASCII rendering.
//!
//! Placement sources report bases as 4-bit IUPAC codes (bit 0 = A, bit 1 = C,
//! bit 2 = G, bit 3 = T). Bases on the reverse strand are rendered in lower
//! case, following the samtools pileup convention.

/// Upper-case table for forward strand, lower-case table for reverse strand.
const FOUR_NA_TO_ASCII: [u8; 32] = *b"NACMGRSVTWYHKDBNnacmgrsvtwyhkdbn";

/// 4na code for N (no base).
pub const N: u8 = 0x0;
pub const A: u8 = 0x1;
pub const C: u8 = 0x2;
pub const G: u8 = 0x4;
pub const T: u8 = 0x8;

/// Render a 4na code as ASCII. Only the low nibble of `code` is used.
#[inline]
pub fn to_ascii(code: u8, reverse: bool) -> u8 {
    let idx = (code & 0x0F) as usize | if reverse { 0x10 } else { 0 };
    FOUR_NA_TO_ASCII[idx]
}

/// Parse an ASCII IUPAC base into a 4na code; unknown bytes map to N.
#[inline]
pub fn from_ascii(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => 0x1,
        b'C' => 0x2,
        b'M' => 0x3,
        b'G' => 0x4,
        b'R' => 0x5,
        b'S' => 0x6,
        b'V' => 0x7,
        b'T' => 0x8,
        b'W' => 0x9,
        b'Y' => 0xA,
        b'H' => 0xB,
        b'K' => 0xC,
        b'D' => 0xD,
        b'B' => 0xE,
        _ => N,
    }
}

/// Encode an ASCII sequence into 4na codes.
pub fn encode(seq: &str) -> Vec<u8> {
    seq.bytes().map(from_ascii).collect()
}
