//! Streaming BED reader for alignment spans and exclusion regions.
//!
//! Alignments are read from BED6 lines with an optional seventh column:
//! `chrom start end name mapq strand [spot_group]`. The score column carries
//! the mapping quality (values above 255 are clamped). Regions only need the
//! first three columns.

use crate::error::{PileupError, Result};
use crate::interval::{Interval, Strand};
use crate::streaming::buffers::DEFAULT_INPUT_BUFFER;
use crate::streaming::parsing::{
    parse_bed3_bytes_with_rest, parse_u64_fast, should_skip_line, split_extra_fields,
};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// One ungapped alignment read from a BED line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    pub interval: Interval,
    pub name: Option<String>,
    pub mapq: u8,
    pub strand: Strand,
    pub spot_group: Option<String>,
}

impl AlignmentRecord {
    pub fn new(chrom: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            interval: Interval::new(chrom, start, end),
            name: None,
            mapq: 0,
            strand: Strand::Unknown,
            spot_group: None,
        }
    }

    #[inline]
    pub fn chrom(&self) -> &str {
        &self.interval.chrom
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.interval.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.interval.end
    }
}

/// A streaming BED reader.
pub struct BedReader<R: Read> {
    reader: BufReader<R>,
    line_number: usize,
    buffer: Vec<u8>,
}

impl BedReader<File> {
    /// Open a BED file from a path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file))
    }
}

impl<R: Read> BedReader<R> {
    /// Create a new BED reader from any readable source.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_INPUT_BUFFER, reader),
            line_number: 0,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Advance to the next data line, returning false at end of input.
    fn next_line(&mut self) -> Result<bool> {
        loop {
            self.buffer.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut self.buffer)?;
            if bytes_read == 0 {
                return Ok(false);
            }
            self.line_number += 1;

            while matches!(self.buffer.last(), Some(b'\n' | b'\r')) {
                self.buffer.pop();
            }
            if should_skip_line(&self.buffer) {
                continue;
            }
            return Ok(true);
        }
    }

    fn parse_error(&self, message: impl Into<String>) -> PileupError {
        PileupError::Parse {
            line: self.line_number,
            message: message.into(),
        }
    }

    fn parse_bed3(&self) -> Result<(Interval, usize)> {
        let (chrom, start, end, rest) = parse_bed3_bytes_with_rest(&self.buffer)
            .ok_or_else(|| self.parse_error("Expected at least 3 fields: chrom, start, end"))?;
        if start > end {
            return Err(self.parse_error(format!("Start ({}) > end ({})", start, end)));
        }
        let chrom = std::str::from_utf8(chrom)
            .map_err(|_| self.parse_error("Chromosome name is not valid UTF-8"))?;
        Ok((Interval::new(chrom, start, end), rest))
    }

    /// Read the next region (BED3 and beyond; extra columns are ignored).
    pub fn read_region(&mut self) -> Result<Option<Interval>> {
        if !self.next_line()? {
            return Ok(None);
        }
        self.parse_bed3().map(|(interval, _)| Some(interval))
    }

    /// Read the next alignment record.
    pub fn read_alignment(&mut self) -> Result<Option<AlignmentRecord>> {
        if !self.next_line()? {
            return Ok(None);
        }
        let (interval, rest) = self.parse_bed3()?;
        if interval.is_empty() {
            return Err(self.parse_error("Alignment covers no reference bases"));
        }

        let [name, score, strand, group] = split_extra_fields::<4>(&self.buffer[rest..]);
        let mapq = match score {
            Some(s) => parse_u64_fast(s)
                .ok_or_else(|| {
                    self.parse_error(format!(
                        "Invalid mapping quality: '{}'",
                        String::from_utf8_lossy(s)
                    ))
                })?
                .min(u8::MAX as u64) as u8,
            None => 0,
        };

        Ok(Some(AlignmentRecord {
            interval,
            name: name.map(|n| String::from_utf8_lossy(n).into_owned()),
            mapq,
            strand: strand
                .and_then(|s| s.first().copied())
                .map(Strand::from_byte)
                .unwrap_or(Strand::Unknown),
            spot_group: group
                .filter(|g| !g.is_empty())
                .map(|g| String::from_utf8_lossy(g).into_owned()),
        }))
    }

    /// Iterator over alignment records.
    pub fn alignments(self) -> AlignmentIter<R> {
        AlignmentIter { reader: self }
    }

    /// Iterator over regions.
    pub fn regions(self) -> RegionIter<R> {
        RegionIter { reader: self }
    }
}

/// Iterator over alignment records.
pub struct AlignmentIter<R: Read> {
    reader: BedReader<R>,
}

impl<R: Read> Iterator for AlignmentIter<R> {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_alignment().transpose()
    }
}

/// Iterator over regions.
pub struct RegionIter<R: Read> {
    reader: BedReader<R>,
}

impl<R: Read> Iterator for RegionIter<R> {
    type Item = Result<Interval>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_region().transpose()
    }
}

/// Read all alignments from a BED file.
pub fn read_alignments<P: AsRef<Path>>(path: P) -> Result<Vec<AlignmentRecord>> {
    BedReader::from_path(path)?.alignments().collect()
}

/// Read all regions from a BED file.
pub fn read_regions<P: AsRef<Path>>(path: P) -> Result<Vec<Interval>> {
    BedReader::from_path(path)?.regions().collect()
}

/// Parse alignments from a string (useful for testing).
pub fn parse_alignments(content: &str) -> Result<Vec<AlignmentRecord>> {
    BedReader::new(content.as_bytes()).alignments().collect()
}

/// Parse regions from a string (useful for testing).
pub fn parse_regions(content: &str) -> Result<Vec<Interval>> {
    BedReader::new(content.as_bytes()).regions().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alignment_bed6() {
        let content = "chr1\t100\t150\tread1\t60\t-\n";
        let records = parse_alignments(content).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chrom(), "chr1");
        assert_eq!(records[0].start(), 100);
        assert_eq!(records[0].end(), 150);
        assert_eq!(records[0].name.as_deref(), Some("read1"));
        assert_eq!(records[0].mapq, 60);
        assert_eq!(records[0].strand, Strand::Minus);
        assert_eq!(records[0].spot_group, None);
    }

    #[test]
    fn test_parse_alignment_with_spot_group() {
        let content = "chr1\t100\t150\tread1\t900\t+\tlibA\r\n";
        let records = parse_alignments(content).unwrap();
        assert_eq!(records[0].mapq, 255);
        assert_eq!(records[0].spot_group.as_deref(), Some("libA"));
    }

    #[test]
    fn test_parse_alignment_bed3_defaults() {
        let records = parse_alignments("chr2\t5\t6\n").unwrap();
        assert_eq!(records[0].mapq, 0);
        assert_eq!(records[0].strand, Strand::Unknown);
        assert_eq!(records[0].name, None);
    }

    #[test]
    fn test_skip_comments_and_track_lines() {
        let content = "# comment\ntrack name=test\nchr1\t100\t200\n\n";
        assert_eq!(parse_regions(content).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_lines() {
        let err = parse_regions("chr1\t100\n").unwrap_err();
        assert!(matches!(err, PileupError::Parse { line: 1, .. }));

        let err = parse_alignments("chr1\t1\t5\tr\tsixty\t+\n").unwrap_err();
        assert!(matches!(err, PileupError::Parse { line: 1, .. }));

        let err = parse_alignments("chr1\t10\t10\n").unwrap_err();
        assert!(matches!(err, PileupError::Parse { .. }));

        let err = parse_regions("chr1\t300\t200\n").unwrap_err();
        assert!(err.to_string().contains("Start (300) > end (200)"));
    }

    #[test]
    fn test_read_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "chr1\t0\t4\tr1\t20\t+").unwrap();
        writeln!(file, "chr1\t2\t6\tr2\t30\t-").unwrap();
        file.flush().unwrap();

        let records = read_alignments(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].mapq, 30);
    }
}
