//! Reference list parser for sequence lengths.
//!
//! Parses genome files (tab-delimited: name\tlength). The list fixes the
//! order in which references are walked and supplies the lengths needed to
//! walk a whole reference when empty positions are reported.

use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::error::{PileupError, Result};
use crate::source::Reference;

/// Reference names and lengths in file order.
#[derive(Debug, Clone, Default)]
pub struct ReferenceList {
    lengths: FxHashMap<String, u64>,
    order: Vec<String>,
}

impl ReferenceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a reference list from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load a reference list from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let reader = BufReader::new(reader);
        let mut list = Self::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split('\t');
            let (Some(name), Some(length)) = (fields.next(), fields.next()) else {
                return Err(PileupError::Parse {
                    line: line_num + 1,
                    message: "Reference list requires two columns: name and length".to_string(),
                });
            };
            let length: u64 = length.parse().map_err(|_| PileupError::Parse {
                line: line_num + 1,
                message: format!("Invalid reference length: {}", length),
            })?;

            list.insert(name.to_string(), length);
        }

        Ok(list)
    }

    /// Length of a reference.
    #[inline]
    pub fn length(&self, name: &str) -> Option<u64> {
        self.lengths.get(name).copied()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.lengths.contains_key(name)
    }

    /// References in file order.
    pub fn references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.order
            .iter()
            .map(|name| Reference::new(name.clone(), self.lengths[name]))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert a reference length (appends to order if new).
    pub fn insert(&mut self, name: String, length: u64) {
        if !self.lengths.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.lengths.insert(name, length);
    }
}
