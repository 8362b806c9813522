//! Error types shared by the walker, the mate cache and the input readers.

use std::io;
use thiserror::Error;

/// Errors that can occur while building sources, walking references or
/// maintaining the mate cache.
///
/// "Not found" and "done" are not represented here: lookups return `Option`
/// and source iteration returns `Ok(None)` when a level is exhausted.
#[derive(Error, Debug)]
pub enum PileupError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid input: {0}")]
    InvalidFormat(String),

    #[error("cannot grow {what} to {requested} bytes")]
    ResourceExhausted { what: &'static str, requested: usize },

    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("placement source failed: {0}")]
    Source(String),

    /// A failure that aborted a reference walk, annotated with the last
    /// reference and 1-based position the walker reached.
    #[error("walk aborted at {reference}:{}: {source}", display_position(.position))]
    Walk {
        reference: String,
        position: Option<u64>,
        #[source]
        source: Box<PileupError>,
    },
}

fn display_position(position: &Option<u64>) -> String {
    match position {
        Some(p) => p.to_string(),
        None => "-".to_string(),
    }
}

impl PileupError {
    /// The innermost error, looking through `Walk` annotations.
    pub fn root(&self) -> &PileupError {
        match self {
            PileupError::Walk { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PileupError>;
