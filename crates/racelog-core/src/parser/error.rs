//! Parse errors

use thiserror::Error;

/// Why a line was rejected.
///
/// A rejected line never produces a partial reading; callers discard it and
/// continue with the next line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Field count mismatch: got {found} fields, expected one of {expected:?}")]
    FieldCountMismatch { found: usize, expected: Vec<usize> },

    #[error("Invalid value '{value}' for field {index} ({column})")]
    FieldFormat {
        index: usize,
        column: String,
        value: String,
    },
}

impl ParseError {
    /// Index of the offending field, if the failure is tied to one
    pub fn field_index(&self) -> Option<usize> {
        match self {
            ParseError::FieldCountMismatch { .. } => None,
            ParseError::FieldFormat { index, .. } => Some(*index),
        }
    }
}
