//! Error types shared by NetMaster crates

use thiserror::Error;

use crate::range::TagKind;

/// State store error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// No record stored under the key
    #[error("key not found: {0}")]
    NotFound(String),

    /// Stored bytes could not be (de)serialized
    #[error("codec error for {key}: {reason}")]
    Codec { key: String, reason: String },

    /// Backend read/write/clear failure
    #[error("backend error: {0}")]
    Backend(String),
}

impl StateError {
    /// True for the "no such key" condition many callers treat as benign
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }
}

/// Result type for state store operations
pub type StateResult<T> = Result<T, StateError>;

/// Range specification parse error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// Empty range specification
    #[error("empty {0} range")]
    Empty(TagKind),

    /// Item is not `a` or `a-b`
    #[error("invalid {kind} range item '{item}'")]
    Malformed { kind: TagKind, item: String },

    /// Range with start greater than end
    #[error("invalid {kind} range {start}-{end}")]
    Inverted { kind: TagKind, start: u32, end: u32 },

    /// Tag outside the addressable space for the kind
    #[error("{kind} tag {tag} out of bounds {min}-{max}")]
    OutOfBounds {
        kind: TagKind,
        tag: u32,
        min: u32,
        max: u32,
    },

    /// More ranges than the kind supports
    #[error("{kind} supports at most {max} range(s), got {got}")]
    TooManyRanges { kind: TagKind, max: usize, got: usize },
}
