//! NetMaster error types

use std::time::Duration;

use netmaster_common::{RangeError, StateError, TagKind};
use thiserror::Error;

use crate::runtime::RuntimeError;

/// Coordinator and tenant service error
#[derive(Error, Debug)]
pub enum MasterError {
    /// Unrecognized enumerated value or missing required field
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed range specification
    #[error("invalid {kind} range '{spec}': {source}")]
    InvalidRange {
        kind: TagKind,
        spec: String,
        #[source]
        source: RangeError,
    },

    /// Requested range would orphan leased tags
    #[error("cannot update the {kind} range due to existing {kind}s {in_use:?}")]
    RangeConflict { kind: TagKind, in_use: Vec<u32> },

    /// Persistence failure
    #[error("state store: {0}")]
    StateStore(#[from] StateError),

    /// Container runtime call failed
    #[error("dependency: {0}")]
    Dependency(#[from] RuntimeError),

    /// Bounded backoff exceeded
    #[error("retry exhausted after {attempts} attempts ({elapsed:?}): {last_error}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    /// No pool configured for the kind
    #[error("no {0} pool configured")]
    PoolNotConfigured(TagKind),

    /// Tag lies outside the pool's range
    #[error("{kind} {tag} is outside the configured range")]
    TagOutOfRange { kind: TagKind, tag: u32 },

    /// Tag already leased
    #[error("{kind} {tag} is already in use")]
    TagInUse { kind: TagKind, tag: u32 },

    /// No free tag left
    #[error("{0} pool exhausted")]
    PoolExhausted(TagKind),
}

impl MasterError {
    /// True for a state store "not found" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, MasterError::StateStore(e) if e.is_not_found())
    }

    /// True for errors raised by input validation, before any mutation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MasterError::InvalidConfig(_)
                | MasterError::InvalidRange { .. }
                | MasterError::RangeConflict { .. }
        )
    }
}

/// Result type for NetMaster operations
pub type MasterResult<T> = Result<T, MasterError>;
