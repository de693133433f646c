//! NetMaster Common - shared types for the global control plane
//!
//! This crate provides the capabilities the coordinator is built on:
//! - State store abstraction with typed records
//! - VLAN/VXLAN tag ranges and the range parser
//! - Error types

#![warn(clippy::all)]

pub mod error;
pub mod range;
pub mod state;

pub use error::*;
pub use range::{RangeParser, TagKind, TagRange, TagRangeParser, TagRanges};
pub use state::{
    clear_record, probe_record, read_record, write_record, InMemoryStateStore, StateRecord,
    StateStore,
};
