//! Caller-input errors `Mems` can report without disturbing its state.
//!
//! Environmental failures (the page provider refusing a request) are
//! not represented here: per the allocator's contract they are fatal
//! and unwind the process via `panic!` rather than returning a value
//! a caller could try to recover from.
use std::fmt;

/// Errors surfaced by the public façade. These never mutate `Mems`'s
/// state; the caller is always free to keep using the allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemsError {
    /// `malloc` was asked for zero bytes.
    InvalidSize,
    /// `free` or `translate` was given a handle that does not match
    /// any live `Process` segment.
    UnknownAddress,
}

impl fmt::Display for MemsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemsError::InvalidSize => write!(f, "mems: malloc size must be positive"),
            MemsError::UnknownAddress => write!(f, "mems: no such address found"),
        }
    }
}

impl std::error::Error for MemsError {}
