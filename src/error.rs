//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The memory manager could not supply a full batch of page buffers.
    /// Fatal at cache construction; during expansion it is absorbed and
    /// the table keeps serving lookups at its pre-expansion size.
    OutOfMemory,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Internal signal raised by a cell after it has grown the table: the
/// routing parameters changed while the caller held a stale cell, so the
/// lookup must restart from the table. Never surfaced to callers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExpandNeeded;
