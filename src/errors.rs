//! Error types for the chunk manager.
//!
//! Errors are stage-specific: the block pool reports its own failure modes
//! and the manager folds them into its API-level kinds. All enums are
//! `#[non_exhaustive]` so variants can be added without breaking callers.
//!
//! Every error here is recoverable at the caller: a failed call leaves the
//! manager state untouched (strong exception safety), so the caller may
//! retry, shrink the request, or end the visit.

use std::fmt;

/// Errors from the block pool allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AllocError {
    /// A single request asked for more blocks than the per-chunk cap.
    OutOfRange { requested: usize, max: usize },
    /// Fewer free blocks remain than the request needs.
    OutOfMemory { requested: usize, free: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { requested, max } => {
                write!(f, "requested {requested} blocks, per-chunk cap is {max}")
            }
            Self::OutOfMemory { requested, free } => {
                write!(f, "requested {requested} blocks, only {free} free")
            }
        }
    }
}

impl std::error::Error for AllocError {}

/// Errors from the public `ChunkManager` API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The visit is already registered as in-flight.
    AlreadyInFlight { visit_id: i64 },
    /// The operation requires a valid (in-flight, unfailed) visit.
    NotInFlight { visit_id: i64 },
    /// A fixed pool (visits, descriptors, interest queue, or blocks) is
    /// full.
    CapacityExceeded { what: &'static str },
    /// The ownership wait expired before the visit owned every chunk.
    DeadlineExceeded { visit_id: i64 },
    /// A block request exceeded the per-chunk cap.
    OutOfRange { requested: usize, max: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInFlight { visit_id } => {
                write!(f, "visit {visit_id} is already in flight")
            }
            Self::NotInFlight { visit_id } => {
                write!(f, "visit {visit_id} is not in flight")
            }
            Self::CapacityExceeded { what } => {
                write!(f, "capacity exceeded: {what}")
            }
            Self::DeadlineExceeded { visit_id } => {
                write!(f, "deadline expired while visit {visit_id} waited for ownership")
            }
            Self::OutOfRange { requested, max } => {
                write!(f, "requested {requested} blocks, per-chunk cap is {max}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<AllocError> for Error {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::OutOfRange { requested, max } => Self::OutOfRange { requested, max },
            AllocError::OutOfMemory { .. } => Self::CapacityExceeded { what: "block pool" },
        }
    }
}
