//! BlockHaloError: Unified error type for block-halo public APIs
//!
//! Every fallible entry point of the crate returns this error. Configuration
//! errors are raised at call entry before any data is touched; protocol and
//! resource errors are raised after the session has drained its outstanding
//! transport handles and released its scratch buffers.

use std::fmt::Debug;
use thiserror::Error;

use crate::geometry::{IndexBox, IndexType, IntVect};

/// Unified error type for block-halo operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockHaloError {
    /// Source and destination collections use different index types.
    #[error("index type mismatch: destination is {dst:?}, source is {src:?}")]
    IndexTypeMismatch { dst: IndexType, src: IndexType },
    /// Requested ghost width exceeds what the collection allocates.
    #[error("ghost width {requested:?} exceeds allocated ghost width {allocated:?}")]
    GhostTooWide {
        requested: IntVect,
        allocated: IntVect,
    },
    /// Component window `[start, start+count)` does not fit in `available` components.
    #[error("component window [{start}, {start}+{count}) exceeds {available} components")]
    ComponentWindow {
        start: usize,
        count: usize,
        available: usize,
    },
    /// Two geometries that must agree do not.
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),
    /// Invalid geometry input (empty box, mixed index types, bad rank...).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// The output block of a gather does not contain the requested sub-box.
    #[error("output block {block:?} does not contain sub-box {sub_box:?}")]
    SubBoxNotContained { block: IndexBox, sub_box: IndexBox },
    /// The gather sub-box differs between processes.
    #[error("sub-box on rank {rank} is {local:?}, rank 0 has {root:?}")]
    SubBoxMismatch {
        rank: usize,
        local: IndexBox,
        root: IndexBox,
    },
    /// Received byte count differs from the size computed from the tag set.
    #[error("protocol violation from rank {peer}: expected {expected} bytes, got {got}")]
    ProtocolViolation {
        peer: usize,
        expected: usize,
        got: usize,
    },
    /// Communication failure.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        source: CommFailure,
    },
    /// The scratch-buffer arena cannot satisfy an allocation.
    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    ArenaExhausted { requested: usize, available: usize },
    /// A scratch buffer slice cannot be viewed as the element type.
    #[error("buffer of {len} bytes at offset {offset} is not aligned for the element type")]
    BufferAlignment { offset: usize, len: usize },
    /// A block the tag set refers to is not stored on this process.
    #[error("block {0} is not stored on this process")]
    MissingBlock(usize),
    /// A tag violates its structural invariants.
    #[error("invalid tag: {0}")]
    InvalidTag(String),
}

/// Opaque message carried by [`BlockHaloError::CommError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommFailure(String);

impl std::fmt::Display for CommFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CommFailure {}

impl From<String> for CommFailure {
    fn from(s: String) -> Self {
        CommFailure(s)
    }
}

impl From<&str> for CommFailure {
    fn from(s: &str) -> Self {
        CommFailure(s.to_owned())
    }
}

/// Check that `[start, start+count)` fits in `available` components.
pub(crate) fn check_component_window(
    start: usize,
    count: usize,
    available: usize,
) -> Result<(), BlockHaloError> {
    match start.checked_add(count) {
        Some(end) if end <= available => Ok(()),
        _ => Err(BlockHaloError::ComponentWindow {
            start,
            count,
            available,
        }),
    }
}
