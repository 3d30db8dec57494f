//! Error types surfaced to the embedder.
//!
//! Almost nothing in this layer is recoverable: contract violations (double
//! destroy, freeing a free node, sweeping outside a safepoint) are hard
//! panics because they indicate memory-safety or sandbox violations. The one
//! genuinely recoverable condition is allocation failure while growing a
//! node block or an entity-table segment, which surfaces here.

use thiserror::Error;

/// Recoverable failures reported to the embedding heap.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GcError {
    /// The process allocator refused to grow a node block or table segment.
    #[error("out of memory growing {what}")]
    OutOfMemory {
        /// The structure that failed to grow.
        what: &'static str,
    },

    /// The entity table has reached its reserved maximum capacity.
    #[error("entity table exhausted ({capacity} entries)")]
    TableExhausted {
        /// Total entry capacity of the table.
        capacity: usize,
    },
}

impl From<std::collections::TryReserveError> for GcError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory {
            what: "node block storage",
        }
    }
}
