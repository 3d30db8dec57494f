//! Structured tracing support.
//!
//! When the `tracing` feature is enabled, this module provides spans and
//! events for registry passes, table sweeps and barrier phase changes.

#[cfg(feature = "tracing")]
pub mod internal {
    use tracing::{span, Level};

    /// Span covering one weak-callback pass over a handle registry.
    pub fn trace_weak_pass(pass: u8, candidates: usize) -> span::EnteredSpan {
        span!(Level::DEBUG, "weak_pass", pass, candidates).entered()
    }

    /// Span covering one entity-table sweep of a space.
    pub fn trace_table_sweep(owned_segments: usize) -> span::EnteredSpan {
        span!(Level::DEBUG, "table_sweep", owned_segments).entered()
    }

    /// Log a write-barrier activation change.
    pub fn log_barrier_enabled(enabled: bool) {
        tracing::debug!(enabled, "write_barrier");
    }

    /// Log the outcome of a table sweep.
    pub fn log_table_sweep_end(live: usize) {
        tracing::debug!(live, "table_sweep_end");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub scope when tracing is disabled.
    pub struct NoopSpan;

    /// Stub when tracing is disabled.
    pub fn trace_weak_pass(_pass: u8, _candidates: usize) -> NoopSpan {
        NoopSpan
    }

    /// Stub when tracing is disabled.
    pub fn trace_table_sweep(_owned_segments: usize) -> NoopSpan {
        NoopSpan
    }

    /// Stub when tracing is disabled.
    pub fn log_barrier_enabled(_enabled: bool) {}

    /// Stub when tracing is disabled.
    pub fn log_table_sweep_end(_live: usize) {}
}
